// ABOUTME: Billing wrapper around one dialogue
// Tracks request count and accumulated cost between start and end of a dialogue

use crate::utils::cost_calculator::round_cost;
use chrono::{DateTime, Local};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub account_id: String,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub request_count: u32,
    /// Sum of the cost of every exchange counted in `request_count`
    pub accumulated_cost: f64,
}

impl Session {
    pub fn start(account_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            start_time: Local::now(),
            end_time: None,
            request_count: 0,
            accumulated_cost: 0.0,
        }
    }

    pub fn record_exchange(&mut self, cost: f64) {
        self.request_count += 1;
        self.accumulated_cost = round_cost(self.accumulated_cost + cost);
    }

    pub fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Local::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        let end = self.end_time.unwrap_or_else(Local::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }
}
