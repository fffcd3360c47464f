// ABOUTME: cost_calculator resolves per-token prices for completion models
// Exact model ids win, otherwise the longest matching model family supplies the rate

use crate::utils::error::{ChatMeterError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Number of decimal places every monetary value is rounded to
pub const COST_DECIMALS: i32 = 8;

/// Model used when the operator does not pick one
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Round a monetary value to the fixed billing precision
pub fn round_cost(value: f64) -> f64 {
    let factor = 10f64.powi(COST_DECIMALS);
    (value * factor).round() / factor
}

/// One row of the pricing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub id: String,
    #[serde(rename = "display")]
    pub display_name: String,
    pub family: String,
    /// Cost per token in USD
    #[serde(rename = "cpt")]
    pub cost_per_token: f64,
}

impl PricingEntry {
    pub fn new(id: &str, display_name: &str, family: &str, cost_per_token: f64) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            family: family.to_string(),
            cost_per_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PricingFile {
    models: Vec<PricingEntry>,
}

/// Token usage reported by the completion API for one exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens as u64 + self.completion_tokens as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Family,
}

/// Outcome of looking a model up in the pricing table
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLookup {
    Found { rate: f64, matched: MatchKind },
    NotFound,
}

/// Prices completed exchanges and worst-case request budgets
#[derive(Debug, Clone)]
pub struct CostCalculator {
    entries: Vec<PricingEntry>,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl CostCalculator {
    /// Create a calculator with the built-in pricing table
    pub fn new() -> Self {
        Self::from_entries(vec![
            PricingEntry::new("gpt-3.5-turbo", "GPT-3.5 Turbo", "gpt-3.5", 0.000002),
            PricingEntry::new(
                "gpt-3.5-turbo-16k",
                "GPT-3.5 Turbo 16k",
                "gpt-3.5-turbo-16k",
                0.000004,
            ),
            PricingEntry::new("gpt-4", "GPT-4", "gpt-4", 0.00006),
            PricingEntry::new("gpt-4-32k", "GPT-4 32k", "gpt-4-32k", 0.00012),
            PricingEntry::new("text-davinci-003", "Davinci", "davinci", 0.00002),
        ])
    }

    pub fn from_entries(entries: Vec<PricingEntry>) -> Self {
        Self { entries }
    }

    /// Load pricing from a JSON file shaped like `{ "models": [ {id, display, family, cpt} ] }`
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let file: PricingFile = serde_json::from_str(&content)?;

        if file.models.is_empty() {
            return Err(ChatMeterError::Config(format!(
                "Pricing file {} contains no models",
                path.as_ref().display()
            )));
        }
        if let Some(bad) = file
            .models
            .iter()
            .find(|m| !m.cost_per_token.is_finite() || m.cost_per_token < 0.0)
        {
            return Err(ChatMeterError::Config(format!(
                "Model {} has an invalid cost per token: {}",
                bad.id, bad.cost_per_token
            )));
        }

        Ok(Self::from_entries(file.models))
    }

    /// Resolve the per-token rate: exact id first, then the longest family substring.
    /// Both steps ignore case.
    pub fn resolve(&self, model: &str) -> RateLookup {
        if let Some(entry) = self.entries.iter().find(|e| e.id.eq_ignore_ascii_case(model)) {
            return RateLookup::Found {
                rate: entry.cost_per_token,
                matched: MatchKind::Exact,
            };
        }

        let lowered = model.to_lowercase();
        self.entries
            .iter()
            .filter(|e| !e.family.is_empty() && lowered.contains(&e.family.to_lowercase()))
            .max_by_key(|e| e.family.len())
            .map(|e| RateLookup::Found {
                rate: e.cost_per_token,
                matched: MatchKind::Family,
            })
            .unwrap_or(RateLookup::NotFound)
    }

    /// Cost of `total_tokens` on `model`, rounded to the billing precision
    pub fn cost(&self, model: &str, total_tokens: u64) -> Result<f64> {
        match self.resolve(model) {
            RateLookup::Found { rate, .. } => Ok(round_cost(total_tokens as f64 * rate)),
            RateLookup::NotFound => Err(ChatMeterError::PricingLookupFailed {
                model: model.to_string(),
            }),
        }
    }

    /// Cost of a completed exchange from its usage metadata
    pub fn cost_from_usage(&self, model: &str, usage: &TokenUsage) -> Result<f64> {
        self.cost(model, usage.total())
    }

    /// Upper bound for a request before it is sent
    pub fn max_possible_cost(&self, model: &str, max_tokens: u32) -> Result<f64> {
        self.cost(model, max_tokens as u64)
    }

    pub fn available_models(&self) -> &[PricingEntry] {
        &self.entries
    }

    /// Find a model by id or display name, ignoring case
    pub fn find_model(&self, name: &str) -> Option<&PricingEntry> {
        let wanted = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|e| e.id.to_lowercase() == wanted || e.display_name.to_lowercase() == wanted)
    }

    /// Format cost as USD string
    pub fn format_cost(cost: f64) -> String {
        format!("${:.5}", cost)
    }
}
