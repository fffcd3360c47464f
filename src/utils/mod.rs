pub mod cost_calculator;
pub mod error;

pub use cost_calculator::{
    round_cost, CostCalculator, MatchKind, PricingEntry, RateLookup, TokenUsage, DEFAULT_MODEL,
};
pub use error::{ChatMeterError, Result};
