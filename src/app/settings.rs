// ABOUTME: Typed request settings sent with every completion call
// Each recognized parameter carries its own validation rule; unknown keys are rejected

use crate::utils::cost_calculator::DEFAULT_MODEL;
use crate::utils::error::{ChatMeterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_TOKENS_LIMIT: u32 = 8000;

/// Model and sampling parameters for a completion request.
///
/// Values are replaced, never mutated in place: every setter consumes the
/// current settings and returns a validated copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RequestSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            temperature: 1.2,
            top_p: 1.0,
            frequency_penalty: 0.5,
            presence_penalty: 0.5,
        }
    }
}

/// Editable sampling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Temperature,
    MaxTokens,
    TopP,
    FrequencyPenalty,
    PresencePenalty,
}

impl Parameter {
    pub const ALL: [Parameter; 5] = [
        Parameter::Temperature,
        Parameter::MaxTokens,
        Parameter::TopP,
        Parameter::FrequencyPenalty,
        Parameter::PresencePenalty,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::MaxTokens => "max_tokens",
            Self::TopP => "top_p",
            Self::FrequencyPenalty => "frequency_penalty",
            Self::PresencePenalty => "presence_penalty",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Temperature => "Set the temperature (0 to 2)",
            Self::MaxTokens => "Set the maximum number of tokens (1 to 8000)",
            Self::TopP => "Set the top p value (0 to 1)",
            Self::FrequencyPenalty => "Set the frequency penalty (-2 to 2)",
            Self::PresencePenalty => "Set the presence penalty (-2 to 2)",
        }
    }

    fn range(&self) -> (f64, f64) {
        match self {
            Self::Temperature => (0.0, 2.0),
            Self::MaxTokens => (1.0, MAX_TOKENS_LIMIT as f64),
            Self::TopP => (0.0, 1.0),
            Self::FrequencyPenalty | Self::PresencePenalty => (-2.0, 2.0),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for Parameter {
    type Err = ChatMeterError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.key() == key)
            .ok_or(ChatMeterError::UnknownParameter(key))
    }
}

fn invalid(parameter: Parameter, value: &str, reason: impl Into<String>) -> ChatMeterError {
    ChatMeterError::InvalidParameter {
        name: parameter.key().to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn check_range(parameter: Parameter, value: f64, raw: &str) -> Result<()> {
    let (low, high) = parameter.range();
    if !value.is_finite() || value < low || value > high {
        return Err(invalid(
            parameter,
            raw,
            format!("must be between {} and {}", low, high),
        ));
    }
    Ok(())
}

impl RequestSettings {
    pub fn with_model(self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    /// Parse and validate `raw` for `parameter`, returning the updated settings
    pub fn with_parameter(self, parameter: Parameter, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if parameter == Parameter::MaxTokens {
            let value: u32 = raw
                .parse()
                .map_err(|_| invalid(parameter, raw, "must be a whole number"))?;
            check_range(parameter, value as f64, raw)?;
            return Ok(Self {
                max_tokens: value,
                ..self
            });
        }

        let value: f64 = raw
            .parse()
            .map_err(|_| invalid(parameter, raw, "must be a number"))?;
        check_range(parameter, value, raw)?;

        Ok(match parameter {
            Parameter::Temperature => Self {
                temperature: value,
                ..self
            },
            Parameter::TopP => Self { top_p: value, ..self },
            Parameter::FrequencyPenalty => Self {
                frequency_penalty: value,
                ..self
            },
            Parameter::PresencePenalty => Self {
                presence_penalty: value,
                ..self
            },
            Parameter::MaxTokens => self,
        })
    }

    /// Validate values that came from a config file
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ChatMeterError::InvalidParameter {
                name: "model".to_string(),
                value: self.model.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        check_range(
            Parameter::MaxTokens,
            self.max_tokens as f64,
            &self.max_tokens.to_string(),
        )?;
        for (parameter, value) in [
            (Parameter::Temperature, self.temperature),
            (Parameter::TopP, self.top_p),
            (Parameter::FrequencyPenalty, self.frequency_penalty),
            (Parameter::PresencePenalty, self.presence_penalty),
        ] {
            check_range(parameter, value, &value.to_string())?;
        }
        Ok(())
    }

    pub fn value_of(&self, parameter: Parameter) -> String {
        match parameter {
            Parameter::Temperature => self.temperature.to_string(),
            Parameter::MaxTokens => self.max_tokens.to_string(),
            Parameter::TopP => self.top_p.to_string(),
            Parameter::FrequencyPenalty => self.frequency_penalty.to_string(),
            Parameter::PresencePenalty => self.presence_penalty.to_string(),
        }
    }
}
