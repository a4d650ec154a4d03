use crate::llm::Provider;
use crate::portfolio::FormError;
use std::fmt;

pub const SAFETY_MESSAGE: &str =
    "Please enter valid stock tickers, ETFs, or company names only. Non-financial or unsafe input was rejected.";
pub const INVALID_DATA_MESSAGE: &str = "Received invalid prediction data. Please try again.";
pub const GENERIC_MESSAGE: &str = "Failed to generate a forecast. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error(transparent)]
    Validation(#[from] FormError),

    #[error("model rejected the input{}", reason_suffix(.reason))]
    SafetyRejection { reason: Option<String> },

    #[error("forecast request failed: {0}")]
    Transport(String),

    #[error("invalid prediction data: {0}")]
    InvalidPayload(String),

    #[error("prediction data failed validation: {0}")]
    Structure(String),
}

impl ForecastError {
    /// Stable tag for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::Validation(_) => "validation",
            ForecastError::SafetyRejection { .. } => "safety_rejection",
            ForecastError::Transport(_) => "transport",
            ForecastError::InvalidPayload(_) => "invalid_payload",
            ForecastError::Structure(_) => "structure",
        }
    }

    /// Short message meant for the person filling in the form.
    pub fn user_message(&self) -> String {
        match self {
            ForecastError::Validation(err) => err.to_string(),
            ForecastError::SafetyRejection { .. } => SAFETY_MESSAGE.to_string(),
            ForecastError::InvalidPayload(_) | ForecastError::Structure(_) => {
                INVALID_DATA_MESSAGE.to_string()
            }
            ForecastError::Transport(_) => GENERIC_MESSAGE.to_string(),
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// Diagnostics cover the HTTP exchange only; the model text is judged by `json::parse_forecast`.
impl From<LlmDiagnosticsError> for ForecastError {
    fn from(err: LlmDiagnosticsError) -> Self {
        ForecastError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}): {}",
            self.provider.as_str(),
            self.stage,
            self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}
