use crate::domain::forecast::AnalysisResult;
use crate::domain::holding::Holding;
use crate::llm::error::ForecastError;

pub mod error;
pub mod gemini;
pub mod json;
pub mod prompt;
pub mod schema;

/// Snapshot of a validated form, handed to a [`ForecastClient`].
#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub holdings: Vec<Holding>,
    pub initial_investment: f64,
    pub as_of_date: chrono::NaiveDate,
}

impl ForecastRequest {
    pub fn new(holdings: Vec<Holding>, initial_investment: f64) -> Self {
        Self {
            holdings,
            initial_investment,
            as_of_date: chrono::Utc::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
        }
    }
}

#[async_trait::async_trait]
pub trait ForecastClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Issues exactly one request to the model. No retries.
    async fn forecast(&self, request: &ForecastRequest) -> Result<AnalysisResult, ForecastError>;
}
