use crate::domain::forecast::AnalysisResult;
use crate::domain::holding::{
    Holding, DEFAULT_INVESTMENT, MAX_HOLDINGS, MAX_SYMBOL_LEN, MIN_INVESTMENT,
};
use crate::llm::error::ForecastError;
use crate::llm::{ForecastClient, ForecastRequest};
use serde::Serialize;
use uuid::Uuid;

const TARGET_TOTAL_WEIGHT: f64 = 100.0;
// Absorbs binary rounding of decimal inputs (33.3 + 33.3 + 33.4).
const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormError {
    #[error("Please enter a valid ticker or company name.")]
    EmptySymbol,
    #[error("You can add at most {max} holdings.")]
    TooManyHoldings { max: usize },
    #[error("Weight must be a positive number.")]
    InvalidWeight,
    #[error("Weight cannot exceed 100%.")]
    WeightTooLarge,
    #[error("Initial investment must be a non-negative number.")]
    InvalidInvestment,
    #[error("Total allocation must equal 100% (currently {total:.2}%).")]
    WeightTotal { total: f64 },
    #[error("Initial investment must be at least ${min}.")]
    InvestmentTooLow { min: f64 },
    #[error("A forecast is already being generated.")]
    InFlight,
}

/// What the view shows. Exactly one of these is current at any time.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ForecastState {
    #[default]
    Idle,
    Loading,
    Error { message: String },
    Ready { result: AnalysisResult },
}

/// Keeps only `[A-Za-z0-9.\- ]`, in order, capped at 50 characters.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ' '))
        .take(MAX_SYMBOL_LEN)
        .collect()
}

#[derive(Debug, Clone)]
pub struct PortfolioForm {
    holdings: Vec<Holding>,
    initial_investment: f64,
    state: ForecastState,
}

impl Default for PortfolioForm {
    fn default() -> Self {
        Self::new()
    }
}

impl PortfolioForm {
    pub fn new() -> Self {
        Self {
            holdings: Vec::new(),
            initial_investment: DEFAULT_INVESTMENT,
            state: ForecastState::Idle,
        }
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn initial_investment(&self) -> f64 {
        self.initial_investment
    }

    pub fn state(&self) -> &ForecastState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, ForecastState::Loading)
    }

    pub fn add_holding(&mut self, symbol: &str, weight: f64) -> Result<&Holding, FormError> {
        let symbol = sanitize(symbol).trim().to_string();
        if symbol.is_empty() {
            return Err(FormError::EmptySymbol);
        }
        if self.holdings.len() >= MAX_HOLDINGS {
            return Err(FormError::TooManyHoldings { max: MAX_HOLDINGS });
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(FormError::InvalidWeight);
        }
        if weight > TARGET_TOTAL_WEIGHT {
            return Err(FormError::WeightTooLarge);
        }

        self.holdings.push(Holding::new(symbol, weight));
        let added = &self.holdings[self.holdings.len() - 1];
        tracing::debug!(id = %added.id, symbol = %added.symbol, weight, "holding added");
        Ok(added)
    }

    pub fn remove_holding(&mut self, id: Uuid) -> bool {
        let before = self.holdings.len();
        self.holdings.retain(|h| h.id != id);
        self.holdings.len() != before
    }

    pub fn set_investment(&mut self, amount: f64) -> Result<(), FormError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(FormError::InvalidInvestment);
        }
        self.initial_investment = amount;
        Ok(())
    }

    pub fn total_weight(&self) -> f64 {
        self.holdings.iter().map(|h| h.weight).sum()
    }

    pub fn validate(&self) -> Result<(), FormError> {
        let total = self.total_weight();
        if (total - TARGET_TOTAL_WEIGHT).abs() > WEIGHT_EPSILON {
            return Err(FormError::WeightTotal { total });
        }
        if self.initial_investment < MIN_INVESTMENT {
            return Err(FormError::InvestmentTooLow {
                min: MIN_INVESTMENT,
            });
        }
        Ok(())
    }

    /// Validates the form and moves it into `Loading`. The returned request is a
    /// snapshot; later edits to the form do not change what gets sent.
    pub fn begin_forecast(&mut self) -> Result<ForecastRequest, FormError> {
        if self.is_loading() {
            return Err(FormError::InFlight);
        }
        self.validate()?;

        self.state = ForecastState::Loading;
        Ok(ForecastRequest::new(
            self.holdings.clone(),
            self.initial_investment,
        ))
    }

    pub fn finish_forecast(
        &mut self,
        outcome: Result<AnalysisResult, ForecastError>,
    ) -> Result<AnalysisResult, ForecastError> {
        match outcome {
            Ok(result) => {
                self.state = ForecastState::Ready {
                    result: result.clone(),
                };
                Ok(result)
            }
            Err(err) => {
                self.state = ForecastState::Error {
                    message: err.user_message(),
                };
                Err(err)
            }
        }
    }

    /// Validates, issues a single forecast request and records the outcome.
    /// Validation failures never reach the client and leave the current view alone.
    pub async fn request_forecast(
        &mut self,
        client: &dyn ForecastClient,
    ) -> Result<AnalysisResult, ForecastError> {
        let request = self.begin_forecast()?;
        let outcome = client.forecast(&request).await;
        self.finish_forecast(outcome)
    }
}
