use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Monthly points in a 5-year forecast.
pub const FORECAST_MONTHS: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub date: String,
    pub optimistic: f64,
    pub expected: f64,
    pub pessimistic: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Extreme,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Extreme => "Extreme",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        RiskLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown risk level: {s:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Total return over the forecast horizon, in percent.
    pub expected_return: f64,
    pub annualized_return: f64,
    pub risk_level: RiskLevel,
    pub risk_reasoning: String,
    pub top_performers: Vec<String>,
    pub potential_risks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub predictions: Vec<PredictionPoint>,
    pub summary: Summary,
    pub insights: String,
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
}

/// Display figures derived from a forecast and the capital it started from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastMetrics {
    pub final_expected: f64,
    pub total_roi_pct: f64,
    pub cagr_pct: f64,
}

impl AnalysisResult {
    pub fn metrics(&self, initial_investment: f64) -> Option<ForecastMetrics> {
        let last = self.predictions.last()?;
        if initial_investment <= 0.0 {
            return None;
        }

        let growth = last.expected / initial_investment;
        let years = self.predictions.len() as f64 / 12.0;
        let cagr = if growth > 0.0 {
            growth.powf(1.0 / years) - 1.0
        } else {
            -1.0
        };

        Some(ForecastMetrics {
            final_expected: last.expected,
            total_roi_pct: (growth - 1.0) * 100.0,
            cagr_pct: cagr * 100.0,
        })
    }
}
