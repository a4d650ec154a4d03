use crate::domain::forecast::{AnalysisResult, PredictionPoint, RiskLevel, Summary, FORECAST_MONTHS};
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};

/// Legacy in-band refusal marker some models still put at the start of `insights`.
pub const SAFETY_ERROR_PREFIX: &str = "SAFETY_ERROR";

pub const STATUS_ACCEPTED: &str = "ACCEPTED";
pub const STATUS_REJECTED: &str = "REJECTED";

/// Forecast payload as emitted by the model. Every field is optional here so that
/// a missing key surfaces as a validation error naming the key, not a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmForecastPayload {
    pub status: Option<String>,
    pub rejection_reason: Option<String>,
    pub predictions: Option<Vec<LlmPredictionPoint>>,
    pub summary: Option<LlmSummary>,
    pub insights: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmPredictionPoint {
    pub date: Option<String>,
    pub expected: Option<f64>,
    pub optimistic: Option<f64>,
    pub pessimistic: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmSummary {
    pub expected_return: Option<f64>,
    pub annualized_return: Option<f64>,
    pub risk_level: Option<String>,
    pub risk_reasoning: Option<String>,
    pub top_performers: Option<Vec<String>>,
    pub potential_risks: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutcome {
    Accepted(AnalysisResult),
    Rejected { reason: Option<String> },
}

impl LlmForecastPayload {
    pub fn into_outcome(self) -> anyhow::Result<LlmOutcome> {
        if let Some(reason) = self.rejection() {
            return Ok(LlmOutcome::Rejected { reason });
        }

        if let Some(status) = self.status.as_deref() {
            let status = status.trim();
            ensure!(
                status.eq_ignore_ascii_case(STATUS_ACCEPTED),
                "unknown status: {status:?}"
            );
        }

        Ok(LlmOutcome::Accepted(self.validate_and_into_analysis()?))
    }

    /// `Some` when the model declined the input, carrying its reason if it gave one.
    fn rejection(&self) -> Option<Option<String>> {
        rejection_of(
            self.status.as_deref(),
            self.rejection_reason.as_deref(),
            self.insights.as_deref(),
        )
    }

    pub fn validate_and_into_analysis(self) -> anyhow::Result<AnalysisResult> {
        let predictions = self.predictions.context("missing field: predictions")?;
        ensure!(
            predictions.len() == FORECAST_MONTHS,
            "predictions must contain exactly {FORECAST_MONTHS} points (got {})",
            predictions.len()
        );

        let predictions = predictions
            .into_iter()
            .enumerate()
            .map(|(idx, point)| {
                point
                    .validate_and_into_point()
                    .with_context(|| format!("invalid prediction point #{idx}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let summary = self
            .summary
            .context("missing field: summary")?
            .validate_and_into_summary()?;

        let insights = self.insights.context("missing field: insights")?;

        Ok(AnalysisResult {
            predictions,
            summary,
            insights: insights.trim().to_string(),
            sources: Vec::new(),
        })
    }
}

impl LlmPredictionPoint {
    fn validate_and_into_point(self) -> anyhow::Result<PredictionPoint> {
        let date = self.date.context("missing field: date")?.trim().to_string();
        ensure!(!date.is_empty(), "date must be non-empty");

        Ok(PredictionPoint {
            date,
            optimistic: finite(self.optimistic, "optimistic")?,
            expected: finite(self.expected, "expected")?,
            pessimistic: finite(self.pessimistic, "pessimistic")?,
        })
    }
}

impl LlmSummary {
    fn validate_and_into_summary(self) -> anyhow::Result<Summary> {
        let risk_level = self.risk_level.context("missing field: summary.riskLevel")?;
        let risk_level = match risk_level.parse::<RiskLevel>() {
            Ok(level) => level,
            Err(err) => bail!("summary.riskLevel: {err}"),
        };

        Ok(Summary {
            expected_return: finite(self.expected_return, "summary.expectedReturn")?,
            annualized_return: finite(self.annualized_return, "summary.annualizedReturn")?,
            risk_level,
            risk_reasoning: self
                .risk_reasoning
                .context("missing field: summary.riskReasoning")?
                .trim()
                .to_string(),
            top_performers: non_empty_lines(
                self.top_performers
                    .context("missing field: summary.topPerformers")?,
            ),
            potential_risks: non_empty_lines(
                self.potential_risks
                    .context("missing field: summary.potentialRisks")?,
            ),
        })
    }
}

/// Checks the refusal markers on an undecoded payload. A refusing model often
/// fills the other fields with placeholders of the wrong type, so this has to run
/// before the typed decode.
pub fn rejection_in_value(value: &serde_json::Value) -> Option<Option<String>> {
    let field = |key: &str| value.get(key).and_then(serde_json::Value::as_str);
    rejection_of(field("status"), field("rejectionReason"), field("insights"))
}

fn rejection_of(
    status: Option<&str>,
    rejection_reason: Option<&str>,
    insights: Option<&str>,
) -> Option<Option<String>> {
    let explicit = status.is_some_and(|s| s.trim().eq_ignore_ascii_case(STATUS_REJECTED));
    let legacy = insights.is_some_and(|s| s.trim_start().starts_with(SAFETY_ERROR_PREFIX));

    if !explicit && !legacy {
        return None;
    }

    let reason = rejection_reason
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            insights.map(|s| {
                s.trim_start()
                    .trim_start_matches(SAFETY_ERROR_PREFIX)
                    .trim_start_matches(':')
                    .trim()
                    .to_string()
            })
        })
        .filter(|s| !s.is_empty());
    Some(reason)
}

fn finite(value: Option<f64>, field: &str) -> anyhow::Result<f64> {
    let value = value.with_context(|| format!("missing field: {field}"))?;
    ensure!(value.is_finite(), "{field} must be finite (got {value})");
    Ok(value)
}

fn non_empty_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
