use crate::domain::contract::{rejection_in_value, LlmForecastPayload, LlmOutcome};
use crate::domain::forecast::AnalysisResult;
use crate::llm::error::ForecastError;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Fenced output, with or without a language tag or line breaks.
        let inner = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        let inner = inner.rfind("```").map_or(inner, |end| &inner[..end]);
        return Some(inner.trim().to_string());
    }

    // Search grounding can add prose around the object: keep first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Turns the model's text into a forecast, a safety rejection, or a parse/structure error.
pub fn parse_forecast(text: &str) -> Result<AnalysisResult, ForecastError> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());

    let value = serde_json::from_str::<serde_json::Value>(&json_str).map_err(|err| {
        tracing::warn!(error = %err, raw_output = %text, "model output is not valid JSON");
        ForecastError::InvalidPayload(err.to_string())
    })?;

    if let Some(reason) = rejection_in_value(&value) {
        return Err(rejected(reason));
    }

    let payload = serde_json::from_value::<LlmForecastPayload>(value).map_err(|err| {
        tracing::warn!(error = %err, "model output does not match the forecast schema");
        ForecastError::Structure(err.to_string())
    })?;

    match payload.into_outcome() {
        Ok(LlmOutcome::Accepted(result)) => Ok(result),
        Ok(LlmOutcome::Rejected { reason }) => Err(rejected(reason)),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "model output failed validation");
            Err(ForecastError::Structure(format!("{err:#}")))
        }
    }
}

fn rejected(reason: Option<String>) -> ForecastError {
    tracing::warn!(reason = reason.as_deref().unwrap_or(""), "model rejected portfolio input");
    ForecastError::SafetyRejection { reason }
}
