use crate::domain::contract::{STATUS_ACCEPTED, STATUS_REJECTED};
use crate::domain::forecast::RiskLevel;
use serde_json::{json, Value};

/// Response schema for Gemini's structured output (OpenAPI subset).
///
/// `predictions` and `summary` are not listed as required at the top level so a
/// refusal can omit them; an accepted payload is checked for them after parsing.
pub fn forecast_response_schema() -> Value {
    let risk_levels: Vec<&str> = RiskLevel::ALL.iter().map(|l| l.as_str()).collect();

    json!({
        "type": "OBJECT",
        "required": ["status", "insights"],
        "properties": {
            "status": {
                "type": "STRING",
                "enum": [STATUS_ACCEPTED, STATUS_REJECTED],
            },
            "rejectionReason": {"type": "STRING"},
            "predictions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "required": ["date", "expected", "optimistic", "pessimistic"],
                    "properties": {
                        "date": {"type": "STRING"},
                        "expected": {"type": "NUMBER"},
                        "optimistic": {"type": "NUMBER"},
                        "pessimistic": {"type": "NUMBER"},
                    }
                }
            },
            "summary": {
                "type": "OBJECT",
                "required": [
                    "expectedReturn",
                    "annualizedReturn",
                    "riskLevel",
                    "riskReasoning",
                    "topPerformers",
                    "potentialRisks"
                ],
                "properties": {
                    "expectedReturn": {"type": "NUMBER"},
                    "annualizedReturn": {"type": "NUMBER"},
                    "riskLevel": {"type": "STRING", "enum": risk_levels},
                    "riskReasoning": {"type": "STRING"},
                    "topPerformers": {"type": "ARRAY", "items": {"type": "STRING"}},
                    "potentialRisks": {"type": "ARRAY", "items": {"type": "STRING"}},
                }
            },
            "insights": {"type": "STRING"},
        },
        "propertyOrdering": ["status", "rejectionReason", "predictions", "summary", "insights"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_and_summary_fields_are_required() {
        let schema = forecast_response_schema();
        let point_required = &schema["properties"]["predictions"]["items"]["required"];
        assert_eq!(point_required.as_array().unwrap().len(), 4);

        let summary_required = schema["properties"]["summary"]["required"]
            .as_array()
            .unwrap();
        assert_eq!(summary_required.len(), 6);
    }

    #[test]
    fn risk_level_is_constrained_to_known_levels() {
        let schema = forecast_response_schema();
        assert_eq!(
            schema["properties"]["summary"]["properties"]["riskLevel"]["enum"],
            json!(["Low", "Medium", "High", "Extreme"])
        );
    }
}
