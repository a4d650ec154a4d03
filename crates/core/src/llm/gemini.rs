use crate::config::Settings;
use crate::domain::forecast::{AnalysisResult, GroundingSource};
use crate::llm::error::{ForecastError, LlmDiagnosticsError};
use crate::llm::{json, prompt, schema};
use crate::llm::{ForecastClient, ForecastRequest, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const BLOCKED_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Everything the client needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Option<Duration>,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let api_key = settings.gemini_api_key.clone().unwrap_or_else(|| {
            tracing::warn!("GEMINI_API_KEY is not set; requests will carry an empty credential");
            String::new()
        });

        Self {
            api_key,
            base_url: settings
                .gemini_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: settings
                .gemini_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Some(Duration::from_secs(
                settings.gemini_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build reqwest client")?;

        Ok(Self { http, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    pub fn build_request(model: &str, request: &ForecastRequest) -> GenerateContentRequest {
        // Gemini 1.x/2.x refuse search grounding combined with a response schema.
        let generation_config = schema_with_tools(model).then(|| GenerationConfig {
            response_mime_type: "application/json",
            response_schema: schema::forecast_response_schema(),
        });
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: prompt::forecast_prompt(request),
                }],
            }],
            tools: vec![Tool {
                google_search: serde_json::json!({}),
            }],
            generation_config,
        }
    }

    async fn generate_content(
        &self,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, LlmDiagnosticsError> {
        let diag = |stage: &'static str, detail: String, raw_output: Option<String>| {
            LlmDiagnosticsError {
                provider: Provider::Gemini,
                stage,
                detail,
                raw_output,
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| diag("request", format!("invalid api key header: {e}"), None))?,
        );

        let res = self
            .http
            .post(self.url())
            .headers(headers)
            .json(req)
            .send()
            .await
            .map_err(|e| diag("http", format!("Gemini request failed: {e}"), None))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| diag("http", format!("failed to read Gemini response body: {e}"), None))?;
        if !status.is_success() {
            return Err(diag("http", format!("status={status}"), Some(text)));
        }

        serde_json::from_str::<GenerateContentResponse>(&text).map_err(|e| {
            diag(
                "envelope",
                format!("failed to decode Gemini response envelope: {e}"),
                Some(text),
            )
        })
    }

    fn response_text(res: &GenerateContentResponse) -> String {
        let mut out = String::new();
        let parts = res
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default();
        for part in parts {
            // Thought summaries are not part of the answer.
            if part.thought {
                continue;
            }
            if let Some(text) = &part.text {
                out.push_str(text);
            }
        }
        out
    }

    /// Gemini's own safety filters: the prompt was blocked or the answer was cut off.
    fn blocked_reason(res: &GenerateContentResponse) -> Option<String> {
        if let Some(reason) = res
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            return Some(reason);
        }
        res.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .filter(|r| BLOCKED_FINISH_REASONS.contains(r))
            .map(str::to_string)
    }

    fn grounding_sources(res: &GenerateContentResponse) -> Vec<GroundingSource> {
        let mut out: Vec<GroundingSource> = Vec::new();
        let chunks = res
            .candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|m| m.grounding_chunks.as_slice())
            .unwrap_or_default();
        for chunk in chunks {
            let Some(web) = &chunk.web else { continue };
            let Some(uri) = web.uri.as_deref().filter(|u| !u.is_empty()) else {
                continue;
            };
            if out.iter().any(|s| s.uri == uri) {
                continue;
            }
            out.push(GroundingSource {
                title: web.title.clone().unwrap_or_else(|| uri.to_string()),
                uri: uri.to_string(),
            });
        }
        out
    }

    fn interpret(res: &GenerateContentResponse) -> Result<AnalysisResult, ForecastError> {
        let text = Self::response_text(res);
        if text.trim().is_empty() {
            if let Some(reason) = Self::blocked_reason(res) {
                tracing::warn!(%reason, "Gemini blocked the forecast request");
                return Err(ForecastError::SafetyRejection {
                    reason: Some(format!("blocked by provider ({reason})")),
                });
            }
        }

        let mut result = json::parse_forecast(&text)?;
        result.sources = Self::grounding_sources(res);
        Ok(result)
    }
}

fn schema_with_tools(model: &str) -> bool {
    let model = model.trim_start_matches("models/");
    !["gemini-1", "gemini-2"].iter().any(|legacy| model.starts_with(legacy))
}

#[async_trait::async_trait]
impl ForecastClient for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn forecast(&self, request: &ForecastRequest) -> Result<AnalysisResult, ForecastError> {
        let req = Self::build_request(&self.config.model, request);
        tracing::info!(
            provider = self.provider().as_str(),
            model = %self.config.model,
            structured_output = req.generation_config.is_some(),
            holdings = request.holdings.len(),
            initial_investment = request.initial_investment,
            "requesting forecast"
        );

        let res = self.generate_content(&req).await.map_err(|err| {
            tracing::warn!(
                stage = err.stage,
                error = %err,
                raw_output = err.raw_output.as_deref().unwrap_or(""),
                "Gemini call failed"
            );
            ForecastError::from(err)
        })?;

        let result = Self::interpret(&res)?;
        tracing::info!(
            points = result.predictions.len(),
            risk_level = %result.summary.risk_level,
            sources = result.sources.len(),
            "forecast received"
        );
        Ok(result)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    google_search: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}
