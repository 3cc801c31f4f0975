//! Gemini API client
//!
//! Implements both model call shapes against the `generateContent` and
//! `streamGenerateContent` endpoints. Uses a long-lived reqwest::Client for
//! connection pooling.

use super::{parse_json_text, LanguageModel, ModelRequest, TextStream};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the client at a different host (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, self.model, method)
    }

    fn ensure_key(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AgentError::Config("GEMINI_API_KEY not configured".to_string()));
        }
        Ok(())
    }

    async fn post(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AgentError::Llm(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(AgentError::Llm(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate_structured(
        &self,
        request: &ModelRequest,
        schema_name: &'static str,
        schema: &Value,
    ) -> Result<Value> {
        self.ensure_key()?;

        // The JSON schema travels in the instruction; Gemini's own
        // responseSchema dialect rejects free-form objects like tool arguments.
        let system = format!(
            "{}\n\nRespond ONLY with a JSON object named {} matching this JSON schema:\n{}",
            request.system, schema_name, schema
        );
        let body = GeminiRequest::new(&system, &request.prompt, Some("application/json"));

        info!(schema = schema_name, model = %self.model, "Calling Gemini API");

        let response = self.post(&self.endpoint("generateContent"), &body).await?;
        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AgentError::Llm(format!("Gemini parse error: {}", e))
        })?;

        let text = gemini_response.text();
        if text.is_empty() {
            return Err(AgentError::Llm("Empty response from Gemini".to_string()));
        }

        parse_json_text(schema_name, &text)
    }

    async fn stream_text(&self, request: &ModelRequest) -> Result<TextStream> {
        self.ensure_key()
            .map_err(|e| AgentError::StreamingGeneration(e.to_string()))?;

        let body = GeminiRequest::new(&request.system, &request.prompt, None);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));

        info!(model = %self.model, "Opening Gemini stream");

        let response = self
            .post(&url, &body)
            .await
            .map_err(|e| AgentError::StreamingGeneration(e.to_string()))?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => match serde_json::from_str::<GeminiResponse>(&event.data) {
                        Ok(chunk) => {
                            let text = chunk.text();
                            (!text.is_empty()).then_some(Ok(text))
                        }
                        Err(e) => Some(Err(AgentError::StreamingGeneration(format!(
                            "malformed stream chunk: {}",
                            e
                        )))),
                    },
                    Err(e) => Some(Err(AgentError::StreamingGeneration(e.to_string()))),
                }
            });

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

impl GeminiRequest {
    fn new(system: &str, prompt: &str, response_mime_type: Option<&'static str>) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                max_output_tokens: 4096,
                response_mime_type,
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GeminiResponse {
    /// Text of the first candidate, all parts joined
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest::new("You are a research analyst", "What is EBITDA?", Some("application/json"));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "What is EBITDA?");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert!(json["systemInstruction"].get("role").is_none());

        let plain = serde_json::to_value(GeminiRequest::new("s", "p", None)).unwrap();
        assert!(plain["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Revenue "},{"text":"grew"}]},"finishReason":"STOP"}]}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.text(), "Revenue grew");

        let empty: GeminiResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash").unwrap();
        let err = client
            .generate_structured(&ModelRequest::new("s", "p"), "IsDone", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
