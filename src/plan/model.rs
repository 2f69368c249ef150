//! Code-generation model client.
//!
//! The model backend is a black box that turns an instruction + chat
//! history into text. [`PlanModel`] is the seam — the REST handlers only
//! ever see the trait, so tests swap in a canned implementation and the
//! daemon wires up the HTTP client.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelConfig;
use crate::patch::PatchError;

use super::ChatMessage;

/// One fully-assembled model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    /// Prior conversation turns, oldest first, instruction excluded.
    pub history: Vec<ChatMessage>,
    /// The instruction message (rules + context + selection block).
    pub instruction: String,
}

#[async_trait]
pub trait PlanModel: Send + Sync {
    /// Generate the raw text response for a plan request.
    async fn generate(&self, request: &ModelRequest) -> Result<String, PatchError>;
}

// ─── HTTP client ──────────────────────────────────────────────────────────────

/// reqwest-backed client for an OpenAI-style `/v1/responses` endpoint.
pub struct HttpPlanModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPlanModel {
    pub fn new(config: &ModelConfig) -> Result<Self, PatchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PatchError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        })
    }

    fn input_payload(request: &ModelRequest) -> Value {
        let mut input: Vec<Value> = Vec::with_capacity(request.history.len() + 1);
        for message in &request.history {
            let mut content: Vec<Value> = Vec::new();
            if !message.content.is_empty() {
                let kind = if message.role == "assistant" {
                    "output_text"
                } else {
                    "input_text"
                };
                content.push(json!({ "type": kind, "text": message.content }));
            }
            if message.role != "assistant" {
                for image in &message.images {
                    content.push(json!({ "type": "input_image", "image_url": image }));
                }
            }
            input.push(json!({ "role": message.role, "content": content }));
        }
        input.push(json!({
            "role": "user",
            "content": [{ "type": "input_text", "text": request.instruction }],
        }));
        json!(input)
    }

    /// Concatenate every `output_text` chunk across all output items.
    fn collect_output_text(body: &Value) -> String {
        let mut out = String::new();
        if let Some(items) = body.get("output").and_then(Value::as_array) {
            for item in items {
                if let Some(chunks) = item.get("content").and_then(Value::as_array) {
                    for chunk in chunks {
                        if chunk.get("type").and_then(Value::as_str) == Some("output_text") {
                            if let Some(text) = chunk.get("text").and_then(Value::as_str) {
                                out.push_str(text);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn upstream_error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "model request failed".to_owned())
    }
}

#[async_trait]
impl PlanModel for HttpPlanModel {
    async fn generate(&self, request: &ModelRequest) -> Result<String, PatchError> {
        // Credential check happens before any network traffic.
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                PatchError::Configuration(
                    "ISLA_MODEL_API_KEY is not set — cannot call the model backend".to_owned(),
                )
            })?;

        let url = format!("{}/v1/responses", self.base_url);
        debug!(model = %request.model, history = request.history.len(), "plan model request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({
                "model": request.model,
                "input": Self::input_payload(request),
            }))
            .send()
            .await
            .map_err(|e| PatchError::Upstream {
                status: 502,
                message: format!("model transport error: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| PatchError::Upstream {
            status: 502,
            message: format!("model response read error: {e}"),
        })?;

        if !status.is_success() {
            return Err(PatchError::Upstream {
                status: status.as_u16(),
                message: Self::upstream_error_message(&body),
            });
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|e| PatchError::Upstream {
            status: 502,
            message: format!("model returned invalid JSON: {e}"),
        })?;

        let text = Self::collect_output_text(&parsed);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PatchError::EmptyResponse);
        }
        Ok(trimmed.to_owned())
    }
}
