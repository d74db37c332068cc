//! Generative model seam and its OpenAI Responses API implementation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TEMPERATURE: f32 = 0.2;
pub const TOP_P: f32 = 1.0;
pub const MAX_TURNS: u32 = 6;

const SCHEMA_NAME: &str = "verse_selection";
const CONTINUE_PROMPT: &str = "Continue. Reply with the JSON object only.";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Network(String),

    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model response could not be parsed: {0}")]
    Parse(String),

    #[error("model refused: {0}")]
    Refused(String),

    #[error("model produced no output within {0} turns")]
    TurnsExhausted(u32),
}

/// One structured-output generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub instructions: String,
    pub input: String,
    pub schema: Value,
    pub temperature: f32,
    pub top_p: f32,
    pub max_turns: u32,
}

/// Black-box generator. The returned value is untrusted: it may be an object,
/// a string holding JSON, or anything else.
#[async_trait]
pub trait VerseModel: Send + Sync {
    fn id(&self) -> &str;

    async fn generate(&self, request: &ModelRequest) -> Result<Value, ModelError>;
}

pub struct OpenAiResponsesModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    temperature: f32,
    top_p: f32,
    text: TextConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TextConfig<'a> {
    format: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    name: &'static str,
    schema: &'a Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    item_type: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl ResponsesResponse {
    /// Concatenated `output_text` parts of every message item.
    fn output_text(&self) -> Result<Option<String>, ModelError> {
        let mut text = String::new();
        for item in self.output.iter().filter(|i| i.item_type == "message") {
            for part in &item.content {
                match part.content_type.as_str() {
                    "output_text" => text.push_str(part.text.as_deref().unwrap_or_default()),
                    "refusal" => {
                        return Err(ModelError::Refused(
                            part.refusal.clone().unwrap_or_default(),
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }
}

impl OpenAiResponsesModel {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    async fn turn(
        &self,
        request: &ModelRequest,
        input: &str,
        previous_response_id: Option<&str>,
    ) -> Result<ResponsesResponse, ModelError> {
        let body = ResponsesRequest {
            model: &self.model,
            instructions: &request.instructions,
            input,
            temperature: request.temperature,
            top_p: request.top_p,
            text: TextConfig {
                format: JsonSchemaFormat {
                    format_type: "json_schema",
                    name: SCHEMA_NAME,
                    schema: &request.schema,
                    strict: true,
                },
            },
            previous_response_id,
        };

        let response = self
            .client
            .post(self.responses_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))
    }
}

#[async_trait]
impl VerseModel for OpenAiResponsesModel {
    fn id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<Value, ModelError> {
        let turns = request.max_turns.max(1);
        let mut previous: Option<String> = None;

        for turn in 1..=turns {
            let input = if previous.is_some() {
                CONTINUE_PROMPT
            } else {
                request.input.as_str()
            };
            let response = self.turn(request, input, previous.as_deref()).await?;
            if let Some(text) = response.output_text()? {
                tracing::debug!(model = %self.model, turn, "model produced output");
                return Ok(Value::String(text));
            }
            previous = Some(response.id);
        }

        Err(ModelError::TurnsExhausted(turns))
    }
}

/// Replays canned results in order, then repeats the last one.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Value, String>>>,
    last: Mutex<Option<Result<Value, String>>>,
    calls: AtomicU32,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<Value, String>>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(value: Value) -> Self {
        Self::new([Ok(value)])
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VerseModel for ScriptedModel {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<Value, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let step = match next {
            Some(step) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(step.clone());
                }
                step
            }
            None => self
                .last
                .lock()
                .ok()
                .and_then(|l| l.clone())
                .unwrap_or_else(|| Err("script is empty".to_string())),
        };
        step.map_err(ModelError::Network)
    }
}
