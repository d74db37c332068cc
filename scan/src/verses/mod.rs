//! Verse retrieval behind one async trait.
//!
//! The pipeline only ever sees [`VerseService`]; which implementation backs it
//! is decided by `VERSE_SERVICE_MODE`.

pub mod library;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use walkworthy_core::records::VerseCandidate;
use walkworthy_core::translation::Translation;

use crate::config::{VerseServiceConfig, VerseServiceMode};

pub use library::LocalVerseLibrary;

#[derive(Debug, thiserror::Error)]
pub enum VerseServiceError {
    #[error("verse service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("verse service returned HTTP {0}")]
    Status(u16),

    #[error("verse service error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("verse service response could not be decoded: {0}")]
    Decode(String),

    #[error("{0}")]
    Handler(String),

    #[error("verse service URL is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait VerseService: Send + Sync {
    async fn search_by_keywords(
        &self,
        keywords: &[String],
        translation: Option<Translation>,
        limit: usize,
    ) -> Result<Vec<VerseCandidate>, VerseServiceError>;

    async fn get_by_reference(
        &self,
        reference: &str,
        translation: Option<Translation>,
    ) -> Result<Option<VerseCandidate>, VerseServiceError>;
}

/// Build the configured service. HTTP mode shares the caller's client.
pub fn from_config(
    config: &VerseServiceConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn VerseService>, VerseServiceError> {
    Ok(match config.mode {
        VerseServiceMode::Disabled => Arc::new(DisabledVerseService),
        VerseServiceMode::Local => Arc::new(LocalVerseLibrary::new(config.default_translation)),
        VerseServiceMode::Http => {
            let url = config.url.clone().ok_or(VerseServiceError::NotConfigured)?;
            Arc::new(JsonRpcVerseService::new(http, url, config.default_translation))
        }
    })
}

/// Answers every query with nothing. Scans then fall back deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledVerseService;

#[async_trait]
impl VerseService for DisabledVerseService {
    async fn search_by_keywords(
        &self,
        _keywords: &[String],
        _translation: Option<Translation>,
        _limit: usize,
    ) -> Result<Vec<VerseCandidate>, VerseServiceError> {
        Ok(Vec::new())
    }

    async fn get_by_reference(
        &self,
        _reference: &str,
        _translation: Option<Translation>,
    ) -> Result<Option<VerseCandidate>, VerseServiceError> {
        Ok(None)
    }
}

/// JSON-RPC 2.0 client for a remote verse bridge.
pub struct JsonRpcVerseService {
    http: reqwest::Client,
    url: String,
    default_translation: Translation,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl JsonRpcVerseService {
    pub fn new(http: reqwest::Client, url: impl Into<String>, default_translation: Translation) -> Self {
        Self {
            http,
            url: url.into(),
            default_translation,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, VerseServiceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id.to_string(),
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerseServiceError::Status(status.as_u16()));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| VerseServiceError::Decode(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(VerseServiceError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl VerseService for JsonRpcVerseService {
    async fn search_by_keywords(
        &self,
        keywords: &[String],
        translation: Option<Translation>,
        limit: usize,
    ) -> Result<Vec<VerseCandidate>, VerseServiceError> {
        let translation = translation.unwrap_or(self.default_translation);
        let result = self
            .call(
                "search_verses",
                json!({
                    "keywords": keywords,
                    "translation": translation,
                    "limit": limit,
                }),
            )
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(result).map_err(|e| VerseServiceError::Decode(e.to_string()))
    }

    async fn get_by_reference(
        &self,
        reference: &str,
        translation: Option<Translation>,
    ) -> Result<Option<VerseCandidate>, VerseServiceError> {
        let translation = translation.unwrap_or(self.default_translation);
        let result = self
            .call(
                "get_verse_by_reference",
                json!({ "ref": reference, "translation": translation }),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| VerseServiceError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> JsonRpcVerseService {
        JsonRpcVerseService::new(
            reqwest::Client::new(),
            format!("{}/rpc", server.uri()),
            Translation::Kjv,
        )
    }

    #[tokio::test]
    async fn search_sends_json_rpc_with_default_translation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({
                "jsonrpc": "2.0",
                "method": "search_verses",
                "params": { "keywords": ["exam"], "translation": "KJV", "limit": 5 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "1",
                "result": [
                    { "ref": "James 1:5", "text": "If any of you lack wisdom", "translation": "KJV", "tags": ["wisdom"] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let verses = service(&server)
            .search_by_keywords(&["exam".to_string()], None, 5)
            .await
            .unwrap();
        assert_eq!(verses.len(), 1);
        assert_eq!(verses[0].reference, "James 1:5");
        assert_eq!(verses[0].translation.as_deref(), Some("KJV"));
    }

    #[tokio::test]
    async fn rpc_error_member_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "1",
                "error": { "code": -32000, "message": "keywords must be a non-empty array" }
            })))
            .mount(&server)
            .await;

        let err = service(&server)
            .search_by_keywords(&[], Some(Translation::Esv), 5)
            .await
            .expect_err("should fail");
        match err {
            VerseServiceError::Rpc { code, .. } => assert_eq!(code, -32000),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = service(&server)
            .get_by_reference("John 14:27", None)
            .await
            .expect_err("should fail");
        assert!(matches!(err, VerseServiceError::Status(502)));
    }

    #[tokio::test]
    async fn null_reference_result_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "get_verse_by_reference" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": "1", "result": null })),
            )
            .mount(&server)
            .await;

        let verse = service(&server)
            .get_by_reference("Obadiah 1:1", None)
            .await
            .unwrap();
        assert!(verse.is_none());
    }

    #[tokio::test]
    async fn disabled_service_returns_nothing() {
        let verses = DisabledVerseService
            .search_by_keywords(&["anxiety".to_string()], None, 5)
            .await
            .unwrap();
        assert!(verses.is_empty());
    }
}
