//! Canvas planner adapter: refreshable credentials, paginated listing,
//! tolerant item normalization.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use walkworthy_core::records::{
    CanvasLinkRecord, Parsed, WorkloadItem, WorkloadKind, iso_timestamp,
};

use crate::secrets::{self, SecretError, SecretStore};

const PLANNER_PATH: &str = "/api/v1/planner/items";
const TOKEN_PATH: &str = "/login/oauth2/token";
const PLANNER_PAGE_SIZE: &str = "50";
pub const MAX_PLANNER_PAGES: usize = 20;
const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

static NEXT_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>;\s*rel="next""#).expect("valid link header regex"));

#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("secret {secret_ref} is malformed: {reason}")]
    MalformedSecret { secret_ref: String, reason: String },

    #[error("secret {0} not found")]
    MissingSecret(String),

    #[error("secret store error: {0}")]
    SecretStore(String),

    #[error("Canvas request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Canvas planner request failed: {status} {body}")]
    Status { status: u16, body: String },

    #[error("Unable to refresh Canvas access token: {0}")]
    RefreshFailed(String),

    #[error("Canvas rejected the access token after a refresh")]
    Unauthorized,

    #[error("invalid Canvas URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Canvas response could not be decoded: {0}")]
    Decode(String),

    #[error("Canvas pagination pointed off-site to {0}")]
    ForeignPage(String),
}

impl CanvasError {
    /// Configuration faults that a fallback verse must not paper over.
    pub fn is_credential_fault(&self) -> bool {
        matches!(
            self,
            CanvasError::MalformedSecret { .. } | CanvasError::MissingSecret(_)
        )
    }

    fn from_secret(err: SecretError) -> Self {
        match err {
            SecretError::NotFound(secret_ref) => CanvasError::MissingSecret(secret_ref),
            SecretError::Malformed { secret_ref, reason } => {
                CanvasError::MalformedSecret { secret_ref, reason }
            }
            SecretError::Database(e) => CanvasError::SecretStore(e.to_string()),
        }
    }
}

/// Source of a user's upcoming workload.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn fetch_workload_items(
        &self,
        link: &CanvasLinkRecord,
    ) -> Result<Vec<WorkloadItem>, CanvasError>;
}

/// Per-user OAuth token material, stored under the link's `refreshSecretRef`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasTokenSecret {
    pub refresh_token: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obtained_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
}

impl CanvasTokenSecret {
    /// Tolerant parse. Token strings come back trimmed; `valid` is false when
    /// trimming changed something or an optional field had the wrong type, so
    /// the caller knows to rewrite the stored copy. `value` is `None` when no
    /// refresh token survives trimming.
    pub fn parse(raw: &Value) -> Parsed<Self> {
        if !raw.is_object() {
            return Parsed::missing();
        }
        let mut valid = true;
        let mut token = |key: &str| match raw.get(key) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.len() != s.len() {
                    valid = false;
                }
                trimmed.to_string()
            }
            None | Some(Value::Null) => String::new(),
            Some(_) => {
                valid = false;
                String::new()
            }
        };
        let refresh_token = token("refreshToken");
        let access_token = token("accessToken");

        let obtained_at = match raw.get("obtainedAt") {
            Some(Value::String(s)) => Some(s.clone()),
            None | Some(Value::Null) => None,
            Some(_) => {
                valid = false;
                None
            }
        };
        let expires_in_seconds = match raw.get("expiresInSeconds") {
            Some(v @ Value::Number(_)) => v.as_i64(),
            None | Some(Value::Null) => None,
            Some(_) => {
                valid = false;
                None
            }
        };

        if refresh_token.is_empty() {
            return Parsed::missing();
        }
        let secret = Self {
            refresh_token,
            access_token,
            obtained_at,
            expires_in_seconds,
        };
        if valid {
            Parsed::ok(secret)
        } else {
            Parsed::degraded(secret)
        }
    }

    /// Expiry with the safety margin applied; `None` when it cannot be computed.
    fn usable_until(&self) -> Option<DateTime<Utc>> {
        let obtained = DateTime::parse_from_rfc3339(self.obtained_at.as_deref()?).ok()?;
        let expires_in = self.expires_in_seconds?;
        Some(
            obtained.with_timezone(&Utc) + Duration::seconds(expires_in)
                - Duration::seconds(EXPIRY_MARGIN_SECS),
        )
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.usable_until().is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasClientSecret {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

enum Listing {
    Items(Vec<WorkloadItem>),
    Unauthorized,
}

pub struct CanvasClient {
    http: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
    client_secret_ref: String,
    lookahead_days: i64,
}

impl CanvasClient {
    pub fn new(
        http: reqwest::Client,
        secrets: Arc<dyn SecretStore>,
        client_secret_ref: impl Into<String>,
        lookahead_days: i64,
    ) -> Self {
        Self {
            http,
            secrets,
            client_secret_ref: client_secret_ref.into(),
            lookahead_days,
        }
    }

    pub async fn fetch_at(
        &self,
        link: &CanvasLinkRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkloadItem>, CanvasError> {
        let token = self.ensure_access_token(link, now).await?;
        match self.list_planner(link, &token, now).await? {
            Listing::Items(items) => Ok(items),
            Listing::Unauthorized => {
                tracing::warn!(
                    base_url = %link.canvas_base_url,
                    "Canvas returned 401, forcing one token refresh"
                );
                let refreshed = self.refresh_access_token(link).await?;
                match self.list_planner(link, &refreshed.access_token, now).await? {
                    Listing::Items(items) => Ok(items),
                    Listing::Unauthorized => Err(CanvasError::Unauthorized),
                }
            }
        }
    }

    async fn load_token_secret(
        &self,
        link: &CanvasLinkRecord,
    ) -> Result<CanvasTokenSecret, CanvasError> {
        let secret_ref = &link.refresh_secret_ref;
        let raw = secrets::get_json(self.secrets.as_ref(), secret_ref)
            .await
            .map_err(CanvasError::from_secret)?;
        let parsed = CanvasTokenSecret::parse(&raw);
        let Some(secret) = parsed.value else {
            return Err(CanvasError::MalformedSecret {
                secret_ref: secret_ref.clone(),
                reason: "refreshToken is missing or blank".to_string(),
            });
        };
        if !parsed.valid {
            tracing::info!(secret_ref = %secret_ref, "rewriting normalized Canvas token secret");
            self.store_token_secret(secret_ref, &secret).await?;
        }
        Ok(secret)
    }

    async fn store_token_secret(
        &self,
        secret_ref: &str,
        secret: &CanvasTokenSecret,
    ) -> Result<(), CanvasError> {
        let value = serde_json::to_value(secret).map_err(|e| CanvasError::Decode(e.to_string()))?;
        self.secrets
            .put(secret_ref, &value)
            .await
            .map_err(CanvasError::from_secret)
    }

    async fn ensure_access_token(
        &self,
        link: &CanvasLinkRecord,
        now: DateTime<Utc>,
    ) -> Result<String, CanvasError> {
        let secret = self.load_token_secret(link).await?;
        if secret.is_fresh(now) {
            return Ok(secret.access_token);
        }
        Ok(self.refresh_access_token(link).await?.access_token)
    }

    async fn load_client_secret(&self) -> Result<CanvasClientSecret, CanvasError> {
        let raw = secrets::get_json(self.secrets.as_ref(), &self.client_secret_ref)
            .await
            .map_err(CanvasError::from_secret)?;
        let client: CanvasClientSecret =
            serde_json::from_value(raw).map_err(|e| CanvasError::MalformedSecret {
                secret_ref: self.client_secret_ref.clone(),
                reason: e.to_string(),
            })?;
        if client.client_id.trim().is_empty() || client.client_secret.trim().is_empty() {
            return Err(CanvasError::MalformedSecret {
                secret_ref: self.client_secret_ref.clone(),
                reason: "clientId and clientSecret must be non-empty".to_string(),
            });
        }
        Ok(client)
    }

    /// Exchange the stored refresh token and persist the result before returning it.
    async fn refresh_access_token(
        &self,
        link: &CanvasLinkRecord,
    ) -> Result<CanvasTokenSecret, CanvasError> {
        let client = self.load_client_secret().await?;
        let current = self.load_token_secret(link).await?;
        let endpoint = endpoint(&link.canvas_base_url, TOKEN_PATH)?;

        let response = self
            .http
            .post(endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client.client_id.trim()),
                ("client_secret", client.client_secret.trim()),
                ("refresh_token", current.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                base_url = %link.canvas_base_url,
                "Canvas token refresh failed"
            );
            return Err(CanvasError::RefreshFailed(format!("HTTP {} {}", status.as_u16(), body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CanvasError::RefreshFailed(e.to_string()))?;
        let access_token = token
            .access_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CanvasError::RefreshFailed("response had no access_token".to_string()))?;

        let updated = CanvasTokenSecret {
            refresh_token: token
                .refresh_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or(current.refresh_token),
            access_token,
            obtained_at: Some(iso_timestamp(Utc::now())),
            expires_in_seconds: Some(
                token
                    .expires_in
                    .or(current.expires_in_seconds)
                    .unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            ),
        };
        self.store_token_secret(&link.refresh_secret_ref, &updated)
            .await?;

        tracing::info!(
            base_url = %link.canvas_base_url,
            token_fingerprint = %fingerprint(&updated.access_token),
            expires_in = updated.expires_in_seconds,
            "Canvas access token refreshed"
        );
        Ok(updated)
    }

    async fn list_planner(
        &self,
        link: &CanvasLinkRecord,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Listing, CanvasError> {
        let mut url = endpoint(&link.canvas_base_url, PLANNER_PATH)?;
        url.query_pairs_mut()
            .append_pair("start_date", &iso_timestamp(now))
            .append_pair(
                "end_date",
                &iso_timestamp(now + Duration::days(self.lookahead_days)),
            )
            .append_pair("per_page", PLANNER_PAGE_SIZE);

        let origin = url.origin();
        let mut items = Vec::new();
        let mut pages = 0;
        let mut next = Some(url);
        while let Some(url) = next.take() {
            if pages == MAX_PLANNER_PAGES {
                tracing::warn!(
                    pages,
                    count = items.len(),
                    "Canvas planner page limit reached, keeping items fetched so far"
                );
                break;
            }
            pages += 1;

            let response = self
                .http
                .get(url)
                .bearer_auth(access_token)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Ok(Listing::Unauthorized);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CanvasError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|h| h.to_str().ok())
                .and_then(parse_next_link)
                .map(|link| {
                    Url::parse(&link).map_err(|e| CanvasError::InvalidUrl {
                        url: link,
                        reason: e.to_string(),
                    })
                })
                .transpose()?;
            // The access token goes out with every page request.
            if let Some(link) = next.as_ref().filter(|link| link.origin() != origin) {
                return Err(CanvasError::ForeignPage(link.to_string()));
            }

            let page: Value = response
                .json()
                .await
                .map_err(|e| CanvasError::Decode(e.to_string()))?;
            let Value::Array(entries) = page else {
                return Err(CanvasError::Decode("planner page is not an array".to_string()));
            };
            items.extend(entries.iter().filter_map(normalize_planner_item));
        }

        tracing::debug!(count = items.len(), "Canvas planner items fetched");
        Ok(Listing::Items(items))
    }
}

#[async_trait]
impl WorkloadSource for CanvasClient {
    async fn fetch_workload_items(
        &self,
        link: &CanvasLinkRecord,
    ) -> Result<Vec<WorkloadItem>, CanvasError> {
        self.fetch_at(link, Utc::now()).await
    }
}

fn endpoint(base_url: &str, path: &str) -> Result<Url, CanvasError> {
    Url::parse(base_url)
        .and_then(|base| base.join(path))
        .map_err(|e| CanvasError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })
}

/// First 12 hex chars of the token's SHA-256. Safe to log.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..12].to_string()
}

pub fn parse_next_link(header: &str) -> Option<String> {
    header
        .split(',')
        .find_map(|part| NEXT_LINK_RE.captures(part))
        .map(|caps| caps[1].to_string())
}

fn string_or_number(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(ToString::to_string)
}

/// Map one planner entry into a [`WorkloadItem`]. Non-objects are skipped.
pub fn normalize_planner_item(entry: &Value) -> Option<WorkloadItem> {
    if !entry.is_object() {
        return None;
    }
    let plannable = entry.get("plannable").filter(|p| p.is_object());
    let nested = |key: &str| plannable.and_then(|p| p.get(key));

    let id = string_or_number(entry.get("id"))
        .or_else(|| string_or_number(nested("id")))
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let provider_type = text(nested("plannable_type"))
        .or_else(|| text(entry.get("plannable_type")))
        .or_else(|| text(entry.get("context_type")));

    Some(WorkloadItem {
        id,
        kind: WorkloadKind::infer(provider_type.as_deref()),
        title: text(nested("title")).or_else(|| text(entry.get("title"))),
        course_id: string_or_number(entry.get("course_id")),
        due_at: text(entry.get("due_at")).or_else(|| text(nested("due_at"))),
        todo_date: text(entry.get("todo_date")).or_else(|| text(nested("todo_date"))),
        points_possible: nested("points_possible").and_then(Value::as_f64),
        html_url: text(nested("html_url")).or_else(|| text(entry.get("html_url"))),
    })
}
