//! Credential secret store: Canvas OAuth client, per-user token secrets, model API key.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret {0} not found")]
    NotFound(String),

    #[error("secret {secret_ref} is malformed: {reason}")]
    Malformed { secret_ref: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Raw stored value. Strings are returned as-is; callers decide how to read them.
    async fn get(&self, secret_ref: &str) -> Result<Value, SecretError>;

    async fn put(&self, secret_ref: &str, value: &Value) -> Result<(), SecretError>;
}

/// Read a secret as a JSON document. A stored string is parsed as JSON, so
/// secrets written by other tooling as serialized text still load.
pub async fn get_json(store: &dyn SecretStore, secret_ref: &str) -> Result<Value, SecretError> {
    match store.get(secret_ref).await? {
        Value::String(raw) => {
            serde_json::from_str(&raw).map_err(|e| SecretError::Malformed {
                secret_ref: secret_ref.to_string(),
                reason: format!("not valid JSON: {e}"),
            })
        }
        other => Ok(other),
    }
}

/// Read a secret as plain text, trimmed. Objects with an `apiKey` or `value` field are accepted.
pub async fn get_string(store: &dyn SecretStore, secret_ref: &str) -> Result<String, SecretError> {
    let value = store.get(secret_ref).await?;
    let text = match &value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("apiKey")
            .or_else(|| map.get("value"))
            .and_then(Value::as_str),
        _ => None,
    };
    text.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| SecretError::Malformed {
            secret_ref: secret_ref.to_string(),
            reason: "expected a non-empty string".to_string(),
        })
}

#[derive(Clone)]
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn get(&self, secret_ref: &str) -> Result<Value, SecretError> {
        let value = sqlx::query_scalar::<_, Value>(
            "SELECT value FROM secrets WHERE secret_ref = $1",
        )
        .bind(secret_ref)
        .fetch_optional(&self.pool)
        .await?;
        value.ok_or_else(|| SecretError::NotFound(secret_ref.to_string()))
    }

    async fn put(&self, secret_ref: &str, value: &Value) -> Result<(), SecretError> {
        sqlx::query(
            r#"
            INSERT INTO secrets (secret_ref, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (secret_ref)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(secret_ref)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, secret_ref: impl Into<String>, value: Value) {
        self.values.write().await.insert(secret_ref.into(), value);
    }

    pub async fn snapshot(&self, secret_ref: &str) -> Option<Value> {
        self.values.read().await.get(secret_ref).cloned()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, secret_ref: &str) -> Result<Value, SecretError> {
        self.values
            .read()
            .await
            .get(secret_ref)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(secret_ref.to_string()))
    }

    async fn put(&self, secret_ref: &str, value: &Value) -> Result<(), SecretError> {
        self.values
            .write()
            .await
            .insert(secret_ref.to_string(), value.clone());
        Ok(())
    }
}
