//! `AppJson<T>`: a `Json<T>` extractor whose rejections use the API error envelope.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    AppError::Validation {
        field: Some(serde_field(&body_text).unwrap_or_else(|| "body".to_string())),
        message: format!("Invalid request body: {body_text}"),
        received: None,
        docs_hint: Some("See /api-doc/openapi.json for the request schema.".to_string()),
    }
}

/// Field named in a serde "missing field `x`" / "unknown field `x`" message.
fn serde_field(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"].iter().find_map(|marker| {
        let start = msg.find(marker)? + marker.len();
        let rest = &msg[start..];
        rest.find('`').map(|end| rest[..end].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_missing_and_unknown_fields() {
        assert_eq!(
            serde_field("Failed to deserialize: missing field `id` at line 1 column 2"),
            Some("id".to_string())
        );
        assert_eq!(
            serde_field("unknown field `extra`, expected `id`"),
            Some("extra".to_string())
        );
        assert_eq!(serde_field("invalid type: string, expected u64"), None);
    }
}
