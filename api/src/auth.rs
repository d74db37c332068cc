//! Caller identity.
//!
//! JWT verification happens in the fronting authorizer, which forwards the
//! verified subject in `x-user-sub`. Requests without it are rejected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

pub const USER_SUB_HEADER: &str = "x-user-sub";
const MAX_SUBJECT_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
}

pub fn parse_subject(raw: Option<&str>) -> Result<String, AppError> {
    let subject = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Unauthorized {
            message: format!("Missing {USER_SUB_HEADER} header"),
            docs_hint: Some(
                "Requests must pass through the authorizer, which sets the verified subject."
                    .to_string(),
            ),
        })?;

    if subject.len() > MAX_SUBJECT_LEN || subject.chars().any(|c| c.is_control() || c == '#') {
        return Err(AppError::Unauthorized {
            message: "Caller subject is not a valid identifier".to_string(),
            docs_hint: None,
        });
    }
    Ok(subject.to_string())
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_SUB_HEADER)
            .and_then(|v| v.to_str().ok());
        let user_id = parse_subject(raw)?;
        Ok(CallerIdentity { user_id })
    }
}
