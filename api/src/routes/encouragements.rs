use axum::extract::State;
use axum::{Json, Router, routing::get, routing::post};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use walkworthy_core::records::NextEncouragement;
use walkworthy_core::translation::Translation;
use walkworthy_scan::delivery;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/encouragements/next", get(next_encouragement))
        .route("/v1/encouragements/ack", post(acknowledge))
}

/// Flat device payload: `shouldNotify` plus the encouragement fields when set.
#[derive(Debug, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NextEncouragementResponse {
    pub should_notify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encouragement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<Translation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl From<NextEncouragement> for NextEncouragementResponse {
    fn from(next: NextEncouragement) -> Self {
        match next.payload {
            Some(payload) if next.should_notify => Self {
                should_notify: true,
                id: Some(payload.id),
                reference: Some(payload.reference),
                text: Some(payload.text),
                encouragement: Some(payload.encouragement),
                translation: Some(payload.translation),
                expires_at: Some(payload.expires_at),
            },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AckRequest {
    #[serde(default, rename = "encouragementId", alias = "id")]
    pub encouragement_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AckResponse {
    pub acknowledged: bool,
}

#[utoipa::path(
    get,
    path = "/v1/encouragements/next",
    responses(
        (status = 200, description = "Newest deliverable encouragement, if any", body = NextEncouragementResponse),
        (status = 401, description = "Missing caller identity", body = walkworthy_core::error::ApiError)
    ),
    tag = "encouragements"
)]
pub async fn next_encouragement(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<NextEncouragementResponse>, AppError> {
    let next =
        delivery::next_encouragement(state.repository(), &caller.user_id, Utc::now()).await?;
    Ok(Json(next.into()))
}

#[utoipa::path(
    post,
    path = "/v1/encouragements/ack",
    request_body = AckRequest,
    responses(
        (status = 200, description = "Encouragement marked delivered", body = AckResponse),
        (status = 400, description = "encouragementId missing", body = walkworthy_core::error::ApiError),
        (status = 404, description = "No such encouragement for this user", body = walkworthy_core::error::ApiError)
    ),
    tag = "encouragements"
)]
pub async fn acknowledge(
    State(state): State<AppState>,
    caller: CallerIdentity,
    AppJson(req): AppJson<AckRequest>,
) -> Result<Json<AckResponse>, AppError> {
    let encouragement_id = req
        .encouragement_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation {
            message: "encouragementId is required".to_string(),
            field: Some("encouragementId".to_string()),
            received: None,
            docs_hint: Some("Send the id from GET /v1/encouragements/next.".to_string()),
        })?;

    delivery::acknowledge(
        state.repository(),
        &caller.user_id,
        &encouragement_id,
        Utc::now(),
    )
    .await?;
    Ok(Json(AckResponse { acknowledged: true }))
}
