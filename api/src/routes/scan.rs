use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::post};
use serde::Serialize;
use utoipa::ToSchema;
use walkworthy_core::records::ScanStatus;
use walkworthy_scan::ProfileCache;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/scan", post(trigger_scan))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanAccepted {
    pub message: String,
    pub encouragement_id: String,
    pub status: ScanStatus,
}

/// Run a scan for the caller and queue one pending encouragement.
///
/// Upstream failures still produce an encouragement (status `FALLBACK`).
#[utoipa::path(
    post,
    path = "/v1/scan",
    responses(
        (status = 202, description = "Scan finished, encouragement queued", body = ScanAccepted),
        (status = 401, description = "Missing caller identity", body = walkworthy_core::error::ApiError),
        (status = 409, description = "Canvas account not linked", body = walkworthy_core::error::ApiError),
        (status = 500, description = "Configuration or store failure", body = walkworthy_core::error::ApiError)
    ),
    tag = "scan"
)]
pub async fn trigger_scan(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<impl IntoResponse, AppError> {
    let mut profiles = ProfileCache::new();
    let outcome = state
        .scanner
        .run_scan_for_user(&caller.user_id, &mut profiles)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ScanAccepted {
            message: "Scan accepted".to_string(),
            encouragement_id: outcome.encouragement_id,
            status: outcome.status,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::state::testing;

    async fn call(user: Option<&str>) -> (StatusCode, Value) {
        let app = router().with_state(testing::state().await);
        let mut request = Request::post("/v1/scan");
        if let Some(user) = user {
            request = request.header("x-user-sub", user);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn linked_user_gets_202_with_encouragement_id() {
        let (status, body) = call(Some("linked-user")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["message"], "Scan accepted");
        assert!(body["encouragementId"].as_str().is_some());
        assert!(matches!(body["status"].as_str(), Some("SUCCESS" | "FALLBACK")));
    }

    #[tokio::test]
    async fn unlinked_user_gets_409() {
        let (status, body) = call(Some("stranger")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn missing_identity_gets_401() {
        let (status, body) = call(None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }
}
