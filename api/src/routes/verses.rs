use axum::body::Bytes;
use axum::extract::State;
use axum::{Json, Router, routing::post};
use serde_json::Value;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/verses/rpc", post(verse_rpc))
}

/// JSON-RPC 2.0 bridge to the built-in verse library.
///
/// Methods: `search_verses {keywords, translation?, limit?}` and
/// `get_verse_by_reference {ref, translation?}`. Errors are reported in the
/// JSON-RPC `error` member with HTTP 200.
#[utoipa::path(
    post,
    path = "/v1/verses/rpc",
    request_body = Object,
    responses(
        (status = 200, description = "JSON-RPC response", body = Object)
    ),
    tag = "verses"
)]
pub async fn verse_rpc(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    // Unparseable bodies fall through as null and are answered as invalid requests.
    let request = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    Json(state.verse_library.handle_rpc(&request))
}
