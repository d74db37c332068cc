use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use walkworthy_scan::delivery::{self, DeliveryError};

use crate::util::{exit_error, print_json, repository};

pub async fn next(pool: &PgPool, user_id: &str) -> i32 {
    let repo = repository(pool);
    match delivery::next_encouragement(&repo, user_id, Utc::now()).await {
        Ok(next) => print_json(&next),
        Err(e) => exit_error(&e.to_string(), None),
    }
}

pub async fn ack(pool: &PgPool, user_id: &str, encouragement_id: &str) -> i32 {
    let repo = repository(pool);
    match delivery::acknowledge(&repo, user_id, encouragement_id, Utc::now()).await {
        Ok(()) => print_json(&json!({ "acknowledged": true, "encouragementId": encouragement_id })),
        Err(DeliveryError::NotFound(_)) => exit_error(
            &format!("Encouragement {encouragement_id} not found for {user_id}"),
            Some("Use `walkworthy next --user <id>` to see the pending encouragement"),
        ),
        Err(e) => exit_error(&e.to_string(), None),
    }
}
