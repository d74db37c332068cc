use serde_json::json;
use sqlx::PgPool;
use walkworthy_scan::{BatchStatus, ProfileCache, ScanError};

use crate::util::{exit_error, print_json, scanner};

pub async fn single(pool: &PgPool, user_id: &str) -> i32 {
    let scanner = scanner(pool).await;
    let mut cache = ProfileCache::new();
    match scanner.run_scan_for_user(user_id, &mut cache).await {
        Ok(outcome) => print_json(&outcome),
        Err(ScanError::LinkMissing(_)) => exit_error(
            &format!("User {user_id} has no linked Canvas account"),
            Some("Link the account in the app before scanning"),
        ),
        Err(e) => exit_error(&e.to_string(), None),
    }
}

/// Scans the given users, or every linked user when none are named.
/// Exits non-zero when any entry ended in ERROR.
pub async fn batch(pool: &PgPool, user_ids: &[String]) -> i32 {
    let scanner = scanner(pool).await;
    let report = if user_ids.is_empty() {
        match scanner.run_linked_batch().await {
            Ok(report) => report,
            Err(e) => exit_error(&format!("Failed to list linked users: {e}"), None),
        }
    } else {
        scanner.run_batch(user_ids).await
    };

    let summary = json!({
        "total": report.entries.len(),
        "success": report.count(BatchStatus::Success),
        "fallback": report.count(BatchStatus::Fallback),
        "skipped": report.count(BatchStatus::Skipped),
        "error": report.count(BatchStatus::Error),
    });
    tracing::info!(%summary, "batch finished");

    let code = print_json(&json!({ "summary": summary, "entries": report.entries }));
    if report.count(BatchStatus::Error) > 0 { 2 } else { code }
}
