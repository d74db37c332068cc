//! Device-facing reads and acknowledgements of pending encouragements.

use chrono::{DateTime, Utc};

use walkworthy_core::records::{EncouragementPayload, NextEncouragement};

use crate::store::{ScanRepository, StoreError, keys};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("encouragement {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Newest undelivered, unexpired encouragement for the user, if any.
pub async fn next_encouragement(
    repo: &ScanRepository,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<NextEncouragement, DeliveryError> {
    let pending = repo.pending_encouragements(user_id).await?;
    let newest = pending
        .iter()
        .filter(|p| p.is_deliverable(now))
        .max_by(|a, b| a.created_at.cmp(&b.created_at));

    Ok(match newest {
        Some(pending) => NextEncouragement {
            should_notify: true,
            payload: Some(EncouragementPayload::from(pending)),
        },
        None => NextEncouragement {
            should_notify: false,
            payload: None,
        },
    })
}

pub async fn acknowledge(
    repo: &ScanRepository,
    user_id: &str,
    encouragement_id: &str,
    now: DateTime<Utc>,
) -> Result<(), DeliveryError> {
    if repo.get_pending(user_id, encouragement_id).await?.is_none() {
        return Err(DeliveryError::NotFound(encouragement_id.to_string()));
    }
    let updated = repo
        .mark_delivered(user_id, &keys::pending(encouragement_id), now)
        .await?;
    if !updated {
        return Err(DeliveryError::NotFound(encouragement_id.to_string()));
    }
    tracing::info!(user_id, encouragement_id, "encouragement acknowledged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use walkworthy_core::records::PendingEncouragement;
    use walkworthy_core::translation::Translation;

    use super::*;
    use crate::store::MemoryKvStore;

    fn at(iso: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(iso).unwrap().with_timezone(&Utc)
    }

    fn repo() -> ScanRepository {
        ScanRepository::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn nothing_pending_means_no_notification() {
        let next = next_encouragement(&repo(), "u1", Utc::now()).await.unwrap();
        assert!(!next.should_notify);
        assert!(next.payload.is_none());
    }

    #[tokio::test]
    async fn newest_deliverable_wins_and_expired_is_skipped() {
        let repo = repo();
        let t0 = at("2026-10-17T06:00:00Z");
        let older = PendingEncouragement::issue("Psalm 4:8", "In peace", "Sleep", Translation::Esv, t0);
        let newer = PendingEncouragement::issue(
            "James 1:5",
            "If any of you lacks wisdom",
            "Ask",
            Translation::Kjv,
            t0 + Duration::hours(1),
        );
        repo.put_pending("u1", &older).await.unwrap();
        repo.put_pending("u1", &newer).await.unwrap();

        let next = next_encouragement(&repo, "u1", t0 + Duration::hours(2))
            .await
            .unwrap();
        let payload = next.payload.unwrap();
        assert_eq!(payload.id, newer.id);
        assert_eq!(payload.expires_at, newer.expires_at_iso);

        // Past the newer one's expiry nothing is deliverable, even though
        // neither record was ever marked delivered.
        let later = next_encouragement(&repo, "u1", t0 + Duration::hours(13))
            .await
            .unwrap();
        assert!(!later.should_notify);
    }

    #[tokio::test]
    async fn acknowledge_marks_delivered_and_rejects_unknown_ids() {
        let repo = repo();
        let now = at("2026-10-17T06:00:00Z");
        let pending = PendingEncouragement::issue("Psalm 4:8", "In peace", "Sleep", Translation::Esv, now);
        repo.put_pending("u1", &pending).await.unwrap();

        acknowledge(&repo, "u1", &pending.id, now).await.unwrap();
        let stored = repo.get_pending("u1", &pending.id).await.unwrap().unwrap();
        assert!(stored.delivered);
        assert!(stored.delivered_at.is_some());
        assert!(!next_encouragement(&repo, "u1", now).await.unwrap().should_notify);

        let err = acknowledge(&repo, "u1", "missing", now)
            .await
            .expect_err("unknown id");
        assert!(matches!(err, DeliveryError::NotFound(_)));
    }
}
