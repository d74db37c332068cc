//! Scan orchestrator.
//!
//! `LINK_CHECK → CLEAR_PENDING → FETCH_WORKLOAD → HEURISTICS → CANDIDATES →
//! SELECT → PERSIST`. Any recoverable failure after the link check switches to
//! a fallback verse; the scan still persists one pending encouragement and one
//! scan log. Only a missing link, a credential misconfiguration or a store
//! failure reaches the caller as an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use walkworthy_core::records::{
    CanvasLinkRecord, PendingEncouragement, ScanLog, ScanStatus, UserProfile,
    VerseSelectionResult, iso_timestamp,
};
use walkworthy_core::translation::Translation;

use crate::agent::VerseAgent;
use crate::agent::model::{ModelError, OpenAiResponsesModel};
use crate::candidates::build_candidates;
use crate::canvas::{CanvasClient, WorkloadSource};
use crate::config::{ApiKeySource, ScanConfig, ScanSettings};
use crate::fallback;
use crate::heuristics::{rank_tags, to_stressful_items, unique_tags};
use crate::profile::ProfileCache;
use crate::secrets::{self, SecretError, SecretStore};
use crate::store::{KvStore, ScanRepository, StoreError};
use crate::verses::{self, VerseService, VerseServiceError};

/// Stressful items kept per scan.
pub const SCAN_MAX_ITEMS: usize = 25;
pub const NO_CANDIDATES_REASON: &str = "No verse candidates from MCP";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Canvas account is not linked for user {0}")]
    LinkMissing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Canvas credentials are misconfigured: {0}")]
    Credential(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("could not resolve model API key: {0}")]
    ApiKey(#[from] SecretError),

    #[error("could not build model client: {0}")]
    Model(#[from] ModelError),

    #[error("could not build verse service: {0}")]
    Verses(#[from] VerseServiceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    LinkCheck,
    ClearPending,
    FetchWorkload,
    Heuristics,
    Candidates,
    Select,
    Fallback,
    Persist,
}

impl ScanStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStage::LinkCheck => "link_check",
            ScanStage::ClearPending => "clear_pending",
            ScanStage::FetchWorkload => "fetch_workload",
            ScanStage::Heuristics => "heuristics",
            ScanStage::Candidates => "candidates",
            ScanStage::Select => "select",
            ScanStage::Fallback => "fallback",
            ScanStage::Persist => "persist",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub encouragement_id: String,
    pub status: ScanStatus,
    pub log: ScanLog,
}

/// Counts gathered before the pipeline finished or failed.
#[derive(Debug, Default)]
struct Progress {
    planner_count: usize,
    stressful_count: usize,
    candidate_count: usize,
    tags: Vec<String>,
}

enum StageFailure {
    Recoverable(String),
    Fatal(ScanError),
}

pub struct Scanner {
    repo: ScanRepository,
    workload: Arc<dyn WorkloadSource>,
    verses: Arc<dyn VerseService>,
    agent: VerseAgent,
    settings: ScanSettings,
    rng: Mutex<StdRng>,
    leases: LeaseMap,
}

impl Scanner {
    pub fn new(
        repo: ScanRepository,
        workload: Arc<dyn WorkloadSource>,
        verses: Arc<dyn VerseService>,
        agent: VerseAgent,
        settings: ScanSettings,
    ) -> Self {
        Self {
            repo,
            workload,
            verses,
            agent,
            settings,
            rng: Mutex::new(StdRng::from_entropy()),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the fallback RNG, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Wire the production collaborators from configuration.
    pub async fn from_config(
        config: &ScanConfig,
        store: Arc<dyn KvStore>,
        secret_store: Arc<dyn SecretStore>,
        http: reqwest::Client,
    ) -> Result<Self, BootstrapError> {
        let api_key = match &config.model.api_key {
            ApiKeySource::Inline(key) => key.clone(),
            ApiKeySource::SecretRef(secret_ref) => {
                secrets::get_string(secret_store.as_ref(), secret_ref).await?
            }
        };
        let model = OpenAiResponsesModel::new(
            config.model.base_url.clone(),
            config.model.model.clone(),
            api_key,
            config.settings.stage_timeout,
        )?;
        let agent = VerseAgent::new(
            Arc::new(model),
            config.settings.agent_max_attempts,
            config.settings.stage_timeout,
        );
        let verse_service = verses::from_config(&config.verses, http.clone())?;
        let workload = CanvasClient::new(
            http,
            secret_store,
            config.settings.canvas_client_secret_ref.clone(),
            config.settings.lookahead_days,
        );

        Ok(Self::new(
            ScanRepository::new(store),
            Arc::new(workload),
            verse_service,
            agent,
            config.settings.clone(),
        ))
    }

    pub fn repository(&self) -> &ScanRepository {
        &self.repo
    }

    pub async fn run_scan_for_user(
        &self,
        user_id: &str,
        profiles: &mut ProfileCache,
    ) -> Result<ScanOutcome, ScanError> {
        let lease = UserLease::acquire(&self.leases, user_id);
        let _held = lease.lock().await;
        self.scan(user_id, profiles).await
    }

    async fn scan(
        &self,
        user_id: &str,
        profiles: &mut ProfileCache,
    ) -> Result<ScanOutcome, ScanError> {
        tracing::info!(user_id, stage = %ScanStage::LinkCheck, "scan started");
        let raw_link = self.repo.load_link(user_id).await?;
        let link = CanvasLinkRecord::parse(raw_link.as_ref())
            .value
            .ok_or_else(|| ScanError::LinkMissing(user_id.to_string()))?;
        let profile = profiles.get_or_load(&self.repo, user_id).await?;
        let translation = profile
            .as_ref()
            .map(UserProfile::translation)
            .unwrap_or_default();

        let now = Utc::now();
        tracing::info!(user_id, stage = %ScanStage::ClearPending, "superseding pending encouragements");
        self.clear_pending(user_id, now).await?;

        let mut progress = Progress::default();
        let selected = self
            .select(user_id, &link, profile.as_ref(), translation, &mut progress)
            .await;

        let (pending, status, error_message) = match selected {
            Ok(selection) => (
                PendingEncouragement::issue(
                    selection.reference,
                    selection.text,
                    selection.encouragement,
                    selection.translation,
                    now,
                ),
                ScanStatus::Success,
                None,
            ),
            Err(StageFailure::Fatal(err)) => return Err(err),
            Err(StageFailure::Recoverable(reason)) => {
                let verse = {
                    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                    fallback::pick(&self.settings.exclusions, &mut *rng)
                };
                tracing::warn!(
                    user_id,
                    stage = %ScanStage::Fallback,
                    reason = %reason,
                    reference = verse.reference,
                    "using fallback verse"
                );
                (
                    PendingEncouragement::issue(
                        verse.reference,
                        verse.text,
                        verse.encouragement,
                        translation,
                        now,
                    ),
                    ScanStatus::Fallback,
                    Some(reason),
                )
            }
        };

        let log = ScanLog {
            encouragement_id: pending.id.clone(),
            status,
            planner_count: progress.planner_count,
            stressful_count: progress.stressful_count,
            candidate_count: progress.candidate_count,
            translation,
            tags: progress.tags,
            error_message,
            created_at: iso_timestamp(now),
        };

        tracing::info!(user_id, stage = %ScanStage::Persist, status = status.as_str(), "persisting scan result");
        self.repo.put_pending(user_id, &pending).await?;
        self.repo.put_scan_log(user_id, &log).await?;

        Ok(ScanOutcome {
            encouragement_id: pending.id,
            status,
            log,
        })
    }

    /// Mark every undelivered pending record as delivered. All updates must
    /// succeed; a partial supersession would leave two live encouragements.
    async fn clear_pending(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), ScanError> {
        let records = self.repo.pending_records(user_id).await?;
        let stale: Vec<_> = records
            .iter()
            .filter(|item| item.data.get("delivered") != Some(&Value::Bool(true)))
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        try_join_all(
            stale
                .iter()
                .map(|item| self.repo.mark_delivered(user_id, &item.sk, now)),
        )
        .await?;
        tracing::debug!(user_id, superseded = stale.len(), "pending encouragements superseded");
        Ok(())
    }

    async fn select(
        &self,
        user_id: &str,
        link: &CanvasLinkRecord,
        profile: Option<&UserProfile>,
        translation: Translation,
        progress: &mut Progress,
    ) -> Result<VerseSelectionResult, StageFailure> {
        let budget = self.settings.stage_timeout;
        let timed_out =
            |stage: ScanStage| StageFailure::Recoverable(format!("{stage} timed out after {}s", budget.as_secs()));

        tracing::info!(user_id, stage = %ScanStage::FetchWorkload, "fetching workload");
        let workload = tokio::time::timeout(budget, self.workload.fetch_workload_items(link))
            .await
            .map_err(|_| timed_out(ScanStage::FetchWorkload))?
            .map_err(|err| {
                if err.is_credential_fault() {
                    StageFailure::Fatal(ScanError::Credential(err.to_string()))
                } else {
                    StageFailure::Recoverable(err.to_string())
                }
            })?;
        progress.planner_count = workload.len();

        let stressful = to_stressful_items(&workload, SCAN_MAX_ITEMS, Utc::now());
        progress.stressful_count = stressful.len();
        progress.tags = unique_tags(&stressful);
        let ranked = rank_tags(&stressful);
        tracing::info!(
            user_id,
            stage = %ScanStage::Heuristics,
            planner_count = progress.planner_count,
            stressful_count = progress.stressful_count,
            ranked_tags = ?ranked,
            "stress profile derived"
        );

        let candidates = tokio::time::timeout(
            budget,
            build_candidates(
                self.verses.as_ref(),
                &ranked,
                translation,
                &self.settings.exclusions,
                self.settings.candidate_cap,
            ),
        )
        .await
        .map_err(|_| timed_out(ScanStage::Candidates))?;
        progress.candidate_count = candidates.len();
        tracing::info!(
            user_id,
            stage = %ScanStage::Candidates,
            candidate_count = candidates.len(),
            "verse candidates retrieved"
        );
        if candidates.is_empty() {
            return Err(StageFailure::Recoverable(NO_CANDIDATES_REASON.to_string()));
        }

        tracing::info!(user_id, stage = %ScanStage::Select, "selecting verse");
        self.agent
            .select_verse(profile, &stressful, &candidates, translation)
            .await
            .map_err(|err| StageFailure::Recoverable(err.to_string()))
    }

    /// Scan each user in order. One user's failure never stops the batch.
    pub async fn run_batch(&self, user_ids: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for user_id in user_ids {
            let mut profiles = ProfileCache::new();
            let entry = match self.run_scan_for_user(user_id, &mut profiles).await {
                Ok(outcome) => BatchEntry {
                    user_id: user_id.clone(),
                    status: match outcome.status {
                        ScanStatus::Success => BatchStatus::Success,
                        ScanStatus::Fallback => BatchStatus::Fallback,
                    },
                    encouragement_id: Some(outcome.encouragement_id),
                    error: outcome.log.error_message,
                },
                Err(ScanError::LinkMissing(_)) => BatchEntry {
                    user_id: user_id.clone(),
                    status: BatchStatus::Skipped,
                    encouragement_id: None,
                    error: Some("Canvas not linked".to_string()),
                },
                Err(err) => {
                    tracing::error!(user_id = %user_id, error = %err, "scan failed");
                    BatchEntry {
                        user_id: user_id.clone(),
                        status: BatchStatus::Error,
                        encouragement_id: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            report.entries.push(entry);
        }

        tracing::info!(
            total = report.entries.len(),
            success = report.count(BatchStatus::Success),
            fallback = report.count(BatchStatus::Fallback),
            skipped = report.count(BatchStatus::Skipped),
            errors = report.count(BatchStatus::Error),
            "batch scan finished"
        );
        report
    }

    /// Batch over every user that has a Canvas link record.
    pub async fn run_linked_batch(&self) -> Result<BatchReport, ScanError> {
        let users = self.repo.linked_users().await?;
        tracing::info!(users = users.len(), "starting batch scan for linked users");
        Ok(self.run_batch(&users).await)
    }
}

type LeaseMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Per-user scan lease. The map entry is removed on drop once no other scan
/// for the user holds or waits on it, including when the scan future is
/// cancelled mid-flight.
struct UserLease<'a> {
    leases: &'a LeaseMap,
    user_id: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> UserLease<'a> {
    fn acquire(leases: &'a LeaseMap, user_id: &'a str) -> Self {
        let lock = leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_default()
            .clone();
        Self {
            leases,
            user_id,
            lock,
        }
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for UserLease<'_> {
    fn drop(&mut self) {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            leases.remove(self.user_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Success,
    Fallback,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub user_id: String,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encouragement_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn count(&self, status: BatchStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}
