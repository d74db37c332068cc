//! Records that flow through a scan and the shapes persisted per user.
//!
//! Transient pipeline values (`WorkloadItem`, `StressfulItem`, `VerseCandidate`)
//! never hit the store as-is. `PendingEncouragement` and `ScanLog` are stored
//! under the user's partition with camelCase field names so the device contract
//! stays stable.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::translation::Translation;

/// Hours a pending encouragement stays deliverable.
pub const PENDING_TTL_HOURS: i64 = 12;
/// Accepted shape of a verse reference ("John 3:16", "1 Peter 5:7", "Psalm 46:1-2").
pub const REFERENCE_PATTERN: &str = r"^[1-3]?\s?[A-Za-z]+\s\d+:\d+(-\d+)?$";
pub const MAX_VERSE_TEXT_CHARS: usize = 1200;
pub const MAX_ENCOURAGEMENT_CHARS: usize = 280;
pub const MAX_STRESS_TAGS: usize = 6;

/// ISO-8601 UTC timestamp with millisecond precision and a `Z` suffix.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Collapse internal whitespace, trim, lowercase. Used to compare verse references.
pub fn normalize_reference(reference: &str) -> String {
    reference
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Result of a tolerant parse at a trust boundary.
///
/// `value` is `None` when the record is unusable; `valid` is false whenever a
/// field was missing or had the wrong type, even if a value could be built
/// from defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: Option<T>,
    pub valid: bool,
}

impl<T> Parsed<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            valid: true,
        }
    }

    pub fn degraded(value: T) -> Self {
        Self {
            value: Some(value),
            valid: false,
        }
    }

    pub fn missing() -> Self {
        Self {
            value: None,
            valid: false,
        }
    }
}

fn non_empty_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Assignment,
    Exam,
    Event,
}

impl WorkloadKind {
    /// Infer the kind from a provider-specific type string.
    pub fn infer(provider_type: Option<&str>) -> Self {
        let value = provider_type.unwrap_or_default().to_lowercase();
        if ["quiz", "exam", "test"].iter().any(|k| value.contains(k)) {
            WorkloadKind::Exam
        } else if ["discussion", "assignment", "essay"]
            .iter()
            .any(|k| value.contains(k))
        {
            WorkloadKind::Assignment
        } else {
            WorkloadKind::Event
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Assignment => "assignment",
            WorkloadKind::Exam => "exam",
            WorkloadKind::Event => "event",
        }
    }
}

/// An upcoming calendar or task item as reported by the workload provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadItem {
    pub id: String,
    pub kind: WorkloadKind,
    pub title: Option<String>,
    pub course_id: Option<String>,
    /// Raw provider timestamps; unparseable values are treated as absent downstream.
    pub due_at: Option<String>,
    pub todo_date: Option<String>,
    pub points_possible: Option<f64>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressfulItem {
    #[serde(rename = "type")]
    pub kind: WorkloadKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    pub stress_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerseCandidate {
    #[serde(rename = "ref")]
    pub reference: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerseSelectionResult {
    #[serde(rename = "ref")]
    pub reference: String,
    pub text: String,
    pub encouragement: String,
    pub translation: Translation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    Success,
    Fallback,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Success => "SUCCESS",
            ScanStatus::Fallback => "FALLBACK",
        }
    }
}

/// Provenance for one scan attempt. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanLog {
    pub encouragement_id: String,
    pub status: ScanStatus,
    pub planner_count: usize,
    pub stressful_count: usize,
    pub candidate_count: usize,
    pub translation: Translation,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEncouragement {
    pub id: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub text: String,
    pub encouragement: String,
    pub translation: Translation,
    pub created_at: String,
    /// Epoch seconds; the authoritative expiry.
    pub expires_at: i64,
    pub expires_at_iso: String,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<String>,
}

impl PendingEncouragement {
    /// Build a fresh, undelivered encouragement that expires [`PENDING_TTL_HOURS`] after `now`.
    pub fn issue(
        reference: impl Into<String>,
        text: impl Into<String>,
        encouragement: impl Into<String>,
        translation: Translation,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = (now + Duration::hours(PENDING_TTL_HOURS)).timestamp();
        Self {
            id: Uuid::now_v7().to_string(),
            reference: reference.into(),
            text: text.into(),
            encouragement: encouragement.into(),
            translation,
            created_at: iso_timestamp(now),
            expires_at,
            expires_at_iso: epoch_to_iso(expires_at),
            delivered: false,
            delivered_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }

    pub fn is_deliverable(&self, now: DateTime<Utc>) -> bool {
        !self.delivered && !self.is_expired(now)
    }
}

/// Whole-second epoch to ISO string. Inverse of parsing `expiresAtIso` back to seconds.
pub fn epoch_to_iso(epoch_seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .map(iso_timestamp)
        .unwrap_or_default()
}

/// External account link. Both fields must be non-empty for a scan to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasLinkRecord {
    pub canvas_base_url: String,
    pub refresh_secret_ref: String,
}

impl CanvasLinkRecord {
    pub fn parse(raw: Option<&Value>) -> Parsed<Self> {
        let Some(raw) = raw else {
            return Parsed::missing();
        };
        match (
            non_empty_str(raw, "canvasBaseUrl"),
            non_empty_str(raw, "refreshSecretRef"),
        ) {
            (Some(canvas_base_url), Some(refresh_secret_ref)) => Parsed::ok(Self {
                canvas_base_url,
                refresh_secret_ref,
            }),
            _ => Parsed::missing(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub age_range: Option<String>,
    pub major: Option<String>,
    pub gender: Option<String>,
    #[serde(default)]
    pub hobbies: Vec<String>,
    #[serde(default)]
    pub opt_in_tailored: bool,
    pub translation_preference: Option<String>,
}

impl UserProfile {
    /// Field-by-field parse; wrong-typed fields are dropped and mark the result degraded.
    pub fn parse(raw: Option<&Value>) -> Parsed<Self> {
        let Some(raw) = raw.filter(|v| v.is_object()) else {
            return Parsed::missing();
        };

        let mut valid = true;
        let mut text = |key: &str| match raw.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                valid = false;
                None
            }
        };

        let age_range = text("ageRange");
        let major = text("major");
        let gender = text("gender");
        let translation_preference = text("translationPreference");

        let hobbies = match raw.get("hobbies") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|h| h.as_str().map(ToString::to_string))
                .collect(),
            Some(_) => {
                valid = false;
                Vec::new()
            }
        };
        let opt_in_tailored = match raw.get("optInTailored") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                valid = false;
                false
            }
        };

        let profile = Self {
            age_range,
            major,
            gender,
            hobbies,
            opt_in_tailored,
            translation_preference,
        };
        if valid {
            Parsed::ok(profile)
        } else {
            Parsed::degraded(profile)
        }
    }

    pub fn translation(&self) -> Translation {
        Translation::normalize(self.translation_preference.as_deref())
    }
}

/// What the device receives when it asks for the next encouragement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EncouragementPayload {
    pub id: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub text: String,
    pub encouragement: String,
    pub translation: Translation,
    pub expires_at: String,
}

impl From<&PendingEncouragement> for EncouragementPayload {
    fn from(pending: &PendingEncouragement) -> Self {
        Self {
            id: pending.id.clone(),
            reference: pending.reference.clone(),
            text: pending.text.clone(),
            encouragement: pending.encouragement.clone(),
            translation: pending.translation,
            expires_at: pending.expires_at_iso.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NextEncouragement {
    pub should_notify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EncouragementPayload>,
}
