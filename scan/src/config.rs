//! Environment configuration for the scan pipeline.
//!
//! Read once at startup. Bounded numeric settings outside their range are
//! configuration errors, not silently clamped.

use std::time::Duration;

use walkworthy_core::translation::Translation;

use crate::candidates::ExclusionList;

pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 14;
pub const DEFAULT_CANDIDATE_CAP: usize = 8;
pub const DEFAULT_AGENT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerseServiceMode {
    Disabled,
    Http,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerseServiceConfig {
    pub mode: VerseServiceMode,
    pub url: Option<String>,
    pub default_translation: Translation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiKeySource {
    Inline(String),
    SecretRef(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: ApiKeySource,
}

/// Knobs the orchestrator itself reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub canvas_client_secret_ref: String,
    pub lookahead_days: i64,
    pub candidate_cap: usize,
    pub agent_max_attempts: u32,
    pub stage_timeout: Duration,
    pub exclusions: ExclusionList,
}

impl ScanSettings {
    pub fn new(canvas_client_secret_ref: impl Into<String>) -> Self {
        Self {
            canvas_client_secret_ref: canvas_client_secret_ref.into(),
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            candidate_cap: DEFAULT_CANDIDATE_CAP,
            agent_max_attempts: DEFAULT_AGENT_MAX_ATTEMPTS,
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            exclusions: ExclusionList::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub settings: ScanSettings,
    pub verses: VerseServiceConfig,
    pub model: ModelConfig,
}

impl ScanConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let canvas_client_secret_ref = var("CANVAS_CLIENT_SECRET_REF")
            .ok_or(ConfigError::Missing("CANVAS_CLIENT_SECRET_REF"))?;

        let mode = match var("VERSE_SERVICE_MODE")
            .map(|m| m.to_lowercase())
            .as_deref()
        {
            None | Some("disabled") => VerseServiceMode::Disabled,
            Some("http") => VerseServiceMode::Http,
            Some("local") => VerseServiceMode::Local,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "VERSE_SERVICE_MODE",
                    value: other.to_string(),
                    reason: "expected disabled, http or local".to_string(),
                });
            }
        };
        let url = var("VERSE_SERVICE_URL");
        if mode == VerseServiceMode::Http {
            let Some(raw) = url.as_deref() else {
                return Err(ConfigError::Missing("VERSE_SERVICE_URL"));
            };
            url::Url::parse(raw).map_err(|e| ConfigError::Invalid {
                key: "VERSE_SERVICE_URL",
                value: raw.to_string(),
                reason: e.to_string(),
            })?;
        }
        let default_translation =
            Translation::normalize(var("VERSE_DEFAULT_TRANSLATION").as_deref());

        let api_key = match (var("OPENAI_API_KEY"), var("OPENAI_API_KEY_SECRET_REF")) {
            (Some(key), _) => ApiKeySource::Inline(key),
            (None, Some(secret_ref)) => ApiKeySource::SecretRef(secret_ref),
            (None, None) => return Err(ConfigError::Missing("OPENAI_API_KEY")),
        };
        let model = ModelConfig {
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        };

        let lookahead_days = bounded(
            "SCAN_LOOKAHEAD_DAYS",
            var("SCAN_LOOKAHEAD_DAYS"),
            1,
            60,
            DEFAULT_LOOKAHEAD_DAYS as u64,
        )? as i64;
        let candidate_cap = bounded(
            "SCAN_CANDIDATE_CAP",
            var("SCAN_CANDIDATE_CAP"),
            1,
            20,
            DEFAULT_CANDIDATE_CAP as u64,
        )? as usize;
        let agent_max_attempts = bounded(
            "SCAN_AGENT_MAX_ATTEMPTS",
            var("SCAN_AGENT_MAX_ATTEMPTS"),
            1,
            5,
            DEFAULT_AGENT_MAX_ATTEMPTS as u64,
        )? as u32;
        let stage_timeout_secs = bounded(
            "SCAN_STAGE_TIMEOUT_SECS",
            var("SCAN_STAGE_TIMEOUT_SECS"),
            1,
            600,
            DEFAULT_STAGE_TIMEOUT_SECS,
        )?;

        // Raw lookup: a whitespace-only value excludes nothing, unset keeps the defaults.
        let exclusions = ExclusionList::parse(lookup("SCAN_EXCLUDED_VERSES").as_deref());

        Ok(Self {
            settings: ScanSettings {
                canvas_client_secret_ref,
                lookahead_days,
                candidate_cap,
                agent_max_attempts,
                stage_timeout: Duration::from_secs(stage_timeout_secs),
                exclusions,
            },
            verses: VerseServiceConfig {
                mode,
                url,
                default_translation,
            },
            model,
        })
    }
}

fn bounded(
    key: &'static str,
    raw: Option<String>,
    min: u64,
    max: u64,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };
    let value: u64 = raw
        .parse()
        .map_err(|_| invalid("expected a whole number".to_string()))?;
    if !(min..=max).contains(&value) {
        return Err(invalid(format!("must be between {min} and {max}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<ScanConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ScanConfig::from_vars(|key| vars.get(key).cloned())
    }

    const BASE: [(&str, &str); 2] = [
        ("CANVAS_CLIENT_SECRET_REF", "canvas/client"),
        ("OPENAI_API_KEY", "sk-test"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let cfg = config(&BASE).unwrap();
        assert_eq!(cfg.settings.lookahead_days, 14);
        assert_eq!(cfg.settings.candidate_cap, 8);
        assert_eq!(cfg.settings.agent_max_attempts, 2);
        assert_eq!(cfg.settings.stage_timeout, Duration::from_secs(30));
        assert_eq!(cfg.verses.mode, VerseServiceMode::Disabled);
        assert_eq!(cfg.verses.default_translation, Translation::Esv);
        assert_eq!(cfg.model.model, "gpt-4.1");
        assert_eq!(cfg.model.base_url, "https://api.openai.com/v1");
        assert!(cfg.settings.exclusions.contains("philippians 4:6-7"));
    }

    #[test]
    fn missing_client_secret_ref_is_rejected() {
        let err = config(&[("OPENAI_API_KEY", "sk")]).expect_err("should fail");
        assert_eq!(err, ConfigError::Missing("CANVAS_CLIENT_SECRET_REF"));
    }

    #[test]
    fn api_key_may_come_from_secret_ref() {
        let cfg = config(&[
            ("CANVAS_CLIENT_SECRET_REF", "canvas/client"),
            ("OPENAI_API_KEY_SECRET_REF", "openai/key"),
        ])
        .unwrap();
        assert_eq!(
            cfg.model.api_key,
            ApiKeySource::SecretRef("openai/key".to_string())
        );

        let err = config(&[("CANVAS_CLIENT_SECRET_REF", "canvas/client")]).expect_err("no key");
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));
    }

    #[test]
    fn http_mode_requires_a_url() {
        let mut pairs = BASE.to_vec();
        pairs.push(("VERSE_SERVICE_MODE", "HTTP"));
        let err = config(&pairs).expect_err("should fail");
        assert_eq!(err, ConfigError::Missing("VERSE_SERVICE_URL"));

        pairs.push(("VERSE_SERVICE_URL", "http://localhost:3000/v1/verses/rpc"));
        assert_eq!(config(&pairs).unwrap().verses.mode, VerseServiceMode::Http);
    }

    #[test]
    fn out_of_range_values_are_errors() {
        let mut pairs = BASE.to_vec();
        pairs.push(("SCAN_CANDIDATE_CAP", "0"));
        match config(&pairs).expect_err("should fail") {
            ConfigError::Invalid { key, .. } => assert_eq!(key, "SCAN_CANDIDATE_CAP"),
            other => panic!("unexpected error: {other:?}"),
        }

        let mut pairs = BASE.to_vec();
        pairs.push(("SCAN_LOOKAHEAD_DAYS", "two weeks"));
        assert!(config(&pairs).is_err());
    }

    #[test]
    fn unknown_verse_mode_is_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("VERSE_SERVICE_MODE", "stdio"));
        assert!(matches!(
            config(&pairs),
            Err(ConfigError::Invalid { key: "VERSE_SERVICE_MODE", .. })
        ));
    }

    #[test]
    fn explicitly_empty_exclusions_exclude_nothing() {
        let mut pairs = BASE.to_vec();
        pairs.push(("SCAN_EXCLUDED_VERSES", "[]"));
        assert!(config(&pairs).unwrap().settings.exclusions.is_empty());
    }
}
