use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Bible translations the pipeline is allowed to emit.
///
/// Anything outside this set is normalized to [`Translation::Esv`] before it
/// reaches a candidate query, the selection agent or a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Translation {
    #[default]
    Esv,
    Kjv,
    Niv,
    Nkjv,
    Nasb,
    Csb,
    Nlt,
}

impl Translation {
    pub const ALL: [Translation; 7] = [
        Translation::Esv,
        Translation::Kjv,
        Translation::Niv,
        Translation::Nkjv,
        Translation::Nasb,
        Translation::Csb,
        Translation::Nlt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Translation::Esv => "ESV",
            Translation::Kjv => "KJV",
            Translation::Niv => "NIV",
            Translation::Nkjv => "NKJV",
            Translation::Nasb => "NASB",
            Translation::Csb => "CSB",
            Translation::Nlt => "NLT",
        }
    }

    /// Strict lookup: `None` for codes outside the allowed set.
    pub fn parse(code: &str) -> Option<Self> {
        let upper = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|t| t.as_str() == upper)
    }

    /// Lenient lookup used at every trust boundary: unknown or missing codes become ESV.
    pub fn normalize(code: Option<&str>) -> Self {
        code.and_then(Self::parse).unwrap_or_default()
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Translation;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Translation::parse("kjv"), Some(Translation::Kjv));
        assert_eq!(Translation::parse(" Nasb "), Some(Translation::Nasb));
        assert_eq!(Translation::parse("MSG"), None);
    }

    #[test]
    fn normalize_falls_back_to_esv() {
        assert_eq!(Translation::normalize(Some("xyz")), Translation::Esv);
        assert_eq!(Translation::normalize(None), Translation::Esv);
        assert_eq!(Translation::normalize(Some("nlt")), Translation::Nlt);
    }

    #[test]
    fn serializes_as_uppercase_code() {
        let json = serde_json::to_string(&Translation::Nkjv).unwrap();
        assert_eq!(json, "\"NKJV\"");
        let parsed: Translation = serde_json::from_str("\"CSB\"").unwrap();
        assert_eq!(parsed, Translation::Csb);
    }
}
