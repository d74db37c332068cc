//! Candidate pool: per-tag verse queries, dedup, cap, exclusion filter.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use walkworthy_core::records::{VerseCandidate, normalize_reference};
use walkworthy_core::translation::Translation;

use crate::verses::VerseService;

pub const VERSES_PER_TAG: usize = 5;
pub const DEFAULT_EXCLUDED_REFERENCES: &[&str] = &["Philippians 4:6-7"];

/// References that must never be offered, compared in normalized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionList {
    refs: BTreeSet<String>,
}

impl Default for ExclusionList {
    fn default() -> Self {
        Self::from_refs(DEFAULT_EXCLUDED_REFERENCES.iter().copied())
    }
}

impl ExclusionList {
    pub fn empty() -> Self {
        Self {
            refs: BTreeSet::new(),
        }
    }

    pub fn from_refs<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            refs: refs
                .into_iter()
                .map(|r| normalize_reference(r.as_ref()))
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }

    /// Parse a configured value: a JSON array of strings, a JSON string, or a
    /// comma-separated list. Unset or empty input yields the default list.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => Self::from_refs(items.iter().filter_map(Value::as_str)),
            Ok(Value::String(single)) => Self::from_refs([single]),
            // Any other JSON (numbers, objects) keeps the defaults.
            Ok(_) => Self::default(),
            Err(_) => Self::from_refs(raw.split(',').map(str::trim)),
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.refs.contains(&normalize_reference(reference))
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Drop every item whose reference is excluded. Order is preserved.
    pub fn filter<T, F>(&self, items: Vec<T>, reference: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        if self.refs.is_empty() {
            return items;
        }
        items
            .into_iter()
            .filter(|item| !self.contains(reference(item)))
            .collect()
    }
}

/// Query the verse service once per ranked tag and assemble a bounded,
/// deduplicated, exclusion-filtered pool. Failing tag queries are skipped.
pub async fn build_candidates(
    verses: &dyn VerseService,
    ranked_tags: &[String],
    translation: Translation,
    exclusions: &ExclusionList,
    cap: usize,
) -> Vec<VerseCandidate> {
    let mut pool: Vec<VerseCandidate> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for tag in ranked_tags {
        if pool.len() >= cap {
            break;
        }
        let found = match verses
            .search_by_keywords(std::slice::from_ref(tag), Some(translation), VERSES_PER_TAG)
            .await
        {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(tag = %tag, error = %err, "verse query failed, skipping tag");
                continue;
            }
        };
        for verse in found {
            if seen.insert(verse.reference.to_lowercase()) {
                pool.push(verse);
            }
        }
    }

    pool.truncate(cap);
    exclusions.filter(pool, |c| c.reference.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verses::{LocalVerseLibrary, VerseServiceError};
    use async_trait::async_trait;

    fn tags(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn parse_accepts_array_string_and_comma_list() {
        let array = ExclusionList::parse(Some(r#"["John 14:27", "Psalm 4:8", 3]"#));
        assert_eq!(array.len(), 2);
        assert!(array.contains("john   14:27"));

        let single = ExclusionList::parse(Some(r#""Joshua 1:9""#));
        assert!(single.contains("Joshua 1:9"));
        assert_eq!(single.len(), 1);

        let list = ExclusionList::parse(Some("James 1:5,  Psalm 23:4 ,"));
        assert!(list.contains("psalm 23:4"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn parse_defaults_and_explicit_empty() {
        assert!(ExclusionList::parse(None).contains("Philippians 4:6-7"));
        assert!(ExclusionList::parse(Some("")).contains("Philippians 4:6-7"));
        assert!(ExclusionList::parse(Some("[]")).is_empty());
        assert!(ExclusionList::parse(Some(" , ")).is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let list = ExclusionList::from_refs(["John 14:27"]);
        let items = vec!["John 14:27", "Psalm 4:8", "john 14:27 ", "James 1:5"];
        let once = list.filter(items, |r| *r);
        let twice = list.filter(once.clone(), |r| *r);
        assert_eq!(once, vec!["Psalm 4:8", "James 1:5"]);
        assert_eq!(once, twice);
    }

    struct FlakyVerses;

    #[async_trait]
    impl VerseService for FlakyVerses {
        async fn search_by_keywords(
            &self,
            keywords: &[String],
            translation: Option<Translation>,
            limit: usize,
        ) -> Result<Vec<VerseCandidate>, VerseServiceError> {
            if keywords[0] == "broken" {
                return Err(VerseServiceError::Status(500));
            }
            LocalVerseLibrary::default().search(keywords, translation, limit)
        }

        async fn get_by_reference(
            &self,
            _reference: &str,
            _translation: Option<Translation>,
        ) -> Result<Option<VerseCandidate>, VerseServiceError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn pool_is_deduplicated_and_filtered() {
        let pool = build_candidates(
            &FlakyVerses,
            &tags(&["broken", "anxiety", "peace", "stress"]),
            Translation::Esv,
            &ExclusionList::default(),
            8,
        )
        .await;
        let refs: Vec<_> = pool.iter().map(|c| c.reference.as_str()).collect();
        assert_eq!(
            refs,
            vec!["1 Peter 5:7", "John 14:27", "Matthew 11:28-30", "Psalm 4:8"]
        );
    }

    #[tokio::test]
    async fn pool_is_capped_before_exclusion() {
        let pool = build_candidates(
            &LocalVerseLibrary::default(),
            &tags(&["anxiety", "courage", "strength"]),
            Translation::Esv,
            &ExclusionList::default(),
            2,
        )
        .await;
        // Philippians fills one of the two slots and is then excluded.
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].reference, "1 Peter 5:7");
    }
}
