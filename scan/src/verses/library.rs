//! Built-in verse library and the JSON-RPC handler that serves it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use walkworthy_core::records::VerseCandidate;
use walkworthy_core::translation::Translation;

use super::{VerseService, VerseServiceError};

pub const RPC_INVALID_REQUEST: i64 = -32600;
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
pub const RPC_HANDLER_ERROR: i64 = -32000;

const MAX_SEARCH_LIMIT: usize = 5;
const DEFAULT_REFERENCE: &str = "Philippians 4:6-7";

struct Passage {
    reference: &'static str,
    esv: &'static str,
    kjv: &'static str,
}

const PASSAGES: &[Passage] = &[
    Passage {
        reference: "Philippians 4:6-7",
        esv: "Do not be anxious about anything, but in everything by prayer and supplication with thanksgiving let your requests be made known to God. And the peace of God, which surpasses all understanding, will guard your hearts and your minds in Christ Jesus.",
        kjv: "Be careful for nothing; but in every thing by prayer and supplication with thanksgiving let your requests be made known unto God. And the peace of God, which passeth all understanding, shall keep your hearts and minds through Christ Jesus.",
    },
    Passage {
        reference: "1 Peter 5:7",
        esv: "Casting all your anxieties on him, because he cares for you.",
        kjv: "Casting all your care upon him; for he careth for you.",
    },
    Passage {
        reference: "John 14:27",
        esv: "Peace I leave with you; my peace I give to you. Not as the world gives do I give to you. Let not your hearts be troubled, neither let them be afraid.",
        kjv: "Peace I leave with you, my peace I give unto you: not as the world giveth, give I unto you. Let not your heart be troubled, neither let it be afraid.",
    },
    Passage {
        reference: "Matthew 11:28-30",
        esv: "Come to me, all who labor and are heavy laden, and I will give you rest. Take my yoke upon you, and learn from me, for I am gentle and lowly in heart, and you will find rest for your souls. For my yoke is easy, and my burden is light.",
        kjv: "Come unto me, all ye that labour and are heavy laden, and I will give you rest. Take my yoke upon you, and learn of me; for I am meek and lowly in heart: and ye shall find rest unto your souls. For my yoke is easy, and my burden is light.",
    },
    Passage {
        reference: "Psalm 4:8",
        esv: "In peace I will both lie down and sleep; for you alone, O Lord, make me dwell in safety.",
        kjv: "I will both lay me down in peace, and sleep: for thou, LORD, only makest me dwell in safety.",
    },
    Passage {
        reference: "James 1:5",
        esv: "If any of you lacks wisdom, let him ask God, who gives generously to all without reproach, and it will be given him.",
        kjv: "If any of you lack wisdom, let him ask of God, that giveth to all men liberally, and upbraideth not; and it shall be given him.",
    },
    Passage {
        reference: "Isaiah 41:10",
        esv: "Fear not, for I am with you; be not dismayed, for I am your God; I will strengthen you, I will help you, I will uphold you with my righteous right hand.",
        kjv: "Fear thou not; for I am with thee: be not dismayed; for I am thy God: I will strengthen thee; yea, I will help thee; yea, I will uphold thee with the right hand of my righteousness.",
    },
    Passage {
        reference: "Romans 8:38-39",
        esv: "For I am sure that neither death nor life, nor angels nor rulers, nor things present nor things to come, nor powers, nor height nor depth, nor anything else in all creation, will be able to separate us from the love of God in Christ Jesus our Lord.",
        kjv: "For I am persuaded, that neither death, nor life, nor angels, nor principalities, nor powers, nor things present, nor things to come, Nor height, nor depth, nor any other creature, shall be able to separate us from the love of God, which is in Christ Jesus our Lord.",
    },
    Passage {
        reference: "Psalm 23:4",
        esv: "Even though I walk through the valley of the shadow of death, I will fear no evil, for you are with me; your rod and your staff, they comfort me.",
        kjv: "Yea, though I walk through the valley of the shadow of death, I will fear no evil: for thou art with me; thy rod and thy staff they comfort me.",
    },
    Passage {
        reference: "Joshua 1:9",
        esv: "Have I not commanded you? Be strong and courageous. Do not be frightened, and do not be dismayed, for the Lord your God is with you wherever you go.",
        kjv: "Have not I commanded thee? Be strong and of a good courage; be not afraid, neither be thou dismayed: for the LORD thy God is with thee whithersoever thou goest.",
    },
    Passage {
        reference: "Psalm 46:1-2",
        esv: "God is our refuge and strength, a very present help in trouble. Therefore we will not fear though the earth gives way, though the mountains be moved into the heart of the sea.",
        kjv: "God is our refuge and strength, a very present help in trouble. Therefore will not we fear, though the earth be removed, and though the mountains be carried into the midst of the sea.",
    },
];

const KEYWORDS: &[(&str, &[&str])] = &[
    ("anxiety", &["Philippians 4:6-7", "1 Peter 5:7", "John 14:27"]),
    ("stress", &["Philippians 4:6-7", "Matthew 11:28-30", "Psalm 4:8"]),
    ("rest", &["Matthew 11:28-30", "Psalm 4:8"]),
    ("peace", &["John 14:27", "Philippians 4:6-7"]),
    ("wisdom", &["James 1:5"]),
    ("courage", &["Joshua 1:9", "Psalm 23:4"]),
    ("strength", &["Isaiah 41:10", "Psalm 46:1-2"]),
    ("hope", &["Romans 8:38-39", "Psalm 23:4"]),
    ("exam", &["James 1:5", "Philippians 4:6-7"]),
    ("deadline", &["Philippians 4:6-7", "Matthew 11:28-30"]),
];

/// Small in-process verse library keyed by stress keyword.
///
/// Only ESV and KJV texts ship with the library. A request for any other
/// translation gets the ESV text labelled as ESV.
#[derive(Debug, Clone, Copy)]
pub struct LocalVerseLibrary {
    default_translation: Translation,
}

impl Default for LocalVerseLibrary {
    fn default() -> Self {
        Self::new(Translation::Esv)
    }
}

impl LocalVerseLibrary {
    pub fn new(default_translation: Translation) -> Self {
        Self {
            default_translation,
        }
    }

    pub fn search(
        &self,
        keywords: &[String],
        translation: Option<Translation>,
        limit: usize,
    ) -> Result<Vec<VerseCandidate>, VerseServiceError> {
        if keywords.is_empty() {
            return Err(VerseServiceError::Handler(
                "keywords must be a non-empty array".to_string(),
            ));
        }
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let translation = translation.unwrap_or(self.default_translation);

        let mut refs: Vec<&'static str> = Vec::new();
        'keywords: for keyword in keywords {
            let keyword = keyword.trim().to_lowercase();
            let Some((_, mapped)) = KEYWORDS.iter().find(|(k, _)| *k == keyword) else {
                continue;
            };
            for reference in mapped.iter() {
                if !refs.contains(reference) {
                    refs.push(reference);
                }
                if refs.len() >= limit {
                    break 'keywords;
                }
            }
        }
        if refs.is_empty() {
            refs.push(DEFAULT_REFERENCE);
        }

        Ok(refs
            .into_iter()
            .filter_map(|r| self.lookup(r, translation))
            .collect())
    }

    /// Exact-reference lookup; `None` for passages outside the library.
    pub fn lookup(&self, reference: &str, translation: Translation) -> Option<VerseCandidate> {
        let passage = PASSAGES.iter().find(|p| p.reference == reference.trim())?;
        let (text, served) = match translation {
            Translation::Kjv => (passage.kjv, Translation::Kjv),
            Translation::Esv => (passage.esv, Translation::Esv),
            _ => (passage.esv, Translation::Esv),
        };
        Some(VerseCandidate {
            reference: passage.reference.to_string(),
            text: text.to_string(),
            translation: Some(served.as_str().to_string()),
        })
    }

    /// Serve one JSON-RPC 2.0 request. Always produces a response object.
    pub fn handle_rpc(&self, request: &Value) -> Value {
        let Ok(request) = RpcRequest::deserialize(request) else {
            return rpc_error(Value::Null, RPC_INVALID_REQUEST, "Invalid request");
        };
        let id = request.id.unwrap_or(Value::Null);
        let params = request.params.unwrap_or_else(|| json!({}));

        let result = match request.method.as_str() {
            "search_verses" => self.rpc_search(&params),
            "get_verse_by_reference" => self.rpc_get(&params),
            other => {
                return rpc_error(id, RPC_METHOD_NOT_FOUND, &format!("Unknown method {other}"));
            }
        };

        match result {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(err) => {
                tracing::warn!(error = %err, "verse bridge request failed");
                rpc_error(id, RPC_HANDLER_ERROR, &err.to_string())
            }
        }
    }

    fn rpc_search(&self, params: &Value) -> Result<Value, VerseServiceError> {
        let keywords: Vec<String> = params
            .get("keywords")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|k| match k {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let translation = rpc_translation(params);
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .filter(|l| *l > 0)
            .unwrap_or(MAX_SEARCH_LIMIT);

        let verses = self.search(&keywords, translation, limit)?;
        serde_json::to_value(verses).map_err(|e| VerseServiceError::Handler(e.to_string()))
    }

    fn rpc_get(&self, params: &Value) -> Result<Value, VerseServiceError> {
        let reference = params
            .get("ref")
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| VerseServiceError::Handler("ref is required".to_string()))?;
        let translation = rpc_translation(params).unwrap_or(self.default_translation);
        match self.lookup(reference, translation) {
            Some(verse) => serde_json::to_value(verse)
                .map_err(|e| VerseServiceError::Handler(e.to_string())),
            None => Ok(Value::Null),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

fn rpc_translation(params: &Value) -> Option<Translation> {
    params
        .get("translation")
        .and_then(Value::as_str)
        .map(|code| Translation::normalize(Some(code)))
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

#[async_trait]
impl VerseService for LocalVerseLibrary {
    async fn search_by_keywords(
        &self,
        keywords: &[String],
        translation: Option<Translation>,
        limit: usize,
    ) -> Result<Vec<VerseCandidate>, VerseServiceError> {
        self.search(keywords, translation, limit)
    }

    async fn get_by_reference(
        &self,
        reference: &str,
        translation: Option<Translation>,
    ) -> Result<Option<VerseCandidate>, VerseServiceError> {
        Ok(self.lookup(reference, translation.unwrap_or(self.default_translation)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn refs(verses: &[VerseCandidate]) -> Vec<&str> {
        verses.iter().map(|v| v.reference.as_str()).collect()
    }

    #[test]
    fn every_keyword_maps_to_a_library_passage() {
        for (_, mapped) in KEYWORDS {
            for reference in mapped.iter() {
                assert!(
                    PASSAGES.iter().any(|p| p.reference == *reference),
                    "{reference} missing from library"
                );
            }
        }
        assert_eq!(PASSAGES.len(), 11);
    }

    #[test]
    fn search_merges_keywords_without_duplicates() {
        let library = LocalVerseLibrary::default();
        let verses = library
            .search(&keywords(&["Rest", "stress"]), None, 5)
            .unwrap();
        assert_eq!(
            refs(&verses),
            vec!["Matthew 11:28-30", "Psalm 4:8", "Philippians 4:6-7"]
        );
    }

    #[test]
    fn search_limit_is_clamped() {
        let library = LocalVerseLibrary::default();
        let verses = library
            .search(&keywords(&["anxiety", "stress", "courage"]), None, 50)
            .unwrap();
        assert_eq!(verses.len(), 5);

        let one = library.search(&keywords(&["anxiety"]), None, 0).unwrap();
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn unknown_keywords_default_to_philippians() {
        let library = LocalVerseLibrary::default();
        let verses = library
            .search(&keywords(&["encouragement"]), Some(Translation::Kjv), 5)
            .unwrap();
        assert_eq!(refs(&verses), vec!["Philippians 4:6-7"]);
        assert!(verses[0].text.starts_with("Be careful for nothing"));
        assert_eq!(verses[0].translation.as_deref(), Some("KJV"));
    }

    #[test]
    fn unsupported_translation_is_served_as_esv() {
        let library = LocalVerseLibrary::default();
        let verse = library.lookup("Joshua 1:9", Translation::Niv).unwrap();
        assert_eq!(verse.translation.as_deref(), Some("ESV"));
        assert!(verse.text.contains("Be strong and courageous"));
    }

    #[test]
    fn empty_keywords_are_a_handler_error() {
        let library = LocalVerseLibrary::default();
        assert!(matches!(
            library.search(&[], None, 5),
            Err(VerseServiceError::Handler(_))
        ));
    }

    #[test]
    fn rpc_search_returns_result_array() {
        let library = LocalVerseLibrary::default();
        let response = library.handle_rpc(&json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "search_verses",
            "params": { "keywords": ["wisdom"], "translation": "kjv", "limit": 3 }
        }));
        assert_eq!(response["id"], 7);
        assert_eq!(response["result"][0]["ref"], "James 1:5");
        assert_eq!(response["result"][0]["translation"], "KJV");
        assert!(response.get("error").is_none());
    }

    #[test]
    fn rpc_error_codes() {
        let library = LocalVerseLibrary::default();

        let unknown = library.handle_rpc(&json!({ "id": "a", "method": "delete_all" }));
        assert_eq!(unknown["error"]["code"], RPC_METHOD_NOT_FOUND);
        assert_eq!(unknown["id"], "a");

        let invalid = library.handle_rpc(&json!({ "id": 1 }));
        assert_eq!(invalid["error"]["code"], RPC_INVALID_REQUEST);
        assert!(invalid["id"].is_null());

        let failing = library.handle_rpc(&json!({
            "id": 2,
            "method": "search_verses",
            "params": { "keywords": [] }
        }));
        assert_eq!(failing["error"]["code"], RPC_HANDLER_ERROR);

        let missing_ref = library.handle_rpc(&json!({
            "id": 3,
            "method": "get_verse_by_reference",
            "params": {}
        }));
        assert_eq!(missing_ref["error"]["code"], RPC_HANDLER_ERROR);
        assert_eq!(missing_ref["error"]["message"], "ref is required");
    }

    #[test]
    fn rpc_get_unknown_reference_is_null() {
        let library = LocalVerseLibrary::default();
        let response = library.handle_rpc(&json!({
            "id": 4,
            "method": "get_verse_by_reference",
            "params": { "ref": "Obadiah 1:1" }
        }));
        assert!(response["result"].is_null());
        assert!(response.get("error").is_none());
    }
}
