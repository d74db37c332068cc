//! Strict structural validation of model output.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use walkworthy_core::records::{
    MAX_ENCOURAGEMENT_CHARS, MAX_VERSE_TEXT_CHARS, REFERENCE_PATTERN, VerseSelectionResult,
};
use walkworthy_core::translation::Translation;

const FIELDS: [&str; 4] = ["ref", "text", "encouragement", "translation"];

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(REFERENCE_PATTERN).expect("valid reference regex"));

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SchemaError {
    #[error("Agent returned unparseable string output")]
    Unparseable,

    #[error("Agent output failed schema validation: {0}")]
    Invalid(String),
}

/// JSON schema handed to the model as its structured output format.
pub fn output_schema() -> Value {
    let translations: Vec<&str> = Translation::ALL.iter().map(|t| t.as_str()).collect();
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": FIELDS,
        "properties": {
            "ref": { "type": "string", "pattern": REFERENCE_PATTERN },
            "text": { "type": "string", "maxLength": MAX_VERSE_TEXT_CHARS },
            "encouragement": { "type": "string", "maxLength": MAX_ENCOURAGEMENT_CHARS },
            "translation": { "type": "string", "enum": translations },
        }
    })
}

/// Accept a model result (object, or a string holding one) and check every
/// field. Nothing is coerced: wrong types and extra keys are rejected.
pub fn validate(output: &Value) -> Result<VerseSelectionResult, SchemaError> {
    let parsed;
    let value = match output {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw).map_err(|_| SchemaError::Unparseable)?;
            &parsed
        }
        other => other,
    };

    let Value::Object(map) = value else {
        return Err(SchemaError::Invalid("output is not an object".to_string()));
    };
    if let Some(extra) = map.keys().find(|k| !FIELDS.contains(&k.as_str())) {
        return Err(SchemaError::Invalid(format!("unexpected property {extra}")));
    }
    let reference = string_field(map, "ref")?;
    let text = string_field(map, "text")?;
    let encouragement = string_field(map, "encouragement")?;
    let translation = string_field(map, "translation")?;

    if !REFERENCE_RE.is_match(reference) {
        return Err(SchemaError::Invalid(format!(
            "ref {reference:?} is not a verse reference"
        )));
    }
    if text.chars().count() > MAX_VERSE_TEXT_CHARS {
        return Err(SchemaError::Invalid(format!(
            "text exceeds {MAX_VERSE_TEXT_CHARS} characters"
        )));
    }
    if encouragement.chars().count() > MAX_ENCOURAGEMENT_CHARS {
        return Err(SchemaError::Invalid(format!(
            "encouragement exceeds {MAX_ENCOURAGEMENT_CHARS} characters"
        )));
    }
    // The enum check is case-sensitive, matching the schema given to the model.
    let translation = Translation::ALL
        .into_iter()
        .find(|t| t.as_str() == translation)
        .ok_or_else(|| SchemaError::Invalid(format!("translation {translation:?} not allowed")))?;

    Ok(VerseSelectionResult {
        reference: reference.to_string(),
        text: text.to_string(),
        encouragement: encouragement.to_string(),
        translation,
    })
}

fn string_field<'a>(map: &'a Map<String, Value>, name: &str) -> Result<&'a str, SchemaError> {
    match map.get(name) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(SchemaError::Invalid(format!("{name} must be a string"))),
        None => Err(SchemaError::Invalid(format!("{name} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> Value {
        json!({
            "ref": "1 Peter 5:7",
            "text": "Casting all your anxieties on him, because he cares for you.",
            "encouragement": "Hand this week to Him.",
            "translation": "ESV"
        })
    }

    #[test]
    fn accepts_object_and_stringified_object() {
        let result = validate(&good()).unwrap();
        assert_eq!(result.reference, "1 Peter 5:7");
        assert_eq!(result.translation, Translation::Esv);

        let as_string = Value::String(good().to_string());
        assert_eq!(validate(&as_string).unwrap(), result);
    }

    #[test]
    fn prose_is_unparseable() {
        let err = validate(&json!("Here is your verse: John 3:16")).expect_err("should fail");
        assert_eq!(err, SchemaError::Unparseable);
    }

    #[test]
    fn extra_and_missing_properties_are_rejected() {
        let mut extra = good();
        extra["note"] = json!("hi");
        assert!(matches!(validate(&extra), Err(SchemaError::Invalid(_))));

        let mut missing = good();
        missing.as_object_mut().unwrap().remove("encouragement");
        assert!(validate(&missing).is_err());

        let mut wrong_type = good();
        wrong_type["text"] = json!(42);
        assert!(validate(&wrong_type).is_err());
    }

    #[test]
    fn bounds_and_patterns_are_enforced() {
        let mut long = good();
        long["encouragement"] = json!("a".repeat(281));
        assert!(validate(&long).is_err());

        let mut exact = good();
        exact["encouragement"] = json!("a".repeat(280));
        assert!(validate(&exact).is_ok());

        let mut bad_ref = good();
        bad_ref["ref"] = json!("Peter five seven");
        assert!(validate(&bad_ref).is_err());

        let mut bad_translation = good();
        bad_translation["translation"] = json!("MSG");
        assert!(validate(&bad_translation).is_err());
    }

    #[test]
    fn schema_lists_every_translation() {
        let schema = output_schema();
        assert_eq!(schema["properties"]["translation"]["enum"].as_array().unwrap().len(), 7);
        assert_eq!(schema["additionalProperties"], false);
    }
}
