use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{ExtractionSchema, NormalizedResult};

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_+.\-]*").expect("valid fence regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```$").expect("valid fence regex"));

#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Upstream text is not a parseable JSON object. `raw` is the text as
    /// received; callers decide whether to expose it.
    #[error("Malformed model output: {reason}")]
    MalformedOutput { reason: String, raw: String },
}

impl NormalizeError {
    pub fn raw_text(&self) -> &str {
        match self {
            NormalizeError::MalformedOutput { raw, .. } => raw,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            NormalizeError::MalformedOutput { reason, .. } => reason,
        }
    }
}

/// Remove an optional ```lang fence on either end and trim.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let start = LEADING_FENCE.find(trimmed).map_or(0, |m| m.end());
    let body = &trimmed[start..];
    let end = TRAILING_FENCE.find(body).map_or(body.len(), |m| m.start());
    body[..end].trim()
}

/// Reshape a model's text reply into exactly the schema's fields.
pub fn normalize(
    raw_text: &str,
    schema: &ExtractionSchema,
) -> Result<NormalizedResult, NormalizeError> {
    let body = strip_code_fence(raw_text);
    let value: Value = serde_json::from_str(body).map_err(|e| NormalizeError::MalformedOutput {
        reason: format!("not valid JSON: {e}"),
        raw: raw_text.to_string(),
    })?;

    normalize_value(value, schema).map_err(|reason| NormalizeError::MalformedOutput {
        reason,
        raw: raw_text.to_string(),
    })
}

/// Same as [`normalize`] for a value that is already parsed. Errors with the
/// rejection reason when the value is not an object.
pub fn normalize_value(
    value: Value,
    schema: &ExtractionSchema,
) -> Result<NormalizedResult, String> {
    let mut object = match value {
        Value::Object(object) => object,
        other => return Err(format!("expected a JSON object, got {}", kind_of(&other))),
    };

    let entries = schema
        .fields()
        .iter()
        .map(|field| {
            let value = object.remove(field).and_then(coerce);
            (field.clone(), value)
        })
        .collect();

    Ok(NormalizedResult::from_entries(entries))
}

fn coerce(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Build a JSON object from key/value pairs, keeping the first value for a repeated key.
pub(crate) fn first_wins<I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut object = Map::new();
    for (key, value) in pairs {
        object.entry(key).or_insert(value);
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(fields: &[&str]) -> ExtractionSchema {
        ExtractionSchema::new(fields.iter().copied()).unwrap()
    }

    #[test]
    fn test_fills_missing_fields_with_null() {
        let s = schema(&["Name", "Nationality", "Age"]);
        let result = normalize(r#"{"Name": "Ali", "Nationality": "Kenyan"}"#, &s).unwrap();

        assert_eq!(result.keys().collect::<Vec<_>>(), ["Name", "Nationality", "Age"]);
        assert_eq!(result.get("Name"), Some(Some("Ali")));
        assert_eq!(result.get("Nationality"), Some(Some("Kenyan")));
        assert_eq!(result.get("Age"), Some(None));
    }

    #[test]
    fn test_nested_values_become_json_strings() {
        let s = schema(&["Name", "Skills", "Age"]);
        let result =
            normalize(r#"{"Name": "Ali", "Skills": ["Cooking","Cleaning"]}"#, &s).unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            json!({"Name": "Ali", "Skills": "[\"Cooking\",\"Cleaning\"]", "Age": null})
        );
    }

    #[test]
    fn test_nested_object_is_stringified() {
        let s = schema(&["Passport"]);
        let result = normalize(r#"{"Passport": {"number": "P123"}}"#, &s).unwrap();
        assert_eq!(result.get("Passport"), Some(Some(r#"{"number":"P123"}"#)));
    }

    #[test]
    fn test_primitives_become_text() {
        let s = schema(&["Age", "Height", "Smoker", "Religion"]);
        let result = normalize(
            r#"{"Age": 31, "Height": 1.62, "Smoker": false, "Religion": null}"#,
            &s,
        )
        .unwrap();
        assert_eq!(result.get("Age"), Some(Some("31")));
        assert_eq!(result.get("Height"), Some(Some("1.62")));
        assert_eq!(result.get("Smoker"), Some(Some("false")));
        assert_eq!(result.get("Religion"), Some(None));
    }

    #[test]
    fn test_extra_keys_are_dropped() {
        let s = schema(&["Name"]);
        let result = normalize(r#"{"Name": "Ali", "Salary": "400", "notes": {}}"#, &s).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.keys().collect::<Vec<_>>(), ["Name"]);
    }

    #[test]
    fn test_fenced_output_matches_unfenced() {
        let s = schema(&["Name", "Age"]);
        let plain = r#"{"Name": "Ali", "Age": "30"}"#;
        let expected = normalize(plain, &s).unwrap();

        for fenced in [
            format!("```json\n{plain}\n```"),
            format!("```\n{plain}\n```"),
            format!("  ```JSON {plain}```  \n"),
            format!("```json\n{plain}"),
        ] {
            assert_eq!(normalize(&fenced, &s).unwrap(), expected, "{fenced:?}");
        }
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {}  "), "{}");
    }

    #[test]
    fn test_not_json_is_malformed() {
        let s = schema(&["Name"]);
        let err = normalize("Name: Ali", &s).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedOutput { .. }));
        assert_eq!(err.raw_text(), "Name: Ali");
        assert!(err.reason().starts_with("not valid JSON"));
    }

    #[test]
    fn test_non_objects_are_malformed() {
        let s = schema(&["Name"]);
        for (input, kind) in [
            ("[1,2,3]", "an array"),
            ("null", "null"),
            ("42", "a number"),
            ("\"Ali\"", "a string"),
            ("```json\n[{\"Name\": \"Ali\"}]\n```", "an array"),
        ] {
            let err = normalize(input, &s).unwrap_err();
            assert!(err.reason().ends_with(kind), "{input}: {}", err.reason());
        }
    }

    #[test]
    fn test_first_wins() {
        let value = first_wins([
            ("Name".to_string(), json!("Ali")),
            ("Name".to_string(), json!("Other")),
            ("Age".to_string(), json!("30")),
        ]);
        assert_eq!(value, json!({"Name": "Ali", "Age": "30"}));
    }
}
