//! Strict extraction of the JSON object a model was asked to return.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no JSON block found in model response")]
    NoJson,

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Locate the JSON block in a model response.
///
/// Tries a ```json fence, then any fence holding `{`/`[`, then the outermost braces.
pub fn extract_json_block(response: &str) -> Result<&str, ParseError> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Ok(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Ok(block);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Ok(&trimmed[start..=end]);
        }
    }

    Err(ParseError::NoJson)
}

/// Parse the response's JSON block as an object. Never panics on malformed text.
pub fn extract_object(response: &str) -> Result<Map<String, Value>, ParseError> {
    let block = extract_json_block(response)?;
    let value: Value = serde_json::from_str(block).map_err(|e| ParseError::Malformed(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        // Some models wrap the object in a one-element array
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => match items.remove(0) {
            Value::Object(map) => Ok(map),
            _ => Err(ParseError::NotAnObject("array")),
        },
        Value::Array(_) => Err(ParseError::NotAnObject("array")),
        Value::String(_) => Err(ParseError::NotAnObject("string")),
        Value::Number(_) => Err(ParseError::NotAnObject("number")),
        Value::Bool(_) => Err(ParseError::NotAnObject("boolean")),
        Value::Null => Err(ParseError::NotAnObject("null")),
    }
}

/// Replace literal `\n` escapes left in model markdown with real newlines
pub fn unescape_markdown(text: &str) -> String {
    text.replace("\\n\\n", "\n\n").replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fenced_json_with_surrounding_prose() {
        let response = "Here is the result:\n```json\n{\"result\": \"Yes\"}\n```\nHope this helps.";
        let fields = extract_object(response).unwrap();
        assert_eq!(fields["result"], "Yes");
    }

    #[test]
    fn falls_back_to_outer_braces() {
        let fields = extract_object("Answer: {\"PoD\": 600, \"PoD_unit\": \"mg/day\"} end").unwrap();
        assert_eq!(fields["PoD"], 600);
    }

    #[test]
    fn reports_failure_reasons() {
        assert_eq!(extract_object("no structure here"), Err(ParseError::NoJson));
        assert!(matches!(extract_object("```json\n{\"a\": }\n```"), Err(ParseError::Malformed(_))));
        assert_eq!(extract_object("```\n[1, 2]\n```"), Err(ParseError::NotAnObject("array")));
    }

    #[test]
    fn unwraps_single_object_arrays() {
        let fields = extract_object("```json\n[{\"result\": \"No\"}]\n```").unwrap();
        assert_eq!(fields["result"], "No");
    }

    #[test]
    fn unescapes_literal_newlines() {
        assert_eq!(unescape_markdown("### A\\n\\nbody\\nmore"), "### A\n\nbody\nmore");
    }
}
