//! Pulls the text delta out of one frame payload.

use serde_json::{Map, Value};

/// Field names that carry a token in the common streaming shapes, in lookup
/// order.
const TOKEN_FIELDS: [&str; 6] = ["text", "data", "token", "chunk", "content", "delta"];

/// A frame payload after JSON interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenPayload {
    Text(String),
    Object(Map<String, Value>),
    Unrecognized,
}

impl TokenPayload {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::String(inner)) => Self::from_string(inner),
            Ok(Value::Object(object)) => Self::Object(object),
            Ok(_) => Self::Unrecognized,
            Err(_) => Self::Text(raw.trim().to_string()),
        }
    }

    /// A JSON string may itself hold an encoded string or object. Anything
    /// else it decodes to (`"42"`, `"true"`) stays text.
    fn from_string(inner: String) -> Self {
        match serde_json::from_str::<Value>(&inner) {
            Ok(Value::String(text)) => Self::Text(text),
            Ok(Value::Object(object)) => Self::Object(object),
            _ => Self::Text(inner),
        }
    }
}

type ExtractionRule = fn(&Map<String, Value>) -> Option<&str>;

/// Tried in order; the first rule that matches decides the token.
const EXTRACTION_RULES: [ExtractionRule; 3] = [token_event, token_field, first_choice];

fn token_event(object: &Map<String, Value>) -> Option<&str> {
    if object.get("event").and_then(Value::as_str) != Some("token") {
        return None;
    }
    object.get("data").and_then(Value::as_str)
}

fn token_field(object: &Map<String, Value>) -> Option<&str> {
    TOKEN_FIELDS
        .iter()
        .filter_map(|field| object.get(*field).and_then(Value::as_str))
        .find(|text| !text.is_empty())
}

fn first_choice(object: &Map<String, Value>) -> Option<&str> {
    let choice = object.get("choices")?.as_array()?.first()?;
    choice
        .get("delta")
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .or_else(|| choice.get("text").and_then(Value::as_str))
}

/// Returns the text delta carried by `raw`, or `None` when the frame has no
/// displayable text.
pub fn extract_token(raw: &str) -> Option<String> {
    let token = match TokenPayload::parse(raw) {
        TokenPayload::Text(text) => text,
        TokenPayload::Object(object) => EXTRACTION_RULES
            .iter()
            .find_map(|rule| rule(&object))?
            .to_string(),
        TokenPayload::Unrecognized => return None,
    };
    (!token.is_empty()).then_some(token)
}
