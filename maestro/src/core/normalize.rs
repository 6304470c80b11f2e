//! Normalization of model replies into [`StructuredResponse`].
//!
//! The gateway classifies each reply body once into a [`RawReply`] variant;
//! this module turns every variant into the canonical response. Parsing is
//! lenient: direct JSON first, then the substring between the first `{` and
//! the last `}` (models like to wrap their JSON in prose or code fences), and
//! finally the raw text parked in `memory.raw_text`. The brace extraction is
//! a fallback only and recovers a single embedded object at best.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::shape::shape_violations;
use crate::core::types::{ResponseStatus, StructuredResponse};

/// Reply body as classified at the gateway boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    /// Free text, possibly containing JSON.
    PlainText(String),
    /// Text of the first candidate of a `generateContent` reply.
    Candidate(String),
    /// First choice of a chat-completion reply (`message.content` or `text`).
    Chat(Value),
    /// A JSON object that is already the structured response.
    Object(Map<String, Value>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty model response")]
    Empty,
}

/// Turn a classified reply into a structured response. Every success path
/// carries a `memory` object.
pub fn normalize(raw: RawReply) -> Result<StructuredResponse, NormalizeError> {
    match raw {
        RawReply::PlainText(text) | RawReply::Candidate(text) => normalize_text(&text),
        RawReply::Chat(content) => Ok(normalize_chat_content(content)),
        RawReply::Object(object) => Ok(from_object(object)),
    }
}

fn normalize_text(text: &str) -> Result<StructuredResponse, NormalizeError> {
    if text.trim().is_empty() {
        return Err(NormalizeError::Empty);
    }
    Ok(parse_text(text))
}

fn normalize_chat_content(content: Value) -> StructuredResponse {
    let text = match content {
        Value::String(text) => text,
        Value::Object(mut object) => match object.remove("content") {
            Some(Value::String(text)) => text,
            Some(other) => {
                object.insert("content".to_string(), other);
                Value::Object(object).to_string()
            }
            None => Value::Object(object).to_string(),
        },
        other => other.to_string(),
    };
    parse_text(&text)
}

fn parse_text(text: &str) -> StructuredResponse {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return from_parsed(value);
    }
    if let Some(object) = extract_braced_object(text) {
        debug!("recovered json object embedded in reply text");
        return from_object(object);
    }
    warn!(
        len = text.len(),
        "reply is not valid json; keeping text in memory.raw_text"
    );
    StructuredResponse::raw_text(text)
}

fn from_parsed(value: Value) -> StructuredResponse {
    match value {
        Value::Object(object) => from_object(object),
        other => {
            let mut memory = Map::new();
            memory.insert("raw_parsed".to_string(), other);
            StructuredResponse::empty(ResponseStatus::Ok, memory)
        }
    }
}

/// Parse the slice between the first `{` and the last `}` as a JSON object.
fn extract_braced_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Build a response from a reply object, defaulting missing fields.
fn from_object(mut object: Map<String, Value>) -> StructuredResponse {
    let violations = shape_violations(&Value::Object(object.clone()));
    if !violations.is_empty() {
        warn!(violations = ?violations, "reply does not match the structured response shape");
    }

    let status = match object.remove("status") {
        Some(Value::String(status)) => ResponseStatus::from(status),
        Some(other) => ResponseStatus::Other(other.to_string()),
        None => ResponseStatus::Ok,
    };
    let plan = match object.remove("plan") {
        Some(Value::Array(plan)) => plan,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };
    let action = object.remove("action");
    let actions = match object.remove("actions") {
        Some(Value::Array(actions)) => Some(actions),
        Some(Value::Null) | None => None,
        Some(other) => Some(vec![other]),
    };
    let memory = match object.remove("memory") {
        Some(Value::Object(memory)) => memory,
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            let mut wrapped = Map::new();
            wrapped.insert("raw_memory".to_string(), other);
            wrapped
        }
    };

    StructuredResponse {
        status,
        plan,
        action,
        actions,
        memory,
        extra: object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> RawReply {
        RawReply::PlainText(s.to_string())
    }

    #[test]
    fn empty_text_is_an_error() {
        assert_eq!(normalize(text("  \n")), Err(NormalizeError::Empty));
    }

    #[test]
    fn parses_plain_json_text() {
        let response = normalize(text(r#"{"status":"ok","plan":[],"action":null,"memory":{"k":1}}"#))
            .expect("normalize");
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.memory.get("k"), Some(&json!(1)));
        assert!(response.pending_actions(1).0.is_empty());
    }

    #[test]
    fn recovers_object_embedded_in_prose() {
        let reply = "Sure! Here is the next step:\n```json\n{\"status\":\"ok\",\"plan\":[\"a\"],\
                     \"action\":{\"id\":\"1\",\"type\":\"leia_arquivo\",\"description\":\"read\",\
                     \"parameters\":{\"path\":\"notes.txt\"}},\"memory\":{\"seen\":true}}\n```\nLet me know.";
        let response = normalize(text(reply)).expect("normalize");
        assert_eq!(response.plan, vec![json!("a")]);
        assert_eq!(response.memory.get("seen"), Some(&json!(true)));
        assert_eq!(
            response.action,
            Some(json!({"id":"1","type":"leia_arquivo","description":"read","parameters":{"path":"notes.txt"}}))
        );
    }

    #[test]
    fn unparseable_text_lands_in_raw_text() {
        let response = normalize(text("I could not decide {what to do}")).expect("normalize");
        assert_eq!(response.status, ResponseStatus::Ok);
        assert!(response.plan.is_empty());
        assert_eq!(
            response.memory.get("raw_text"),
            Some(&json!("I could not decide {what to do}"))
        );
    }

    #[test]
    fn object_without_memory_gets_empty_memory() {
        let object = json!({"status": "ok", "plan": []});
        let Value::Object(object) = object else {
            unreachable!()
        };
        let response = normalize(RawReply::Object(object)).expect("normalize");
        assert!(response.memory.is_empty());
        assert_eq!(
            serde_json::to_value(&response).expect("value")["memory"],
            json!({})
        );
    }

    #[test]
    fn chat_content_with_prose_is_recovered() {
        let content = json!({
            "role": "assistant",
            "content": "Result: {\"status\":\"done\",\"plan\":[],\"action\":null}"
        });
        let response = normalize(RawReply::Chat(content)).expect("normalize");
        assert!(response.is_done());
        assert!(response.memory.is_empty());
    }

    #[test]
    fn chat_string_content_that_is_not_json_is_kept() {
        let response = normalize(RawReply::Chat(json!("no json here"))).expect("normalize");
        assert_eq!(response.memory.get("raw_text"), Some(&json!("no json here")));
    }

    #[test]
    fn non_object_json_is_wrapped_as_raw_parsed() {
        let response = normalize(text("[1, 2, 3]")).expect("normalize");
        assert_eq!(response.memory.get("raw_parsed"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn non_object_memory_is_wrapped() {
        let response = normalize(text(r#"{"status":"ok","memory":"progress: 50%"}"#)).expect("normalize");
        assert_eq!(response.memory.get("raw_memory"), Some(&json!("progress: 50%")));
    }

    #[test]
    fn candidate_text_uses_the_text_path() {
        let response = normalize(RawReply::Candidate(
            r#"{"status":"ok","actions":[{"id":1,"type":"finalizar","parameters":{}}],"memory":{}}"#
                .to_string(),
        ))
        .expect("normalize");
        assert_eq!(response.pending_actions(5).0.len(), 1);
    }

    #[test]
    fn serialized_response_round_trips() {
        let input = json!({
            "status": "ok",
            "plan": [{"step": 1, "goal": "read data"}, "write report"],
            "action": {"id": 3, "type": "leia_arquivo", "description": "read", "parameters": {"path": "data/a.csv"}},
            "memory": {"sections": ["intro"], "progress": {"done": 1, "total": 4}},
            "notes": "kept verbatim"
        });
        let serialized = serde_json::to_string(&input).expect("serialize");
        let response = normalize(text(&serialized)).expect("normalize");
        assert_eq!(serde_json::to_value(&response).expect("value"), input);
    }

    #[test]
    fn serialized_batch_response_round_trips() {
        let input = json!({
            "status": "error",
            "plan": [],
            "actions": [{"id": "a", "type": "x", "description": "", "parameters": {}}],
            "memory": {"error": "short message"}
        });
        let response = normalize(text(&input.to_string())).expect("normalize");
        assert_eq!(serde_json::to_value(&response).expect("value"), input);
    }
}
