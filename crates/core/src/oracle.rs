// crates/core/src/oracle.rs

//! The text-generation oracle contract.
//!
//! Implementations can use any chat-completions style endpoint; tests use a
//! scripted oracle.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::OracleError;
use crate::types::HistoryEntry;

/// Abstract text-generation capability.
pub trait Oracle {
    /// Produce a reply for the request.
    fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError>;
}

impl<T: Oracle + ?Sized> Oracle for &T {
    fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        (**self).complete(request)
    }
}

/// Shape the reply is expected to take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

/// A completion request: a system prompt describing the sub-task plus the
/// conversation so far.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<HistoryEntry>,
    pub response_format: ResponseFormat,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: vec![HistoryEntry::user(user)],
            response_format: ResponseFormat::Text,
        }
    }

    /// Place `history` ahead of the current user message.
    pub fn with_history(mut self, history: &[HistoryEntry]) -> Self {
        let mut messages = history.to_vec();
        messages.append(&mut self.messages);
        self.messages = messages;
        self
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::JsonObject;
        self
    }

    /// The user-visible content of the last message.
    pub fn last_user_message(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Ask for a JSON object reply, retrying transient failures and malformed
/// replies at most `attempts` times.
pub fn complete_json<O: Oracle + ?Sized>(
    oracle: &O,
    request: &CompletionRequest,
    attempts: usize,
) -> Result<Map<String, Value>, OracleError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = oracle
            .complete(request)
            .and_then(|reply| parse_object(&reply));
        match result {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(attempt, attempts, error = %e, "oracle reply unusable, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Fetch a string field from a JSON reply, rendering non-string values as JSON.
pub fn string_field(object: &Map<String, Value>, key: &str) -> Result<String, OracleError> {
    match object.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(OracleError::MissingField(key.to_string())),
        Some(other) => Ok(other.to_string()),
    }
}

fn parse_object(reply: &str) -> Result<Map<String, Value>, OracleError> {
    let trimmed = strip_code_fence(reply.trim());
    if trimmed.is_empty() {
        return Err(OracleError::EmptyReply);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(OracleError::MalformedReply("expected a JSON object".to_string())),
        Err(e) => Err(OracleError::MalformedReply(e.to_string())),
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    struct Replies(RefCell<VecDeque<Result<String, OracleError>>>);

    impl Oracle for Replies {
        fn complete(&self, _request: &CompletionRequest) -> Result<String, OracleError> {
            self.0
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(OracleError::EmptyReply))
        }
    }

    fn replies(items: Vec<Result<&str, OracleError>>) -> Replies {
        Replies(RefCell::new(
            items.into_iter().map(|r| r.map(str::to_string)).collect(),
        ))
    }

    #[test]
    fn malformed_reply_is_retried() {
        let oracle = replies(vec![Ok("not json"), Ok("```json\n{\"a\": 1}\n```")]);
        let req = CompletionRequest::new("sys", "user").json();
        let obj = complete_json(&oracle, &req, 3).unwrap();
        assert_eq!(obj["a"], Value::from(1));
    }

    #[test]
    fn retries_are_bounded() {
        let oracle = replies(vec![Ok("nope"), Ok("still nope"), Ok("{\"late\": true}")]);
        let req = CompletionRequest::new("sys", "user");
        assert!(matches!(
            complete_json(&oracle, &req, 2),
            Err(OracleError::MalformedReply(_))
        ));
    }

    #[test]
    fn zero_attempts_still_asks_once() {
        let oracle = replies(vec![Ok(""), Ok("{\"late\": true}")]);
        let req = CompletionRequest::new("sys", "user");
        assert!(matches!(
            complete_json(&oracle, &req, 0),
            Err(OracleError::EmptyReply)
        ));
    }

    #[test]
    fn hard_rejection_is_not_retried() {
        let oracle = replies(vec![
            Err(OracleError::Status {
                status: 401,
                body: "denied".into(),
            }),
            Ok("{}"),
        ]);
        let req = CompletionRequest::new("sys", "user");
        assert!(matches!(
            complete_json(&oracle, &req, 3),
            Err(OracleError::Status { status: 401, .. })
        ));
    }

    #[test]
    fn history_goes_before_the_new_message() {
        let req = CompletionRequest::new("sys", "now").with_history(&[
            HistoryEntry::user("first"),
            HistoryEntry::assistant("second"),
        ]);
        let contents: Vec<&str> = req.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "now"]);
        assert_eq!(req.last_user_message(), "now");
    }

    #[test]
    fn string_fields() {
        let mut obj = Map::new();
        obj.insert("s".into(), Value::from("x"));
        obj.insert("n".into(), Value::from(2));
        assert_eq!(string_field(&obj, "s").unwrap(), "x");
        assert_eq!(string_field(&obj, "n").unwrap(), "2");
        assert!(matches!(
            string_field(&obj, "missing"),
            Err(OracleError::MissingField(_))
        ));
    }
}
