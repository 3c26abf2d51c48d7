//! Incremental reconstruction of one JSON object from tokens.

use serde_json::{Map, Value};

use super::token::TokenEvent;

#[derive(Debug)]
enum Partial {
    Object {
        members: Map<String, Value>,
        pending_key: Option<String>,
    },
    Array(Vec<Value>),
}

impl Partial {
    fn object() -> Self {
        Partial::Object {
            members: Map::new(),
            pending_key: None,
        }
    }

    fn insert(&mut self, value: Value) {
        match self {
            Partial::Object {
                members,
                pending_key,
            } => {
                // Without a key the tokenizer would already have failed.
                if let Some(key) = pending_key.take() {
                    members.insert(key, value);
                }
            }
            Partial::Array(items) => items.push(value),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Partial::Object { members, .. } => Value::Object(members),
            Partial::Array(items) => Value::Array(items),
        }
    }
}

/// Builds the object for one handler invocation.
///
/// Seeded with the empty object whose `StartObject` matched a registry key;
/// every later token of the line is fed in until that object closes.
#[derive(Debug)]
pub struct ReconstructionFrame {
    /// Open containers, innermost last.
    stack: Vec<Partial>,
    root: Option<Value>,
}

impl ReconstructionFrame {
    pub fn new() -> Self {
        Self {
            stack: vec![Partial::object()],
            root: None,
        }
    }

    /// Grow the partial tree. Returns `true` once the seeded object has closed.
    pub fn feed(&mut self, event: &TokenEvent) -> bool {
        if self.root.is_some() {
            return true;
        }
        match event {
            TokenEvent::StartObject => self.stack.push(Partial::object()),
            TokenEvent::StartArray => self.stack.push(Partial::Array(Vec::new())),
            TokenEvent::Key(key) => {
                if let Some(Partial::Object { pending_key, .. }) = self.stack.last_mut() {
                    *pending_key = Some(key.clone());
                }
            }
            TokenEvent::Scalar(value) => {
                if let Some(top) = self.stack.last_mut() {
                    top.insert(value.clone());
                }
            }
            TokenEvent::EndObject | TokenEvent::EndArray => {
                if let Some(closed) = self.stack.pop() {
                    let value = closed.into_value();
                    match self.stack.last_mut() {
                        Some(parent) => parent.insert(value),
                        None => self.root = Some(value),
                    }
                }
            }
        }
        self.root.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    /// The reconstructed object.
    ///
    /// A frame cut short by truncated input is closed from the innermost
    /// container outwards; a key still waiting for its value is dropped.
    pub fn into_value(mut self) -> Value {
        if let Some(root) = self.root {
            return root;
        }
        let mut value = None;
        while let Some(mut partial) = self.stack.pop() {
            if let Some(child) = value.take() {
                partial.insert(child);
            }
            value = Some(partial.into_value());
        }
        value.unwrap_or_else(|| Value::Object(Map::new()))
    }
}

impl Default for ReconstructionFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::token::Tokenizer;
    use serde_json::json;

    /// Feed every token after the first `StartObject`.
    fn rebuild(input: &str) -> ReconstructionFrame {
        let mut frame = ReconstructionFrame::new();
        for event in Tokenizer::new(input.as_bytes()).skip(1) {
            let Ok(event) = event else { break };
            if frame.feed(&event) {
                break;
            }
        }
        frame
    }

    #[test]
    fn test_complete_object() {
        let frame = rebuild(r#"{"a": 1, "b": {"c": [1, 2, {"d": null}]}, "e": "x"}"#);
        assert!(frame.is_complete());
        assert_eq!(
            frame.into_value(),
            json!({"a": 1, "b": {"c": [1, 2, {"d": null}]}, "e": "x"})
        );
    }

    #[test]
    fn test_truncated_object_is_folded() {
        let frame = rebuild(r#"{"a": 1, "b": {"c": [1, 2"#);
        assert!(!frame.is_complete());
        assert_eq!(frame.into_value(), json!({"a": 1, "b": {"c": [1, 2]}}));
    }

    #[test]
    fn test_dangling_key_dropped() {
        let frame = rebuild(r#"{"a": 1, "b": "#);
        assert_eq!(frame.into_value(), json!({"a": 1}));
    }

    #[test]
    fn test_tokens_after_completion_ignored() {
        let mut frame = ReconstructionFrame::new();
        assert!(frame.feed(&TokenEvent::EndObject));
        assert!(frame.feed(&TokenEvent::Scalar(json!(1))));
        assert_eq!(frame.into_value(), json!({}));
    }
}
