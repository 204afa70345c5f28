//! Directives: the structured object the LLM must emit on every turn.
//!
//! Wire format is a JSON object with an integer `state` plus state-specific
//! fields, optionally wrapped in a fenced code block:
//!
//! ~~~text
//! ```json
//! {"state": 4, "query": "hello"}
//! ```
//! ~~~

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AgentError, Result};

/// The canonical intents a directive can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectiveState {
    Exit = 0,
    MemRecall = 1,
    Image = 2,
    Model = 3,
    Query = 4,
}

impl DirectiveState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DirectiveState::Exit),
            1 => Some(DirectiveState::MemRecall),
            2 => Some(DirectiveState::Image),
            3 => Some(DirectiveState::Model),
            4 => Some(DirectiveState::Query),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            DirectiveState::Exit => "EXIT",
            DirectiveState::MemRecall => "MEM_RECALL",
            DirectiveState::Image => "IMAGE",
            DirectiveState::Model => "MODEL",
            DirectiveState::Query => "QUERY",
        }
    }
}

/// Why a directive turn could not be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectiveErrorKind {
    ParseError,
    SchemaViolation,
    UnknownState,
    ExternalCallFailure,
}

impl DirectiveErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            DirectiveErrorKind::ParseError => "ParseError",
            DirectiveErrorKind::SchemaViolation => "SchemaViolation",
            DirectiveErrorKind::UnknownState => "UnknownState",
            DirectiveErrorKind::ExternalCallFailure => "ExternalCallFailure",
        }
    }
}

impl std::fmt::Display for DirectiveErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated directive with its state-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Exit { summary: String },
    MemRecall { intent: String },
    Image { intent: String },
    Model,
    Query { query: String },
}

#[derive(Deserialize)]
struct ExitFields {
    summary: String,
}

#[derive(Deserialize)]
struct RecallData {
    intent: String,
}

#[derive(Deserialize)]
struct MemRecallFields {
    data: RecallData,
}

#[derive(Deserialize)]
struct ImageFields {
    image: String,
}

#[derive(Deserialize)]
struct QueryFields {
    query: String,
}

impl Directive {
    /// Parse raw LLM output into a directive.
    ///
    /// The payload is first unwrapped from any code fence. If that is not a
    /// JSON object, the single fallback is the outermost `{...}` span of the
    /// text; anything else is a parse error.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = parse_payload(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let state_field = value
            .get("state")
            .ok_or_else(|| AgentError::SchemaViolation("missing `state`".to_string()))?;
        // Integers beyond i64 are still integers, just never a known state.
        let code = state_field
            .as_i64()
            .map(i128::from)
            .or_else(|| state_field.as_u64().map(i128::from))
            .ok_or_else(|| {
                AgentError::SchemaViolation(format!("`state` is not an integer: {}", state_field))
            })?;
        let state = i64::try_from(code)
            .ok()
            .and_then(DirectiveState::from_code)
            .ok_or(AgentError::UnknownState(code))?;

        let directive = match state {
            DirectiveState::Exit => {
                let f: ExitFields = fields(value, state)?;
                Directive::Exit { summary: f.summary }
            }
            DirectiveState::MemRecall => {
                let f: MemRecallFields = fields(value, state)?;
                Directive::MemRecall { intent: f.data.intent }
            }
            DirectiveState::Image => {
                let f: ImageFields = fields(value, state)?;
                Directive::Image { intent: f.image }
            }
            DirectiveState::Model => Directive::Model,
            DirectiveState::Query => {
                let f: QueryFields = fields(value, state)?;
                Directive::Query { query: f.query }
            }
        };
        Ok(directive)
    }

    pub fn state(&self) -> DirectiveState {
        match self {
            Directive::Exit { .. } => DirectiveState::Exit,
            Directive::MemRecall { .. } => DirectiveState::MemRecall,
            Directive::Image { .. } => DirectiveState::Image,
            Directive::Model => DirectiveState::Model,
            Directive::Query { .. } => DirectiveState::Query,
        }
    }
}

fn fields<T: DeserializeOwned>(value: Value, state: DirectiveState) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| AgentError::SchemaViolation(format!("{}: {}", state.label(), e)))
}

/// Strip a surrounding code fence from LLM output.
///
/// Accepts an opening ```` ```json ```` or bare ```` ``` ```` marker, with or
/// without a newline after it, and a closing ```` ``` ```` with or without a
/// trailing newline.
pub fn unwrap_fenced(raw: &str) -> &str {
    let mut s = raw.trim();
    for prefix in ["```json", "```JSON", "```"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest;
            break;
        }
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

fn parse_payload(raw: &str) -> Result<Value> {
    let unwrapped = unwrap_fenced(raw);
    match serde_json::from_str::<Value>(unwrapped) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(other) => Err(AgentError::Parse(format!("expected a JSON object, got {}", other))),
        Err(first) => {
            let (Some(start), Some(end)) = (unwrapped.find('{'), unwrapped.rfind('}')) else {
                return Err(AgentError::Parse(first.to_string()));
            };
            if end <= start {
                return Err(AgentError::Parse(first.to_string()));
            }
            serde_json::from_str::<Value>(&unwrapped[start..=end])
                .map_err(|_| AgentError::Parse(first.to_string()))
        }
    }
}
