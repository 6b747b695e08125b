//! Event records and subscription filters

use convoy_core::Aid;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open-ended event type tag.
///
/// Well-known types used across convoy services are provided as constants;
/// services are free to define their own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub const MESSAGE: &'static str = "message";
    pub const STATUS: &'static str = "status";
    pub const ERROR: &'static str = "error";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One timestamped, sequenced record on a stream.
///
/// Wire form is camelCase JSON with `source` omitted (not nulled) when
/// absent. Sequence numbers are per-stream, start at 0, and are never
/// reused.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Globally unique id (UUID v4).
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Value,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Aid>,
}

/// Subscription filter; absent or empty fields mean "no restriction".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<EventType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Aid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_sequence: Option<u64>,
}

impl EventFilter {
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EventType>,
    {
        Self {
            types: Some(types.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn after(sequence: u64) -> Self {
        Self {
            after_sequence: Some(sequence),
            ..Default::default()
        }
    }

    /// Whether `event` passes every populated constraint.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.types {
            if !types.is_empty() && !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.is_empty() {
                match &event.source {
                    Some(source) if sources.contains(source) => {}
                    _ => return false,
                }
            }
        }
        if let Some(after) = self.after_sequence {
            if event.sequence <= after {
                return false;
            }
        }
        true
    }
}
