//! Events: the immutable records that make up a session's log.
//!
//! An event is either an [`Action`] or an [`Observation`] plus the envelope
//! the stream stamps on publish (`id`, `timestamp`, `source`). Once the
//! stream assigns an id, the event is never modified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::observation::Observation;

/// Position of an event in its session's log.
pub type EventId = u64;

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    User,
    Agent,
    Environment,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// The variant payload carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Action(Action),
    Observation(Observation),
}

/// One record in the log.
///
/// Persisted as a flat JSON object:
/// `{"id": 3, "timestamp": "...", "source": "agent", "action": "run", "command": "ls", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,

    /// For observations: the id of the action this resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<EventId>,

    /// Hidden events are kept in the log but filtered from agent views.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,

    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn action(action: Action) -> Self {
        Self::unpublished(EventPayload::Action(action))
    }

    pub fn observation(observation: Observation) -> Self {
        Self::unpublished(EventPayload::Observation(observation))
    }

    fn unpublished(payload: EventPayload) -> Self {
        Self {
            id: None,
            timestamp: None,
            source: None,
            cause: None,
            hidden: false,
            payload,
        }
    }

    /// Mark this observation as resolving the action with the given id.
    pub fn with_cause(mut self, cause: EventId) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn as_action(&self) -> Option<&Action> {
        match &self.payload {
            EventPayload::Action(a) => Some(a),
            EventPayload::Observation(_) => None,
        }
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match &self.payload {
            EventPayload::Observation(o) => Some(o),
            EventPayload::Action(_) => None,
        }
    }

    pub fn is_action(&self) -> bool {
        self.as_action().is_some()
    }

    /// The variant discriminator, e.g. `"run"` or `"agent_state_changed"`.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            EventPayload::Action(a) => a.kind(),
            EventPayload::Observation(o) => o.kind(),
        }
    }

    /// Payload equality ignoring the envelope (id, timestamp, source, cause).
    pub fn same_payload(&self, other: &Event) -> bool {
        match (&self.payload, &other.payload) {
            (EventPayload::Action(a), EventPayload::Action(b)) => a == b,
            (EventPayload::Observation(a), EventPayload::Observation(b)) => a.similar(b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_record_is_flat() {
        let mut event = Event::action(Action::run("ls -la")).with_cause(2);
        event.id = Some(3);
        event.source = Some(EventSource::Agent);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["source"], "agent");
        assert_eq!(json["action"], "run");
        assert_eq!(json["command"], "ls -la");
        assert!(json.get("hidden").is_none());
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn decodes_both_payload_kinds() {
        let action: Event =
            serde_json::from_str(r#"{"id":0,"source":"user","action":"message","content":"hi"}"#)
                .unwrap();
        assert!(action.is_action());
        assert_eq!(action.kind(), "message");

        let obs: Event = serde_json::from_str(
            r#"{"id":1,"cause":0,"source":"environment","observation":"error","content":"boom"}"#,
        )
        .unwrap();
        assert_eq!(obs.cause, Some(0));
        assert!(obs.as_observation().unwrap().is_error());
    }

    #[test]
    fn same_payload_ignores_envelope() {
        let mut a = Event::action(Action::run("ls"));
        a.id = Some(1);
        let mut b = Event::action(Action::run("ls"));
        b.id = Some(7);
        b.source = Some(EventSource::Agent);
        assert!(a.same_payload(&b));
        assert!(!a.same_payload(&Event::action(Action::run("pwd"))));
    }
}
