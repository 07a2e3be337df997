//! An agent's view of the event stream.
//!
//! History is not a copy of events: it is an id range over the shared
//! stream, read back on demand. The view an agent sees hides bookkeeping
//! (null events, state changes, hidden events) and everything that
//! happened inside a delegation window. A window opens at a delegate
//! action and closes at the first observation caused by it, which is the
//! delegate's result or the error reported when the delegate failed.

use devloop_core::{Action, Event, EventFilter, EventId, EventSource, EventStream, Observation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub start_id: Option<EventId>,
    pub end_id: Option<EventId>,
    #[serde(skip)]
    stream: Option<Arc<EventStream>>,
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("start_id", &self.start_id)
            .field("end_id", &self.end_id)
            .field("attached", &self.stream.is_some())
            .finish()
    }
}

impl History {
    /// Bind to a live stream. An unset start begins after the latest event.
    pub fn attach(&mut self, stream: Arc<EventStream>) {
        if self.start_id.is_none() {
            self.start_id = Some(stream.get_latest_event_id().map_or(0, |id| id + 1));
        }
        self.stream = Some(stream);
    }

    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    fn filter() -> EventFilter {
        EventFilter::default()
            .hide_hidden()
            .exclude_action("null")
            .exclude_action("change_agent_state")
            .exclude_observation("null")
            .exclude_observation("agent_state_changed")
    }

    /// The events this agent reasons over, oldest first.
    pub fn events(&self) -> Vec<Event> {
        let Some(stream) = &self.stream else {
            return Vec::new();
        };
        let start = self.start_id.unwrap_or(0);

        let mut events = Vec::new();
        let mut open_window: Option<EventId> = None;
        for event in stream.get_events(start, self.end_id, false, Self::filter()) {
            match open_window {
                Some(delegate_id) => {
                    if event.as_observation().is_some() && event.cause == Some(delegate_id) {
                        open_window = None;
                        events.push(event);
                    }
                }
                None => {
                    if matches!(event.as_action(), Some(Action::Delegate { .. })) {
                        open_window = event.id;
                    }
                    events.push(event);
                }
            }
        }
        events
    }

    /// Content and image urls of the most recent user message.
    pub fn last_user_message(&self) -> Option<(String, Vec<String>)> {
        self.events().into_iter().rev().find_map(|event| {
            if event.source != Some(EventSource::User) {
                return None;
            }
            match event.as_action() {
                Some(Action::Message {
                    content, images, ..
                }) => Some((content.clone(), images.clone())),
                _ => None,
            }
        })
    }

    pub fn last_action(&self) -> Option<Action> {
        self.events()
            .into_iter()
            .rev()
            .find_map(|e| e.as_action().cloned())
    }

    pub fn last_observation(&self) -> Option<Observation> {
        self.events()
            .into_iter()
            .rev()
            .find_map(|e| e.as_observation().cloned())
    }
}
