//! Detects an agent repeating itself without making progress.
//!
//! Only the part of the history after the latest user message counts, and
//! user messages themselves are ignored. Events are compared by payload,
//! never by id, timestamp, source or cause.

use devloop_core::{Action, Event, EventSource};
use tracing::warn;

const REPEATED_PAIRS: usize = 4;
const REPEATED_ERRORS: usize = 3;
const MONOLOGUE: usize = 3;

pub struct StuckDetector;

impl StuckDetector {
    pub fn is_stuck(history: &[Event]) -> bool {
        let since_user = history
            .iter()
            .rposition(is_user_message)
            .map_or(0, |i| i + 1);
        let recent: Vec<&Event> = history[since_user..]
            .iter()
            .filter(|e| !is_user_message(e))
            .collect();
        if recent.len() < MONOLOGUE {
            return false;
        }

        let actions: Vec<&Event> = recent.iter().rev().filter(|e| e.is_action()).copied().collect();
        let observations: Vec<&Event> =
            recent.iter().rev().filter(|e| !e.is_action()).copied().collect();

        if repeated_action_observation(&actions, &observations) {
            warn!("Action and observation repeated {REPEATED_PAIRS} times");
            return true;
        }
        if repeated_action_error(&actions, &observations) {
            warn!("Action repeated {REPEATED_ERRORS} times, each failing");
            return true;
        }
        if monologue(&recent) {
            warn!("Agent repeated the same message {MONOLOGUE} times");
            return true;
        }
        false
    }
}

fn is_user_message(event: &Event) -> bool {
    event.source == Some(EventSource::User) && matches!(event.as_action(), Some(Action::Message { .. }))
}

fn all_same(events: &[&Event]) -> bool {
    events.windows(2).all(|pair| pair[0].same_payload(pair[1]))
}

/// The newest actions identical, and the newest observations identical.
fn repeated_action_observation(actions: &[&Event], observations: &[&Event]) -> bool {
    actions.len() >= REPEATED_PAIRS
        && observations.len() >= REPEATED_PAIRS
        && all_same(&actions[..REPEATED_PAIRS])
        && all_same(&observations[..REPEATED_PAIRS])
}

/// The newest actions identical, each answered with an error.
fn repeated_action_error(actions: &[&Event], observations: &[&Event]) -> bool {
    actions.len() >= REPEATED_ERRORS
        && observations.len() >= REPEATED_ERRORS
        && all_same(&actions[..REPEATED_ERRORS])
        && observations[..REPEATED_ERRORS]
            .iter()
            .all(|e| e.as_observation().is_some_and(|o| o.is_error()))
}

/// The newest events are all the same agent message.
fn monologue(recent: &[&Event]) -> bool {
    let tail = &recent[recent.len() - MONOLOGUE..];
    tail.iter()
        .all(|e| matches!(e.as_action(), Some(Action::Message { .. })))
        && all_same(tail)
}
