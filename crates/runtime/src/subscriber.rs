//! Connects a runtime to an event stream.
//!
//! Every runnable action published on the stream is executed and its
//! observation published back with `cause` set to the action's id and
//! source `environment`.

use devloop_core::{
    Event, EventSource, EventStream, Runtime, SubscriberKey, callback,
};
use std::sync::{Arc, Weak};
use tracing::{error, info};

pub struct RuntimeSubscriber;

impl RuntimeSubscriber {
    pub const CALLBACK_ID: &'static str = "runtime";

    /// Subscribe `runtime` to `stream` under [`SubscriberKey::Runtime`].
    pub fn attach(stream: &Arc<EventStream>, runtime: Arc<dyn Runtime>) {
        let weak = Arc::downgrade(stream);
        stream.subscribe(
            SubscriberKey::Runtime,
            callback(move |event| on_event(weak.clone(), Arc::clone(&runtime), event)),
            Self::CALLBACK_ID,
        );
    }

    pub fn detach(stream: &EventStream) {
        stream.unsubscribe(SubscriberKey::Runtime, Self::CALLBACK_ID);
    }
}

async fn on_event(stream: Weak<EventStream>, runtime: Arc<dyn Runtime>, event: Arc<Event>) {
    let Some(action) = event.as_action() else {
        return;
    };
    let Some(id) = event.id else {
        return;
    };
    if !action.runnable() {
        return;
    }

    info!(id, kind = action.kind(), runtime = runtime.name(), "Executing action");
    let observation = runtime.run_action(action).await;

    let Some(stream) = stream.upgrade() else {
        return;
    };
    let event = Event::observation(observation).with_cause(id);
    if let Err(e) = stream.add_event(event, EventSource::Environment).await {
        error!(cause = id, error = %e, "Failed to publish observation");
    }
}
