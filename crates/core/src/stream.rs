//! The event stream: an append-only log with ordered fan-out.
//!
//! `add_event` assigns the next id under a lock, stamps timestamp and
//! source, persists the record, and then runs every subscriber callback.
//! Groups run in ascending [`SubscriberKey`] order; callbacks inside one
//! group run concurrently. `add_event` returns only after every callback
//! has finished.

use chrono::Utc;
use futures::future::{BoxFuture, join_all};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{StorageError, StreamError};
use crate::event::{Event, EventId, EventSource};
use crate::storage::{self, FileStore};

/// Subscriber groups, delivered in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriberKey {
    AgentController,
    Main,
    Resolver,
    Runtime,
    SecurityAnalyzer,
    Server,
    Test,
}

/// A subscriber callback. Invoked once per published event.
pub type EventCallback = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Box an async closure into an [`EventCallback`].
pub fn callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

type Subscribers = BTreeMap<SubscriberKey, BTreeMap<String, EventCallback>>;

/// Recover from a poisoned lock; the guarded data stays consistent because
/// no critical section can panic halfway through an update.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The session log plus its subscribers.
pub struct EventStream {
    sid: String,
    file_store: Arc<dyn FileStore>,
    cur_id: Mutex<EventId>,
    subscribers: Mutex<Subscribers>,
}

impl EventStream {
    /// Open the stream for `sid`, resuming the id counter from whatever is
    /// already persisted.
    pub fn new(sid: impl Into<String>, file_store: Arc<dyn FileStore>) -> Self {
        let sid = sid.into();
        let cur_id = Self::recover_next_id(&sid, file_store.as_ref());
        debug!(sid = %sid, next_id = cur_id, store = file_store.name(), "Event stream opened");
        Self {
            sid,
            file_store,
            cur_id: Mutex::new(cur_id),
            subscribers: Mutex::new(BTreeMap::new()),
        }
    }

    fn recover_next_id(sid: &str, file_store: &dyn FileStore) -> EventId {
        match file_store.list(&storage::events_dir(sid)) {
            Ok(paths) => paths
                .iter()
                .filter_map(|p| storage::event_id_from_path(p))
                .map(|id| id + 1)
                .max()
                .unwrap_or(0),
            Err(StorageError::NotFound(_)) => 0,
            Err(e) => {
                warn!(sid = %sid, error = %e, "Could not list persisted events, starting at 0");
                0
            }
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn file_store(&self) -> &Arc<dyn FileStore> {
        &self.file_store
    }

    /// Register `callback` under `key`. Re-subscribing an existing id is a no-op.
    pub fn subscribe(
        &self,
        key: SubscriberKey,
        callback: EventCallback,
        callback_id: impl Into<String>,
    ) {
        let callback_id = callback_id.into();
        let mut subscribers = lock(&self.subscribers);
        let group = subscribers.entry(key).or_default();
        if group.contains_key(&callback_id) {
            warn!(?key, callback_id = %callback_id, "Callback already subscribed");
            return;
        }
        debug!(?key, callback_id = %callback_id, "Subscribed");
        group.insert(callback_id, callback);
    }

    pub fn unsubscribe(&self, key: SubscriberKey, callback_id: &str) {
        let mut subscribers = lock(&self.subscribers);
        let removed = subscribers
            .get_mut(&key)
            .and_then(|group| group.remove(callback_id))
            .is_some();
        if !removed {
            warn!(?key, callback_id = %callback_id, "Callback not found during unsubscribe");
            return;
        }
        if subscribers.get(&key).is_some_and(|g| g.is_empty()) {
            subscribers.remove(&key);
        }
        debug!(?key, callback_id = %callback_id, "Unsubscribed");
    }

    /// Append an event and deliver it to every subscriber.
    pub async fn add_event(
        &self,
        mut event: Event,
        source: EventSource,
    ) -> Result<EventId, StreamError> {
        if let Some(id) = event.id {
            return Err(StreamError::AlreadyPublished(id));
        }

        let id = {
            let mut cur_id = lock(&self.cur_id);
            let id = *cur_id;
            event.id = Some(id);
            event.timestamp = Some(Utc::now());
            event.source = Some(source);
            let record = serde_json::to_string(&event)?;
            self.file_store
                .write(&storage::event_path(&self.sid, id), &record)?;
            *cur_id += 1;
            id
        };

        debug!(sid = %self.sid, id, kind = event.kind(), %source, "Event added");

        let groups: Vec<Vec<EventCallback>> = lock(&self.subscribers)
            .values()
            .map(|group| group.values().cloned().collect())
            .collect();

        let event = Arc::new(event);
        for group in groups {
            join_all(group.iter().map(|cb| cb(Arc::clone(&event)))).await;
        }

        Ok(id)
    }

    /// Read back one persisted event.
    pub fn get_event(&self, id: EventId) -> Result<Event, StreamError> {
        read_event(self.file_store.as_ref(), &self.sid, id)
    }

    /// Iterate events between `start` and `end` (inclusive).
    ///
    /// Forward iteration without an `end` follows the log until the first
    /// missing id, so events appended while iterating are picked up.
    /// Reverse iteration starts at `end` (or the latest id) and skips gaps.
    pub fn get_events(
        &self,
        start: EventId,
        end: Option<EventId>,
        reverse: bool,
        filter: EventFilter,
    ) -> EventIter {
        let cursor = if reverse {
            end.or_else(|| self.get_latest_event_id())
        } else {
            Some(start)
        };
        EventIter {
            file_store: Arc::clone(&self.file_store),
            sid: self.sid.clone(),
            start,
            end,
            cursor,
            reverse,
            filter,
        }
    }

    pub fn get_latest_event_id(&self) -> Option<EventId> {
        lock(&self.cur_id).checked_sub(1)
    }

    pub fn get_latest_event(&self) -> Result<Option<Event>, StreamError> {
        self.get_latest_event_id()
            .map(|id| self.get_event(id))
            .transpose()
    }

    /// All events published by `source`, oldest first.
    pub fn filtered_events_by_source(
        &self,
        source: EventSource,
    ) -> impl Iterator<Item = Event> + use<> {
        self.get_events(0, None, false, EventFilter::default())
            .filter(move |e| e.source == Some(source))
    }

    /// Delete every persisted event of this session and restart ids at 0.
    /// Subscribers stay registered.
    pub fn clear(&self) -> Result<(), StreamError> {
        let mut cur_id = lock(&self.cur_id);
        match self.file_store.delete(&storage::events_dir(&self.sid)) {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        *cur_id = 0;
        debug!(sid = %self.sid, "Event stream cleared");
        Ok(())
    }

    /// Whether `sid` has any persisted events in `file_store`.
    pub fn session_exists(sid: &str, file_store: &dyn FileStore) -> bool {
        file_store
            .list(&storage::events_dir(sid))
            .map(|paths| !paths.is_empty())
            .unwrap_or(false)
    }
}

fn read_event(file_store: &dyn FileStore, sid: &str, id: EventId) -> Result<Event, StreamError> {
    let raw = file_store
        .read(&storage::event_path(sid, id))
        .map_err(|e| match e {
            StorageError::NotFound(_) => StreamError::NotFound(id),
            other => StreamError::Storage(other),
        })?;
    serde_json::from_str(&raw).map_err(|e| StreamError::Corrupt {
        id,
        reason: e.to_string(),
    })
}

/// Which events `get_events` yields.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Drop events flagged hidden.
    pub filter_hidden: bool,
    /// Action discriminators to drop, e.g. `"null"`.
    pub exclude_actions: Vec<&'static str>,
    /// Observation discriminators to drop.
    pub exclude_observations: Vec<&'static str>,
}

impl EventFilter {
    pub fn hide_hidden(mut self) -> Self {
        self.filter_hidden = true;
        self
    }

    pub fn exclude_action(mut self, kind: &'static str) -> Self {
        self.exclude_actions.push(kind);
        self
    }

    pub fn exclude_observation(mut self, kind: &'static str) -> Self {
        self.exclude_observations.push(kind);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if self.filter_hidden && event.hidden {
            return false;
        }
        let excluded = if event.is_action() {
            &self.exclude_actions
        } else {
            &self.exclude_observations
        };
        !excluded.contains(&event.kind())
    }
}

/// Lazy, finite iterator over a session's persisted events.
///
/// Cloning yields an independent iterator from the same position.
#[derive(Clone)]
pub struct EventIter {
    file_store: Arc<dyn FileStore>,
    sid: String,
    start: EventId,
    end: Option<EventId>,
    cursor: Option<EventId>,
    reverse: bool,
    filter: EventFilter,
}

impl Iterator for EventIter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            let id = self.cursor?;
            if self.reverse {
                if id < self.start {
                    self.cursor = None;
                    return None;
                }
                self.cursor = id.checked_sub(1);
            } else {
                if self.end.is_some_and(|end| id > end) {
                    self.cursor = None;
                    return None;
                }
                self.cursor = id.checked_add(1);
            }

            match read_event(self.file_store.as_ref(), &self.sid, id) {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(StreamError::NotFound(_)) if self.reverse => {}
                Err(StreamError::NotFound(_)) => {
                    self.cursor = None;
                    return None;
                }
                Err(e) => warn!(sid = %self.sid, id, error = %e, "Skipping unreadable event"),
            }
        }
    }
}
