//! `devloop events`: list a persisted session's log.

use super::{describe, open_store};
use devloop_config::AppConfig;
use devloop_core::{EventFilter, EventId, EventStream, FileStore};
use std::sync::Arc;

#[derive(Debug, clap::Args)]
pub struct EventsArgs {
    /// Session id
    #[arg(short, long)]
    pub session: String,

    /// Newest first
    #[arg(short, long)]
    pub reverse: bool,

    /// First event id to show
    #[arg(long, default_value_t = 0)]
    pub start: EventId,

    /// Last event id to show (inclusive)
    #[arg(long)]
    pub end: Option<EventId>,

    /// Print each event as a JSON line
    #[arg(long)]
    pub json: bool,

    /// Hide events flagged hidden
    #[arg(long)]
    pub hide_hidden: bool,
}

pub fn run(args: EventsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = open_store(&config)?;
    for line in render(store, &args)? {
        println!("{line}");
    }
    Ok(())
}

fn render(
    store: Arc<dyn FileStore>,
    args: &EventsArgs,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    if !EventStream::session_exists(&args.session, store.as_ref()) {
        return Err(format!("No events found for session {}", args.session).into());
    }
    let stream = EventStream::new(args.session.clone(), store);
    let filter = if args.hide_hidden {
        EventFilter::default().hide_hidden()
    } else {
        EventFilter::default()
    };

    stream
        .get_events(args.start, args.end, args.reverse, filter)
        .map(|event| {
            if args.json {
                serde_json::to_string(&event).map_err(Into::into)
            } else {
                Ok(describe(&event))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use devloop_core::{Action, Event, EventSource};
    use devloop_storage::InMemoryFileStore;

    fn args(session: &str) -> EventsArgs {
        EventsArgs {
            session: session.into(),
            reverse: false,
            start: 0,
            end: None,
            json: false,
            hide_hidden: false,
        }
    }

    async fn seeded() -> Arc<dyn FileStore> {
        let store: Arc<dyn FileStore> = Arc::new(InMemoryFileStore::new());
        let stream = EventStream::new("s", Arc::clone(&store));
        for text in ["one", "two", "three"] {
            stream
                .add_event(Event::action(Action::message(text)), EventSource::User)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn lists_in_both_directions() {
        let store = seeded().await;
        let forward = render(Arc::clone(&store), &args("s")).unwrap();
        assert_eq!(forward.len(), 3);
        assert!(forward[0].contains("one"));

        let mut reversed = args("s");
        reversed.reverse = true;
        reversed.end = Some(1);
        let lines = render(store, &reversed).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("two"));
    }

    #[tokio::test]
    async fn json_lines_parse_back() {
        let store = seeded().await;
        let mut json = args("s");
        json.json = true;
        json.start = 2;
        let lines = render(store, &json).unwrap();
        let event: Event = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(event.id, Some(2));
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let store = seeded().await;
        assert!(render(store, &args("missing")).is_err());
    }
}
