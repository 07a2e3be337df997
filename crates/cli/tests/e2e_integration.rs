//! End-to-end integration tests for the devloop agent runtime.
//!
//! These drive the full pipeline: event stream on a local file store,
//! agent controller, built-in personas, a scripted LLM and the local
//! runtime executing real shell commands in a temporary workspace.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use devloop_agent::{AgentController, AgentRegistry, ControllerConfig, ControllerHandle, State};
use devloop_config::LlmConfig;
use devloop_core::{
    Action, AgentState, Event, EventFilter, EventSource, EventStream, FileStore, Observation,
};
use devloop_providers::{Llm, ScriptedProvider};
use devloop_runtime::{LocalRuntime, RuntimeSubscriber};
use devloop_storage::LocalFileStore;

// ── Harness ──────────────────────────────────────────────────────────────

struct Session {
    stream: Arc<EventStream>,
    store: Arc<dyn FileStore>,
    llm: Arc<Llm>,
    provider: Arc<ScriptedProvider>,
    registry: Arc<AgentRegistry>,
}

impl Session {
    fn open(sid: &str, root: &Path, workspace: &Path, script: &str) -> Self {
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(root));
        let provider = Arc::new(ScriptedProvider::from_script(script));
        let llm = Arc::new(Llm::new(provider.clone(), LlmConfig::default()));
        let mut session = Self {
            stream: Arc::new(EventStream::new(sid, Arc::clone(&store))),
            store,
            llm,
            provider,
            registry: Arc::new(AgentRegistry::with_defaults("searcher")),
        };
        session.attach_runtime(workspace);
        session
    }

    /// Reopen the same session from disk, as a restarted process would.
    fn reopen(&mut self, workspace: &Path) {
        RuntimeSubscriber::detach(&self.stream);
        self.stream = Arc::new(EventStream::new(self.stream.sid(), Arc::clone(&self.store)));
        self.attach_runtime(workspace);
    }

    fn attach_runtime(&mut self, workspace: &Path) {
        let runtime = LocalRuntime::new(workspace, Duration::from_secs(10));
        RuntimeSubscriber::attach(&self.stream, Arc::new(runtime));
    }

    async fn start(&self, config: ControllerConfig, state: Option<State>) -> ControllerHandle {
        let agent = self
            .registry
            .create("codeact", Arc::clone(&self.llm))
            .expect("codeact is registered");
        AgentController::new(
            agent,
            Arc::clone(&self.llm),
            Arc::clone(&self.registry),
            Arc::clone(&self.stream),
            config,
            state,
        )
        .await
        .expect("controller starts")
        .start()
    }

    async fn user(&self, action: Action) {
        self.stream
            .add_event(Event::action(action), EventSource::User)
            .await
            .unwrap();
    }

    fn events(&self) -> Vec<Event> {
        self.stream
            .get_events(0, None, false, EventFilter::default())
            .collect()
    }
}

async fn settle(handle: &ControllerHandle, target: AgentState) -> AgentState {
    tokio::time::timeout(
        Duration::from_secs(10),
        handle.wait_until(|s| s == target || s.is_terminal()),
    )
    .await
    .expect("agent settles in time")
}

// ── E2E: single agent ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_codeact_runs_commands_and_finishes() {
    let root = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let session = Session::open(
        "single",
        root.path(),
        workspace.path(),
        "I'll create the file.\n<execute_bash>echo hello > greeting.txt</execute_bash>\n\
         ---\nCheck it.\n<execute_bash>cat greeting.txt</execute_bash>\n\
         ---\nDone.\n<finish></finish>",
    );

    let handle = session.start(ControllerConfig::new("single", 10), None).await;
    session.user(Action::message("write a greeting")).await;
    assert_eq!(settle(&handle, AgentState::Finished).await, AgentState::Finished);

    let greeting = std::fs::read_to_string(workspace.path().join("greeting.txt")).unwrap();
    assert_eq!(greeting.trim(), "hello");

    let outputs: Vec<_> = session
        .events()
        .into_iter()
        .filter(|e| e.source == Some(EventSource::Environment))
        .collect();
    assert_eq!(outputs.len(), 2);
    match outputs[1].as_observation() {
        Some(Observation::Run {
            content, exit_code, ..
        }) => {
            assert!(content.contains("hello"));
            assert_eq!(*exit_code, 0);
        }
        other => panic!("expected command output, got {other:?}"),
    }

    // The log on disk is complete and readable by a fresh stream.
    let reread = EventStream::new("single", Arc::clone(&session.store));
    assert_eq!(reread.get_latest_event_id(), session.stream.get_latest_event_id());
    let agent_actions: Vec<_> = reread
        .filtered_events_by_source(EventSource::Agent)
        .filter(|e| e.is_action())
        .map(|e| e.kind())
        .collect();
    assert_eq!(agent_actions, ["run", "run", "finish"]);

    let state = handle.close().await.unwrap().unwrap();
    assert_eq!(state.iteration, 3);
    assert!(state.metrics.accumulated_cost() >= 0.0);
    assert_eq!(session.provider.calls(), 3);
}

// ── E2E: delegation ──────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_browse_delegates_to_searcher() {
    let root = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("notes.md"), "select! polls branches").unwrap();
    let session = Session::open(
        "delegation",
        root.path(),
        workspace.path(),
        "I need the docs.\n<execute_browse>how select! works</execute_browse>\n\
         ---\n<execute_bash>cat notes.md</execute_bash>\n\
         ---\nselect! polls every branch\n<finish>\n\
         ---\n<finish></finish>",
    );

    let handle = session.start(ControllerConfig::new("delegation", 10), None).await;
    session.user(Action::message("explain select!")).await;
    assert_eq!(settle(&handle, AgentState::Finished).await, AgentState::Finished);

    let events = session.events();
    let delegate = events
        .iter()
        .find(|e| matches!(e.as_action(), Some(Action::Delegate { .. })))
        .unwrap();
    match delegate.as_action() {
        Some(Action::Delegate { agent, inputs, .. }) => {
            assert_eq!(agent, "searcher");
            assert_eq!(
                inputs["task"],
                "I need the docs.. I should start with: how select! works"
            );
        }
        _ => unreachable!(),
    }

    let result = events
        .iter()
        .find(|e| matches!(e.as_observation(), Some(Observation::Delegate { .. })))
        .unwrap();
    assert_eq!(result.cause, delegate.id);
    assert_eq!(
        result.as_observation().unwrap().content(),
        "searcher finishes task with output: select! polls every branch"
    );

    // The lead agent's last prompt shows the delegate's result, not its work.
    let request = session.provider.last_request().unwrap();
    let prompt: String = request.messages.iter().map(|m| m.text()).collect();
    assert!(prompt.contains("searcher finishes task"));
    assert!(!prompt.contains("[Command finished with exit code"));

    handle.close().await.unwrap();
}

// ── E2E: throttle, crash and resume ──────────────────────────────────────

#[tokio::test]
async fn e2e_paused_session_resumes_after_restart() {
    let root = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let mut session = Session::open(
        "resume",
        root.path(),
        workspace.path(),
        "<execute_bash>echo one >> log.txt</execute_bash>\n---\n<finish></finish>",
    );
    let config = ControllerConfig::new("resume", 1).with_checkpoint(true);

    let handle = session.start(config.clone(), None).await;
    session.user(Action::message("append a line")).await;
    assert_eq!(settle(&handle, AgentState::Paused).await, AgentState::Paused);
    handle.close().await.unwrap();

    session.reopen(workspace.path());
    let restored = State::restore_from_session("resume", session.store.as_ref()).unwrap();
    assert_eq!(restored.agent_state, AgentState::Init);
    assert_eq!(restored.resume_state, Some(AgentState::Paused));
    assert_eq!(restored.iteration, 1);

    let handle = session.start(config, Some(restored)).await;
    assert_eq!(handle.agent_state(), AgentState::Paused);
    session.user(Action::change_state(AgentState::Running)).await;
    assert_eq!(settle(&handle, AgentState::Finished).await, AgentState::Finished);

    let log = std::fs::read_to_string(workspace.path().join("log.txt")).unwrap();
    assert_eq!(log.lines().count(), 1);
    let state = handle.close().await.unwrap().unwrap();
    assert_eq!(state.iteration, 2);
}
