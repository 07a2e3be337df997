//! The agent controller: one agent, one state, one step loop.
//!
//! Each tick the controller either idles, advances its delegate by exactly
//! one tick, or steps its own agent and publishes the resulting action:
//!
//! 1. Not RUNNING: idle.
//! 2. A runnable action is still waiting for its observation: idle.
//! 3. A delegate is live: step it instead. A failed delegate is closed and
//!    reported; a finished one is closed and its outputs published as this
//!    controller's delegate observation.
//! 4. Iteration ceiling, then budget ceiling. Hitting either pauses the
//!    controller with traffic control THROTTLING; after a resume the next
//!    tick proceeds once and traffic control returns to NORMAL.
//! 5. Step the agent. Model mistakes are reported as error observations.
//! 6. Publish the action, mark it pending if runnable, and go to ERROR if
//!    the agent or any delegate below it is stuck in a loop. A delegate that
//!    detects its own loop fails like any other delegate; its parent
//!    carries on.
//!
//! The stream subscription only enqueues events into an inbox. The inbox
//! is drained before and after every tick, so every reaction to an event
//! has run before the next tick starts. While a delegate is live this
//! controller only reacts to user events; the delegate handles the rest.

use crate::agent::Agent;
use crate::registry::AgentRegistry;
use crate::state::State;
use crate::stuck::StuckDetector;
use async_recursion::async_recursion;
use devloop_config::AgentConfig;
use devloop_core::error::AgentError;
use devloop_core::{
    Action, AgentState, Event, EventId, EventPayload, EventSource, EventStream, Observation,
    SubscriberKey, TrafficControlState, callback,
};
use devloop_providers::Llm;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Appended to every traffic-control pause message.
pub const TRAFFIC_CONTROL_REMINDER: &str =
    "Please click on resume button if you'd like to continue, or start a new task.";

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Something changed; tick again.
    Progressed,
    /// Nothing to do until the next event arrives.
    Idle,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Session id; also the root controller's subscription id.
    pub sid: String,
    pub max_iterations: u32,
    /// USD ceiling across the root agent and every delegate.
    pub max_budget_per_task: Option<f64>,
    /// Persist the root state after every tick that changed something.
    pub checkpoint: bool,
}

impl ControllerConfig {
    pub fn new(sid: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            sid: sid.into(),
            max_iterations,
            max_budget_per_task: None,
            checkpoint: false,
        }
    }

    pub fn from_agent_config(sid: impl Into<String>, config: &AgentConfig) -> Self {
        Self {
            sid: sid.into(),
            max_iterations: config.max_iterations,
            max_budget_per_task: config.max_budget_per_task,
            checkpoint: config.checkpoint,
        }
    }

    pub fn with_budget(mut self, max_budget: f64) -> Self {
        self.max_budget_per_task = Some(max_budget);
        self
    }

    pub fn with_checkpoint(mut self, enabled: bool) -> Self {
        self.checkpoint = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingAction {
    id: EventId,
    kind: &'static str,
}

pub struct AgentController {
    id: String,
    /// Id of the owning controller, for delegates.
    parent_id: Option<String>,
    agent: Box<dyn Agent>,
    llm: Arc<Llm>,
    registry: Arc<AgentRegistry>,
    stream: Arc<EventStream>,
    state: State,
    config: ControllerConfig,
    pending_action: Option<PendingAction>,
    delegate: Option<Box<AgentController>>,
    /// The delegate action that opened the current delegation window.
    delegate_action_id: Option<EventId>,
    inbox: mpsc::UnboundedReceiver<Arc<Event>>,
    state_tx: watch::Sender<AgentState>,
    closed_tx: watch::Sender<bool>,
    closed: bool,
}

impl AgentController {
    /// Create a root controller and subscribe it to `stream`.
    ///
    /// A fresh state moves from LOADING to INIT. A restored state parked in
    /// INIT with a `resume_state` is moved on to that state.
    pub async fn new(
        agent: Box<dyn Agent>,
        llm: Arc<Llm>,
        registry: Arc<AgentRegistry>,
        stream: Arc<EventStream>,
        config: ControllerConfig,
        initial_state: Option<State>,
    ) -> Result<Self, AgentError> {
        let id = config.sid.clone();
        let mut controller =
            Self::build(id, None, agent, llm, registry, stream, config, initial_state);
        controller.initialize().await?;
        Ok(controller)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: String,
        parent_id: Option<String>,
        agent: Box<dyn Agent>,
        llm: Arc<Llm>,
        registry: Arc<AgentRegistry>,
        stream: Arc<EventStream>,
        config: ControllerConfig,
        initial_state: Option<State>,
    ) -> Self {
        let mut state = initial_state.unwrap_or_else(|| State::new(config.max_iterations));
        if !state.metrics.shares_with(llm.metrics()) {
            llm.metrics().merge(&state.metrics.snapshot());
            state.metrics = llm.metrics().clone();
        }

        let (tx, inbox) = mpsc::unbounded_channel();
        stream.subscribe(
            SubscriberKey::AgentController,
            callback(move |event| {
                let _ = tx.send(event);
                async {}
            }),
            id.clone(),
        );
        state.history.attach(Arc::clone(&stream));

        let (state_tx, _) = watch::channel(state.agent_state);
        let (closed_tx, _) = watch::channel(false);
        info!(
            controller = %id,
            agent = agent.name(),
            delegate_level = state.delegate_level,
            start_id = ?state.history.start_id,
            "Controller created"
        );

        Self {
            id,
            parent_id,
            agent,
            llm,
            registry,
            stream,
            state,
            config,
            pending_action: None,
            delegate: None,
            delegate_action_id: None,
            inbox,
            state_tx,
            closed_tx,
            closed: false,
        }
    }

    async fn initialize(&mut self) -> Result<(), AgentError> {
        match (self.state.agent_state, self.state.resume_state.take()) {
            (AgentState::Init, Some(resume)) => {
                info!(controller = %self.id, resume_state = %resume, "Resuming restored state");
                self.set_agent_state_to(resume).await?;
            }
            (AgentState::Loading, resume) => {
                self.state.resume_state = resume;
                self.set_agent_state_to(AgentState::Init).await?;
            }
            (_, resume) => self.state.resume_state = resume,
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn agent_state(&self) -> AgentState {
        self.state.agent_state
    }

    pub fn delegate(&self) -> Option<&AgentController> {
        self.delegate.as_deref()
    }

    /// Id of the runnable action still awaiting its observation.
    pub fn pending_action(&self) -> Option<EventId> {
        self.pending_action.map(|p| p.id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_state(self) -> State {
        self.state
    }

    /// Change state and announce it with an agent-state-changed observation.
    ///
    /// STOPPED resets the agent and settles in AWAITING_USER_INPUT. Resuming
    /// a throttled pause arms a single step past the limit.
    pub async fn set_agent_state_to(&mut self, new_state: AgentState) -> Result<(), AgentError> {
        let mut target = new_state;
        loop {
            if target == self.state.agent_state {
                return Ok(());
            }
            info!(
                controller = %self.id,
                from = %self.state.agent_state,
                to = %target,
                "Setting agent state"
            );

            if self.state.agent_state == AgentState::Paused
                && target == AgentState::Running
                && self.state.traffic_control_state == TrafficControlState::Throttling
            {
                self.state.traffic_control_state = TrafficControlState::Paused;
            }

            self.state.agent_state = target;
            match target {
                AgentState::Stopped => {
                    self.reset_task();
                    self.state.agent_state = AgentState::AwaitingUserInput;
                }
                AgentState::Error => self.reset_task(),
                _ => {}
            }
            self.state_tx.send_replace(self.state.agent_state);

            let changed = Observation::AgentStateChanged {
                agent_state: self.state.agent_state,
                content: String::new(),
            };
            self.stream
                .add_event(Event::observation(changed), EventSource::Agent)
                .await?;

            match (target, self.state.resume_state.take()) {
                (AgentState::Init, Some(resume)) => target = resume,
                _ => return Ok(()),
            }
        }
    }

    fn reset_task(&mut self) {
        self.pending_action = None;
        self.agent.reset();
    }

    /// Drain the inbox, run one tick, drain again, then checkpoint.
    #[async_recursion]
    pub async fn step(&mut self) -> Result<TickOutcome, AgentError> {
        let handled_before = self.drain_inbox().await?;
        let outcome = self.tick().await?;
        let handled_after = self.drain_inbox().await?;

        let changed = outcome == TickOutcome::Progressed || handled_before + handled_after > 0;
        if changed && self.parent_id.is_none() && self.config.checkpoint {
            self.state
                .save_to_session(self.stream.sid(), self.stream.file_store().as_ref())?;
        }
        Ok(outcome)
    }

    async fn drain_inbox(&mut self) -> Result<usize, AgentError> {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.on_event(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn on_event(&mut self, event: Arc<Event>) -> Result<(), AgentError> {
        if self.delegate.is_some() && event.source != Some(EventSource::User) {
            return Ok(());
        }

        let action = match &event.payload {
            EventPayload::Observation(observation) => {
                self.on_observation(&event, observation);
                return Ok(());
            }
            EventPayload::Action(action) => action,
        };

        if let Action::ChangeAgentState { agent_state, .. } = action {
            match agent_state.parse::<AgentState>() {
                Ok(requested) => self.set_agent_state_to(requested).await?,
                Err(e) => error!(controller = %self.id, error = %e, "Ignoring state change"),
            }
            return Ok(());
        }
        if self.state.agent_state == AgentState::Stopped {
            debug!(controller = %self.id, kind = action.kind(), "Stopped; ignoring event");
            return Ok(());
        }

        match action {
            Action::Message {
                wait_for_response, ..
            } => match event.source {
                Some(EventSource::User) if self.state.agent_state != AgentState::Running => {
                    self.set_agent_state_to(AgentState::Running).await?;
                }
                Some(EventSource::Agent) if *wait_for_response => {
                    self.set_agent_state_to(AgentState::AwaitingUserInput).await?;
                }
                _ => {}
            },
            Action::Delegate { agent, inputs, .. } => {
                self.delegate_action_id = event.id;
                self.start_delegate(agent, inputs.clone()).await?;
            }
            Action::AddTask {
                parent,
                goal,
                subtasks,
                ..
            } => {
                if let Err(e) = self.state.root_task.add_subtask(parent, goal, subtasks) {
                    self.report_error(&e.to_string(), None, None).await?;
                }
            }
            Action::ModifyTask { task_id, state, .. } => {
                if let Err(e) = self.state.root_task.set_subtask_state(task_id, state) {
                    self.report_error(&e.to_string(), None, None).await?;
                }
            }
            Action::Finish { outputs, .. } => {
                self.state.outputs = outputs.clone();
                self.set_agent_state_to(AgentState::Finished).await?;
            }
            Action::Reject { outputs, .. } => {
                self.state.outputs = outputs.clone();
                self.set_agent_state_to(AgentState::Rejected).await?;
            }
            _ => {}
        }
        Ok(())
    }

    fn on_observation(&mut self, event: &Event, observation: &Observation) {
        match self.pending_action {
            Some(pending) if event.cause == Some(pending.id) => {
                info!(
                    controller = %self.id,
                    cause = pending.id,
                    action = pending.kind,
                    observation = observation.kind(),
                    "Pending action resolved"
                );
                self.pending_action = None;
            }
            _ => debug!(controller = %self.id, observation = observation.kind(), "Observation"),
        }
    }

    async fn start_delegate(
        &mut self,
        agent_name: &str,
        inputs: Map<String, Value>,
    ) -> Result<(), AgentError> {
        let agent = match self.registry.create(agent_name, Arc::clone(&self.llm)) {
            Ok(agent) => agent,
            Err(e) => {
                let cause = self.delegate_action_id.take();
                return self.report_error(&e.to_string(), None, cause).await;
            }
        };

        let state = State::new(self.state.max_iterations)
            .with_inputs(inputs)
            .with_delegate_level(self.state.delegate_level + 1)
            .with_metrics(self.state.metrics.clone());
        let config = ControllerConfig {
            sid: self.config.sid.clone(),
            max_iterations: self.state.max_iterations,
            max_budget_per_task: self.config.max_budget_per_task,
            checkpoint: false,
        };
        let mut delegate = Self::build(
            format!("{}-delegate", self.id),
            Some(self.id.clone()),
            agent,
            Arc::clone(&self.llm),
            Arc::clone(&self.registry),
            Arc::clone(&self.stream),
            config,
            Some(state),
        );
        info!(
            controller = %self.id,
            delegate = %delegate.id,
            agent = agent_name,
            "Starting delegate"
        );
        delegate.set_agent_state_to(AgentState::Running).await?;
        self.delegate = Some(Box::new(delegate));
        Ok(())
    }

    async fn tick(&mut self) -> Result<TickOutcome, AgentError> {
        if self.state.agent_state != AgentState::Running {
            return Ok(TickOutcome::Idle);
        }
        if let Some(pending) = self.pending_action {
            debug!(controller = %self.id, pending = pending.id, action = pending.kind, "Waiting for observation");
            return Ok(TickOutcome::Idle);
        }
        if self.delegate.is_some() {
            return self.tick_delegate().await;
        }

        info!(
            "{} LEVEL {} STEP {}",
            self.agent.name(),
            self.state.delegate_level,
            self.state.iteration
        );

        if self.state.iteration >= self.state.max_iterations {
            let message = format!(
                "Agent reached maximum number of iterations, task paused. {TRAFFIC_CONTROL_REMINDER}"
            );
            if !self.pass_traffic_control(message).await? {
                return Ok(TickOutcome::Progressed);
            }
        } else if let Some(max_budget) = self.config.max_budget_per_task {
            let current = self.state.metrics.accumulated_cost();
            if current > max_budget {
                let message = format!(
                    "Task budget exceeded. Current cost: {current:.2}, Max budget: {max_budget:.2}, task paused. {TRAFFIC_CONTROL_REMINDER}"
                );
                if !self.pass_traffic_control(message).await? {
                    return Ok(TickOutcome::Progressed);
                }
            }
        }

        self.state.iteration += 1;
        let action = match self.agent.step(&self.state).await {
            Ok(action) => action,
            Err(e) if e.is_recoverable() => {
                warn!(controller = %self.id, error = %e, "Agent produced no usable action");
                self.report_error(&e.to_string(), None, None).await?;
                return Ok(TickOutcome::Progressed);
            }
            Err(e) => return Err(e),
        };

        if action != Action::Null {
            let runnable = action.runnable();
            let kind = action.kind();
            let id = self
                .stream
                .add_event(Event::action(action), EventSource::Agent)
                .await?;
            info!(controller = %self.id, id, action = kind, runnable, "Action published");
            if runnable {
                self.pending_action = Some(PendingAction { id, kind });
            }
        }

        if self.is_stuck() {
            self.report_error("Agent got stuck in a loop", None, None).await?;
            self.set_agent_state_to(AgentState::Error).await?;
        }
        Ok(TickOutcome::Progressed)
    }

    /// Whether this agent, or any delegate below it, is stuck in a loop.
    pub fn is_stuck(&self) -> bool {
        if self.delegate.as_ref().is_some_and(|d| d.is_stuck()) {
            return true;
        }
        StuckDetector::is_stuck(&self.state.history.events())
    }

    /// Apply the throttle protocol. `true` means the step may proceed.
    async fn pass_traffic_control(&mut self, message: String) -> Result<bool, AgentError> {
        if self.state.traffic_control_state == TrafficControlState::Paused {
            info!(controller = %self.id, "Limit hit, but resumed by the user; continuing");
            self.state.traffic_control_state = TrafficControlState::Normal;
            return Ok(true);
        }
        self.state.traffic_control_state = TrafficControlState::Throttling;
        self.report_error(&message, None, None).await?;
        self.set_agent_state_to(AgentState::Paused).await?;
        Ok(false)
    }

    async fn tick_delegate(&mut self) -> Result<TickOutcome, AgentError> {
        let Some(delegate) = self.delegate.as_mut() else {
            return Ok(TickOutcome::Idle);
        };
        let outcome = match delegate.step().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(controller = %delegate.id, error = %e, "Delegate failed");
                delegate.fail(e).await;
                TickOutcome::Progressed
            }
        };
        let delegate_state = delegate.state.agent_state;
        // The delegate's own events were meant for it alone.
        self.drain_inbox().await?;

        match delegate_state {
            AgentState::Error => {
                if let Some(mut delegate) = self.delegate.take() {
                    delegate.close().await?;
                }
                let cause = self.delegate_action_id.take();
                self.report_error("Delegator agent encounters an error", None, cause)
                    .await?;
                Ok(TickOutcome::Progressed)
            }
            AgentState::Finished | AgentState::Rejected => {
                let Some(mut delegate) = self.delegate.take() else {
                    return Ok(TickOutcome::Progressed);
                };
                let outputs = delegate.state.outputs.clone();
                let content = format!(
                    "{} finishes task with {}",
                    delegate.agent.name(),
                    format_outputs(&outputs)
                );
                delegate.close().await?;

                info!(controller = %self.id, %content, "Delegate done");
                let mut event = Event::observation(Observation::Delegate { outputs, content });
                if let Some(cause) = self.delegate_action_id.take() {
                    event = event.with_cause(cause);
                }
                self.stream.add_event(event, EventSource::Agent).await?;
                Ok(TickOutcome::Progressed)
            }
            _ => Ok(outcome),
        }
    }

    /// Publish a user-visible error. `detail` is kept in `last_error` only.
    async fn report_error(
        &mut self,
        message: &str,
        detail: Option<String>,
        cause: Option<EventId>,
    ) -> Result<(), AgentError> {
        let last_error = match detail {
            Some(detail) => format!("{message}: {detail}"),
            None => message.to_string(),
        };
        warn!(controller = %self.id, error = %last_error, "Reporting error");
        self.state.last_error = Some(last_error);

        let mut event = Event::observation(Observation::error(message));
        if let Some(cause) = cause {
            event = event.with_cause(cause);
        }
        self.stream.add_event(event, EventSource::Agent).await?;
        Ok(())
    }

    /// Handle an error that escaped a tick: report it and go to ERROR.
    async fn fail(&mut self, error: AgentError) {
        error!(controller = %self.id, error = %error, "Error while running the agent");
        if let Err(e) = self
            .report_error(
                "There was an unexpected error while running the agent",
                Some(error.to_string()),
                None,
            )
            .await
        {
            error!(controller = %self.id, error = %e, "Failed to report error");
        }
        if let Err(e) = self.set_agent_state_to(AgentState::Error).await {
            error!(controller = %self.id, error = %e, "Failed to set error state");
        }
    }

    /// Stop this controller and any live delegate, then unsubscribe.
    ///
    /// A live delegate is reported as stopped, against the delegate action.
    /// Closing twice is a no-op.
    #[async_recursion]
    pub async fn close(&mut self) -> Result<(), AgentError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut delegate) = self.delegate.take() {
            delegate.close().await?;
            // Closes the delegation window so later events reach the history.
            let cause = self.delegate_action_id.take();
            self.report_error("Delegate was stopped", None, cause).await?;
        }
        self.set_agent_state_to(AgentState::Stopped).await?;
        self.stream
            .unsubscribe(SubscriberKey::AgentController, &self.id);
        self.closed_tx.send_replace(true);
        info!(controller = %self.id, "Controller closed");
        Ok(())
    }

    /// Spawn the step loop.
    pub fn start(self) -> ControllerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        ControllerHandle {
            id: self.id.clone(),
            state_rx: self.state_tx.subscribe(),
            closed_rx: self.closed_tx.subscribe(),
            shutdown: shutdown_tx,
            task: Mutex::new(Some(tokio::spawn(self.run(shutdown_rx)))),
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        info!(controller = %self.id, "Starting step loop");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let result = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.step() => result,
            };
            match result {
                Ok(TickOutcome::Progressed) => tokio::task::yield_now().await,
                Ok(TickOutcome::Idle) => {
                    let event = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        event = self.inbox.recv() => event,
                    };
                    let Some(event) = event else {
                        break;
                    };
                    if let Err(e) = self.on_event(event).await {
                        self.fail(e).await;
                        break;
                    }
                }
                Err(e) => {
                    self.fail(e).await;
                    break;
                }
            }
        }
        debug!(controller = %self.id, "Step loop ended");
        self
    }
}

fn format_outputs(outputs: &Map<String, Value>) -> String {
    outputs
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}: {s}"),
            other => format!("{key}: {other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A running controller's step loop.
pub struct ControllerHandle {
    id: String,
    shutdown: watch::Sender<bool>,
    state_rx: watch::Receiver<AgentState>,
    closed_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<AgentController>>>,
}

impl ControllerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_state(&self) -> AgentState {
        *self.state_rx.borrow()
    }

    /// Watch agent state changes.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state_rx.clone()
    }

    /// Wait until `predicate` holds for the agent state, or the loop is gone.
    pub async fn wait_until<F>(&self, predicate: F) -> AgentState
    where
        F: Fn(AgentState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let reached = rx.wait_for(|state| predicate(*state)).await.map(|state| *state);
        reached.unwrap_or_else(|_| *rx.borrow())
    }

    /// Stop the loop, close the controller and return its final state.
    ///
    /// Only the first call does anything; later calls return `None`.
    pub async fn close(&self) -> Result<Option<State>, AgentError> {
        let _ = self.shutdown.send(true);
        let Some(task) = self.task.lock().await.take() else {
            return Ok(None);
        };
        let mut controller = task
            .await
            .map_err(|e| AgentError::Controller(e.to_string()))?;
        controller.close().await?;
        Ok(Some(controller.into_state()))
    }

    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
