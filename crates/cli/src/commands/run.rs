//! `devloop run`: drive one session through an agent controller.
//!
//! Completions come from a script file (blocks separated by `---` lines).
//! Events are printed as they are published and the root state is
//! checkpointed, so an interrupted or paused session can be picked up
//! again with `--resume`.

use super::{describe, open_store};
use devloop_agent::{AgentController, AgentRegistry, ControllerConfig, State};
use devloop_config::AppConfig;
use devloop_core::{
    Action, AgentState, Event, EventSource, EventStream, FileStore, SubscriberKey, callback,
};
use devloop_providers::{Llm, ScriptedProvider};
use devloop_runtime::{LocalRuntime, RuntimeSubscriber};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PRINTER_ID: &str = "cli";

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Task for the agent; required unless resuming
    #[arg(short, long)]
    pub task: Option<String>,

    /// Agent to run (defaults to `agent.default_agent`)
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Session id (a fresh one is generated if omitted)
    #[arg(short, long)]
    pub session: Option<String>,

    /// File of canned completions, separated by `---` lines
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Override `agent.max_iterations`
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Override `agent.max_budget_per_task` (USD)
    #[arg(long)]
    pub max_budget: Option<f64>,

    /// Continue the checkpointed state of `--session`
    #[arg(long, requires = "session")]
    pub resume: bool,
}

/// How a session run ended.
#[derive(Debug)]
pub struct Outcome {
    pub sid: String,
    /// The state the controller settled in before it was closed.
    pub reached: AgentState,
    pub state: State,
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = open_store(&config)?;
    let outcome = run_session(&config, store, args).await?;

    println!();
    println!("  Session:     {}", outcome.sid);
    println!("  Final state: {}", outcome.reached);
    println!("  Iterations:  {}", outcome.state.iteration);
    println!("  Cost:        ${:.4}", outcome.state.metrics.accumulated_cost());
    if !outcome.state.outputs.is_empty() {
        println!(
            "  Outputs:     {}",
            serde_json::to_string(&outcome.state.outputs)?
        );
    }
    if let Some(error) = &outcome.state.last_error {
        println!("  Last error:  {error}");
    }
    if matches!(outcome.reached, AgentState::Paused | AgentState::AwaitingUserInput) {
        println!();
        println!(
            "  Continue with: devloop run --resume --session {}",
            outcome.sid
        );
    }
    Ok(())
}

/// Run a session until the agent settles, then close it.
pub async fn run_session(
    config: &AppConfig,
    store: Arc<dyn FileStore>,
    args: RunArgs,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    if args.task.is_none() && !args.resume {
        return Err("--task is required unless --resume is given".into());
    }
    let script_path = args
        .script
        .as_ref()
        .ok_or("No LLM backend is configured; pass --script <file> with canned completions")?;
    let script = std::fs::read_to_string(script_path)
        .map_err(|e| format!("Failed to read script {}: {e}", script_path.display()))?;

    let llm = Arc::new(Llm::new(
        Arc::new(ScriptedProvider::from_script(&script)),
        config.llm.clone(),
    ));
    let registry = Arc::new(AgentRegistry::with_defaults(&config.agent.delegate_agent));
    let agent_name = args
        .agent
        .clone()
        .unwrap_or_else(|| config.agent.default_agent.clone());
    let agent = registry.create(&agent_name, Arc::clone(&llm))?;

    let sid = args
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let initial_state = if args.resume {
        Some(State::restore_from_session(&sid, store.as_ref())?)
    } else {
        None
    };

    let stream = Arc::new(EventStream::new(sid.clone(), Arc::clone(&store)));
    let runtime = LocalRuntime::new(
        &config.runtime.workspace_dir,
        Duration::from_secs(config.runtime.timeout_secs),
    );
    RuntimeSubscriber::attach(&stream, Arc::new(runtime));
    stream.subscribe(
        SubscriberKey::Main,
        callback(|event| {
            println!("{}", describe(&event));
            async {}
        }),
        PRINTER_ID,
    );

    let mut controller_config = ControllerConfig::from_agent_config(sid.clone(), &config.agent);
    if let Some(max_iterations) = args.max_iterations {
        controller_config.max_iterations = max_iterations;
    }
    if let Some(max_budget) = args.max_budget {
        controller_config = controller_config.with_budget(max_budget);
    }

    info!(session = %sid, agent = %agent_name, resume = args.resume, "Starting session");
    let controller = AgentController::new(
        agent,
        llm,
        registry,
        Arc::clone(&stream),
        controller_config,
        initial_state,
    )
    .await?;
    let handle = controller.start();

    let kicked = if let Some(task) = args.task {
        stream
            .add_event(Event::action(Action::message(task)), EventSource::User)
            .await?;
        true
    } else if handle.agent_state() == AgentState::Paused {
        stream
            .add_event(
                Event::action(Action::change_state(AgentState::Running)),
                EventSource::User,
            )
            .await?;
        true
    } else {
        false
    };

    let settled = async {
        if kicked {
            handle
                .wait_until(|s| s == AgentState::Running || s.is_terminal())
                .await;
        }
        handle.wait_until(is_settled).await
    };
    let reached = tokio::select! {
        state = settled => state,
        _ = tokio::signal::ctrl_c() => {
            warn!(session = %sid, "Interrupted; stopping the agent");
            AgentState::Stopped
        }
    };

    let state = handle
        .close()
        .await?
        .ok_or("Controller was already closed")?;
    stream.unsubscribe(SubscriberKey::Main, PRINTER_ID);
    RuntimeSubscriber::detach(&stream);

    Ok(Outcome {
        sid,
        reached,
        state,
    })
}

/// States in which the agent will not step again on its own.
fn is_settled(state: AgentState) -> bool {
    state.is_terminal() || matches!(state, AgentState::Paused | AgentState::AwaitingUserInput)
}
