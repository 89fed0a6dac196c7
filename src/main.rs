use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, RwLock};

use marshal::agent::AgentRole;
use marshal::config::{Config, RosterEntry};
use marshal::orchestration::{
    CoordinationLoop, DispatchConfig, HealthConfig, HealthMonitor, MessageDispatcher, Scheduler,
    SCHEDULER_SENDER,
};
use marshal::registry::AgentRegistry;
use marshal::tmux::{Multiplexer, Tmux};
use marshal::{mlog, Error, Result};

/// Marshal - session and agent coordination for tmux-hosted AI agents
#[derive(Parser, Debug)]
#[command(name = "marshal")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    MARSHAL_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.marshal/marshal.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Path to the config file (default: ~/.marshal/marshal.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Register an agent at a session:window and add it to the roster
    Register {
        /// Stable agent identifier
        id: String,
        /// Tmux session name
        session: String,
        /// Window index within the session
        window: u32,
        /// Agent role: orchestrator, project-manager, engineer, qa, devops
        role: AgentRole,
    },

    /// Remove an agent from the roster
    Deregister {
        /// Agent identifier
        id: String,
    },

    /// Send a message to an agent's input
    Send {
        /// Agent identifier
        id: String,
        /// Message text
        message: String,
    },

    /// Send a message to every roster agent
    Broadcast {
        /// Message text
        message: String,
    },

    /// Show agent status after one live health pass
    Status {
        /// Limit to a single agent
        id: Option<String>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Send a message to an agent after a delay
    Schedule {
        /// Agent identifier
        id: String,
        /// Delay in minutes (must be positive)
        delay_minutes: u64,
        /// Message text
        message: String,
    },

    /// Run the coordination loop until interrupted
    Run,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    marshal::log::init_with_debug(cli.debug);

    let code = match dispatch_command(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn dispatch_command(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match cli.command {
        Command::Register {
            id,
            session,
            window,
            role,
        } => run_register(&config_path, id, session, window, role).await,
        Command::Deregister { id } => run_deregister(&config_path, &id),
        Command::Send { id, message } => run_send(&config_path, &id, &message).await,
        Command::Broadcast { message } => run_broadcast(&config_path, &message).await,
        Command::Status { id, json } => run_status(&config_path, id.as_deref(), json).await,
        Command::Schedule {
            id,
            delay_minutes,
            message,
        } => run_schedule(&config_path, &id, delay_minutes, &message).await,
        Command::Run => run_loop(&config_path).await,
    }
}

/// Shared wiring for commands that act on live agents.
struct Core {
    config: Config,
    registry: Arc<RwLock<AgentRegistry>>,
    mux: Arc<dyn Multiplexer>,
    dispatcher: Arc<MessageDispatcher>,
}

async fn build_core(config_path: &std::path::Path) -> Result<Core> {
    require_tmux()?;
    let config = Config::load_from(config_path)?;

    let registry = Arc::new(RwLock::new(AgentRegistry::new()));
    {
        let mut reg = registry.write().await;
        for entry in &config.roster {
            reg.register(entry.to_spec())?;
        }
    }

    let mux: Arc<dyn Multiplexer> = Arc::new(Tmux);
    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&mux),
        DispatchConfig {
            retry_delay: config.retry_delay(),
            call_timeout: config.check_timeout(),
        },
    ));

    Ok(Core {
        config,
        registry,
        mux,
        dispatcher,
    })
}

fn require_tmux() -> Result<()> {
    if which::which("tmux").is_err() && !Tmux::is_available() {
        return Err(Error::Tmux(
            "tmux binary not found in PATH".to_string(),
        ));
    }
    Ok(())
}

async fn run_register(
    config_path: &std::path::Path,
    id: String,
    session: String,
    window: u32,
    role: AgentRole,
) -> Result<()> {
    require_tmux()?;
    let tmux = Tmux;
    if !tmux.session_exists(&session) {
        return Err(Error::SessionNotFound(session));
    }
    if !tmux.window_exists(&session, window) {
        return Err(Error::WindowNotFound { session, window });
    }

    let mut config = Config::load_from(config_path)?;
    config.add_roster_entry(RosterEntry {
        id: id.clone(),
        session: session.clone(),
        window,
        role,
    })?;
    config.save_to(config_path)?;

    mlog!("Registered agent {} at {}:{}", id, session, window);
    println!("registered {} ({}) at {}:{}", id, role, session, window);
    Ok(())
}

fn run_deregister(config_path: &std::path::Path, id: &str) -> Result<()> {
    let mut config = Config::load_from(config_path)?;
    if config.remove_roster_entry(id) {
        config.save_to(config_path)?;
        mlog!("Deregistered agent {}", id);
        println!("deregistered {}", id);
    } else {
        println!("{} was not registered", id);
    }
    Ok(())
}

async fn run_send(config_path: &std::path::Path, id: &str, message: &str) -> Result<()> {
    let core = build_core(config_path).await?;
    let sent = core.dispatcher.send(id, message).await?;
    println!("delivered {} to {}", sent.id.short(), id);
    Ok(())
}

async fn run_broadcast(config_path: &std::path::Path, message: &str) -> Result<()> {
    let core = build_core(config_path).await?;
    let ids: Vec<String> = core.config.roster.iter().map(|e| e.id.clone()).collect();
    if ids.is_empty() {
        println!("roster is empty; nothing to broadcast");
        return Ok(());
    }

    let outcomes = core.dispatcher.broadcast(&ids, message).await;
    let mut failures = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(sent) => println!("{}: delivered {}", outcome.recipient_id, sent.id.short()),
            Err(e) => {
                failures += 1;
                println!("{}: failed ({})", outcome.recipient_id, e);
            }
        }
    }
    if failures > 0 {
        return Err(Error::TargetUnavailable {
            agent: format!("{} of {} recipients", failures, outcomes.len()),
            reason: "broadcast partially failed".to_string(),
        });
    }
    Ok(())
}

async fn run_status(config_path: &std::path::Path, id: Option<&str>, json: bool) -> Result<()> {
    let core = build_core(config_path).await?;

    // One live pass so status reflects the tmux server as of now.
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let monitor = HealthMonitor::new(
        HealthConfig::from_config(&core.config),
        Arc::clone(&core.registry),
        Arc::clone(&core.mux),
        event_tx,
    );
    monitor.check_all().await;
    while event_rx.try_recv().is_ok() {}

    let agents = match id {
        Some(id) => vec![core.registry.read().await.get(id)?],
        None => core.registry.read().await.list(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    for agent in &agents {
        let heartbeat = match agent.last_heartbeat {
            Some(at) => {
                let secs = Utc::now().signed_duration_since(at).num_seconds().max(0);
                format!("{}s ago", secs)
            }
            None => "never".to_string(),
        };
        println!(
            "{:<16} {:<16} {:<12} {:<14} heartbeat: {:<10} failures: {}",
            agent.id,
            agent.target(),
            agent.role.to_string(),
            agent.status.to_string(),
            heartbeat,
            agent.consecutive_failures
        );
    }
    Ok(())
}

async fn run_schedule(
    config_path: &std::path::Path,
    id: &str,
    delay_minutes: u64,
    message: &str,
) -> Result<()> {
    let core = build_core(config_path).await?;
    core.registry.read().await.get(id)?;

    let delay = Duration::from_secs(delay_minutes.saturating_mul(60));
    let mut scheduler = Scheduler::new();
    let action = scheduler.schedule_once(id, delay, message)?;
    println!(
        "scheduled {} for {} at {}",
        action.id.short(),
        id,
        action.fire_at.format("%H:%M:%S")
    );

    tokio::time::sleep(delay).await;
    for due in scheduler.due(Utc::now()) {
        core.dispatcher
            .send_from(SCHEDULER_SENDER, &due.target_agent_id, &due.payload)
            .await?;
        println!("fired {} -> {}", due.id.short(), due.target_agent_id);
    }
    Ok(())
}

async fn run_loop(config_path: &std::path::Path) -> Result<()> {
    let core = build_core(config_path).await?;
    let roster_size = core.config.roster.len();

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let monitor = HealthMonitor::new(
        HealthConfig::from_config(&core.config),
        Arc::clone(&core.registry),
        Arc::clone(&core.mux),
        event_tx,
    );

    let scheduler = Arc::new(RwLock::new(Scheduler::new()));
    let coordinator = CoordinationLoop::new(
        Arc::clone(&scheduler),
        Arc::clone(&core.dispatcher),
        monitor,
        core.config.tick_interval(),
    );

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });

    // Surface health transitions on stdout while the loop runs.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[health] {:?}", event);
        }
    });

    println!(
        "coordinating {} agent(s), tick every {}s (ctrl-c to stop)",
        roster_size, core.config.tick_interval_secs
    );
    coordinator.run().await;
    Ok(())
}
