//! Curio sync (curio-sync) - Main entry point
//!
//! Mounts an analysis surface against a running Curio backend and keeps its
//! criteria in sync, or drives single job operations from the command line.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use curio_common::config::{find_config_file, CliOverrides, ResolvedConfig, TomlConfig};
use curio_common::query::{self, QueryBuilder};
use curio_common::topics::{self, VisualizationNotice};
use curio_common::{EventBus, JobKind, SurfaceKind};
use curio_sync::broker::MqttTransport;
use curio_sync::{handler, ApiClient, Surface, TopicBroker, Transition};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for curio-sync
#[derive(Parser, Debug)]
#[command(name = "curio-sync")]
#[command(about = "Analysis job sync client for Curio")]
#[command(version)]
struct Args {
    /// Path to config.toml
    #[arg(short, long, env = "CURIO_CONFIG")]
    config: Option<PathBuf>,

    /// REST API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// WebSocket base URL
    #[arg(long)]
    ws_url: Option<String>,

    /// MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// User id for channel endpoints and topics
    #[arg(short, long)]
    user_id: Option<String>,

    /// Bearer token for the REST API
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount a surface and follow server pushes until interrupted
    Watch {
        /// evaluation or curation
        #[arg(short, long, default_value = "evaluation")]
        surface: SurfaceKind,
        #[arg(short, long)]
        project: String,
    },
    /// Start every criterion that is NONE or PAUSED
    RunAll {
        #[arg(short, long)]
        project: String,
        /// pass-eval, score-eval, tagging or curation
        #[arg(short, long)]
        kind: JobKind,
    },
    /// Start or resume one criterion
    Start(JobTarget),
    /// Pause one running criterion
    Pause(JobTarget),
    /// Delete a completed criterion's results
    Clear(JobTarget),
    /// Drop a failed criterion's results and reset it
    Retry(JobTarget),
    /// Condition query tools
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },
}

#[derive(clap::Args, Debug)]
struct JobTarget {
    #[arg(short, long)]
    project: String,
    #[arg(short, long)]
    kind: JobKind,
    /// Project criterion id
    criteria_id: String,
}

#[derive(Subcommand, Debug)]
enum QueryAction {
    /// Parse and print the canonical form
    Fmt { text: String },
    /// Report parse diagnostics; exits non-zero when there are any
    Check { text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Query tools need neither config nor a backend
    if let Command::Query { action } = &args.command {
        init_tracing("warn");
        return run_query(action);
    }

    let config_path = args.config.clone().or_else(find_config_file);
    let file_config =
        TomlConfig::load_or_default(config_path.as_deref()).context("Failed to load configuration")?;
    let overrides = CliOverrides {
        api_base_url: args.api_url.clone(),
        ws_base_url: args.ws_url.clone(),
        mqtt_host: args.mqtt_host.clone(),
        user_id: args.user_id.clone(),
        access_token: args.token.clone(),
    };
    let config = ResolvedConfig::resolve(&file_config, &overrides).context("Invalid configuration")?;

    init_tracing(&config.log_level);
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    info!("API: {}, WebSocket: {}", config.api_base_url, config.ws_base_url);

    let api = ApiClient::new(&config.api_base_url, config.access_token.clone(), config.http_timeout)
        .context("Failed to build HTTP client")?;
    let events = EventBus::default();

    match args.command {
        Command::Watch { surface, project } => watch(&config, &api, events, surface, &project).await,
        Command::RunAll { project, kind } => {
            let surface = mount(&config, &api, events, kind, &project).await?;
            let controller = surface.require_controller(kind)?;
            let started = controller.run_all().await;
            surface.unmount().await;
            let started = started.context("Run all failed")?;
            println!("started {} criteria", started.len());
            Ok(())
        }
        Command::Start(target) => run_job(&config, &api, events, target, JobOp::Start).await,
        Command::Pause(target) => run_job(&config, &api, events, target, JobOp::Pause).await,
        Command::Clear(target) => run_job(&config, &api, events, target, JobOp::Clear).await,
        Command::Retry(target) => run_job(&config, &api, events, target, JobOp::Retry).await,
        Command::Query { .. } => Ok(()),
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("curio_sync={level},curio_common={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run_query(action: &QueryAction) -> Result<()> {
    match action {
        QueryAction::Fmt { text } => {
            let parsed = query::parse(text);
            let builder = QueryBuilder::from_groups(parsed.groups).context("Query does not normalize")?;
            println!("{}", builder.build());
            Ok(())
        }
        QueryAction::Check { text } => {
            let parsed = query::parse(text);
            for diagnostic in &parsed.diagnostics {
                println!("{}", diagnostic);
            }
            if !parsed.is_clean() {
                bail!("{} problem(s) in query", parsed.diagnostics.len());
            }
            println!("ok: {} group(s)", parsed.groups.len());
            Ok(())
        }
    }
}

async fn mount(
    config: &ResolvedConfig,
    api: &ApiClient,
    events: EventBus,
    kind: JobKind,
    project_id: &str,
) -> Result<Surface> {
    Surface::connect(api, &config.ws_base_url, &config.user_id, kind.surface(), project_id, events)
        .await
        .with_context(|| format!("Failed to mount the {} surface", kind.surface()))
}

#[derive(Debug, Clone, Copy)]
enum JobOp {
    Start,
    Pause,
    Clear,
    Retry,
}

async fn run_job(config: &ResolvedConfig, api: &ApiClient, events: EventBus, target: JobTarget, op: JobOp) -> Result<()> {
    let surface = mount(config, api, events, target.kind, &target.project).await?;
    let controller = surface.require_controller(target.kind)?;
    let id = target.criteria_id.as_str();
    let outcome = match op {
        JobOp::Start => controller.start(id).await,
        JobOp::Pause => controller.pause(id).await,
        JobOp::Clear => controller.clear_results(id).await,
        JobOp::Retry => controller.retry(id).await,
    };
    surface.unmount().await;

    match outcome.with_context(|| format!("Operation on {} failed", target.criteria_id))? {
        Transition::Applied { from, to, command, .. } => {
            match command {
                Some(command) => println!("{}: {} -> {} (sent {})", target.criteria_id, from, to, command),
                None => println!("{}: {} -> {}", target.criteria_id, from, to),
            }
            Ok(())
        }
        Transition::Ignored { state, operation, .. } => {
            bail!("{} is {}; {} does not apply", target.criteria_id, state, operation)
        }
    }
}

async fn watch(
    config: &ResolvedConfig,
    api: &ApiClient,
    events: EventBus,
    surface_kind: SurfaceKind,
    project_id: &str,
) -> Result<()> {
    let mut bus = events.subscribe();
    let surface = Surface::connect(api, &config.ws_base_url, &config.user_id, surface_kind, project_id, events)
        .await
        .with_context(|| format!("Failed to mount the {} surface", surface_kind))?;

    let broker = TopicBroker::spawn(MqttTransport::new(config.mqtt.clone()));
    let client_id = broker.connect(&config.user_id).await.context("MQTT connect failed")?;
    info!(client_id = %client_id, "Topic broker ready");

    let topic = topics::visualization_complete(&config.user_id);
    let on_visualization = handler(|payload| {
        let notice = VisualizationNotice::decode(payload)?;
        match (notice.project_id.as_deref(), notice.segment()) {
            (Some(project), Some((index, url))) => {
                info!(project_id = %project, segment = index, url = %url, "Visualization segment ready")
            }
            (Some(project), None) => info!(project_id = %project, "Visualization complete"),
            (None, _) => debug!("Visualization notice without project id"),
        }
        Ok(())
    });
    if let Err(e) = broker.subscribe(&topic, on_visualization.clone()).await {
        warn!(topic = %topic, "Visualization subscription failed: {}", e);
    }

    info!(surface = %surface_kind, project_id = %project_id, "Watching, Ctrl+C to stop");
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = bus.recv() => match event {
                Ok(event) => info!(event = event.event_type(), "{}", serde_json::to_string(&event).unwrap_or_default()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => warn!("Event log lagged by {} events", n),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Err(e) = broker.unsubscribe(&topic, &on_visualization).await {
        warn!("Visualization unsubscribe failed: {}", e);
    }
    if let Err(e) = broker.disconnect().await {
        warn!("Broker disconnect failed: {}", e);
    }
    surface.unmount().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
