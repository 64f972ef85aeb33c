//! Process bootstrap (C12, §10.1): load and validate config, init tracing,
//! wire every component into a running process, handle signals, and exit
//! with the status code §6 specifies. This is the only crate in the
//! workspace that knows how to become a process — everything it wires is a
//! library.

mod cli;
mod stdio_channel;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sa_runtime_core::{AgentLoop, DeterministicToolRuntime, InboundMessage, MessageBus, OutboundRateLimiter, ScriptedProvider, StaticIdentity};
use sa_runtime_domain::capability::LlmCapabilities;
use sa_runtime_domain::config::RuntimeConfig;
use sa_runtime_policy::mode::PolicyEngine;
use sa_runtime_store::{EventStore, JsonlStorageBackend, RecoveryManager, StorageBackend};
use sa_runtime_tools::{register_builtin_tools, ToolRegistry};

use cli::{Cli, Command};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a careful autonomous assistant with access to a sandboxed workspace and a small set of tools.";

fn main() -> std::process::ExitCode {
    let args = Cli::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::ConfigValidate => {
            let config = match cli::load_config(&args.config) {
                Ok(c) => c,
                Err(err) => {
                    eprintln!("failed to load config: {err:#}");
                    return std::process::ExitCode::from(1);
                }
            };
            match config.validate() {
                Ok(()) => {
                    println!("config valid");
                    std::process::ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("config invalid: {err}");
                    std::process::ExitCode::from(1)
                }
            }
        }
        Command::ConfigShow => match cli::load_config(&args.config) {
            Ok(config) => {
                match toml::to_string_pretty(&config) {
                    Ok(text) => println!("{text}"),
                    Err(err) => eprintln!("failed to render config: {err}"),
                }
                std::process::ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to load config: {err:#}");
                std::process::ExitCode::from(1)
            }
        },
        Command::Serve => {
            init_tracing();
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(err) => {
                    eprintln!("failed to start tokio runtime: {err}");
                    return std::process::ExitCode::from(1);
                }
            };
            runtime.block_on(serve(&args.config))
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sa_runtime_gateway=debug")),
        )
        .json()
        .init();
}

/// Exit codes per §6: 0 normal shutdown, 1 fatal initialization error, 130
/// interrupted (a second Ctrl+C while the first graceful shutdown is still
/// in flight).
async fn serve(config_path: &std::path::Path) -> std::process::ExitCode {
    let config = match cli::load_config(config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load config");
            return std::process::ExitCode::from(1);
        }
    };
    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "config failed validation");
        return std::process::ExitCode::from(1);
    }

    match run(config).await {
        Ok(Shutdown::Graceful) => std::process::ExitCode::SUCCESS,
        Ok(Shutdown::Interrupted) => std::process::ExitCode::from(130),
        Err(err) => {
            tracing::error!(error = %err, "fatal error during initialization");
            std::process::ExitCode::from(1)
        }
    }
}

enum Shutdown {
    Graceful,
    Interrupted,
}

async fn run(config: RuntimeConfig) -> anyhow::Result<Shutdown> {
    let workspace_path = config.workspace.path.clone();
    std::fs::create_dir_all(&workspace_path)
        .map_err(|e| anyhow::anyhow!("creating workspace dir {}: {e}", workspace_path.display()))?;
    std::fs::create_dir_all(&config.storage.event_log_dir)?;
    std::fs::create_dir_all(&config.storage.checkpoint_dir)?;
    std::fs::create_dir_all(&config.storage.transcript_dir)?;

    tracing::info!(workspace = %workspace_path.display(), "workspace ready");

    let event_store = EventStore::new(
        config.storage.event_log_dir.join("events.jsonl"),
        config.storage.redact_sensitive_fields,
    )
    .map_err(|e| anyhow::anyhow!("opening event store: {e}"))?;
    tracing::info!("event store ready");

    let policy_for_runtime = PolicyEngine::new(config.policy.clone());
    let policy = Arc::new(PolicyEngine::new(config.policy.clone()));
    tracing::info!("policy engine ready");

    let mut registry = ToolRegistry::default();
    register_builtin_tools(&mut registry, &workspace_path);
    tracing::info!("tool registry ready with built-in tools");

    let tool_runtime = Arc::new(DeterministicToolRuntime::new(registry, event_store, policy_for_runtime));

    let limiter = Arc::new(OutboundRateLimiter::new(
        config.outbound_rate_limit.per_minute,
        config.outbound_rate_limit.per_hour,
        config.outbound_rate_limit.mode,
        config.outbound_rate_limit.max_tracked_keys,
    ));
    let bus = Arc::new(MessageBus::new(config.bus.capacity, limiter));
    tracing::info!(capacity = config.bus.capacity, "message bus ready");

    let storage: Arc<dyn StorageBackend> = Arc::new(JsonlStorageBackend::new(config.storage.transcript_dir.clone()));
    storage
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!("initializing storage backend: {e}"))?;
    tracing::info!("storage backend ready");

    let recovery = Arc::new(
        RecoveryManager::new(config.storage.checkpoint_dir.clone())
            .map_err(|e| anyhow::anyhow!("opening recovery manager: {e}"))?,
    );
    tracing::info!("recovery manager ready");

    let provider_id = config.provider.provider_id.clone();
    let provider = build_provider(&provider_id);

    let identity = Arc::new(StaticIdentity(DEFAULT_SYSTEM_PROMPT.to_string()));

    let agent = Arc::new(AgentLoop::new(
        bus.clone(),
        provider,
        config.provider.model.clone(),
        tool_runtime,
        storage,
        recovery.clone(),
        policy,
        identity,
        config.agent.clone(),
        workspace_path.to_string_lossy().to_string(),
    ));
    tracing::info!("agent loop ready");

    resume_active_runs(&bus, &recovery, config.bus.resume_limit).await;

    let cancel = CancellationToken::new();

    let agent_handle = tokio::spawn(agent.run(cancel.clone()));
    let stdin_handle = tokio::spawn(stdio_channel::read_loop(bus.clone(), cancel.clone()));
    let stdout_handle = tokio::spawn(stdio_channel::write_loop(bus.clone(), cancel.clone()));

    tracing::info!("gateway running, send a line on stdin or press ctrl-c to stop");

    let shutdown = wait_for_shutdown_signal(&cancel).await;

    let _ = tokio::join!(agent_handle, stdin_handle, stdout_handle);
    tracing::info!("gateway stopped");
    Ok(shutdown)
}

/// Resolve a concrete `LlmProvider`. Production HTTP adapters are an
/// out-of-scope external collaborator (§1); absent one, fall back to the
/// scripted test double with a loud warning so the gateway still boots and
/// exercises the rest of the pipeline end to end.
fn build_provider(provider_id: &str) -> Arc<dyn sa_runtime_core::LlmProvider> {
    tracing::warn!(
        configured_provider = provider_id,
        "no production LLM provider adapter is wired into this workspace; falling back to a scripted provider, \
         so model responses will be canned until a real adapter is supplied"
    );
    Arc::new(ScriptedProvider::new(
        LlmCapabilities::default(),
        vec![sa_runtime_core::ChatResponse {
            content: "No LLM provider is configured; this is a placeholder reply.".to_string(),
            tool_calls: Vec::new(),
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        }],
    ))
}

/// Re-enqueue interrupted runs from the last process lifetime as resume
/// messages (§4.8) so `AgentLoop::process_message` picks up `resume_from`
/// and the replay tools can later verify equivalence.
async fn resume_active_runs(bus: &Arc<MessageBus>, recovery: &Arc<RecoveryManager>, limit: usize) {
    let active = match recovery.list_active(limit) {
        Ok(active) => active,
        Err(err) => {
            tracing::warn!(error = %err, "failed to list active checkpoints, skipping resume");
            return;
        }
    };
    if active.is_empty() {
        return;
    }
    tracing::info!(count = active.len(), "resuming interrupted runs from checkpoints");
    for checkpoint in active {
        let resume = match recovery.build_resume_message(&checkpoint.run_id) {
            Ok(Some(resume)) => resume,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(run_id = %checkpoint.run_id, error = %err, "failed to build resume message");
                continue;
            }
        };
        let mut msg = InboundMessage::new(resume.channel, resume.chat_id, resume.content);
        msg.metadata.insert("recovery_resume".into(), serde_json::json!(resume.recovery_resume));
        msg.metadata.insert("recovery_run_id".into(), serde_json::json!(resume.recovery_run_id));
        msg.metadata.insert("recovery_stage".into(), serde_json::json!(resume.recovery_stage));
        msg.metadata.insert("recovery_iteration".into(), serde_json::json!(resume.recovery_iteration));
        if let Err(err) = bus.publish_inbound(msg).await {
            tracing::warn!(error = %err, "failed to enqueue resume message");
        }
    }
}

/// Wait for the first Ctrl-C to begin a graceful shutdown; a second one
/// before it completes escalates to an immediate interrupted exit (§6).
async fn wait_for_shutdown_signal(cancel: &CancellationToken) -> Shutdown {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler, shutting down immediately");
        cancel.cancel();
        return Shutdown::Graceful;
    }
    tracing::info!("shutdown signal received, stopping gracefully (press ctrl-c again to force)");
    cancel.cancel();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("second shutdown signal received, exiting immediately");
            Shutdown::Interrupted
        }
        _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => Shutdown::Graceful,
    }
}
