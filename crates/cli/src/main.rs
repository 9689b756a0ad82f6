use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arlo_api::ArloClient;
use arlo_engine::config::{load_config, load_config_from_path};
use arlo_engine::navigator::ordered_ballots;
use arlo_engine::{
    ActionDispatcher, AuditActions, BallotNavigator, Resource, SyncConfig, SyncEngine, SyncEvent, compute_stages, settle,
};
use arlo_types::{AuditBoardScope, SetupStage, WorkflowState};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "arlo-sync", version, about = "Follow an Arlo risk-limiting audit from the command line")]
struct Cli {
    /// Election to follow. Falls back to `electionId` in the config file.
    #[arg(long, short = 'e', global = true)]
    election: Option<String>,
    /// Config file. Defaults to ARLO_SYNC_CONFIG_PATH or <config dir>/arlo/sync.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch every resource once and print the workflow summary.
    Status,
    /// Poll until the audit (or the given round) completes, or Ctrl-C.
    Watch {
        #[arg(long)]
        round: Option<u32>,
    },
    /// List an audit board's ballots in retrieval order.
    Ballots {
        #[arg(long)]
        jurisdiction: String,
        #[arg(long)]
        round: String,
        #[arg(long)]
        board: String,
    },
    /// Reset the audit to its initial phase.
    Reset {
        /// Required; resetting discards rounds and progress.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    }
    .context("failed to load sync configuration")?;
    let election_id = cli
        .election
        .clone()
        .or_else(|| config.election_id.clone())
        .context("no election id; pass --election or set electionId in the config file")?;

    let client = build_client(&config)?;
    let engine = SyncEngine::new(election_id, ActionDispatcher::new(Arc::new(client)));

    match cli.command {
        Command::Status => run_status(&engine).await,
        Command::Watch { round } => run_watch(&engine, &config, round).await,
        Command::Ballots {
            jurisdiction,
            round,
            board,
        } => run_ballots(&engine, jurisdiction, round, board).await,
        Command::Reset { yes } => run_reset(&engine, yes).await,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Directives from `RUST_LOG`, defaulting to `info`.
fn log_filter(directives: Option<String>) -> EnvFilter {
    EnvFilter::new(directives.unwrap_or_else(|| "info".into()))
}

fn build_client(config: &SyncConfig) -> Result<ArloClient> {
    let timeout = config.request_timeout();
    let client = match &config.api_base {
        Some(base) => ArloClient::new(base, env::var("ARLO_SESSION").ok().as_deref(), timeout),
        None => ArloClient::from_env_with_timeout(timeout),
    };
    client.context("failed to build Arlo API client")
}

const WORKFLOW_RESOURCES: [Resource; 4] = [Resource::AuditStatus, Resource::Rounds, Resource::Jurisdictions, Resource::Contests];

async fn refresh_workflow(engine: &SyncEngine) -> Result<()> {
    for resource in &WORKFLOW_RESOURCES {
        engine
            .refresh(resource)
            .await
            .with_context(|| format!("failed to fetch {resource}"))?;
    }
    Ok(())
}

async fn run_status(engine: &SyncEngine) -> Result<()> {
    refresh_workflow(engine).await?;
    print_summary(&engine.snapshot());
    Ok(())
}

async fn run_watch(engine: &SyncEngine, config: &SyncConfig, round: Option<u32>) -> Result<()> {
    let mut snapshots = engine.subscribe();
    let mut events = engine.events();

    let (settle_resource, settle_predicate) = match round {
        Some(round_num) => (Resource::Rounds, settle::round_complete(round_num)),
        None => (Resource::AuditStatus, settle::audit_complete()),
    };
    let settle_key = settle_resource.key();
    let handles: Vec<_> = WORKFLOW_RESOURCES
        .iter()
        .map(|resource| {
            let predicate = if *resource == settle_resource {
                settle_predicate.clone()
            } else {
                settle::never()
            };
            engine.start(resource.clone(), config.interval_for(resource), predicate)
        })
        .collect();

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            interrupted = &mut ctrl_c => {
                interrupted.context("failed to listen for Ctrl-C")?;
                info!("interrupted");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_summary(&snapshot);
            }
            event = events.recv() => match event {
                Ok(SyncEvent::Settled { resource }) if resource == settle_key => {
                    info!(%resource, "settled");
                    break;
                }
                Ok(SyncEvent::Failed { resource, kind, message }) => {
                    warn!(%resource, %kind, retryable = kind.is_retryable(), "{message}");
                }
                Ok(SyncEvent::Stale { resource, message }) => warn!(%resource, "stale: {message}"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "sync events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    for handle in &handles {
        engine.stop(handle);
    }
    for handle in handles {
        handle.join().await;
    }
    Ok(())
}

async fn run_ballots(engine: &SyncEngine, jurisdiction: String, round: String, board: String) -> Result<()> {
    let scope = AuditBoardScope {
        election_id: engine.election_id().to_string(),
        jurisdiction_id: jurisdiction,
        round_id: round,
        audit_board_id: board,
    };
    let navigator = BallotNavigator::new(engine.clone(), scope);
    engine
        .refresh(&navigator.resource())
        .await
        .with_context(|| format!("failed to fetch ballots for {}", navigator.scope()))?;

    let snapshot = engine.snapshot();
    let Some(assignment) = snapshot.assignment.as_ref() else {
        bail!("no ballots assigned to {}", navigator.scope());
    };
    for ballot in ordered_ballots(assignment) {
        println!("{:<24} {:<12} {:?}", ballot.pointer().to_string(), ballot.id, ballot.status);
    }
    let progress = navigator.progress();
    println!("{}/{} audited", progress.audited, progress.total);
    if let Some(next) = navigator.first_unaudited() {
        println!("next: {next}");
    }
    Ok(())
}

async fn run_reset(engine: &SyncEngine, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("resetting discards every round; rerun with --yes to confirm");
    }
    AuditActions::new(engine.clone())
        .reset_audit()
        .await
        .context("failed to reset the audit")?;
    print_summary(&engine.snapshot());
    Ok(())
}

fn print_summary(state: &WorkflowState) {
    println!("election {} phase {}", state.election_id, state.phase);
    for descriptor in compute_stages(state, &SetupStage::SEQUENCE) {
        let marker = if descriptor.frozen { " (read-only)" } else { "" };
        println!("  {}. {:<24} {:?}{marker}", descriptor.position + 1, descriptor.title, descriptor.accessibility);
    }
    for round in &state.rounds {
        let totals = round.totals();
        println!(
            "  round {}: {}/{} audited ({:?})",
            round.round_num,
            totals.num_ballots_audited,
            totals.num_ballots_sampled,
            round.status()
        );
    }
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn rust_log_sets_verbosity() {
        assert_eq!(log_filter(Some("debug".into())).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(Some("arlo_engine=trace".into())).max_level_hint(), Some(LevelFilter::TRACE));
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
    }
}
