//! Swapping agent, a replicated round-based swap agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the cross-period snapshot from disk (or starts fresh), and
//! runs one period per cycle across the configured replica set with
//! graceful shutdown.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use swapping_agent::config::{self, AppConfig};
use swapping_agent::consensus::network::{ConsensusClient, LocalNetwork};
use swapping_agent::consensus::store::SynchronizedData;
use swapping_agent::contracts::offline::OfflineContracts;
use swapping_agent::engine::{BehaviourScheduler, PeriodReport};
use swapping_agent::storage::{self, PersistedState};
use swapping_agent::strategy::StrategyEngine;

const BANNER: &str = r#"
  ____                              _
 / ___|_      ____ _ _ __  _ __  (_)_ __   __ _
 \___ \ \ /\ / / _` | '_ \| '_ \ | | '_ \ / _` |
  ___) \ V  V / (_| | |_) | |_) || | | | | (_| |
 |____/ \_/\_/ \__,_| .__/| .__/ |_|_| |_|\__, |
                    |_|   |_|             |___/
  Replicated swapping agent
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    let run_id = uuid::Uuid::new_v4();
    info!(
        %run_id,
        agent_name = %cfg.agent.name,
        cycle_interval_secs = cfg.agent.cycle_interval_secs,
        participants = cfg.setup.all_participants.len(),
        quorum = cfg.quorum(),
        "Swapping agent starting up"
    );

    // -- Restore or create state -----------------------------------------

    let state_file = cfg.agent.state_file.as_str();
    let data = match storage::load_state(Some(state_file))? {
        Some(saved) => {
            info!(period = saved.period, saved_at = %saved.saved_at, "Resumed from saved state");
            SynchronizedData::restore(
                cfg.participants(),
                cfg.setup.safe_contract_address,
                saved.period,
                saved.values,
            )
        }
        None => {
            info!("Fresh start");
            SynchronizedData::new(cfg.participants(), cfg.setup.safe_contract_address)
        }
    };

    // -- Initialise components -------------------------------------------

    let network = Arc::new(LocalNetwork::new(data, cfg.quorum(), cfg.round_timeout()));
    let mut schedulers = build_replicas(&cfg, network.clone())?;

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.cycle_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.cycle_interval_secs,
        round_timeout_secs = network.round_timeout().as_secs(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_cycle(&mut schedulers, network.as_ref()).await {
                    Ok(report) => log_period_report(&report),
                    Err(e) => error!(error = %e, "Period failed, continuing to next"),
                }
                let snapshot = PersistedState::from_data(&network.data().await);
                if let Err(e) = storage::save_state(&snapshot, Some(state_file)) {
                    error!(error = %e, "Failed to save state");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let snapshot = PersistedState::from_data(&network.data().await);
    storage::save_state(&snapshot, Some(state_file))?;
    for scheduler in &schedulers {
        for behaviour in ["strategy_evaluation", "api_check", "decision_making", "tx_preparation"] {
            let summary = scheduler.benchmark().summary(behaviour);
            if summary.runs > 0 {
                info!(
                    sender = %scheduler.sender(),
                    behaviour,
                    runs = summary.runs,
                    votes = summary.votes,
                    local_ms = summary.total_local_ms as u64,
                    consensus_ms = summary.total_consensus_ms as u64,
                    "Benchmark summary"
                );
            }
        }
    }
    info!(period = snapshot.period, "Swapping agent shut down cleanly.");

    Ok(())
}

/// One scheduler per configured participant, all voting into `network`.
fn build_replicas(
    cfg: &AppConfig,
    network: Arc<LocalNetwork>,
) -> Result<Vec<BehaviourScheduler>> {
    let params = cfg.params().context("Invalid strategy parameters")?;
    let schedulers = cfg
        .participants()
        .into_iter()
        .map(|participant| {
            BehaviourScheduler::new(
                participant,
                StrategyEngine::new(params.clone()),
                Arc::new(OfflineContracts::from_config(cfg)),
                network.clone(),
            )
        })
        .collect::<Vec<_>>();
    info!(replicas = schedulers.len(), "Replica set ready");
    Ok(schedulers)
}

/// Run the current period on every replica, then open the next one.
async fn run_cycle(
    schedulers: &mut [BehaviourScheduler],
    network: &LocalNetwork,
) -> Result<PeriodReport> {
    let results = join_all(schedulers.iter_mut().map(|s| s.run_period())).await;

    let mut report = None;
    for result in results {
        match result {
            Ok(r) => {
                report.get_or_insert(r);
            }
            Err(e) => warn!(error = %e, "Replica stopped early"),
        }
    }
    let report = report.context("No replica completed the period")?;

    if report.completed() {
        network.start_next_period(report.period).await?;
    } else {
        warn!(period = report.period, round = %report.final_round, "Period still open");
    }
    Ok(report)
}

fn log_period_report(report: &PeriodReport) {
    info!(
        period = report.period,
        final_round = %report.final_round,
        rounds = report.rounds_run,
        strategy = report.data.most_voted_strategy().unwrap_or("-"),
        tx_hash = report.data.most_voted_tx_hash().unwrap_or("-"),
        "Period complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("swapping_agent=info"));

    let json_logging = std::env::var("SWAPPING_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
