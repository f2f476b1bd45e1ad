use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tokio::signal;
use tracing::{info, Level};

use sendgate::config::FleetConfig;
use sendgate::throttle::{AccountId, AccountStats, GlobalStats, Throttler};

/// Fleet simulation driver: loads a limits file, runs one worker loop per
/// account against the throttler, and reports admission statistics.
#[derive(Parser, Debug)]
#[command(name = "sendgate", version, about)]
struct Args {
    /// Path to a YAML fleet limits file (built-in demo fleet if omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// How long to run the simulated fleet, in seconds
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Worker tasks per account
    #[arg(long, default_value_t = 2)]
    workers_per_account: usize,

    /// Print the final summary as JSON instead of log lines
    #[arg(long)]
    json_summary: bool,
}

#[derive(Serialize)]
struct RunSummary {
    sent: u64,
    denied: u64,
    accounts: Vec<AccountSummary>,
    global: Option<GlobalStats>,
}

#[derive(Serialize)]
struct AccountSummary {
    id: AccountId,
    stats: AccountStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Sendgate fleet simulation");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(ref path) => FleetConfig::from_file(path)?,
        None => demo_config(),
    };

    let throttler = Arc::new(Throttler::new());
    config.apply(&throttler)?;
    info!(
        accounts = throttler.account_count(),
        global = config.global.is_some(),
        "Limits configured"
    );

    let running = Arc::new(AtomicBool::new(true));
    let mut workers = Vec::new();
    for account in &config.accounts {
        for _ in 0..args.workers_per_account {
            workers.push(tokio::spawn(run_worker(
                throttler.clone(),
                account.id,
                running.clone(),
            )));
        }
    }
    info!(workers = workers.len(), "Fleet running");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            info!("Run duration elapsed");
        }
        _ = shutdown_signal() => {}
    }
    running.store(false, Ordering::Relaxed);

    let mut sent = 0;
    let mut denied = 0;
    for worker in workers {
        let (worker_sent, worker_denied) = worker.await?;
        sent += worker_sent;
        denied += worker_denied;
    }

    let summary = RunSummary {
        sent,
        denied,
        accounts: config
            .accounts
            .iter()
            .filter_map(|account| {
                throttler.account_stats(account.id).map(|stats| AccountSummary {
                    id: account.id,
                    stats,
                })
            })
            .collect(),
        global: throttler.global_stats(),
    };

    if args.json_summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(sent, denied, "Fleet simulation finished");
        for account in &summary.accounts {
            info!(
                account_id = account.id,
                rate_per_sec = %format!("{:.3}", account.stats.current_rate),
                wait_secs = account.stats.wait_time.as_secs_f64(),
                concurrency_available = account.stats.concurrency_available,
                "Account stats"
            );
        }
        if let Some(ref global) = summary.global {
            info!(
                rate_per_sec = %format!("{:.3}", global.current_rate),
                wait_secs = global.wait_time.as_secs_f64(),
                concurrency_available = global.concurrency_available,
                "Global stats"
            );
        }
    }

    Ok(())
}

/// One sending worker: the two-gate handshake, a simulated transport call,
/// then the mandatory release; backoff on any denial.
async fn run_worker(
    throttler: Arc<Throttler>,
    account_id: AccountId,
    running: Arc<AtomicBool>,
) -> (u64, u64) {
    let mut sent = 0;
    let mut denied = 0;

    while running.load(Ordering::Relaxed) {
        if throttler.try_acquire_send_token(account_id)
            && throttler.try_acquire_concurrency_slot(account_id)
        {
            // Simulated transport call
            let send_ms = rand::thread_rng().gen_range(20..80u64);
            tokio::time::sleep(Duration::from_millis(send_ms)).await;
            throttler.release_concurrency_slot(account_id);
            sent += 1;
        } else {
            denied += 1;
            let backoff_ms = rand::thread_rng().gen_range(100..250u64);
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }

    (sent, denied)
}

/// A small three-account fleet for runs without a limits file.
fn demo_config() -> FleetConfig {
    FleetConfig::from_yaml(
        r#"
global:
  rate_capacity: 60
  window_secs: 60
  max_concurrency: 4
accounts:
  - id: 1
    per_minute: 30
    per_hour: 300
    per_day: 2000
    max_concurrency: 2
  - id: 2
    per_minute: 20
    per_hour: 200
    per_day: 1500
    max_concurrency: 2
  - id: 3
    per_minute: 10
    per_hour: 100
    per_day: 800
"#,
    )
    .expect("demo fleet limits are valid")
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
