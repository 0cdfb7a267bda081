use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rand::RngCore;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kale_farmer::chain::{Identity, OperationKind, RemoteGateway};
use kale_farmer::miner::{MiningEngine, MiningJob, DEFAULT_CHUNK};
use kale_farmer::orchestrator::{OperationState, ProofOutcome};
use kale_farmer::{Config, Farm};

// Constants for validation
const MAX_BENCH_DURATION_MS: u64 = 600_000;

#[derive(Parser)]
#[command(name = "kale_farmer")]
#[command(about = "KALE farming client: enter, work and claim from the terminal", version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml", env = "KALE_FARMER_CONFIG")]
    config: String,

    /// API key for the signer bridge
    #[arg(long, global = true, env = "KALE_BRIDGE_API_KEY", hide_env_values = true)]
    bridge_api_key: Option<String>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Benchmark local mining against a random seed
    Bench {
        /// Mining duration in milliseconds
        #[arg(long, default_value = "10000")]
        duration_ms: u64,

        /// Epoch index to hash with
        #[arg(long, default_value = "0")]
        epoch: u32,
    },

    /// Connect a wallet through the signer bridge
    Connect,

    /// Forget the connected identity
    Logout,

    /// Show epoch, account and participation state
    Status,

    /// Enter the current epoch
    Enter {
        /// Stake in stroops (defaults to farm.stake_amount)
        #[arg(long)]
        amount: Option<i64>,
    },

    /// Mine and submit a proof for the current epoch
    Work,

    /// Claim the reward of a past epoch
    Claim {
        /// Epoch to claim (defaults to the newest claimable one)
        #[arg(long)]
        epoch: Option<u32>,
    },

    /// Fund the account from the faucet
    Fund,

    /// Add the asset trustline to the account
    Trustline,

    /// Keep polling and log every change
    Watch,
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "kale_farmer=debug" } else { "kale_farmer=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Init { output } => {
            let config = Config::default();
            config.save(&output)?;
            info!("Configuration file created at: {}", output);
        }
        Commands::Bench { duration_ms, epoch } => {
            run_bench(duration_ms, epoch).await?;
        }
        command => {
            let mut config = Config::load_or_default(&cli.config)?;
            if let Some(api_key) = cli.bridge_api_key {
                config.signer.api_key = Some(api_key);
            }
            let farm = Farm::build(config)?;
            run_command(&farm, command).await?;
        }
    }

    Ok(())
}

async fn run_bench(duration_ms: u64, epoch: u32) -> Result<()> {
    if duration_ms == 0 || duration_ms > MAX_BENCH_DURATION_MS {
        bail!("Duration must be between 1 and {} ms", MAX_BENCH_DURATION_MS);
    }

    let mut rng = rand::thread_rng();
    let mut seed = [0u8; 32];
    let mut identity = [0u8; 32];
    rng.fill_bytes(&mut seed);
    rng.fill_bytes(&mut identity);

    info!("Starting mining benchmark");
    info!("Identity: {}", Identity::from_raw(identity));
    info!("Seed: {}", hex::encode(seed));
    info!("Duration: {} ms", duration_ms);

    let engine = MiningEngine::new(DEFAULT_CHUNK);
    let job = MiningJob {
        epoch_index: epoch,
        seed,
        identity,
        duration: Duration::from_millis(duration_ms),
    };

    let mut last_best = 0;
    let result = engine
        .mine(&job, |progress| {
            if progress.best_zero_count > last_best {
                last_best = progress.best_zero_count;
                info!("{}%: best {} leading zeros", progress.percent, last_best);
            }
        })
        .await?;

    info!("=== BENCHMARK DONE ===");
    info!("Best nonce: {}", result.best_nonce);
    info!("Best hash: {}", result.to_hex());
    info!("Leading zeros: {}", result.best_zero_count);
    info!("Hashes: {} in {} ms", result.hash_attempts, result.time_taken_ms);
    info!("Hashrate: {:.2} H/s", result.hashrate());
    Ok(())
}

async fn refresh(farm: &Farm) {
    if let Err(e) = farm.sync.refresh_now().await {
        warn!("Could not refresh farm state: {}", e);
    }
}

fn report_state(farm: &Farm, kind: OperationKind) {
    match farm.orchestrator.manager(kind).state() {
        OperationState::Success { result_hash } => {
            info!("{} succeeded{}", kind, result_hash.map(|h| format!(": {}", h)).unwrap_or_default());
        }
        other => info!("{}: {}", kind, other),
    }
}

async fn run_command(farm: &Farm, command: Commands) -> Result<()> {
    match command {
        Commands::Connect => {
            let identity = farm.session.connect().await?;
            info!("Connected as {}", identity);
            info!("{} known identities", farm.session.known().len());
        }
        Commands::Logout => {
            farm.session.logout()?;
            info!("Session cleared");
        }
        Commands::Status => {
            let identity = farm.identity()?;
            refresh(farm).await;
            print_status(farm, &identity);
        }
        Commands::Enter { amount } => {
            let identity = farm.identity()?;
            refresh(farm).await;
            if farm.gateway.check_entered(&identity).await? {
                info!("Already entered the current epoch");
                return Ok(());
            }
            match amount {
                Some(amount) => farm.orchestrator.enter_with(&identity, i128::from(amount)).await?,
                None => farm.orchestrator.enter(&identity).await?,
            };
            report_state(farm, OperationKind::Enter);
        }
        Commands::Work => {
            let identity = farm.identity()?;
            refresh(farm).await;
            let mut progress = farm.orchestrator.manager(OperationKind::SubmitProof).subscribe();
            let reporter = tokio::spawn(async move {
                let mut last_percent = 0;
                while progress.changed().await.is_ok() {
                    let state = progress.borrow_and_update().clone();
                    if let OperationState::Mining { percent, best_zero_count } = state {
                        if percent >= last_percent + 10 {
                            last_percent = percent;
                            info!("Mining {}% (best {} leading zeros)", percent, best_zero_count);
                        }
                    }
                }
            });

            let outcome = farm.orchestrator.submit_proof(&identity).await;
            reporter.abort();
            match outcome? {
                ProofOutcome::Submitted { nonce, zero_count, result_hash } => {
                    info!("Proof submitted: nonce {} with {} leading zeros", nonce, zero_count);
                    if let Some(hash) = result_hash {
                        info!("Transaction: {}", hash);
                    }
                }
                ProofOutcome::NotImproved { best, previous } => {
                    info!("Best {} does not beat the recorded {}; nothing submitted", best, previous);
                }
            }
        }
        Commands::Claim { epoch } => {
            let identity = farm.identity()?;
            refresh(farm).await;
            let epoch_index = match epoch {
                Some(epoch_index) => epoch_index,
                None => match farm.sync.claimable_epochs().first() {
                    Some(epoch_index) => *epoch_index,
                    None => bail!("Nothing to claim in the last {} epochs", farm.config.sync.window_size),
                },
            };
            info!("Claiming epoch {}", epoch_index);
            farm.orchestrator.claim(&identity, epoch_index).await?;
            report_state(farm, OperationKind::Claim);
        }
        Commands::Fund => {
            let identity = farm.identity()?;
            farm.orchestrator.fund(&identity).await?;
            report_state(farm, OperationKind::Fund);
        }
        Commands::Trustline => {
            let identity = farm.identity()?;
            farm.orchestrator.grant_trustline(&identity).await?;
            report_state(farm, OperationKind::GrantTrustline);
        }
        Commands::Watch => {
            farm.identity()?;
            run_watch(farm).await?;
        }
        // Handled in main before the farm is built
        Commands::Init { .. } | Commands::Bench { .. } => return Ok(()),
    }

    let reconciled = farm.orchestrator.reconcile();
    if reconciled > 0 {
        info!("{} operation(s) confirmed by ledger state", reconciled);
    }
    Ok(())
}

fn print_status(farm: &Farm, identity: &Identity) {
    info!("Identity: {}", identity);

    match farm.sync.account() {
        Some(account) if account.exists => info!(
            "Account: {:.7} XLM, trustline {}",
            account.balance as f64 / 10_000_000.0,
            if account.has_trust { "present" } else { "missing" }
        ),
        Some(_) => info!("Account: not funded (run `kale_farmer fund`)"),
        None => info!("Account: unknown"),
    }

    let epoch = match farm.sync.epoch() {
        Some(epoch) => epoch,
        None => {
            info!("No epoch yet; the first entry creates one");
            return;
        }
    };
    info!("Epoch {} (seed {})", epoch.epoch_index, hex::encode(epoch.seed));

    for field in farm.sync.window().iter() {
        info!(
            "{} {:>6}  entered={} proof={} zeros={}  others={}",
            if field.is_current { "*" } else { " " },
            field.epoch_index,
            field.own.has_entered,
            field.own.has_submitted_proof,
            field.own.best_zero_count,
            field.others.len()
        );
        for (other, record) in &field.others {
            info!("         {} proof={} zeros={}", other, record.has_submitted_proof, record.best_zero_count);
        }
    }

    let claimable = farm.sync.claimable_epochs();
    if !claimable.is_empty() {
        info!("Claimable epochs: {:?}", claimable);
    }

    for (kind, state) in farm.orchestrator.states() {
        if !state.is_idle() {
            info!("{}: {}", kind, state);
        }
    }
}

async fn run_watch(farm: &Farm) -> Result<()> {
    farm.sync.start().await?;
    let reconciler = farm.orchestrator.spawn_reconciler();

    let mut epoch_rx = farm.sync.subscribe_epoch();
    let mut window_rx = farm.sync.subscribe_window();
    let mut account_rx = farm.sync.subscribe_account();

    info!("Watching farm state, Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = epoch_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(epoch) = epoch_rx.borrow_and_update().clone() {
                    info!("Epoch {} started", epoch.epoch_index);
                }
            }
            changed = window_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let window = window_rx.borrow_and_update().clone();
                if let Some(current) = window.iter().find(|f| f.is_current) {
                    info!(
                        "Epoch {}: entered={} proof={} zeros={} ({} other farmers)",
                        current.epoch_index,
                        current.own.has_entered,
                        current.own.has_submitted_proof,
                        current.own.best_zero_count,
                        current.others.len()
                    );
                }
                let claimable = farm.sync.claimable_epochs();
                if !claimable.is_empty() {
                    info!("Claimable epochs: {:?}", claimable);
                }
            }
            changed = account_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(account) = *account_rx.borrow_and_update() {
                    info!("Account: exists={} balance={} trustline={}", account.exists, account.balance, account.has_trust);
                }
            }
        }
    }

    reconciler.abort();
    farm.sync.stop().await?;
    Ok(())
}
