//! duel-indexer CLI
//!
//! Usage:
//!   duel-indexer bets --status waiting
//!   duel-indexer finished
//!   duel-indexer watch
//!   duel-indexer resolve --bet 3
//!   duel-indexer finish --bet 3
//!
//! Every command reads the ledger through JSON-RPC unless `--events-file` /
//! `--rounds-file` point at offline replay data.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duel_indexer::config::IndexerConfig;
use duel_indexer::dispatch::{self, ActionDispatcher, ActionRequest, DryRunDispatcher};
use duel_indexer::ingest::{EventIngestor, LogSource, ReplayLogSource, RpcLogSource};
use duel_indexer::models::{Bet, BetBook, BetStatus};
use duel_indexer::oracle::{
    CancelFlag, ChainlinkRoundSource, ReplayRoundSource, RoundResolver, RoundSource,
    SearchStrategy,
};
use duel_indexer::rpc::JsonRpcClient;
use duel_indexer::units::{self, LEDGER_DECIMALS};

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Parser, Debug)]
#[command(name = "duel-indexer")]
#[command(about = "Rebuild DuelContract bet state and resolve settlement rounds")]
struct Cli {
    /// JSON-RPC endpoint (overrides DUEL_RPC_URL)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Ledger contract address (overrides DUEL_CONTRACT_ADDRESS)
    #[arg(long, global = true)]
    contract: Option<String>,

    /// First block to replay (overrides DUEL_DEPLOY_BLOCK)
    #[arg(long, global = true)]
    from_block: Option<u64>,

    /// Read events from a JSON file instead of the node
    #[arg(long, global = true, env = "DUEL_EVENTS_FILE")]
    events_file: Option<PathBuf>,

    /// Read oracle rounds from a JSON file instead of the node
    #[arg(long, global = true, env = "DUEL_ROUNDS_FILE")]
    rounds_file: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List bets with their derived status
    Bets {
        /// Only show bets in this status (waiting, accepted, deleted, finished)
        #[arg(long)]
        status: Option<String>,

        /// Show the actions available to this address
        #[arg(long)]
        viewer: Option<String>,
    },
    /// List settled bets with winner and loser
    Finished,
    /// Backfill, then follow the ledger and report status changes
    Watch,
    /// Find the oracle round that settles a bet or a timestamp
    Resolve {
        #[arg(long, conflicts_with = "timestamp", required_unless_present = "timestamp")]
        bet: Option<String>,

        /// Unix seconds
        #[arg(long)]
        timestamp: Option<u64>,

        /// binary or linear (overrides ORACLE_SEARCH)
        #[arg(long)]
        strategy: Option<SearchStrategy>,
    },
    /// Build the finishBet transaction for an accepted bet (dry run)
    Finish {
        #[arg(long)]
        bet: String,

        #[arg(long)]
        strategy: Option<SearchStrategy>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = IndexerConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = cli.rpc_url.clone() {
        cfg.rpc_url = Some(url);
    }
    if let Some(contract) = cli.contract.clone() {
        cfg.contract_address = Some(contract);
    }
    if let Some(block) = cli.from_block {
        cfg.deploy_block = block;
    }

    match &cli.command {
        Commands::Bets { status, viewer } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let ingestor = backfilled(&cli, &cfg).await?;
            print_bets(&ingestor.bets(), status, viewer.as_deref(), cli.json)?;
        }
        Commands::Finished => {
            let ingestor = backfilled(&cli, &cfg).await?;
            print_finished(&ingestor, cli.json)?;
        }
        Commands::Watch => watch(&cli, &cfg).await?,
        Commands::Resolve {
            bet,
            timestamp,
            strategy,
        } => {
            let target = match (bet, timestamp) {
                (_, Some(ts)) => *ts,
                (Some(id), None) => {
                    let ingestor = backfilled(&cli, &cfg).await?;
                    find_bet(&ingestor.bets(), id)?.deadline_timestamp
                }
                (None, None) => return Err(anyhow!("pass --bet or --timestamp")),
            };
            resolve(&cli, &cfg, target, strategy.unwrap_or(cfg.search_strategy)).await?;
        }
        Commands::Finish { bet, strategy } => {
            finish(&cli, &cfg, bet, strategy.unwrap_or(cfg.search_strategy)).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duel_indexer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let env_file = manifest_dir.join(".env");
    if env_file.exists() {
        let _ = dotenv::from_path(&env_file);
    }
}

// =============================================================================
// Sources
// =============================================================================

fn rpc_client(cfg: &IndexerConfig) -> Result<Arc<JsonRpcClient>> {
    let client = JsonRpcClient::new(cfg.rpc_config()?).context("Failed to build RPC client")?;
    Ok(Arc::new(client))
}

fn log_source(cli: &Cli, cfg: &IndexerConfig) -> Result<Arc<dyn LogSource>> {
    if let Some(path) = &cli.events_file {
        let source = ReplayLogSource::from_json_file(path)?;
        info!(path = %path.display(), events = source.len(), "Using replay events");
        return Ok(Arc::new(source));
    }
    let source = RpcLogSource::new(rpc_client(cfg)?, cfg.log_source_config()?);
    info!(contract = %source.contract_address(), "Using JSON-RPC log source");
    Ok(Arc::new(source))
}

fn round_source(cli: &Cli, cfg: &IndexerConfig) -> Result<Arc<dyn RoundSource>> {
    if let Some(path) = &cli.rounds_file {
        let source = ReplayRoundSource::from_json_file(path)?;
        info!(path = %path.display(), rounds = source.len(), "Using replay rounds");
        return Ok(Arc::new(source));
    }
    Ok(Arc::new(ChainlinkRoundSource::new(
        rpc_client(cfg)?,
        cfg.oracle_feed_address.clone(),
    )))
}

async fn backfilled(cli: &Cli, cfg: &IndexerConfig) -> Result<Arc<EventIngestor>> {
    let ingestor = EventIngestor::new(log_source(cli, cfg)?, cfg.deploy_block);
    ingestor.backfill().await.context("Backfill failed")?;
    Ok(ingestor)
}

fn parse_status(s: &str) -> Result<BetStatus> {
    match s.trim().to_ascii_lowercase().as_str() {
        "waiting" => Ok(BetStatus::Waiting),
        "accepted" => Ok(BetStatus::Accepted),
        "deleted" => Ok(BetStatus::Deleted),
        "finished" => Ok(BetStatus::Finished),
        other => Err(anyhow!("unknown status {:?}", other)),
    }
}

fn find_bet<'a>(bets: &'a BetBook, id: &str) -> Result<&'a Bet> {
    let id = units::parse_uint(id.trim()).ok_or_else(|| anyhow!("bet id must be an integer"))?;
    bets.get(&id).ok_or_else(|| anyhow!("bet {} not found", id))
}

// =============================================================================
// Commands
// =============================================================================

fn print_bets(
    bets: &BetBook,
    status: Option<BetStatus>,
    viewer: Option<&str>,
    json: bool,
) -> Result<()> {
    let selected: Vec<&Bet> = bets
        .values()
        .filter(|b| status.map_or(true, |s| b.status == s))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&selected)?);
        return Ok(());
    }

    println!(
        "{:>6} {:>9} {:>44} {:>14} {:>20} {:>14} {:>7}  {}",
        "ID", "Status", "Creator", "Amount", "Deadline", "Target", "Dir", "Actions"
    );
    println!("{}", "-".repeat(140));
    for bet in &selected {
        let deadline = bet
            .deadline_utc()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| bet.deadline_timestamp.to_string());
        let target = bet
            .target_price
            .as_ref()
            .map(|p| units::format_units(p, LEDGER_DECIMALS))
            .unwrap_or_else(|| "-".to_string());
        let actions: Vec<&str> = dispatch::available_actions(bet, viewer)
            .iter()
            .map(|a| a.as_str())
            .collect();
        println!(
            "{:>6} {:>9} {:>44} {:>14} {:>20} {:>14} {:>7}  {}",
            bet.id.to_string(),
            bet.status.as_str(),
            bet.creator,
            units::format_units(&bet.amount, LEDGER_DECIMALS),
            deadline,
            target,
            format!("{:?}", bet.direction),
            actions.join(",")
        );
    }
    println!("\n{} bet(s)", selected.len());
    Ok(())
}

fn print_finished(ingestor: &EventIngestor, json: bool) -> Result<()> {
    let finished = ingestor.finished();
    if json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
        return Ok(());
    }

    println!("{:>6} {:>44} {:>44} {:>14}", "ID", "Winner", "Loser", "Amount");
    println!("{}", "-".repeat(112));
    for f in &finished {
        println!(
            "{:>6} {:>44} {:>44} {:>14}",
            f.bet_id.to_string(),
            f.winner,
            f.loser,
            units::format_units(&f.amount, LEDGER_DECIMALS)
        );
    }
    println!("\n{} finished bet(s)", finished.len());
    Ok(())
}

async fn watch(cli: &Cli, cfg: &IndexerConfig) -> Result<()> {
    let ingestor = EventIngestor::new(log_source(cli, cfg)?, cfg.deploy_block);
    let summary = ingestor.backfill().await.context("Backfill failed")?;
    ingestor
        .spawn_live(summary.head_block + 1)
        .await
        .context("Failed to start live ingestion")?;

    let mut changes = ingestor.changes();
    let mut previous = ingestor.bets();
    report_counts(&previous);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("Ingestor closed");
                    break;
                }
                let current = ingestor.bets();
                for (id, bet) in current.iter() {
                    match previous.get(id) {
                        Some(old) if old.status == bet.status => {}
                        Some(old) => info!(bet_id = %id, from = %old.status, to = %bet.status, "Bet status changed"),
                        None => info!(bet_id = %id, status = %bet.status, creator = %bet.creator, "New bet"),
                    }
                }
                previous = current;
            }
        }
    }

    ingestor.shutdown().await;
    report_counts(&previous);
    Ok(())
}

fn report_counts(bets: &BetBook) {
    let count = |s: BetStatus| bets.values().filter(|b| b.status == s).count();
    info!(
        total = bets.len(),
        waiting = count(BetStatus::Waiting),
        accepted = count(BetStatus::Accepted),
        deleted = count(BetStatus::Deleted),
        finished = count(BetStatus::Finished),
        "Bet book"
    );
}

async fn resolve(
    cli: &Cli,
    cfg: &IndexerConfig,
    target: u64,
    strategy: SearchStrategy,
) -> Result<()> {
    let source = round_source(cli, cfg)?;
    let decimals = source.decimals().await?;
    let resolution = RoundResolver::new(strategy)
        .resolve_latest(source.as_ref(), target, &CancelFlag::new())
        .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }

    let round = &resolution.round;
    println!("Target:      {}", target);
    println!(
        "Round:       {} (phase {}, aggregator round {})",
        round.round_id,
        round.round_id.phase_id(),
        round.round_id.aggregator_round_id()
    );
    println!("Updated at:  {}", round.updated_at);
    println!("Answer:      {} ({} decimals)", round.answer, decimals);
    println!("Price:       {:.8}", round.price(decimals));
    println!("Probes:      {} ({})", resolution.probes, resolution.strategy);
    Ok(())
}

async fn finish(
    cli: &Cli,
    cfg: &IndexerConfig,
    bet_id: &str,
    strategy: SearchStrategy,
) -> Result<()> {
    let ingestor = backfilled(cli, cfg).await?;
    let bets = ingestor.bets();
    let bet = find_bet(&bets, bet_id)?;
    if bet.status != BetStatus::Accepted {
        return Err(anyhow!(
            "bet {} is {}, only accepted bets can be finished",
            bet.id,
            bet.status
        ));
    }

    let source = round_source(cli, cfg)?;
    let decimals = source.decimals().await?;
    let resolution = RoundResolver::new(strategy)
        .resolve_latest(source.as_ref(), bet.deadline_timestamp, &CancelFlag::new())
        .await?;
    let request = dispatch::plan_finish(bet, &resolution.round, decimals)?;
    let settle_price = match &request {
        ActionRequest::Finish { resolved_price, .. } => Some(resolved_price.clone()),
        _ => None,
    };

    let contract = cfg.contract_address.as_deref().unwrap_or(ZERO_ADDRESS);
    let receipt = DryRunDispatcher::new(contract).dispatch(request).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        println!("Bet:          {}", bet.id);
        println!("Round:        {}", resolution.round.round_id);
        if let Some(price) = settle_price {
            println!("Settle price: {}", units::format_units(&price, LEDGER_DECIMALS));
        }
        println!("Transaction:  {}", serde_json::to_string_pretty(&receipt.transaction)?);
    }
    Ok(())
}
