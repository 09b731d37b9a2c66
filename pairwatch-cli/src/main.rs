//! Pairwatch CLI: sync, catalog, user, pair and artifact commands.
//!
//! Commands:
//! - `sync`: refresh every tracked pair, once or on the configured schedule
//! - `catalog refresh`: reload supported quote currencies and assets
//! - `user ...`: create, inspect and edit users and their pair lists
//! - `pair add|show`: fetch a pair's series or print the stored window
//! - `chart` / `forecast`: render and deliver an image to a user's chat
//! - `db migrate`: create the documents table

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pairwatch_core::data::{
    CircuitBreaker, CoinGeckoProvider, PairSeriesStore, ReferenceCatalog, LOOKBACK_DAYS,
};
use pairwatch_core::domain::User;
use pairwatch_core::store::{DocumentStore, PgDocumentStore};
use pairwatch_core::PairwatchError;
use pairwatch_runner::{
    parse_pair, AccessValidator, AdminNotifier, ArtifactService, ArtifactSpec, BulkSync,
    CommandRenderer, DeliveryOutcome, FailureNotifier, LogNotifier, RedisTokenCache, Settings,
    SyncScheduler, SyncSummary, TelegramMessenger, TracingProgress, UserService,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pairwatch",
    about = "Pairwatch CLI: crypto pair tracking, syncing and chart delivery"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./pairwatch.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh every stored and tracked pair from the market-data provider.
    Sync {
        /// Run a single pass instead of the periodic schedule.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Reference catalog commands.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// User management commands.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Pair series commands.
    Pair {
        #[command(subcommand)]
        action: PairAction,
    },
    /// Deliver a price chart to a user's chat.
    Chart {
        user_id: i64,
        /// Pair name, e.g. bitcoin-usd.
        pair: String,
        /// Window in days. Defaults to `artifacts.default_chart_days`.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Deliver a forecast plot to a user's chat.
    Forecast {
        user_id: i64,
        pair: String,
        /// Forecast horizon in days.
        #[arg(long)]
        horizon: u32,
        /// JSON file with the model's forecast samples.
        #[arg(long)]
        payload: PathBuf,
    },
    /// Database commands.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Reload supported quote currencies and the asset list.
    Refresh,
}

#[derive(Subcommand)]
enum UserAction {
    Create {
        user_id: i64,
        #[arg(long)]
        name: Option<String>,
        /// Pair quota. Defaults to the minimum of 3.
        #[arg(long)]
        quota: Option<u32>,
    },
    Show {
        user_id: i64,
    },
    List,
    SetQuota {
        user_id: i64,
        quota: u32,
    },
    AddPair {
        user_id: i64,
        pair: String,
    },
    RemovePair {
        user_id: i64,
        pair: String,
    },
    Delete {
        user_id: i64,
    },
}

#[derive(Subcommand)]
enum PairAction {
    /// Validate a pair against the catalog and fetch its series.
    Add { pair: String },
    /// Print the stored window for a pair.
    Show {
        pair: String,
        #[arg(long, default_value_t = LOOKBACK_DAYS as u32)]
        days: u32,
        /// Write `timestamp,price` CSV to stdout.
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Create the documents table and its index.
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<PairwatchError>() {
                Some(e) => eprintln!("error {}: {e}", e.code()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let store = Arc::new(
        PgDocumentStore::connect(&settings.database.url, settings.database.max_connections)
            .await
            .context("connecting to the document store")?,
    );

    let result = dispatch(cli.command, &settings, store.clone()).await;
    store.close().await;
    result
}

async fn dispatch(command: Commands, settings: &Settings, store: Arc<PgDocumentStore>) -> Result<()> {
    match command {
        Commands::Sync { once } => run_sync(settings, store, once).await,
        Commands::Catalog {
            action: CatalogAction::Refresh,
        } => {
            let provider = build_provider(settings)?;
            let snapshot = ReferenceCatalog::new(store).refresh(provider.as_ref()).await?;
            println!(
                "Catalog refreshed: {} quote currencies, {} assets",
                snapshot.vs_currencies, snapshot.coins
            );
            Ok(())
        }
        Commands::User { action } => run_user(action, store).await,
        Commands::Pair { action } => run_pair(action, settings, store).await,
        Commands::Chart {
            user_id,
            pair,
            days,
        } => {
            let spec = ArtifactSpec::Chart {
                days: days.unwrap_or(settings.artifacts.default_chart_days),
            };
            deliver(settings, store, user_id, &pair, spec).await
        }
        Commands::Forecast {
            user_id,
            pair,
            horizon,
            payload,
        } => {
            if horizon == 0 {
                bail!("--horizon must be positive");
            }
            let raw = std::fs::read_to_string(&payload)
                .with_context(|| format!("reading forecast payload {}", payload.display()))?;
            let forecast = serde_json::from_str(&raw)
                .with_context(|| format!("parsing forecast payload {}", payload.display()))?;
            let spec = ArtifactSpec::Forecast {
                horizon_days: horizon,
                forecast,
            };
            deliver(settings, store, user_id, &pair, spec).await
        }
        Commands::Db {
            action: DbAction::Migrate,
        } => {
            store.migrate().await?;
            println!("Documents table is ready.");
            Ok(())
        }
    }
}

fn build_provider(settings: &Settings) -> Result<Arc<CoinGeckoProvider>> {
    let cfg = &settings.provider;
    let breaker = Arc::new(CircuitBreaker::new(
        cfg.breaker_cooldown(),
        cfg.breaker_failure_threshold,
    ));
    let provider = CoinGeckoProvider::new(breaker)?
        .with_base_url(cfg.base_url.clone())
        .with_api_key(cfg.api_key.clone())
        .with_retries(cfg.max_retries, cfg.retry_base_delay());
    Ok(Arc::new(provider))
}

fn build_messenger(settings: &Settings) -> Result<Arc<TelegramMessenger>> {
    let token = settings
        .telegram
        .token
        .as_deref()
        .context("no messaging token configured (set PAIRWATCH_TELEGRAM_TOKEN)")?;
    Ok(Arc::new(TelegramMessenger::new(
        settings.telegram.api_url.clone(),
        token,
    )?))
}

async fn run_sync(settings: &Settings, store: Arc<PgDocumentStore>, once: bool) -> Result<()> {
    let provider = build_provider(settings)?;
    let notifier: Arc<dyn FailureNotifier> = match settings.telegram.admin_chat_id {
        Some(chat_id) if settings.telegram.token.is_some() => {
            Arc::new(AdminNotifier::new(build_messenger(settings)?, chat_id))
        }
        _ => {
            warn!("no admin chat configured, sync failures are only logged");
            Arc::new(LogNotifier)
        }
    };
    let job = BulkSync::new(store, provider, notifier)
        .with_delay(settings.sync.delay())
        .with_policy(settings.sync.failure_policy);

    if once {
        let summary = job.run(&TracingProgress).await?;
        print_sync_summary(&summary);
        if !summary.all_succeeded() {
            bail!("{} of {} pairs failed", summary.failed, summary.total);
        }
        return Ok(());
    }

    let scheduler = SyncScheduler::new(settings.sync.interval());
    info!(every = ?scheduler.period(), "sync scheduler started");
    let runs = scheduler
        .run_until(&job, &TracingProgress, shutdown_signal())
        .await;
    println!("Scheduler stopped after {runs} run(s).");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, stopping after the current run"),
        Err(e) => warn!(error = %e, "cannot listen for interrupts, stopping"),
    }
}

fn print_sync_summary(summary: &SyncSummary) {
    println!();
    println!("=== Sync Result ===");
    println!("Pairs:          {}", summary.total);
    println!("Succeeded:      {}", summary.succeeded);
    println!("Failed:         {}", summary.failed);
    if summary.aborted {
        println!("Stopped early by the abort policy.");
    }
    for (pair, err) in &summary.errors {
        println!("  {pair:<24} {} {err}", err.code());
    }
}

async fn run_user(action: UserAction, store: Arc<PgDocumentStore>) -> Result<()> {
    let users = UserService::new(store);
    match action {
        UserAction::Create {
            user_id,
            name,
            quota,
        } => print_user(&users.create_user(user_id, name, quota).await?),
        UserAction::Show { user_id } => print_user(&users.get_user(user_id).await?),
        UserAction::List => {
            let all = users.list_users().await?;
            println!("{:<14} {:<16} {:>5} Pairs", "User", "Name", "Quota");
            println!("{}", "-".repeat(60));
            for user in &all {
                println!(
                    "{:<14} {:<16} {:>5} {}",
                    user.user_id,
                    user.user_name.as_deref().unwrap_or("-"),
                    user.n_pairs,
                    user.pairs.join(", ")
                );
            }
            println!("{} user(s)", all.len());
        }
        UserAction::SetQuota { user_id, quota } => {
            print_user(&users.set_quota(user_id, quota).await?)
        }
        UserAction::AddPair { user_id, pair } => {
            let outcome = users.add_pair(user_id, &parse_pair(&pair)?).await?;
            if !outcome.added {
                println!("{pair} is already tracked.");
            }
            print_user(&outcome.user);
        }
        UserAction::RemovePair { user_id, pair } => {
            print_user(&users.remove_pair(user_id, &pair).await?)
        }
        UserAction::Delete { user_id } => {
            users.delete_user(user_id).await?;
            println!("User {user_id} deleted.");
        }
    }
    Ok(())
}

fn print_user(user: &User) {
    println!("User:      {}", user.user_id);
    println!("Name:      {}", user.user_name.as_deref().unwrap_or("-"));
    println!("Quota:     {} ({} left)", user.n_pairs, user.remaining());
    if user.pairs.is_empty() {
        println!("Pairs:     (none)");
    } else {
        println!("Pairs:     {}", user.pairs.join(", "));
    }
}

async fn run_pair(action: PairAction, settings: &Settings, store: Arc<PgDocumentStore>) -> Result<()> {
    match action {
        PairAction::Add { pair } => {
            let pair = parse_pair(&pair)?;
            ReferenceCatalog::new(store.clone()).validate_pair(&pair).await?;
            let provider = build_provider(settings)?;
            let outcome = PairSeriesStore::new(store)
                .refresh(provider.as_ref(), &pair)
                .await?;
            println!(
                "{}: {:?}, {} samples, hash {}",
                outcome.pair_name, outcome.kind, outcome.samples, outcome.data_hash
            );
        }
        PairAction::Show { pair, days, csv } => {
            let pair = parse_pair(&pair)?;
            let prices = PairSeriesStore::new(store).prices(&pair, days).await?;
            if csv {
                let mut writer = csv::Writer::from_writer(std::io::stdout());
                writer.write_record(["timestamp", "price"])?;
                for point in &prices {
                    let ts = point
                        .datetime()
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| point.timestamp_ms().to_string());
                    writer.write_record([ts, point.value().to_string()])?;
                }
                writer.flush()?;
            } else {
                println!("{}: last {days} day(s), {} samples", pair.name(), prices.len());
                for point in &prices {
                    let ts = point
                        .datetime()
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| point.timestamp_ms().to_string());
                    println!("{ts:<18} {:>14.6}", point.value());
                }
            }
        }
    }
    Ok(())
}

async fn deliver(
    settings: &Settings,
    store: Arc<PgDocumentStore>,
    user_id: i64,
    pair: &str,
    spec: ArtifactSpec,
) -> Result<()> {
    let pair = parse_pair(pair)?;
    let cache = RedisTokenCache::connect(&settings.redis.url)
        .await
        .context("connecting to the token cache")?;
    let renderer = CommandRenderer::new(
        settings.renderer.command.clone(),
        settings.renderer.args.clone(),
        settings.renderer.timeout(),
    );
    let store: Arc<dyn DocumentStore> = store;
    let service = ArtifactService::new(
        AccessValidator::new(store),
        Arc::new(cache),
        build_messenger(settings)?,
        Arc::new(renderer),
    )
    .with_ttl(settings.artifacts.ttl())
    .with_work_dir(settings.artifacts.work_dir());

    let outcome = service.deliver(user_id, &pair, &spec).await?;
    print_delivery(&outcome);
    Ok(())
}

fn print_delivery(outcome: &DeliveryOutcome) {
    println!("Delivered {} ({:?})", outcome.key, outcome.source);
    if let Some(message_id) = outcome.receipt.message_id {
        println!("Message:   {message_id}");
    }
    println!("Token:     {}", outcome.token);
}
