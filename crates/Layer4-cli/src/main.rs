//! Vigia CLI - Main entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigia_catalog::{CatalogClient, TelegramChannel};
use vigia_engine::{
    CycleRunner, CycleSummary, EngineSettings, Scheduler, SchedulerConfig, SummaryOutcome,
    SummaryRunner,
};
use vigia_foundation::{Storage, SubscriptionKind, VigiaConfig};

/// Vigia - watches an open data catalog and notifies subscribers of changes
#[derive(Parser, Debug)]
#[command(name = "vigia")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a config file (default: global config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Run,
    /// Run a single detection cycle and exit
    Check,
    /// Run the daily new-dataset summary and exit
    Summary,
    /// Show stored state and configuration
    Status,
    /// Add a subscription for a subscriber
    Subscribe {
        /// External chat id of the subscriber
        #[arg(long)]
        chat_id: i64,
        /// Subscription kind: theme, dataset or keyword
        kind: String,
        /// Theme id, dataset id or keyword
        target: String,
        /// Display label
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Deactivate one of a subscriber's subscriptions
    Unsubscribe {
        /// External chat id of the subscriber
        #[arg(long)]
        chat_id: i64,
        /// Subscription id (see `vigia subscriptions`)
        subscription_id: i64,
    },
    /// List a subscriber's active subscriptions
    Subscriptions {
        /// External chat id of the subscriber
        #[arg(long)]
        chat_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &args.config {
        Some(path) => VigiaConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => VigiaConfig::load().unwrap_or_else(|e| {
            eprintln!("Warning: failed to load config: {}", e);
            VigiaConfig::default()
        }),
    };

    let storage = Arc::new(Storage::new(&config.resolve_data_dir())?);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_scheduler(config, storage).await,
        Command::Check => {
            let summary = build_scheduler(&config, storage)?.trigger_now().await?;
            print_cycle_summary(&summary);
            Ok(())
        }
        Command::Summary => {
            let (_, summary_runner) = build_runners(&config, storage)?;
            match summary_runner.run_daily_summary().await? {
                SummaryOutcome::Sent {
                    new_count,
                    recipients,
                } => println!(
                    "Summary sent: {} new datasets, {} recipients",
                    new_count, recipients
                ),
                SummaryOutcome::Seeded { known_count } => {
                    println!("First run: seeded {} known datasets", known_count)
                }
                SummaryOutcome::AlreadyRan => println!("Summary already ran today"),
                SummaryOutcome::NothingNew => println!("No new datasets today"),
            }
            Ok(())
        }
        Command::Status => status_cmd(&config, &storage),
        Command::Subscribe {
            chat_id,
            kind,
            target,
            label,
        } => subscribe_cmd(&storage, chat_id, &kind, &target, label.as_deref()),
        Command::Unsubscribe {
            chat_id,
            subscription_id,
        } => unsubscribe_cmd(&storage, chat_id, subscription_id),
        Command::Subscriptions { chat_id } => subscriptions_cmd(&storage, chat_id),
    }
}

fn build_runners(
    config: &VigiaConfig,
    storage: Arc<Storage>,
) -> anyhow::Result<(CycleRunner, SummaryRunner)> {
    let client = Arc::new(CatalogClient::new(
        config.catalog_base_url.clone(),
        config.alerts.datasets_per_scope_page_size,
    ));
    let token = config
        .channel
        .bot_token
        .clone()
        .context("no bot token configured (set TELEGRAM_BOT_TOKEN)")?;
    let channel = Arc::new(TelegramChannel::new(
        config.channel.api_base_url.clone(),
        token,
    )?);

    let settings = EngineSettings {
        worker_pool_size: config.alerts.worker_pool_size,
        catalog_base_url: config.catalog_base_url.clone(),
        synonyms: config.synonyms.clone(),
    };

    let runner = CycleRunner::new(
        storage.clone(),
        client.clone(),
        channel.clone(),
        settings,
    );
    let summary = SummaryRunner::new(storage, client, channel, config.catalog_base_url.clone());
    Ok((runner, summary))
}

fn build_scheduler(config: &VigiaConfig, storage: Arc<Storage>) -> anyhow::Result<Scheduler> {
    let (runner, summary) = build_runners(config, storage)?;
    let scheduler_config = SchedulerConfig {
        alerts_enabled: config.alerts.enabled,
        check_interval: std::time::Duration::from_secs(
            config.alerts.check_interval_hours * 3600,
        ),
        summary_enabled: config.summary.enabled,
        summary_hour: config.summary.hour,
    };
    Ok(Scheduler::new(runner, summary, scheduler_config))
}

async fn run_scheduler(config: VigiaConfig, storage: Arc<Storage>) -> anyhow::Result<()> {
    let scheduler = Arc::new(build_scheduler(&config, storage)?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let loop_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Interrupt received, shutting down");
    let _ = shutdown_tx.send(true);
    loop_handle.await.context("scheduler task panicked")?;

    Ok(())
}

fn print_cycle_summary(summary: &CycleSummary) {
    println!("Cycle {} finished", summary.cycle_id);
    println!("  entities checked:  {}", summary.stats.entities_checked);
    println!("  events detected:   {}", summary.stats.events_detected);
    println!("  notifications:     {}", summary.stats.notifications_sent);
    println!("  deduplicated:      {}", summary.stats.notifications_deduped);
    println!("  send failures:     {}", summary.stats.send_failures);
    println!("  send rejections:   {}", summary.stats.send_rejections);
    println!("  entity failures:   {}", summary.stats.entity_failures);
}

fn status_cmd(config: &VigiaConfig, storage: &Storage) -> anyhow::Result<()> {
    let subscriptions = storage.list_active_subscriptions(None, None)?;
    let known = storage.list_known_dataset_ids()?;
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();

    println!("Vigia status");
    println!("  catalog:              {}", config.catalog_base_url);
    println!("  data dir:             {}", config.resolve_data_dir().display());
    println!("  schema version:       {}", storage.get_schema_version()?);
    println!("  active subscriptions: {}", subscriptions.len());
    println!("  known datasets:       {}", known.len());
    println!(
        "  summary today:        {}",
        if storage.get_daily_summary(&today)?.is_some() {
            "done"
        } else {
            "pending"
        }
    );
    println!(
        "  check interval:       every {} h (alerts {})",
        config.alerts.check_interval_hours,
        if config.alerts.enabled { "on" } else { "off" }
    );
    Ok(())
}

fn subscribe_cmd(
    storage: &Storage,
    chat_id: i64,
    kind: &str,
    target: &str,
    label: Option<&str>,
) -> anyhow::Result<()> {
    let kind = SubscriptionKind::parse(kind)
        .with_context(|| format!("unknown kind '{}': use theme, dataset or keyword", kind))?;

    let subscriber = storage.get_or_create_subscriber(chat_id, None, None)?;
    let created = storage.add_subscription(subscriber.id, kind, target, label)?;

    if created {
        println!("Subscribed {} to {} '{}'", chat_id, kind, target);
    } else {
        println!("{} was already subscribed to {} '{}'", chat_id, kind, target);
    }
    Ok(())
}

fn unsubscribe_cmd(storage: &Storage, chat_id: i64, subscription_id: i64) -> anyhow::Result<()> {
    let subscriber = storage.get_or_create_subscriber(chat_id, None, None)?;
    if storage.deactivate_subscription(subscriber.id, subscription_id)? {
        println!("Subscription {} deactivated", subscription_id);
    } else {
        println!("No subscription {} for {}", subscription_id, chat_id);
    }
    Ok(())
}

fn subscriptions_cmd(storage: &Storage, chat_id: i64) -> anyhow::Result<()> {
    let subscriber = storage.get_or_create_subscriber(chat_id, None, None)?;
    let subscriptions = storage.list_subscriber_subscriptions(subscriber.id)?;

    if subscriptions.is_empty() {
        println!("No active subscriptions for {}.", chat_id);
        return Ok(());
    }

    println!("\nSubscriptions for {}\n", chat_id);
    println!("{:<6} {:<10} {:<40}", "ID", "Kind", "Target");
    println!("{}", "-".repeat(58));
    for sub in subscriptions {
        let target = sub.label.as_deref().map_or_else(
            || sub.target_id.clone(),
            |label| format!("{} ({})", sub.target_id, label),
        );
        println!("{:<6} {:<10} {:<40}", sub.id, sub.kind.to_string(), target);
    }
    Ok(())
}
