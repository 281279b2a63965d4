use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gamification::{Gamification, GamificationConfig, SystemClock, TracingNotifier};
use storage::{Database, PgCreatorStats, PgLedgerStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gamification-jobs")]
#[command(about = "Periodic batch jobs of the gamification core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute every ranking score once.
    RecomputeRankings,
    /// Activate and complete challenges whose dates have passed.
    SweepChallenges,
    /// Insert missing starter badges.
    SeedBadges,
    /// Run both jobs on an interval and process follow-ups until Ctrl-C.
    Schedule {
        #[arg(long, default_value_t = 3600)]
        ranking_interval_secs: u64,

        #[arg(long, default_value_t = 300)]
        sweep_interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("gamification_jobs={log_level},gamification={log_level},storage={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GamificationConfig::from_env().context("Failed to load gamification configuration")?;

    tracing::info!("Connecting to database...");
    let db = Database::new(&cli.database_url)
        .await
        .context("Failed to initialize database")?;
    db.run_migrations().await.context("Failed to run migrations")?;

    let core = Gamification::new(
        Arc::new(PgLedgerStore::new(db.pool().clone())),
        Arc::new(PgCreatorStats::new(db.pool().clone())),
        config,
        Arc::new(SystemClock),
        Arc::new(TracingNotifier),
    );

    match cli.command {
        Commands::RecomputeRankings => {
            let summary = core
                .ranking
                .recompute_all()
                .await
                .context("Ranking recompute failed")?;
            tracing::info!(
                "✓ Recomputed {} scores ({} written, {} failed batches)",
                summary.processed,
                summary.written,
                summary.failed_batches
            );
        }
        Commands::SweepChallenges => {
            let summary = core.challenges.sweep().await;
            let paid = core.process_follow_ups().await;
            tracing::info!(
                "✓ Activated {}, completed {}, failed {}; {} follow-ups processed",
                summary.activated,
                summary.completed,
                summary.failed,
                paid
            );
        }
        Commands::SeedBadges => {
            let refreshed = core
                .badges
                .refresh_catalog()
                .await
                .context("Badge seeding failed")?;
            tracing::info!(
                "✓ Seeded {} badges, {} active definitions",
                refreshed.seeded,
                refreshed.active_definitions
            );
        }
        Commands::Schedule {
            ranking_interval_secs,
            sweep_interval_secs,
        } => {
            schedule(
                core,
                Duration::from_secs(ranking_interval_secs.max(1)),
                Duration::from_secs(sweep_interval_secs.max(1)),
            )
            .await?;
        }
    }

    Ok(())
}

async fn schedule(core: Gamification, ranking_every: Duration, sweep_every: Duration) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let worker = core.spawn_outbox_worker(cancel.clone());

    let mut ranking_tick = tokio::time::interval(ranking_every);
    let mut sweep_tick = tokio::time::interval(sweep_every);

    tracing::info!(
        ranking_interval_secs = ranking_every.as_secs(),
        sweep_interval_secs = sweep_every.as_secs(),
        "Scheduler started"
    );

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Shutdown requested");
                break;
            }
            _ = ranking_tick.tick() => {
                if let Err(e) = core.ranking.recompute_all().await {
                    tracing::error!(error = %e, "Scheduled ranking recompute failed");
                }
            }
            _ = sweep_tick.tick() => {
                core.challenges.sweep().await;
            }
        }
    }

    cancel.cancel();
    worker.await.context("Outbox worker panicked")?;

    match core.outbox.stats().await {
        Ok(stats) => tracing::info!(
            pending = stats.pending,
            processed = stats.processed,
            dead_lettered = stats.dead_lettered,
            "Scheduler stopped"
        ),
        Err(e) => tracing::warn!(error = %e, "Scheduler stopped, outbox counters unavailable"),
    }
    Ok(())
}
