use std::sync::Arc;

use anyhow::Context;
use gamification::{Gamification, GamificationConfig, SystemClock, TracingNotifier};
use storage::{Database, PgCreatorStats, PgLedgerStore};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod features;
mod middleware;
mod routes;

use config::Config;
use features::{admin, badges, challenges, rankings, xp};
use middleware::auth::ApiKeys;

#[derive(OpenApi)]
#[openapi(
    paths(
        xp::handlers::award_xp,
        xp::handlers::get_progress,
        xp::handlers::list_transactions,
        badges::handlers::list_user_badges,
        rankings::handlers::get_leaderboard,
        rankings::handlers::get_user_ranking,
        challenges::handlers::list_challenges,
        challenges::handlers::get_challenge,
        challenges::handlers::get_challenge_leaderboard,
        challenges::handlers::join_challenge,
        challenges::handlers::record_progress,
        admin::handlers::adjust_xp,
        admin::handlers::set_tier,
        admin::handlers::list_alerts,
        admin::handlers::resolve_alert,
        admin::handlers::badge_stats,
        admin::handlers::refresh_badges,
        admin::handlers::create_challenge,
        admin::handlers::activate_challenge,
        admin::handlers::complete_challenge,
        admin::handlers::archive_challenge,
        admin::handlers::sweep_challenges,
        admin::handlers::recompute_rankings,
        admin::handlers::outbox_stats,
    ),
    components(
        schemas(
            storage::dto::xp::AwardXpRequest,
            storage::dto::xp::AdjustXpRequest,
            storage::dto::xp::AdjustXpResponse,
            storage::dto::xp::SetTierRequest,
            storage::dto::xp::UserProgressResponse,
            storage::dto::badge::BadgeStatsEntry,
            storage::dto::badge::BadgeStatsResponse,
            storage::dto::badge::CatalogRefreshResponse,
            storage::dto::ranking::LeaderboardEntryResponse,
            storage::dto::ranking::GlobalLeaderboardResponse,
            storage::dto::ranking::UserRankingResponse,
            storage::dto::ranking::RecomputeSummary,
            storage::dto::challenge::CreateChallengeRequest,
            storage::dto::challenge::JoinChallengeRequest,
            storage::dto::challenge::ChallengeProgressRequest,
            storage::dto::challenge::SweepSummary,
            storage::dto::alert::ResolveAlertRequest,
            storage::models::XpEvent,
            storage::models::XpTransaction,
            storage::models::Tier,
            storage::models::Severity,
            storage::models::AlertKind,
            storage::models::ValidationAlert,
            storage::models::BadgeDefinition,
            storage::models::BadgeCriterion,
            storage::models::UserBadge,
            storage::models::Challenge,
            storage::models::ChallengeStatus,
            storage::models::ChallengeType,
            storage::models::ChallengeMetric,
            storage::models::Difficulty,
            storage::models::Reward,
            storage::models::RewardTier,
            storage::models::RewardTiers,
            storage::models::ChallengeParticipation,
            storage::models::ChallengeLeaderboard,
            storage::models::LeaderboardEntry,
            storage::models::LeaderboardCategory,
            gamification::AwardResult,
            gamification::AwardStatus,
            gamification::OutboxStats,
        )
    ),
    tags(
        (name = "xp", description = "XP awards and user progress"),
        (name = "badges", description = "Earned badges"),
        (name = "rankings", description = "Creator leaderboards"),
        (name = "challenges", description = "Time-boxed challenges"),
        (name = "admin", description = "Operator endpoints, bearer key required"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("API Key")
                        .build(),
                ),
            )
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting gamification API");

    let config = Config::from_env().context("Failed to load API configuration")?;
    let core_config =
        GamificationConfig::from_env().context("Failed to load gamification configuration")?;
    tracing::info!("Configuration loaded successfully");

    let core = match &config.database_url {
        Some(database_url) => {
            tracing::info!(
                "Connecting to database at: {}",
                database_url.split('@').next_back().unwrap_or("unknown")
            );
            let db = Database::new(database_url)
                .await
                .context("Failed to initialize database")?;
            tracing::info!("Database connection established");

            tracing::info!("Running database migrations");
            db.run_migrations()
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Database migrations completed successfully");

            Gamification::new(
                Arc::new(PgLedgerStore::new(db.pool().clone())),
                Arc::new(PgCreatorStats::new(db.pool().clone())),
                core_config,
                Arc::new(SystemClock),
                Arc::new(TracingNotifier),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory store");
            Gamification::in_memory(core_config)
        }
    };

    let api_keys = ApiKeys::from_comma_separated(&config.api_keys);

    let cancel = CancellationToken::new();
    let worker = core.spawn_outbox_worker(cancel.clone());

    let app = routes::router(core, api_keys)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive());

    let bind_address = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server at http://{}", bind_address);
    tracing::info!(
        "Swagger UI available at http://{}/swagger-ui/",
        bind_address
    );

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped, draining follow-up worker");
    cancel.cancel();
    worker.await.context("Outbox worker panicked")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
}
