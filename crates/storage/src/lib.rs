pub mod dto;
pub mod error;
pub mod models;
pub mod repository;
pub mod store;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use error::{Result, StorageError};
pub use store::{
    AdjustmentCommand, AlertStore, AwardCommand, AwardCommit, BadgeStore, ChallengeStore,
    CreatorStatsSource, LedgerStore, MemoryCreatorStats, MemoryLedgerStore, OutboxStore,
    PgCreatorStats, PgLedgerStore, RankingStore, XpLedger,
};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
