//! Gamification core for the creator marketplace: XP awards with
//! anti-gaming checks, badges, composite rankings and time-boxed
//! challenges.
//!
//! [`Gamification`] wires the services together around one ledger store.
//! Work that reacts to a credited award goes through the [`Outbox`] and is
//! executed by [`Gamification::process_follow_ups`] or the background
//! worker.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod notifier;
pub mod outbox;
pub mod services;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use storage::{CreatorStatsSource, LedgerStore, MemoryCreatorStats, MemoryLedgerStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EventRule, EventRules, GamificationConfig, RankingWeights};
pub use dispatch::FollowUpDispatcher;
pub use error::{GamificationError, Result};
pub use notifier::{BadgeAwardedNotification, BadgeNotifier, TracingNotifier};
pub use outbox::{FollowUp, FollowUpHandler, Outbox, OutboxEntry, OutboxStats, RetryPolicy};
pub use services::{
    AntiGamingValidator, AwardRequest, AwardResult, AwardStatus, BadgeEngine, ChallengeManager,
    RankingCalculator, ValidationOutcome, XpAwardEngine,
};

const OUTBOX_IDLE: StdDuration = StdDuration::from_secs(1);

/// Composition root holding one instance of every service.
#[derive(Clone)]
pub struct Gamification {
    pub xp: Arc<XpAwardEngine>,
    pub validator: Arc<AntiGamingValidator>,
    pub badges: Arc<BadgeEngine>,
    pub ranking: Arc<RankingCalculator>,
    pub challenges: Arc<ChallengeManager>,
    pub outbox: Arc<Outbox>,
    dispatcher: Arc<FollowUpDispatcher>,
    config: Arc<GamificationConfig>,
    clock: Arc<dyn Clock>,
}

impl Gamification {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        stats: Arc<dyn CreatorStatsSource>,
        config: GamificationConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn BadgeNotifier>,
    ) -> Self {
        let config = Arc::new(config);
        let outbox = Arc::new(Outbox::new(
            store.clone(),
            clock.clone(),
            RetryPolicy::new(config.outbox_max_attempts, config.outbox_retry_base),
        ));

        let validator = Arc::new(AntiGamingValidator::new(
            store.clone(),
            clock.clone(),
            config.event_rules.clone(),
        ));
        let xp = Arc::new(XpAwardEngine::new(
            store.clone(),
            validator.clone(),
            outbox.clone(),
            clock.clone(),
            config.clone(),
        ));
        let badges = Arc::new(BadgeEngine::new(
            store.clone(),
            outbox.clone(),
            notifier,
            clock.clone(),
            config.badge_catalog_ttl,
        ));
        let ranking = Arc::new(RankingCalculator::new(
            store.clone(),
            stats,
            clock.clone(),
            config.ranking_weights,
            config.ranking_batch_size,
        ));
        let challenges = Arc::new(ChallengeManager::new(
            store,
            outbox.clone(),
            clock.clone(),
            config.challenge_leaderboard_size,
        ));
        let dispatcher = Arc::new(FollowUpDispatcher::new(
            xp.clone(),
            badges.clone(),
            challenges.clone(),
        ));

        Self {
            xp,
            validator,
            badges,
            ranking,
            challenges,
            outbox,
            dispatcher,
            config,
            clock,
        }
    }

    /// Everything on the in-process store, with the system clock.
    pub fn in_memory(config: GamificationConfig) -> Self {
        Self::new(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryCreatorStats::new()),
            config,
            Arc::new(SystemClock),
            Arc::new(TracingNotifier),
        )
    }

    pub fn config(&self) -> &GamificationConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run queued follow-ups until none are left, including the ones they
    /// enqueue. Returns how many succeeded.
    pub async fn process_follow_ups(&self) -> usize {
        self.outbox.drain(self.dispatcher.as_ref()).await
    }

    pub fn spawn_outbox_worker(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let outbox = self.outbox.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            outbox.run(dispatcher.as_ref(), OUTBOX_IDLE, cancel).await;
        })
    }
}
