//! Badge catalogue and eligibility checks.
//!
//! Definitions are read into an immutable [`BadgeCatalog`] snapshot that is
//! swapped out after the configured TTL or on explicit invalidation. The
//! grant itself relies on the store re-checking `(user_id, badge_id)` inside
//! its transaction, so concurrent checks for the same user award once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use storage::dto::badge::{BadgeStatsEntry, BadgeStatsResponse, CatalogRefreshResponse};
use storage::models::{
    BadgeCategory, BadgeCriterion, BadgeDefinition, BadgeFacts, BadgeRarity, Tier, UserBadge,
    XpEvent,
};
use storage::LedgerStore;

use crate::clock::Clock;
use crate::error::Result;
use crate::notifier::{BadgeAwardedNotification, BadgeNotifier};
use crate::outbox::{FollowUp, Outbox};

/// Immutable view of the active badge definitions.
#[derive(Debug, Clone)]
pub struct BadgeCatalog {
    definitions: Vec<BadgeDefinition>,
    loaded_at: DateTime<Utc>,
}

impl BadgeCatalog {
    pub fn new(definitions: Vec<BadgeDefinition>, loaded_at: DateTime<Utc>) -> Self {
        let definitions = definitions.into_iter().filter(|d| d.active).collect();
        Self {
            definitions,
            loaded_at,
        }
    }

    pub fn definitions(&self) -> &[BadgeDefinition] {
        &self.definitions
    }

    pub fn get(&self, badge_id: &str) -> Option<&BadgeDefinition> {
        self.definitions.iter().find(|d| d.badge_id == badge_id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.loaded_at < ttl
    }
}

fn definition(
    badge_id: &str,
    name: &str,
    description: &str,
    category: BadgeCategory,
    rarity: BadgeRarity,
    criterion: BadgeCriterion,
    xp_reward: i64,
) -> BadgeDefinition {
    BadgeDefinition {
        badge_id: badge_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        rarity,
        criterion,
        xp_reward: Some(xp_reward),
        active: true,
    }
}

/// Definitions written when the catalogue is empty.
pub fn starter_badges() -> Vec<BadgeDefinition> {
    use BadgeCategory::*;
    use BadgeRarity::*;

    vec![
        definition(
            "first_booking",
            "First Booking",
            "Completed a first booking",
            Milestone,
            Common,
            BadgeCriterion::BookingCount(1),
            25,
        ),
        definition(
            "first_five_star",
            "First Five Stars",
            "Received a first five-star review",
            Quality,
            Common,
            BadgeCriterion::ReviewRating(1),
            25,
        ),
        definition(
            "bookings_10",
            "Ten Bookings",
            "Completed ten bookings",
            Milestone,
            Rare,
            BadgeCriterion::BookingCount(10),
            100,
        ),
        definition(
            "bookings_50",
            "Fifty Bookings",
            "Completed fifty bookings",
            Experience,
            Epic,
            BadgeCriterion::BookingCount(50),
            250,
        ),
        definition(
            "five_star_25",
            "Crowd Favourite",
            "Received twenty-five five-star reviews",
            Quality,
            Epic,
            BadgeCriterion::ReviewRating(25),
            150,
        ),
        definition(
            "xp_1000",
            "Rising Creator",
            "Earned 1,000 XP",
            Milestone,
            Rare,
            BadgeCriterion::XpThreshold(1_000),
            50,
        ),
        definition(
            "xp_10000",
            "Seasoned Creator",
            "Earned 10,000 XP",
            Experience,
            Legendary,
            BadgeCriterion::XpThreshold(10_000),
            500,
        ),
        definition(
            "verified_creator",
            "Verified Creator",
            "Reached the verified tier",
            Status,
            Rare,
            BadgeCriterion::TierReached(Tier::Verified),
            100,
        ),
        definition(
            "signature_creator",
            "Signature Creator",
            "Reached the signature tier",
            Status,
            Legendary,
            BadgeCriterion::TierReached(Tier::Signature),
            300,
        ),
    ]
}

pub struct BadgeEngine {
    store: Arc<dyn LedgerStore>,
    outbox: Arc<Outbox>,
    notifier: Arc<dyn BadgeNotifier>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    catalog: RwLock<Option<Arc<BadgeCatalog>>>,
}

impl BadgeEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        outbox: Arc<Outbox>,
        notifier: Arc<dyn BadgeNotifier>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            outbox,
            notifier,
            clock,
            ttl,
            catalog: RwLock::new(None),
        }
    }

    /// Current catalogue snapshot, reloading it once the TTL has passed.
    /// An empty store is seeded with [`starter_badges`] first.
    pub async fn catalog(&self) -> Result<Arc<BadgeCatalog>> {
        let now = self.clock.now();
        if let Some(cached) = self.cached()
            && cached.is_fresh(now, self.ttl)
        {
            return Ok(cached);
        }

        let mut definitions = self.store.list_badge_definitions().await?;
        if definitions.is_empty() {
            let seeded = self.store.insert_badge_definitions(&starter_badges()).await?;
            tracing::info!(seeded, "Badge catalogue was empty, seeded starter badges");
            definitions = self.store.list_badge_definitions().await?;
        }

        let catalog = Arc::new(BadgeCatalog::new(definitions, now));
        tracing::debug!(active = catalog.len(), "Badge catalogue loaded");

        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Some(catalog.clone());
        Ok(catalog)
    }

    fn cached(&self) -> Option<Arc<BadgeCatalog>> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drop the snapshot so the next read goes to the store.
    pub fn invalidate_catalog(&self) {
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = None;
        tracing::info!("Badge catalogue invalidated");
    }

    /// Insert any missing starter badges and reload the catalogue.
    pub async fn refresh_catalog(&self) -> Result<CatalogRefreshResponse> {
        let seeded = self.store.insert_badge_definitions(&starter_badges()).await?;
        self.invalidate_catalog();
        let catalog = self.catalog().await?;

        tracing::info!(seeded, active = catalog.len(), "Badge catalogue refreshed");
        Ok(CatalogRefreshResponse {
            seeded,
            active_definitions: catalog.len(),
        })
    }

    async fn facts(&self, user_id: &str) -> Result<BadgeFacts> {
        let Some(progress) = self.store.get_progress(user_id).await? else {
            return Ok(BadgeFacts::default());
        };

        Ok(BadgeFacts {
            total_xp: progress.total_xp,
            booking_count: self
                .store
                .count_transactions(user_id, XpEvent::BookingCompleted)
                .await?,
            five_star_count: self
                .store
                .count_transactions(user_id, XpEvent::FiveStarReview)
                .await?,
            tier: progress.tier,
        })
    }

    /// Grant every active badge the user qualifies for and does not hold
    /// yet. Returns the ids actually granted by this call.
    ///
    /// A failing grant does not stop the others; the first failure is
    /// returned after the rest have been tried so the follow-up is retried.
    pub async fn check_and_award(
        &self,
        user_id: &str,
        trigger: Option<XpEvent>,
        metadata: serde_json::Value,
    ) -> Result<Vec<String>> {
        let catalog = self.catalog().await?;
        let held: HashSet<String> = self
            .store
            .user_badges(user_id)
            .await?
            .into_iter()
            .map(|b| b.badge_id)
            .collect();

        let candidates: Vec<&BadgeDefinition> = catalog
            .definitions()
            .iter()
            .filter(|d| !held.contains(&d.badge_id))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let facts = self.facts(user_id).await?;
        let now = self.clock.now();
        let mut awarded = Vec::new();
        let mut first_error = None;

        for definition in candidates.into_iter().filter(|d| d.criterion.is_met(&facts)) {
            let badge = UserBadge {
                user_id: user_id.to_string(),
                badge_id: definition.badge_id.clone(),
                awarded_at: now,
                metadata: json!({ "trigger": trigger, "context": metadata }),
            };

            match self.grant(definition, &badge).await {
                Ok(true) => awarded.push(definition.badge_id.clone()),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        user_id,
                        badge_id = %definition.badge_id,
                        error = %e,
                        "Failed to award badge"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if !awarded.is_empty() {
            self.notifier.badges_awarded(&BadgeAwardedNotification {
                user_id: user_id.to_string(),
                badges: awarded.clone(),
                event: trigger,
            });
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(awarded),
        }
    }

    /// Grant a specific badge regardless of its criterion, e.g. as a
    /// challenge reward. Unknown or inactive ids are logged and skipped.
    pub async fn grant_badge(
        &self,
        user_id: &str,
        badge_id: &str,
        metadata: serde_json::Value,
    ) -> Result<bool> {
        let catalog = self.catalog().await?;
        let Some(definition) = catalog.get(badge_id) else {
            tracing::warn!(user_id, badge_id, "Unknown badge, skipping grant");
            return Ok(false);
        };

        let badge = UserBadge {
            user_id: user_id.to_string(),
            badge_id: badge_id.to_string(),
            awarded_at: self.clock.now(),
            metadata,
        };
        let granted = self.grant(definition, &badge).await?;

        if granted {
            self.notifier.badges_awarded(&BadgeAwardedNotification {
                user_id: user_id.to_string(),
                badges: vec![badge_id.to_string()],
                event: None,
            });
        }
        Ok(granted)
    }

    async fn grant(&self, definition: &BadgeDefinition, badge: &UserBadge) -> Result<bool> {
        if !self.store.try_award_badge(badge).await? {
            tracing::debug!(user_id = %badge.user_id, badge_id = %badge.badge_id, "Badge already held");
            return Ok(false);
        }

        tracing::info!(user_id = %badge.user_id, badge_id = %badge.badge_id, "Badge awarded");

        if let Some(xp) = definition.xp_reward.filter(|xp| *xp > 0) {
            self.outbox
                .enqueue(FollowUp::BadgeBonus {
                    user_id: badge.user_id.clone(),
                    badge_id: badge.badge_id.clone(),
                    xp,
                })
                .await;
        }
        Ok(true)
    }

    pub async fn user_badges(&self, user_id: &str) -> Result<Vec<UserBadge>> {
        Ok(self.store.user_badges(user_id).await?)
    }

    /// Award counts per active badge, with the share of users holding it.
    pub async fn stats(&self) -> Result<BadgeStatsResponse> {
        let catalog = self.catalog().await?;
        let counts: HashMap<String, i64> = self.store.badge_award_counts().await?.into_iter().collect();
        let total_users = self.store.count_progress().await?;

        let badges: Vec<BadgeStatsEntry> = catalog
            .definitions()
            .iter()
            .map(|d| {
                let awarded = counts.get(&d.badge_id).copied().unwrap_or_default();
                let share_of_users = if total_users > 0 {
                    100.0 * awarded as f64 / total_users as f64
                } else {
                    0.0
                };
                BadgeStatsEntry {
                    badge_id: d.badge_id.clone(),
                    name: d.name.clone(),
                    category: d.category,
                    rarity: d.rarity,
                    awarded,
                    share_of_users,
                }
            })
            .collect();

        Ok(BadgeStatsResponse {
            total_users,
            total_awarded: badges.iter().map(|b| b.awarded).sum(),
            badges,
        })
    }
}
