use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use gamification::{
    AwardRequest, AwardStatus, Clock, FollowUp, Gamification, GamificationConfig, ManualClock, TracingNotifier,
};
use storage::dto::challenge::CreateChallengeRequest;
use storage::models::{
    ChallengeMetric, ChallengeType, Difficulty, Reward, RewardTier, RewardTiers, XpEvent,
};
use storage::{ChallengeStore, MemoryCreatorStats, MemoryLedgerStore};

struct Harness {
    store: Arc<MemoryLedgerStore>,
    clock: Arc<ManualClock>,
    core: Gamification,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryLedgerStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 8, 4, 15, 0, 0).unwrap()));
    let config = GamificationConfig {
        daily_cap: 1000,
        ..GamificationConfig::default()
    };
    let core = Gamification::new(
        store.clone(),
        Arc::new(MemoryCreatorStats::new()),
        config,
        clock.clone(),
        Arc::new(TracingNotifier),
    );

    Harness { store, clock, core }
}

fn booking_challenge(h: &Harness) -> CreateChallengeRequest {
    let start = h.clock.now() - Duration::hours(1);
    CreateChallengeRequest {
        title: "Summer bookings".to_string(),
        description: Some("Most completed bookings this week".to_string()),
        challenge_type: ChallengeType::Weekly,
        difficulty: Difficulty::Easy,
        start_date: start,
        end_date: start + Duration::days(7),
        metric: ChallengeMetric::BookingsCompleted,
        target_value: 5,
        rewards: RewardTiers {
            winner: Reward {
                xp: 500,
                badge_id: Some("bookings_50".to_string()),
            },
            ..RewardTiers::default()
        },
    }
}

#[tokio::test]
async fn test_award_flows_into_badges_challenges_and_rewards() {
    let h = harness();
    let challenge = h.core.challenges.create(booking_challenge(&h)).await.unwrap();
    h.core
        .challenges
        .join(challenge.challenge_id, "creator-1")
        .await
        .unwrap();

    let result = h
        .core
        .xp
        .award(AwardRequest::new("creator-1", XpEvent::BookingCompleted).with_context("booking-1"))
        .await
        .unwrap();
    assert_eq!(result.status, AwardStatus::Credited);
    assert_eq!(result.credited, 100);

    h.core.process_follow_ups().await;

    // 100 for the booking plus the first_booking bonus.
    let progress = h.core.xp.progress("creator-1").await.unwrap().unwrap();
    assert_eq!(progress.total_xp, 125);

    let badges = h.core.badges.user_badges("creator-1").await.unwrap();
    assert_eq!(badges.len(), 1);
    assert_eq!(badges[0].badge_id, "first_booking");

    let participation = h
        .store
        .get_participation(challenge.challenge_id, "creator-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participation.current_value, 1);
    assert_eq!(participation.percentage, 20.0);

    let completed = h.core.challenges.complete(challenge.challenge_id).await.unwrap();
    assert_eq!(completed.completion_rate, 1.0);
    h.core.process_follow_ups().await;

    // Reward XP plus the bonus of the reward badge.
    let progress = h.core.xp.progress("creator-1").await.unwrap().unwrap();
    assert_eq!(progress.total_xp, 875);

    let participation = h
        .store
        .get_participation(challenge.challenge_id, "creator-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participation.reward_tier, Some(RewardTier::Winner));
    assert!(participation.reward_distributed);

    let badge_ids: Vec<String> = h
        .core
        .badges
        .user_badges("creator-1")
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.badge_id)
        .collect();
    assert!(badge_ids.contains(&"bookings_50".to_string()));

    // A replayed payout is absorbed by the idempotency key.
    h.core.outbox.enqueue(FollowUp::ChallengeReward {
        user_id: "creator-1".to_string(),
        challenge_id: challenge.challenge_id,
        tier: RewardTier::Winner,
        reward: completed.rewards.winner.clone(),
    })
    .await;
    h.core.process_follow_ups().await;

    let progress = h.core.xp.progress("creator-1").await.unwrap().unwrap();
    assert_eq!(progress.total_xp, 875);
    assert_eq!(h.core.outbox.stats().await.unwrap().dead_lettered, 0);

    let summary = h.core.ranking.recompute_all().await.unwrap();
    assert_eq!(summary.written, 1);
    let ranking = h.core.ranking.user_ranking("creator-1").await.unwrap();
    assert_eq!(ranking.rank, Some(1));
}

#[tokio::test]
async fn test_follow_ups_outlive_a_store_outage() {
    let h = harness();

    let result = h
        .core
        .xp
        .award(AwardRequest::new("creator-1", XpEvent::FiveStarReview).with_context("review-1"))
        .await
        .unwrap();
    assert_eq!(result.credited, 50);

    h.store.set_unavailable(true);
    assert_eq!(h.core.process_follow_ups().await, 0);
    h.store.set_unavailable(false);

    let stats = h.core.outbox.stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.dead_lettered, 0);

    let progress = h.core.xp.progress("creator-1").await.unwrap().unwrap();
    assert_eq!(progress.total_xp, 50);
    assert!(h.core.badges.user_badges("creator-1").await.unwrap().is_empty());

    // A fresh core over the same store picks up where the first stopped.
    let restarted = Gamification::new(
        h.store.clone(),
        Arc::new(MemoryCreatorStats::new()),
        GamificationConfig::default(),
        h.clock.clone(),
        Arc::new(TracingNotifier),
    );
    assert!(restarted.process_follow_ups().await >= 2);

    let badges = restarted.badges.user_badges("creator-1").await.unwrap();
    assert!(badges.iter().any(|b| b.badge_id == "first_five_star"));
    assert_eq!(restarted.outbox.stats().await.unwrap().pending, 0);
}
