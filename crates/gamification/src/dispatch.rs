use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use storage::models::XpEvent;

use crate::error::Result;
use crate::outbox::{FollowUp, FollowUpHandler};
use crate::services::{BadgeEngine, ChallengeManager, XpAwardEngine};

/// Routes queued follow-ups to the service that owns them. Every branch is
/// safe to replay.
pub struct FollowUpDispatcher {
    xp: Arc<XpAwardEngine>,
    badges: Arc<BadgeEngine>,
    challenges: Arc<ChallengeManager>,
}

impl FollowUpDispatcher {
    pub fn new(xp: Arc<XpAwardEngine>, badges: Arc<BadgeEngine>, challenges: Arc<ChallengeManager>) -> Self {
        Self { xp, badges, challenges }
    }
}

#[async_trait]
impl FollowUpHandler for FollowUpDispatcher {
    async fn handle(&self, follow_up: &FollowUp) -> Result<()> {
        match follow_up {
            FollowUp::BadgeCheck { user_id, trigger } => {
                self.badges
                    .check_and_award(user_id, *trigger, serde_json::Value::Null)
                    .await?;
            }
            FollowUp::ChallengeProgress { user_id, event } => {
                self.challenges.on_xp_event(user_id, *event).await?;
            }
            FollowUp::BadgeBonus { user_id, badge_id, xp } => {
                self.xp
                    .award_system(
                        user_id,
                        XpEvent::BadgeBonus,
                        *xp,
                        badge_id,
                        json!({ "badge_id": badge_id }),
                    )
                    .await?;
            }
            FollowUp::ChallengeReward {
                user_id,
                challenge_id,
                tier,
                reward,
            } => {
                let metadata = ChallengeManager::reward_metadata(*challenge_id, *tier);
                if reward.xp > 0 {
                    self.xp
                        .award_system(
                            user_id,
                            XpEvent::ChallengeReward,
                            reward.xp,
                            &challenge_id.to_string(),
                            metadata.clone(),
                        )
                        .await?;
                }
                if let Some(badge_id) = reward.badge_id.as_deref() {
                    self.badges.grant_badge(user_id, badge_id, metadata).await?;
                }
                self.challenges
                    .mark_reward_distributed(*challenge_id, user_id)
                    .await?;
            }
        }
        Ok(())
    }
}
