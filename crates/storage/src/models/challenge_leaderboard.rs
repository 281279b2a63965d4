use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::ChallengeParticipation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    pub position: i32,
    pub user_id: String,
    pub current_value: i64,
    pub percentage: f64,
}

/// Denormalized top-N snapshot of one challenge, replaced wholesale on
/// every rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChallengeLeaderboard {
    pub challenge_id: Uuid,
    pub entries: Vec<LeaderboardEntry>,
    pub total_participants: i64,
    pub updated_at: DateTime<Utc>,
}

/// Sort by value descending, then earliest join, then user id, and assign
/// unique sequential positions. Equal values never share a position.
pub fn rank_participations(participations: &mut [ChallengeParticipation]) {
    participations.sort_by(|a, b| {
        b.current_value
            .cmp(&a.current_value)
            .then_with(|| a.joined_at.cmp(&b.joined_at))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    for (index, participation) in participations.iter_mut().enumerate() {
        participation.set_position(index as i32 + 1);
    }
}

impl ChallengeLeaderboard {
    /// Build a snapshot from participations already ranked with
    /// [`rank_participations`].
    pub fn from_ranked(
        challenge_id: Uuid,
        ranked: &[ChallengeParticipation],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let entries = ranked
            .iter()
            .take(limit)
            .map(|p| LeaderboardEntry {
                position: p.position.unwrap_or_default(),
                user_id: p.user_id.clone(),
                current_value: p.current_value,
                percentage: p.percentage,
            })
            .collect();

        Self {
            challenge_id,
            entries,
            total_participants: ranked.len() as i64,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn participation(user: &str, value: i64, joined_offset_mins: i64) -> ChallengeParticipation {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut p = ChallengeParticipation::new(
            Uuid::nil(),
            user,
            1000,
            base + Duration::minutes(joined_offset_mins),
        );
        p.current_value = value;
        p
    }

    #[test]
    fn test_ties_break_on_join_time() {
        let mut ranked = vec![
            participation("d", 600, 0),
            participation("c", 800, 5),
            participation("b", 800, 1),
            participation("a", 1000, 9),
        ];

        rank_participations(&mut ranked);

        let order: Vec<(&str, i32)> = ranked
            .iter()
            .map(|p| (p.user_id.as_str(), p.position.unwrap()))
            .collect();
        assert_eq!(order, vec![("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        assert!(ranked[0].is_winner);
        assert!(ranked[2].is_top3);
        assert!(!ranked[3].is_top3);
    }

    #[test]
    fn test_ties_on_join_time_break_on_user_id() {
        let mut ranked = vec![participation("zoe", 10, 0), participation("amy", 10, 0)];

        rank_participations(&mut ranked);

        assert_eq!(ranked[0].user_id, "amy");
        assert_eq!(ranked[1].user_id, "zoe");
    }

    #[test]
    fn test_snapshot_is_capped() {
        let mut ranked: Vec<_> = (0..60)
            .map(|i| participation(&format!("user-{i:02}"), i, 0))
            .collect();
        rank_participations(&mut ranked);

        let board = ChallengeLeaderboard::from_ranked(Uuid::nil(), &ranked, 50, Utc::now());

        assert_eq!(board.entries.len(), 50);
        assert_eq!(board.total_participants, 60);
        assert_eq!(board.entries[0].user_id, "user-59");
        assert_eq!(board.entries[49].position, 50);
    }
}
