use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, QueryBuilder};
use uuid::Uuid;

use super::{parse_text, unique_violation};
use crate::error::{Result, StorageError};
use crate::models::{
    Challenge, ChallengeLeaderboard, ChallengeParticipation, ChallengeStatus, RewardTier,
};

const CHALLENGE_COLUMNS: &str = "challenge_id, title, description, challenge_type, difficulty, \
     status, start_date, end_date, metric, target_value, rewards, participant_count, \
     completion_rate, created_at, updated_at, completed_at";

const PARTICIPATION_COLUMNS: &str = "challenge_id, user_id, current_value, target_value, \
     percentage, position, is_winner, is_top3, is_top10, reward_tier, reward, \
     reward_distributed, joined_at, updated_at";

/// Keeps each batched statement well under the bind-parameter limit.
const WRITE_CHUNK: usize = 1000;

#[derive(FromRow)]
struct ChallengeRow {
    challenge_id: Uuid,
    title: String,
    description: Option<String>,
    challenge_type: String,
    difficulty: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    metric: String,
    target_value: i64,
    rewards: serde_json::Value,
    participant_count: i64,
    completion_rate: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ChallengeRow> for Challenge {
    type Error = StorageError;

    fn try_from(row: ChallengeRow) -> Result<Self> {
        Ok(Self {
            challenge_id: row.challenge_id,
            title: row.title,
            description: row.description,
            challenge_type: parse_text(&row.challenge_type, "challenge_type")?,
            difficulty: parse_text(&row.difficulty, "difficulty")?,
            status: parse_text(&row.status, "status")?,
            start_date: row.start_date,
            end_date: row.end_date,
            metric: parse_text(&row.metric, "metric")?,
            target_value: row.target_value,
            rewards: serde_json::from_value(row.rewards)?,
            participant_count: row.participant_count,
            completion_rate: row.completion_rate,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct ParticipationRow {
    challenge_id: Uuid,
    user_id: String,
    current_value: i64,
    target_value: i64,
    percentage: f64,
    position: Option<i32>,
    is_winner: bool,
    is_top3: bool,
    is_top10: bool,
    reward_tier: Option<String>,
    reward: Option<serde_json::Value>,
    reward_distributed: bool,
    joined_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ParticipationRow> for ChallengeParticipation {
    type Error = StorageError;

    fn try_from(row: ParticipationRow) -> Result<Self> {
        let reward_tier = row
            .reward_tier
            .as_deref()
            .map(|tier| parse_text::<RewardTier>(tier, "reward_tier"))
            .transpose()?;
        let reward = row.reward.map(serde_json::from_value).transpose()?;

        Ok(Self {
            challenge_id: row.challenge_id,
            user_id: row.user_id,
            current_value: row.current_value,
            target_value: row.target_value,
            percentage: row.percentage,
            position: row.position,
            is_winner: row.is_winner,
            is_top3: row.is_top3,
            is_top10: row.is_top10,
            reward_tier,
            reward,
            reward_distributed: row.reward_distributed,
            joined_at: row.joined_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct LeaderboardRow {
    challenge_id: Uuid,
    entries: serde_json::Value,
    total_participants: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeaderboardRow> for ChallengeLeaderboard {
    type Error = StorageError;

    fn try_from(row: LeaderboardRow) -> Result<Self> {
        Ok(Self {
            challenge_id: row.challenge_id,
            entries: serde_json::from_value(row.entries)?,
            total_participants: row.total_participants,
            updated_at: row.updated_at,
        })
    }
}

fn into_challenges(rows: Vec<ChallengeRow>) -> Result<Vec<Challenge>> {
    rows.into_iter().map(Challenge::try_from).collect()
}

fn into_participations(rows: Vec<ParticipationRow>) -> Result<Vec<ChallengeParticipation>> {
    rows.into_iter().map(ChallengeParticipation::try_from).collect()
}

/// Repository for challenges, participations and leaderboard snapshots
pub struct ChallengeRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ChallengeRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, challenge: &Challenge) -> Result<()> {
        let rewards = serde_json::to_value(&challenge.rewards)?;

        sqlx::query(
            r#"
            INSERT INTO challenges (
                challenge_id, title, description, challenge_type, difficulty, status,
                start_date, end_date, metric, target_value, rewards, participant_count,
                completion_rate, created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(&challenge.title)
        .bind(&challenge.description)
        .bind(challenge.challenge_type.as_ref())
        .bind(challenge.difficulty.as_ref())
        .bind(challenge.status.as_ref())
        .bind(challenge.start_date)
        .bind(challenge.end_date)
        .bind(challenge.metric.as_ref())
        .bind(challenge.target_value)
        .bind(rewards)
        .bind(challenge.participant_count)
        .bind(challenge.completion_rate)
        .bind(challenge.created_at)
        .bind(challenge.updated_at)
        .bind(challenge.completed_at)
        .execute(self.pool)
        .await
        .map_err(|e| unique_violation(e, "Challenge already exists"))?;

        Ok(())
    }

    pub async fn find_by_id(&self, challenge_id: Uuid) -> Result<Challenge> {
        let sql = format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE challenge_id = $1");
        let row: ChallengeRow = sqlx::query_as(&sql)
            .bind(challenge_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StorageError::NotFound)?;

        row.try_into()
    }

    pub async fn list(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>> {
        let mut query = QueryBuilder::new(format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE 1=1"));

        if let Some(status) = status {
            query.push(" AND status = ");
            query.push_bind(status.to_string());
        }

        query.push(" ORDER BY start_date DESC");

        let rows: Vec<ChallengeRow> = query.build_query_as().fetch_all(self.pool).await?;

        into_challenges(rows)
    }

    pub async fn due_for_activation(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>> {
        let sql = format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE status = 'upcoming' AND start_date <= $1"
        );
        let rows: Vec<ChallengeRow> = sqlx::query_as(&sql).bind(now).fetch_all(self.pool).await?;

        into_challenges(rows)
    }

    pub async fn due_for_completion(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>> {
        let sql = format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE status = 'active' AND end_date <= $1"
        );
        let rows: Vec<ChallengeRow> = sqlx::query_as(&sql).bind(now).fetch_all(self.pool).await?;

        into_challenges(rows)
    }

    /// Conditional status change; `None` when the row is no longer in `from`.
    pub async fn set_status(
        &self,
        challenge_id: Uuid,
        from: ChallengeStatus,
        to: ChallengeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Challenge>> {
        let sql = format!(
            r#"
            UPDATE challenges
            SET status = $3, updated_at = $4
            WHERE challenge_id = $1 AND status = $2
            RETURNING {CHALLENGE_COLUMNS}
            "#
        );
        let row: Option<ChallengeRow> = sqlx::query_as(&sql)
            .bind(challenge_id)
            .bind(from.as_ref())
            .bind(to.as_ref())
            .bind(now)
            .fetch_optional(self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => {
                // Distinguish a missing challenge from a lost race.
                self.find_by_id(challenge_id).await?;
                Ok(None)
            }
        }
    }

    /// Insert the participation and bump the counter in one transaction.
    pub async fn join(&self, participation: &ChallengeParticipation) -> Result<Challenge> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO challenge_participations (
                challenge_id, user_id, current_value, target_value, percentage, joined_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(participation.challenge_id)
        .bind(&participation.user_id)
        .bind(participation.current_value)
        .bind(participation.target_value)
        .bind(participation.percentage)
        .bind(participation.joined_at)
        .bind(participation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, "User already joined this challenge"))?;

        let sql = format!(
            r#"
            UPDATE challenges
            SET participant_count = participant_count + 1, updated_at = $2
            WHERE challenge_id = $1
            RETURNING {CHALLENGE_COLUMNS}
            "#
        );
        let row: ChallengeRow = sqlx::query_as(&sql)
            .bind(participation.challenge_id)
            .bind(participation.joined_at)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StorageError::NotFound)?;

        tx.commit().await?;

        row.try_into()
    }

    pub async fn find_participation(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ChallengeParticipation>> {
        let sql = format!(
            "SELECT {PARTICIPATION_COLUMNS} FROM challenge_participations \
             WHERE challenge_id = $1 AND user_id = $2"
        );
        let row: Option<ParticipationRow> = sqlx::query_as(&sql)
            .bind(challenge_id)
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;

        row.map(ChallengeParticipation::try_from).transpose()
    }

    pub async fn save_progress(&self, participation: &ChallengeParticipation) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE challenge_participations
            SET current_value = $3, percentage = $4, updated_at = $5
            WHERE challenge_id = $1 AND user_id = $2
            "#,
        )
        .bind(participation.challenge_id)
        .bind(&participation.user_id)
        .bind(participation.current_value)
        .bind(participation.percentage)
        .bind(participation.updated_at)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        Ok(())
    }

    /// Ordered by value descending, earliest join, then user id.
    pub async fn list_participations(&self, challenge_id: Uuid) -> Result<Vec<ChallengeParticipation>> {
        let sql = format!(
            r#"
            SELECT {PARTICIPATION_COLUMNS}
            FROM challenge_participations
            WHERE challenge_id = $1
            ORDER BY current_value DESC, joined_at ASC, user_id ASC
            "#
        );
        let rows: Vec<ParticipationRow> = sqlx::query_as(&sql)
            .bind(challenge_id)
            .fetch_all(self.pool)
            .await?;

        into_participations(rows)
    }

    pub async fn user_participations(
        &self,
        user_id: &str,
        status: ChallengeStatus,
    ) -> Result<Vec<(Challenge, ChallengeParticipation)>> {
        let sql = format!(
            r#"
            SELECT {PARTICIPATION_COLUMNS}
            FROM challenge_participations cp
            WHERE cp.user_id = $1
              AND EXISTS (
                  SELECT 1 FROM challenges c
                  WHERE c.challenge_id = cp.challenge_id AND c.status = $2
              )
            "#
        );
        let rows: Vec<ParticipationRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(status.as_ref())
            .fetch_all(self.pool)
            .await?;

        let mut pairs = Vec::with_capacity(rows.len());
        for participation in into_participations(rows)? {
            let challenge = self.find_by_id(participation.challenge_id).await?;
            pairs.push((challenge, participation));
        }

        Ok(pairs)
    }

    pub async fn write_leaderboard(
        &self,
        ranked: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        write_positions(&mut tx, board.challenge_id, ranked, false).await?;
        upsert_leaderboard(&mut tx, board).await?;

        tx.commit().await?;

        Ok(())
    }

    pub async fn find_leaderboard(&self, challenge_id: Uuid) -> Result<Option<ChallengeLeaderboard>> {
        let row: Option<LeaderboardRow> = sqlx::query_as(
            r#"
            SELECT challenge_id, entries, total_participants, updated_at
            FROM challenge_leaderboards
            WHERE challenge_id = $1
            "#,
        )
        .bind(challenge_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(ChallengeLeaderboard::try_from).transpose()
    }

    pub async fn complete(
        &self,
        challenge: &Challenge,
        settled: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE challenges
            SET status = $2, completion_rate = $3, participant_count = $4,
                completed_at = $5, updated_at = $6
            WHERE challenge_id = $1 AND status = $7
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(ChallengeStatus::Completed.as_ref())
        .bind(challenge.completion_rate)
        .bind(challenge.participant_count)
        .bind(challenge.completed_at)
        .bind(challenge.updated_at)
        .bind(ChallengeStatus::Active.as_ref())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            self.find_by_id(challenge.challenge_id).await?;
            return Ok(false);
        }

        write_positions(&mut tx, challenge.challenge_id, settled, true).await?;
        upsert_leaderboard(&mut tx, board).await?;

        tx.commit().await?;

        Ok(true)
    }

    pub async fn mark_reward_distributed(&self, challenge_id: Uuid, user_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE challenge_participations
            SET reward_distributed = TRUE
            WHERE challenge_id = $1 AND user_id = $2
            "#,
        )
        .bind(challenge_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        Ok(())
    }
}

/// Batched position write-back. Current values are left alone so a progress
/// update racing with a rebuild is not overwritten.
async fn write_positions(
    conn: &mut PgConnection,
    challenge_id: Uuid,
    ranked: &[ChallengeParticipation],
    with_rewards: bool,
) -> Result<()> {
    for chunk in ranked.chunks(WRITE_CHUNK) {
        let rewards = chunk
            .iter()
            .map(|p| p.reward.as_ref().map(serde_json::to_value).transpose())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut query = QueryBuilder::new(
            "UPDATE challenge_participations AS cp SET \
             position = v.position, is_winner = v.is_winner, \
             is_top3 = v.is_top3, is_top10 = v.is_top10",
        );
        if with_rewards {
            query.push(", reward_tier = v.reward_tier, reward = v.reward");
        }
        query.push(" FROM (");
        query.push_values(chunk.iter().zip(rewards), |mut row, (p, reward)| {
            row.push_bind(&p.user_id)
                .push_bind(p.position)
                .push_bind(p.is_winner)
                .push_bind(p.is_top3)
                .push_bind(p.is_top10)
                .push_bind(p.reward_tier.map(|t| t.to_string()))
                .push_bind(reward);
        });
        query.push(
            ") AS v(user_id, position, is_winner, is_top3, is_top10, reward_tier, reward) \
             WHERE cp.user_id = v.user_id AND cp.challenge_id = ",
        );
        query.push_bind(challenge_id);

        query.build().execute(&mut *conn).await?;
    }

    Ok(())
}

async fn upsert_leaderboard(conn: &mut PgConnection, board: &ChallengeLeaderboard) -> Result<()> {
    let entries = serde_json::to_value(&board.entries)?;

    sqlx::query(
        r#"
        INSERT INTO challenge_leaderboards (challenge_id, entries, total_participants, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (challenge_id) DO UPDATE SET
            entries = EXCLUDED.entries,
            total_participants = EXCLUDED.total_participants,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(board.challenge_id)
    .bind(entries)
    .bind(board.total_participants)
    .bind(board.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
