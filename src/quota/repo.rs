//! Postgres-backed principal store.
//!
//! Each consume is a single conditional `UPDATE … RETURNING`: the cap check
//! and the increment land in one statement, so concurrent requests serialize
//! on the row and the counter can never pass the cap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::StoreError;

use super::models::{Plan, PlatformAccess, QuotaSnapshot};
use super::store::PrincipalStore;

#[derive(Clone, Debug)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrincipalStore for PgPrincipalStore {
    async fn quota_snapshot(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<QuotaSnapshot>, StoreError> {
        let query = r"
            SELECT id, plan, email_verified, trial_started_at, trial_ends_at,
                   trial_generations_used, monthly_generation_count, monthly_reset_at,
                   platform_instagram, platform_tiktok, platform_youtube, platform_linkedin
            FROM principals
            WHERE id = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to load principal quota state"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let plan: String = row.get("plan");
        let Some(plan) = Plan::parse(&plan) else {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "unknown plan value: {plan}"
            )));
        };
        Ok(Some(QuotaSnapshot {
            principal_id: row.get("id"),
            plan,
            email_verified: row.get("email_verified"),
            trial_started_at: row.get("trial_started_at"),
            trial_ends_at: row.get("trial_ends_at"),
            trial_generations_used: row.get("trial_generations_used"),
            monthly_generation_count: row.get("monthly_generation_count"),
            monthly_reset_at: row.get("monthly_reset_at"),
            platforms: PlatformAccess {
                instagram: row.get("platform_instagram"),
                tiktok: row.get("platform_tiktok"),
                youtube: row.get("platform_youtube"),
                linkedin: row.get("platform_linkedin"),
            },
        }))
    }

    async fn consume_trial(
        &self,
        principal_id: Uuid,
        cap: i64,
    ) -> Result<Option<i64>, StoreError> {
        // Cap check and increment in one statement; no read-then-write gap.
        let query = r"
            UPDATE principals
            SET trial_generations_used = trial_generations_used + 1
            WHERE id = $1 AND trial_generations_used < $2
            RETURNING trial_generations_used
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(cap)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to consume trial generation"))?;
        Ok(row.map(|row| row.get("trial_generations_used")))
    }

    async fn consume_monthly(
        &self,
        principal_id: Uuid,
        cap: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        // A crossed reset date zeroes the counter and advances the period
        // inside the same statement that counts this consume.
        let query = r"
            UPDATE principals
            SET monthly_generation_count = CASE
                    WHEN monthly_reset_at <= $3 THEN 1
                    ELSE monthly_generation_count + 1
                END,
                monthly_reset_at = CASE
                    WHEN monthly_reset_at <= $3 THEN $3 + INTERVAL '1 month'
                    ELSE monthly_reset_at
                END
            WHERE id = $1
              AND (monthly_reset_at <= $3 OR monthly_generation_count < $2)
            RETURNING monthly_generation_count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(cap)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to consume monthly generation"))?;
        Ok(row.map(|row| row.get("monthly_generation_count")))
    }
}
