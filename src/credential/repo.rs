//! Postgres-backed credential store.
//!
//! Rotation is a transaction around a conditional `UPDATE … WHERE` and an
//! `INSERT`: the update only lands when the predecessor row is still live,
//! so two concurrent rotations of the same secret cannot both succeed, and
//! a crash between the statements rolls the whole unit back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::StoreError;

use super::models::{NewCredential, RefreshCredential, RevokedReason};
use super::store::{CredentialStore, RotateOutcome};

const SELECT_COLUMNS: &str = r"
    id, principal_id, secret_hash, family_id, expires_at,
    ip_address, user_agent, is_revoked, revoked_reason, revoked_at,
    last_used_at, created_at
";

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_credential(row: &sqlx::postgres::PgRow) -> RefreshCredential {
    let reason: Option<String> = row.get("revoked_reason");
    let ip: Option<IpNetwork> = row.get("ip_address");
    RefreshCredential {
        id: row.get("id"),
        principal_id: row.get("principal_id"),
        secret_hash: row.get("secret_hash"),
        family_id: row.get("family_id"),
        expires_at: row.get("expires_at"),
        ip_address: ip.map(|network| network.ip()),
        user_agent: row.get("user_agent"),
        is_revoked: row.get("is_revoked"),
        revoked_reason: reason.as_deref().and_then(RevokedReason::parse),
        revoked_at: row.get("revoked_at"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
    }
}

fn ip_param(credential: &NewCredential) -> Option<IpNetwork> {
    credential.ip_address.map(IpNetwork::from)
}

async fn insert_row<'e, E>(
    executor: E,
    credential: &NewCredential,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let query = r"
        INSERT INTO refresh_credentials
            (id, principal_id, secret_hash, family_id, expires_at,
             ip_address, user_agent, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(credential.id)
        .bind(credential.principal_id)
        .bind(&credential.secret_hash)
        .bind(credential.family_id)
        .bind(credential.expires_at)
        .bind(ip_param(credential))
        .bind(credential.user_agent.as_deref())
        .bind(now)
        .execute(executor)
        .instrument(span)
        .await
        .map(|_| ())
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert(
        &self,
        credential: NewCredential,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        insert_row(&self.pool, &credential, now)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to insert refresh credential"))
    }

    async fn find_by_hash(
        &self,
        secret_hash: &[u8],
    ) -> Result<Option<RefreshCredential>, StoreError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM refresh_credentials WHERE secret_hash = $1 LIMIT 1"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(secret_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to lookup refresh credential"))?;
        Ok(row.as_ref().map(row_to_credential))
    }

    async fn rotate(
        &self,
        predecessor_id: Uuid,
        successor: NewCredential,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to begin rotation transaction"))?;

        // Conditional revoke: only a still-live predecessor can be consumed.
        let query = r"
            UPDATE refresh_credentials
            SET is_revoked = TRUE,
                revoked_reason = 'rotated',
                revoked_at = $2,
                last_used_at = $2
            WHERE id = $1
              AND is_revoked = FALSE
              AND expires_at > $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(predecessor_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to revoke rotated credential"))?;

        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(RotateOutcome::Superseded);
        }

        if let Err(err) = insert_row(&mut *tx, &successor, now).await {
            let _ = tx.rollback().await;
            return Err(StoreError::from_sql(
                err,
                "failed to insert rotation successor",
            ));
        }

        tx.commit()
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to commit rotation"))?;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(
        &self,
        credential_id: Uuid,
        reason: RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE refresh_credentials
            SET is_revoked = TRUE, revoked_reason = $2, revoked_at = $3
            WHERE id = $1 AND is_revoked = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(credential_id)
            .bind(reason.as_str())
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to revoke credential"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevokedReason,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let query = r"
            UPDATE refresh_credentials
            SET is_revoked = TRUE, revoked_reason = $2, revoked_at = $3
            WHERE family_id = $1 AND is_revoked = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(family_id)
            .bind(reason.as_str())
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to revoke credential family"))?;
        Ok(result.rows_affected())
    }

    async fn sweep(
        &self,
        now: DateTime<Utc>,
        revoked_retention: Duration,
    ) -> Result<u64, StoreError> {
        // Deletes only rows that are already dead; live rows never match.
        let query = r"
            DELETE FROM refresh_credentials
            WHERE expires_at < $1
               OR (is_revoked = TRUE AND revoked_at < $1 - ($2 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .bind(i64::try_from(revoked_retention.as_secs()).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| StoreError::from_sql(err, "failed to sweep credentials"))?;
        Ok(result.rows_affected())
    }
}
