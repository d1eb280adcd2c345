//! Quota ledger: decide and record whether a generation may be consumed.
//!
//! Flow Overview:
//! 1) Snapshot the principal and gate on platform entitlement.
//! 2) Trial principals: strict denial after trial expiry, then the
//!    verification-dependent trial cap.
//! 3) Paid principals: the plan's monthly allotment, with the periodic
//!    reset folded into the store's atomic consume.
//!
//! The snapshot is advisory; the store's conditional increment is what
//! actually enforces the cap under concurrency.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::error::StoreError;

use super::models::{Plan, Platform, QuotaDecision, QuotaDenial, QuotaPolicy};
use super::store::PrincipalStore;

pub struct QuotaLedger {
    store: Arc<dyn PrincipalStore>,
    policy: QuotaPolicy,
}

impl QuotaLedger {
    #[must_use]
    pub fn new(store: Arc<dyn PrincipalStore>, policy: QuotaPolicy) -> Self {
        Self { store, policy }
    }

    /// Attempt to consume one generation for `principal_id` on `platform`.
    pub async fn try_consume(
        &self,
        principal_id: Uuid,
        platform: Platform,
    ) -> Result<QuotaDecision, StoreError> {
        self.try_consume_at(principal_id, platform, Utc::now()).await
    }

    /// `try_consume` against a provided instant; trial expiry and monthly
    /// resets are evaluated relative to `now`.
    pub async fn try_consume_at(
        &self,
        principal_id: Uuid,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, StoreError> {
        let Some(snapshot) = self.store.quota_snapshot(principal_id).await? else {
            // Callers hold an authenticated principal id; a missing row is
            // data inconsistency, not a user-facing denial.
            error!(%principal_id, "quota consume for unknown principal");
            return Err(StoreError::NotFound);
        };

        if !snapshot.platforms.allows(platform) {
            return Ok(QuotaDecision::Denied(QuotaDenial::PlatformNotEntitled));
        }

        if snapshot.plan == Plan::Trial {
            if now >= snapshot.trial_ends_at {
                return Ok(QuotaDecision::Denied(QuotaDenial::TrialExpired));
            }
            let cap = self.policy.trial_cap(snapshot.email_verified);
            return match self.store.consume_trial(principal_id, cap).await? {
                Some(used) => Ok(QuotaDecision::Permitted {
                    remaining: (cap - used).max(0),
                }),
                None => Ok(QuotaDecision::Denied(if snapshot.email_verified {
                    QuotaDenial::UpgradeRequired
                } else {
                    QuotaDenial::VerifyEmailToUnlock
                })),
            };
        }

        let cap = self.policy.monthly_cap(snapshot.plan);
        match self.store.consume_monthly(principal_id, cap, now).await? {
            Some(used) => Ok(QuotaDecision::Permitted {
                remaining: (cap - used).max(0),
            }),
            None => Ok(QuotaDecision::Denied(QuotaDenial::UpgradeRequired)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QuotaLedger;
    use crate::quota::models::{
        Plan, Platform, PlatformAccess, QuotaDecision, QuotaDenial, QuotaPolicy, QuotaSnapshot,
    };
    use crate::quota::store::MemoryPrincipalStore;
    use anyhow::Result;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    fn snapshot(plan: Plan, now: DateTime<Utc>) -> QuotaSnapshot {
        QuotaSnapshot {
            principal_id: Uuid::new_v4(),
            plan,
            email_verified: false,
            trial_started_at: now - Duration::days(1),
            trial_ends_at: now + Duration::days(13),
            trial_generations_used: 0,
            monthly_generation_count: 0,
            monthly_reset_at: now + Duration::days(20),
            platforms: PlatformAccess::all(),
        }
    }

    async fn ledger_with(
        snapshot: QuotaSnapshot,
    ) -> (QuotaLedger, Arc<MemoryPrincipalStore>, Uuid) {
        let id = snapshot.principal_id;
        let store = Arc::new(MemoryPrincipalStore::new());
        store.upsert(snapshot).await;
        (
            QuotaLedger::new(store.clone(), QuotaPolicy::new()),
            store,
            id,
        )
    }

    #[tokio::test]
    async fn platform_gate_wins_over_remaining_count() -> Result<()> {
        let now = Utc::now();
        let mut principal = snapshot(Plan::Pro, now);
        principal.platforms = PlatformAccess {
            instagram: true,
            ..PlatformAccess::default()
        };
        let (ledger, _, id) = ledger_with(principal).await;

        let decision = ledger.try_consume_at(id, Platform::Youtube, now).await?;
        assert_eq!(
            decision,
            QuotaDecision::Denied(QuotaDenial::PlatformNotEntitled)
        );
        // Denied consumes must not burn quota.
        let decision = ledger.try_consume_at(id, Platform::Instagram, now).await?;
        assert_eq!(decision, QuotaDecision::Permitted { remaining: 199 });
        Ok(())
    }

    #[tokio::test]
    async fn expired_trial_denies_regardless_of_count() -> Result<()> {
        let now = Utc::now();
        let mut principal = snapshot(Plan::Trial, now);
        principal.trial_ends_at = now - Duration::hours(1);
        let (ledger, _, id) = ledger_with(principal).await;

        let decision = ledger.try_consume_at(id, Platform::Instagram, now).await?;
        assert_eq!(decision, QuotaDecision::Denied(QuotaDenial::TrialExpired));
        Ok(())
    }

    #[tokio::test]
    async fn unverified_trial_cap_lifts_after_verification() -> Result<()> {
        let now = Utc::now();
        let mut principal = snapshot(Plan::Trial, now);
        principal.trial_generations_used = 5;
        let (ledger, store, id) = ledger_with(principal).await;

        let decision = ledger.try_consume_at(id, Platform::Tiktok, now).await?;
        assert_eq!(
            decision,
            QuotaDecision::Denied(QuotaDenial::VerifyEmailToUnlock)
        );

        // Verification raises the cap from 5 to 15 for the same principal.
        store.set_email_verified(id, true).await;
        let decision = ledger.try_consume_at(id, Platform::Tiktok, now).await?;
        assert_eq!(decision, QuotaDecision::Permitted { remaining: 9 });
        Ok(())
    }

    #[tokio::test]
    async fn verified_trial_at_cap_points_at_upgrade() -> Result<()> {
        let now = Utc::now();
        let mut principal = snapshot(Plan::Trial, now);
        principal.email_verified = true;
        principal.trial_generations_used = 15;
        let (ledger, _, id) = ledger_with(principal).await;

        let decision = ledger.try_consume_at(id, Platform::Instagram, now).await?;
        assert_eq!(decision, QuotaDecision::Denied(QuotaDenial::UpgradeRequired));
        Ok(())
    }

    #[tokio::test]
    async fn crossed_reset_date_restarts_the_monthly_counter() -> Result<()> {
        let now = Utc::now();
        let mut principal = snapshot(Plan::Starter, now);
        principal.monthly_generation_count = 49;
        principal.monthly_reset_at = now - Duration::days(2);
        let (ledger, store, id) = ledger_with(principal).await;

        let decision = ledger.try_consume_at(id, Platform::Youtube, now).await?;
        assert_eq!(decision, QuotaDecision::Permitted { remaining: 49 });

        let refreshed = crate::quota::store::PrincipalStore::quota_snapshot(store.as_ref(), id)
            .await?
            .expect("principal");
        assert_eq!(refreshed.monthly_generation_count, 1);
        assert!(refreshed.monthly_reset_at > now);
        Ok(())
    }

    #[tokio::test]
    async fn paid_plan_at_cap_requires_upgrade() -> Result<()> {
        let now = Utc::now();
        let mut principal = snapshot(Plan::Starter, now);
        principal.monthly_generation_count = 50;
        let (ledger, _, id) = ledger_with(principal).await;

        let decision = ledger.try_consume_at(id, Platform::Linkedin, now).await?;
        assert_eq!(decision, QuotaDecision::Denied(QuotaDenial::UpgradeRequired));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_principal_is_an_operational_fault() {
        let store = Arc::new(MemoryPrincipalStore::new());
        let ledger = QuotaLedger::new(store, QuotaPolicy::new());
        let result = ledger.try_consume(Uuid::new_v4(), Platform::Instagram).await;
        assert!(result.is_err());
    }
}
