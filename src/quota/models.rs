//! Plans, platforms, and the derived quota view of a principal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing plan. `Trial` counts against the trial window; everything else
/// against a monthly allotment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Trial,
    Starter,
    Pro,
    Agency,
}

impl Plan {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Agency => "agency",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trial" => Some(Self::Trial),
            "starter" => Some(Self::Starter),
            "pro" => Some(Self::Pro),
            "agency" => Some(Self::Agency),
            _ => None,
        }
    }
}

/// Publishing targets gated per principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Instagram,
    Tiktok,
    Youtube,
    Linkedin,
}

impl Platform {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
            Self::Youtube => "youtube",
            Self::Linkedin => "linkedin",
        }
    }
}

/// Per-platform access flags carried on the principal record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlatformAccess {
    pub instagram: bool,
    pub tiktok: bool,
    pub youtube: bool,
    pub linkedin: bool,
}

impl PlatformAccess {
    /// Every platform enabled; convenient for tests and top-tier plans.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            instagram: true,
            tiktok: true,
            youtube: true,
            linkedin: true,
        }
    }

    #[must_use]
    pub const fn allows(&self, platform: Platform) -> bool {
        match platform {
            Platform::Instagram => self.instagram,
            Platform::Tiktok => self.tiktok,
            Platform::Youtube => self.youtube,
            Platform::Linkedin => self.linkedin,
        }
    }
}

/// Quota-relevant snapshot of a principal, derived at read time. Counters
/// are only ever advanced through the store's atomic consume operations.
#[derive(Clone, Debug)]
pub struct QuotaSnapshot {
    pub principal_id: Uuid,
    pub plan: Plan,
    pub email_verified: bool,
    pub trial_started_at: DateTime<Utc>,
    pub trial_ends_at: DateTime<Utc>,
    pub trial_generations_used: i64,
    pub monthly_generation_count: i64,
    pub monthly_reset_at: DateTime<Utc>,
    pub platforms: PlatformAccess,
}

/// Caps applied by the ledger. The trial cap splits on email verification;
/// paid plans get a flat monthly allotment.
#[derive(Clone, Copy, Debug)]
pub struct QuotaPolicy {
    trial_cap_unverified: i64,
    trial_cap_verified: i64,
    starter_monthly_cap: i64,
    pro_monthly_cap: i64,
    agency_monthly_cap: i64,
}

impl QuotaPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trial_cap_unverified: 5,
            trial_cap_verified: 15,
            starter_monthly_cap: 50,
            pro_monthly_cap: 200,
            agency_monthly_cap: 1000,
        }
    }

    #[must_use]
    pub fn with_trial_caps(mut self, unverified: i64, verified: i64) -> Self {
        self.trial_cap_unverified = unverified;
        self.trial_cap_verified = verified;
        self
    }

    #[must_use]
    pub fn with_monthly_caps(mut self, starter: i64, pro: i64, agency: i64) -> Self {
        self.starter_monthly_cap = starter;
        self.pro_monthly_cap = pro;
        self.agency_monthly_cap = agency;
        self
    }

    #[must_use]
    pub fn trial_cap(&self, email_verified: bool) -> i64 {
        if email_verified {
            self.trial_cap_verified
        } else {
            self.trial_cap_unverified
        }
    }

    #[must_use]
    pub fn monthly_cap(&self, plan: Plan) -> i64 {
        match plan {
            // Trial principals never reach the monthly path.
            Plan::Trial => 0,
            Plan::Starter => self.starter_monthly_cap,
            Plan::Pro => self.pro_monthly_cap,
            Plan::Agency => self.agency_monthly_cap,
        }
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one consume attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaDecision {
    Permitted { remaining: i64 },
    Denied(QuotaDenial),
}

/// Machine-readable denial reason so callers can render the right next
/// action without this layer knowing about presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum QuotaDenial {
    #[serde(rename = "TRIAL_EXPIRED")]
    TrialExpired,
    /// Cap reached, but verifying the email raises it.
    #[serde(rename = "VERIFY_EMAIL_TO_UNLOCK")]
    VerifyEmailToUnlock,
    /// Cap reached on the current plan.
    #[serde(rename = "UPGRADE_REQUIRED")]
    UpgradeRequired,
    #[serde(rename = "PLATFORM_NOT_ENTITLED")]
    PlatformNotEntitled,
}

impl QuotaDenial {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrialExpired => "TRIAL_EXPIRED",
            Self::VerifyEmailToUnlock => "VERIFY_EMAIL_TO_UNLOCK",
            Self::UpgradeRequired => "UPGRADE_REQUIRED",
            Self::PlatformNotEntitled => "PLATFORM_NOT_ENTITLED",
        }
    }
}
