// src/models/subscription.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed status domain for local subscription records. Anything stored
/// outside this set is a critical consistency violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    Archived,
}

impl SubscriptionStatus {
    /// Parse a raw stored status string. Returns `None` for values outside
    /// the domain so callers can report them instead of panicking.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "trialing" => Some(Self::Trialing),
            "past_due" => Some(Self::PastDue),
            "canceled" => Some(Self::Canceled),
            "incomplete" => Some(Self::Incomplete),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::Archived => "archived",
        }
    }

    /// Statuses that count as "active" for the singleton-active invariant.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

/// A subscription row in the local system-of-record.
///
/// `status` is kept as the raw stored string so the status-domain check can
/// observe out-of-domain values; use [`SubscriptionStatus::parse`] to get the
/// typed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSubscription {
    pub id: Uuid,
    /// Owning user/account.
    pub owner_id: Uuid,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// Identifier of the corresponding record at the billing provider.
    /// `None` for purely local (unpaid/manual) subscriptions.
    pub remote_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalSubscription {
    pub fn parsed_status(&self) -> Option<SubscriptionStatus> {
        SubscriptionStatus::parse(&self.status)
    }

    /// Whether this record is linked to a paid provider-side subscription.
    pub fn is_paid(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// The billing provider's authoritative view of a subscription. Read-only
/// ground truth for the fields it owns (status, amount, billing period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

impl RemoteSubscription {
    /// Map the provider's status vocabulary onto the local domain.
    pub fn local_status(&self) -> Option<SubscriptionStatus> {
        match self.status.as_str() {
            "active" => Some(SubscriptionStatus::Active),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "past_due" | "unpaid" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "incomplete" | "incomplete_expired" => Some(SubscriptionStatus::Incomplete),
            _ => None,
        }
    }
}
