// 🚦 Usage Limiter - Quota checks against the entitlement catalog
// Pure check over caller-supplied counts. The limiter is a fast-path UX
// gate: the external store's constraints are the real backstop against the
// check-then-act race, so nothing here reserves or mutates.

use crate::entitlements::{limits_for, Limit};
use crate::tier::SubscriptionTier;
use serde::{Deserialize, Serialize};

// ============================================================================
// RESOURCE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Bank/card accounts owned by the user
    Accounts,

    /// Distinct users the owner shares resources with
    SharedUsers,

    /// Active credits
    Credits,

    /// Active recurring services
    Services,

    /// Ledger transactions (never capped)
    Transactions,

    /// AI analyses consumed in the current billing period
    AiAnalyses,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Accounts => "accounts",
            ResourceKind::SharedUsers => "shared_users",
            ResourceKind::Credits => "credits",
            ResourceKind::Services => "services",
            ResourceKind::Transactions => "transactions",
            ResourceKind::AiAnalyses => "ai_analyses",
        }
    }

    /// Parse a resource-kind string at the boundary.
    ///
    /// An unknown kind is a programming error in the caller, not user
    /// input: it surfaces as a hard failure.
    pub fn parse(value: &str) -> Result<Self, InvalidResourceKindError> {
        match value {
            "accounts" => Ok(ResourceKind::Accounts),
            "shared_users" => Ok(ResourceKind::SharedUsers),
            "credits" => Ok(ResourceKind::Credits),
            "services" => Ok(ResourceKind::Services),
            "transactions" => Ok(ResourceKind::Transactions),
            "ai_analyses" => Ok(ResourceKind::AiAnalyses),
            other => Err(InvalidResourceKindError {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resource-kind string outside the known set. Fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidResourceKindError {
    pub value: String,
}

impl std::fmt::Display for InvalidResourceKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid resource kind {:?}", self.value)
    }
}

impl std::error::Error for InvalidResourceKindError {}

// ============================================================================
// LIMIT DECISION
// ============================================================================

/// Outcome of a quota check.
///
/// `limit` is always the governing cap, so a denial can be rendered as an
/// upgrade prompt ("free allows 3 accounts") rather than a bare failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitDecision {
    pub allowed: bool,
    pub limit: Limit,
}

impl LimitDecision {
    /// Denied against a finite cap: the caller should offer an upgrade.
    pub fn upgrade_required(&self) -> bool {
        !self.allowed && !self.limit.is_unlimited()
    }
}

// ============================================================================
// CHECK
// ============================================================================

/// Decide whether one more `kind` resource may be created.
///
/// `current_count` is the number that already exist; for time-windowed
/// kinds (AI analyses) it is the count consumed in the CURRENT period -
/// period rollover is the usage record's job, not the limiter's.
///
/// `current_count == cap` is denied: the cap is the maximum that may
/// exist, not the count that triggers blocking after creation.
pub fn check_limit(
    tier: SubscriptionTier,
    kind: ResourceKind,
    current_count: u32,
) -> LimitDecision {
    let limit = limits_for(tier).limit_for(kind);
    LimitDecision {
        allowed: limit.allows(current_count),
        limit,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_account_cap_boundary() {
        // cap = 3: 2 existing accounts may add a third, 3 may not
        let under = check_limit(SubscriptionTier::Free, ResourceKind::Accounts, 2);
        assert!(under.allowed);
        assert_eq!(under.limit, Limit::Limited(3));

        let at_cap = check_limit(SubscriptionTier::Free, ResourceKind::Accounts, 3);
        assert!(!at_cap.allowed);
        assert_eq!(at_cap.limit, Limit::Limited(3));
        assert!(at_cap.upgrade_required());
    }

    #[test]
    fn test_fourth_account_on_free_denied() {
        // Free user with 3 accounts attempts a 4th
        let decision = check_limit(SubscriptionTier::Free, ResourceKind::Accounts, 3);
        assert!(!decision.allowed);
        assert_eq!(decision.limit, Limit::Limited(3));
    }

    #[test]
    fn test_premium_ai_analyses_unlimited() {
        let decision = check_limit(SubscriptionTier::Premium, ResourceKind::AiAnalyses, 1000);
        assert!(decision.allowed);
        assert_eq!(decision.limit, Limit::Unlimited);
        assert!(!decision.upgrade_required());
    }

    #[test]
    fn test_pro_ai_quota() {
        assert!(check_limit(SubscriptionTier::Pro, ResourceKind::AiAnalyses, 3).allowed);
        assert!(!check_limit(SubscriptionTier::Pro, ResourceKind::AiAnalyses, 4).allowed);
    }

    #[test]
    fn test_free_has_no_ai_allowance() {
        let decision = check_limit(SubscriptionTier::Free, ResourceKind::AiAnalyses, 0);
        assert!(!decision.allowed);
        assert_eq!(decision.limit, Limit::Limited(0));
    }

    #[test]
    fn test_shared_user_caps() {
        assert!(!check_limit(SubscriptionTier::Free, ResourceKind::SharedUsers, 0).allowed);
        assert!(check_limit(SubscriptionTier::Pro, ResourceKind::SharedUsers, 0).allowed);
        assert!(!check_limit(SubscriptionTier::Pro, ResourceKind::SharedUsers, 1).allowed);
        assert!(check_limit(SubscriptionTier::Premium, ResourceKind::SharedUsers, 4).allowed);
        assert!(!check_limit(SubscriptionTier::Premium, ResourceKind::SharedUsers, 5).allowed);
    }

    #[test]
    fn test_transactions_always_allowed() {
        let decision = check_limit(SubscriptionTier::Free, ResourceKind::Transactions, 1_000_000);
        assert!(decision.allowed);
    }

    #[test]
    fn test_parse_resource_kind() {
        assert_eq!(ResourceKind::parse("credits"), Ok(ResourceKind::Credits));
        assert_eq!(
            ResourceKind::parse("ai_analyses"),
            Ok(ResourceKind::AiAnalyses)
        );

        let err = ResourceKind::parse("widgets").unwrap_err();
        assert_eq!(err.value, "widgets");
    }
}
