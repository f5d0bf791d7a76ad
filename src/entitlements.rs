// 📋 Entitlement Catalog - Static tier → limits configuration
// Authoritative, versionless configuration. Nothing here is computed from
// external state; a tier always maps to the same entitlement set.

use crate::limiter::ResourceKind;
use crate::tier::SubscriptionTier;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

// ============================================================================
// LIMIT
// ============================================================================

/// A single numeric cap, or no cap at all.
///
/// Serializes as the bare number for `Limited(n)` and the string
/// `"unlimited"` otherwise, matching the API response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Finite cap: the maximum number of resources that may exist
    Limited(u32),

    /// No cap
    Unlimited,
}

impl Limit {
    /// Whether creating one more resource is allowed given the current count.
    ///
    /// Strict less-than: `current == cap` is already at the maximum.
    pub fn allows(&self, current_count: u32) -> bool {
        match self {
            Limit::Limited(cap) => current_count < *cap,
            Limit::Unlimited => true,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Limited(cap) => write!(f, "{}", cap),
            Limit::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Limited(cap) => serializer.serialize_u32(*cap),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LimitVisitor;

        impl<'de> Visitor<'de> for LimitVisitor {
            type Value = Limit;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a non-negative integer or the string \"unlimited\"")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Limit, E> {
                u32::try_from(value)
                    .map(Limit::Limited)
                    .map_err(|_| E::custom(format!("limit {} out of range", value)))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Limit, E> {
                if value == "unlimited" {
                    Ok(Limit::Unlimited)
                } else {
                    Err(E::custom(format!("unexpected limit string {:?}", value)))
                }
            }
        }

        deserializer.deserialize_any(LimitVisitor)
    }
}

// ============================================================================
// ENTITLEMENT SET
// ============================================================================

/// The limits a tier grants. Immutable static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSet {
    /// Accounts the user may own
    pub max_accounts: Limit,

    /// Distinct users the owner may share resources with
    pub max_shared_users: Limit,

    /// Concurrent active credits
    pub max_active_credits: Limit,

    /// Concurrent active recurring services
    pub max_active_services: Limit,

    /// AI analyses per billing period
    pub ai_analyses_per_period: Limit,
}

impl EntitlementSet {
    /// Cap governing one resource kind.
    ///
    /// Transactions are never capped on any tier.
    pub fn limit_for(&self, kind: ResourceKind) -> Limit {
        match kind {
            ResourceKind::Accounts => self.max_accounts,
            ResourceKind::SharedUsers => self.max_shared_users,
            ResourceKind::Credits => self.max_active_credits,
            ResourceKind::Services => self.max_active_services,
            ResourceKind::Transactions => Limit::Unlimited,
            ResourceKind::AiAnalyses => self.ai_analyses_per_period,
        }
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// Entitlements for a tier.
///
/// | limit              | free | pro       | premium   |
/// |--------------------|------|-----------|-----------|
/// | accounts           | 3    | unlimited | unlimited |
/// | shared users       | 0    | 1         | 5         |
/// | active credits     | 3    | unlimited | unlimited |
/// | active services    | 3    | unlimited | unlimited |
/// | AI analyses/period | 0    | 4         | unlimited |
pub fn limits_for(tier: SubscriptionTier) -> EntitlementSet {
    match tier {
        SubscriptionTier::Free => EntitlementSet {
            max_accounts: Limit::Limited(3),
            max_shared_users: Limit::Limited(0),
            max_active_credits: Limit::Limited(3),
            max_active_services: Limit::Limited(3),
            ai_analyses_per_period: Limit::Limited(0),
        },
        SubscriptionTier::Pro => EntitlementSet {
            max_accounts: Limit::Unlimited,
            max_shared_users: Limit::Limited(1),
            max_active_credits: Limit::Unlimited,
            max_active_services: Limit::Unlimited,
            ai_analyses_per_period: Limit::Limited(4),
        },
        SubscriptionTier::Premium => EntitlementSet {
            max_accounts: Limit::Unlimited,
            max_shared_users: Limit::Limited(5),
            max_active_credits: Limit::Unlimited,
            max_active_services: Limit::Unlimited,
            ai_analyses_per_period: Limit::Unlimited,
        },
    }
}

/// Monthly price in USD cents
pub fn monthly_price_cents(tier: SubscriptionTier) -> u32 {
    match tier {
        SubscriptionTier::Free => 0,
        SubscriptionTier::Pro => 499,
        SubscriptionTier::Premium => 999,
    }
}

/// Payment-provider plan identifier for a paid tier.
///
/// Free has no plan: there is nothing to check out.
pub fn plan_id(tier: SubscriptionTier) -> Option<&'static str> {
    match tier {
        SubscriptionTier::Free => None,
        SubscriptionTier::Pro => Some("plan_pro_monthly"),
        SubscriptionTier::Premium => Some("plan_premium_monthly"),
    }
}

/// Map an inbound provider plan identifier back to a tier.
pub fn tier_for_plan(plan: &str) -> Option<SubscriptionTier> {
    match plan {
        "plan_pro_monthly" => Some(SubscriptionTier::Pro),
        "plan_premium_monthly" => Some(SubscriptionTier::Premium),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_total_and_deterministic() {
        for tier in SubscriptionTier::ALL {
            assert_eq!(limits_for(tier), limits_for(tier));
        }
    }

    #[test]
    fn test_free_tier_caps() {
        let set = limits_for(SubscriptionTier::Free);
        assert_eq!(set.max_accounts, Limit::Limited(3));
        assert_eq!(set.max_shared_users, Limit::Limited(0));
        assert_eq!(set.ai_analyses_per_period, Limit::Limited(0));
    }

    #[test]
    fn test_pro_tier_caps() {
        let set = limits_for(SubscriptionTier::Pro);
        assert_eq!(set.max_accounts, Limit::Unlimited);
        assert_eq!(set.max_shared_users, Limit::Limited(1));
        assert_eq!(set.ai_analyses_per_period, Limit::Limited(4));
    }

    #[test]
    fn test_premium_tier_unlimited() {
        let set = limits_for(SubscriptionTier::Premium);
        assert!(set.max_accounts.is_unlimited());
        assert!(set.ai_analyses_per_period.is_unlimited());
        assert_eq!(set.max_shared_users, Limit::Limited(5));
    }

    #[test]
    fn test_transactions_never_capped() {
        for tier in SubscriptionTier::ALL {
            assert!(limits_for(tier)
                .limit_for(ResourceKind::Transactions)
                .is_unlimited());
        }
    }

    #[test]
    fn test_limit_allows_strict_less_than() {
        let cap = Limit::Limited(3);
        assert!(cap.allows(2));
        assert!(!cap.allows(3));
        assert!(!cap.allows(4));
        assert!(Limit::Unlimited.allows(u32::MAX));
    }

    #[test]
    fn test_limit_serde_shape() {
        assert_eq!(serde_json::to_string(&Limit::Limited(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&Limit::Unlimited).unwrap(),
            "\"unlimited\""
        );

        let n: Limit = serde_json::from_str("4").unwrap();
        assert_eq!(n, Limit::Limited(4));
        let u: Limit = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(u, Limit::Unlimited);
        assert!(serde_json::from_str::<Limit>("\"lots\"").is_err());
    }

    #[test]
    fn test_plan_mapping_roundtrip() {
        for tier in [SubscriptionTier::Pro, SubscriptionTier::Premium] {
            let plan = plan_id(tier).unwrap();
            assert_eq!(tier_for_plan(plan), Some(tier));
        }
        assert_eq!(plan_id(SubscriptionTier::Free), None);
        assert_eq!(tier_for_plan("plan_gold_yearly"), None);
    }
}
