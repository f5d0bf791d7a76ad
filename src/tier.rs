// 🎫 Subscription Tier - Closed tier enumeration
// Tier strings from the outside world are parsed exactly once, at the
// boundary; everything past that point matches exhaustively on the enum.

use serde::{Deserialize, Serialize};

// ============================================================================
// SUBSCRIPTION TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// Default tier for every new user
    Free,

    /// Paid tier (monthly)
    Pro,

    /// Top paid tier (monthly)
    Premium,
}

impl SubscriptionTier {
    /// All tiers, lowest to highest
    pub const ALL: [SubscriptionTier; 3] = [
        SubscriptionTier::Free,
        SubscriptionTier::Pro,
        SubscriptionTier::Premium,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Premium => "premium",
        }
    }

    /// Parse a stored/transported tier string.
    ///
    /// This is the ONLY place an unknown tier can surface. Callers must
    /// treat the error as a hard stop - coercing to Free would paper over
    /// a real state inconsistency.
    pub fn parse(value: &str) -> Result<Self, UnknownTierError> {
        match value {
            "free" => Ok(SubscriptionTier::Free),
            "pro" => Ok(SubscriptionTier::Pro),
            "premium" => Ok(SubscriptionTier::Premium),
            other => Err(UnknownTierError {
                value: other.to_string(),
            }),
        }
    }

    /// Rank for upgrade/downgrade comparison (free < pro < premium)
    pub fn rank(&self) -> u8 {
        match self {
            SubscriptionTier::Free => 0,
            SubscriptionTier::Pro => 1,
            SubscriptionTier::Premium => 2,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// UNKNOWN TIER ERROR
// ============================================================================

/// A tier value outside the closed {free, pro, premium} set.
///
/// Fatal by contract: the caller surfaces it, never silently defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTierError {
    pub value: String,
}

impl std::fmt::Display for UnknownTierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown subscription tier {:?} (expected free, pro or premium)",
            self.value
        )
    }
}

impl std::error::Error for UnknownTierError {}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tiers() {
        assert_eq!(SubscriptionTier::parse("free"), Ok(SubscriptionTier::Free));
        assert_eq!(SubscriptionTier::parse("pro"), Ok(SubscriptionTier::Pro));
        assert_eq!(
            SubscriptionTier::parse("premium"),
            Ok(SubscriptionTier::Premium)
        );
    }

    #[test]
    fn test_parse_unknown_tier_fails() {
        let err = SubscriptionTier::parse("platinum").unwrap_err();
        assert_eq!(err.value, "platinum");

        // No case folding: stored values are already normalized
        assert!(SubscriptionTier::parse("Free").is_err());
        assert!(SubscriptionTier::parse("").is_err());
    }

    #[test]
    fn test_roundtrip_as_str() {
        for tier in SubscriptionTier::ALL {
            assert_eq!(SubscriptionTier::parse(tier.as_str()), Ok(tier));
        }
    }

    #[test]
    fn test_rank_ordering() {
        assert!(SubscriptionTier::Free.rank() < SubscriptionTier::Pro.rank());
        assert!(SubscriptionTier::Pro.rank() < SubscriptionTier::Premium.rank());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&SubscriptionTier::Premium).unwrap();
        assert_eq!(json, "\"premium\"");

        let tier: SubscriptionTier = serde_json::from_str("\"pro\"").unwrap();
        assert_eq!(tier, SubscriptionTier::Pro);
    }
}
