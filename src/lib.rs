// Finledger Entitlements - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod tier;         // Subscription tiers (closed enum, boundary parse)
pub mod entitlements; // Entitlement Catalog - static tier → limits
pub mod permissions;  // Permission Resolver - ownership + share grants
pub mod limiter;      // Usage Limiter - quota checks
pub mod usage;        // AI usage records with lazy period rollover
pub mod billing;      // Billing Session Bridge - provider boundary
pub mod db;           // SQLite persistence + idempotency ledger

// Re-export commonly used types
pub use tier::{SubscriptionTier, UnknownTierError};
pub use entitlements::{
    limits_for, monthly_price_cents, plan_id, tier_for_plan, EntitlementSet, Limit,
};
pub use permissions::{resolve, Capability, CapabilitySet, ShareGrant};
pub use limiter::{check_limit, InvalidResourceKindError, LimitDecision, ResourceKind};
pub use usage::AiUsageRecord;
pub use billing::{
    sign_payload, BillingBridge, BillingError, CheckoutSession, TierCommand, TierUpdate,
    WebhookEvent,
};
pub use db::{
    apply_tier_update, consume_ai_analysis, get_active_grants, get_tier, insert_grant,
    load_usage, revoke_grant, setup_database, shared_user_count,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
