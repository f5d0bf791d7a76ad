// 💳 Billing Session Bridge - Payment-provider boundary
// Translation only, never policy: tier selections become provider-shaped
// checkout payloads, verified provider events become exactly one of
// {upgrade, downgrade, noop}. Entitlement values live in the catalog.
//
// Tier state machine (driven externally by the provider):
//   free → pending-checkout → {pro|premium}
//   {pro|premium} → pending-cancellation → free
// Pending states count as the still-current tier - no optimistic upgrade
// before a verified event arrives.

use crate::entitlements::{monthly_price_cents, plan_id, tier_for_plan};
use crate::tier::SubscriptionTier;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Reject webhooks whose signature timestamp drifts further than this
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

// ============================================================================
// BILLING ERROR
// ============================================================================

/// A provider event that cannot be trusted or understood.
///
/// Rejected whole: a bad event never produces a partial tier update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// Signature header missing or not in `t=<unix>,v1=<hex>` form
    MalformedSignature,

    /// Signature did not match the payload
    SignatureMismatch,

    /// Signature timestamp outside the acceptance window
    StaleSignature,

    /// Payload is not a well-formed event
    MalformedEvent(String),

    /// Event references a plan this catalog does not know
    UnknownPlan(String),

    /// Checkout requested for a tier with no provider plan (free)
    NoPlanForTier(SubscriptionTier),
}

impl std::fmt::Display for BillingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingError::MalformedSignature => write!(f, "malformed webhook signature header"),
            BillingError::SignatureMismatch => write!(f, "webhook signature mismatch"),
            BillingError::StaleSignature => write!(f, "webhook signature timestamp out of range"),
            BillingError::MalformedEvent(detail) => {
                write!(f, "malformed provider event: {}", detail)
            }
            BillingError::UnknownPlan(plan) => write!(f, "unknown provider plan {:?}", plan),
            BillingError::NoPlanForTier(tier) => {
                write!(f, "tier {} has no provider plan to check out", tier)
            }
        }
    }
}

impl std::error::Error for BillingError {}

// ============================================================================
// CHECKOUT SESSION
// ============================================================================

/// Opaque handle for a checkout session, in the shape the provider expects.
///
/// The session id and URL stand in for the provider's response; the actual
/// redirect and payment state machine live entirely on the provider side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub user_id: String,
    pub plan: String,
    pub amount_cents: u32,
    pub checkout_url: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// WEBHOOK EVENT
// ============================================================================

/// Verified, parsed provider event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider event id - the idempotency key for reconciliation
    pub event_id: String,

    /// e.g. "checkout.completed", "subscription.updated",
    /// "subscription.canceled"
    pub event_type: String,

    /// Customer reference mapped back to our user id
    pub user_id: String,

    /// New plan identifier; absent on cancellation
    #[serde(default)]
    pub plan: Option<String>,
}

// ============================================================================
// TIER COMMAND
// ============================================================================

/// Persisted transactionally and idempotently by the external store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUpdate {
    pub user_id: String,
    pub new_tier: SubscriptionTier,
    pub source_event_id: String,
}

/// Exactly one outcome per reconciled event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierCommand {
    Upgrade(TierUpdate),
    Downgrade(TierUpdate),
    Noop,
}

impl TierCommand {
    pub fn update(&self) -> Option<&TierUpdate> {
        match self {
            TierCommand::Upgrade(update) | TierCommand::Downgrade(update) => Some(update),
            TierCommand::Noop => None,
        }
    }
}

// ============================================================================
// BRIDGE
// ============================================================================

#[derive(Clone)]
pub struct BillingBridge {
    /// Shared secret for webhook signature verification
    signing_secret: String,

    /// Base URL of the provider's hosted checkout page
    checkout_base_url: String,
}

impl BillingBridge {
    pub fn new(signing_secret: String, checkout_base_url: String) -> Self {
        BillingBridge {
            signing_secret,
            checkout_base_url,
        }
    }

    /// Translate a tier selection into a checkout session handle.
    ///
    /// Free has no plan, so there is nothing to check out.
    pub fn start_session(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
    ) -> Result<CheckoutSession, BillingError> {
        let plan = plan_id(tier).ok_or(BillingError::NoPlanForTier(tier))?;
        let session_id = format!("cs_{}", uuid::Uuid::new_v4().simple());

        Ok(CheckoutSession {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            plan: plan.to_string(),
            amount_cents: monthly_price_cents(tier),
            checkout_url: format!("{}/{}", self.checkout_base_url, session_id),
            created_at: Utc::now(),
        })
    }

    /// Verify the signature header (`t=<unix>,v1=<hex>`) against the raw
    /// body, then parse the event.
    ///
    /// The digest covers `"<timestamp>.<body>"` so a valid signature
    /// cannot be replayed onto a different payload or timestamp.
    pub fn verify_and_parse(
        &self,
        body: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, BillingError> {
        let (timestamp, provided_hex) = parse_signature_header(signature_header)?;

        let age = now.signed_duration_since(timestamp);
        if age > Duration::seconds(SIGNATURE_TOLERANCE_SECS)
            || age < Duration::seconds(-SIGNATURE_TOLERANCE_SECS)
        {
            return Err(BillingError::StaleSignature);
        }

        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .map_err(|_| BillingError::MalformedSignature)?;
        mac.update(timestamp.timestamp().to_string().as_bytes());
        mac.update(b".");
        mac.update(body);

        let provided = decode_hex(&provided_hex).ok_or(BillingError::MalformedSignature)?;
        mac.verify_slice(&provided)
            .map_err(|_| BillingError::SignatureMismatch)?;

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedEvent(e.to_string()))?;

        if event.event_id.is_empty() {
            return Err(BillingError::MalformedEvent("empty event id".to_string()));
        }
        if event.user_id.is_empty() {
            return Err(BillingError::MalformedEvent("empty user id".to_string()));
        }

        Ok(event)
    }

    /// Reconcile a verified event against the user's current tier.
    ///
    /// Cancellation events land on free; everything else resolves through
    /// the plan identifier. Same tier in and out is a noop (replays and
    /// provider-side renewals take this path).
    pub fn reconcile_tier_change(
        &self,
        event: &WebhookEvent,
        current_tier: SubscriptionTier,
    ) -> Result<TierCommand, BillingError> {
        let new_tier = match event.event_type.as_str() {
            "subscription.canceled" => SubscriptionTier::Free,
            "checkout.completed" | "subscription.updated" => {
                let plan = event.plan.as_deref().ok_or_else(|| {
                    BillingError::MalformedEvent(format!(
                        "{} event without a plan",
                        event.event_type
                    ))
                })?;
                tier_for_plan(plan).ok_or_else(|| BillingError::UnknownPlan(plan.to_string()))?
            }
            other => {
                return Err(BillingError::MalformedEvent(format!(
                    "unsupported event type {:?}",
                    other
                )))
            }
        };

        let update = TierUpdate {
            user_id: event.user_id.clone(),
            new_tier,
            source_event_id: event.event_id.clone(),
        };

        Ok(if new_tier.rank() > current_tier.rank() {
            TierCommand::Upgrade(update)
        } else if new_tier.rank() < current_tier.rank() {
            TierCommand::Downgrade(update)
        } else {
            TierCommand::Noop
        })
    }
}

/// Sign a payload the way the provider would. Used by tests and the demo
/// CLI; a real deployment only ever verifies.
pub fn sign_payload(secret: &str, body: &[u8], timestamp: DateTime<Utc>) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(timestamp.timestamp().to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    format!("t={},v1={}", timestamp.timestamp(), encode_hex(&digest))
}

fn parse_signature_header(header: &str) -> Result<(DateTime<Utc>, String), BillingError> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => {
                let secs: i64 = value
                    .parse()
                    .map_err(|_| BillingError::MalformedSignature)?;
                timestamp = DateTime::<Utc>::from_timestamp(secs, 0);
            }
            Some(("v1", value)) => signature = Some(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(t), Some(s)) if !s.is_empty() => Ok((t, s)),
        _ => Err(BillingError::MalformedSignature),
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    // Reject non-ASCII up front: byte-offset slicing below assumes it
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn bridge() -> BillingBridge {
        BillingBridge::new(
            SECRET.to_string(),
            "https://pay.example.com/checkout".to_string(),
        )
    }

    fn signed_event(body: &str, now: DateTime<Utc>) -> (Vec<u8>, String) {
        let bytes = body.as_bytes().to_vec();
        let header = sign_payload(SECRET, &bytes, now);
        (bytes, header)
    }

    #[test]
    fn test_start_session_for_paid_tiers() {
        let bridge = bridge();

        let session = bridge
            .start_session("alice", SubscriptionTier::Pro)
            .unwrap();
        assert_eq!(session.plan, "plan_pro_monthly");
        assert_eq!(session.amount_cents, 499);
        assert!(session.checkout_url.contains(&session.session_id));

        let premium = bridge
            .start_session("alice", SubscriptionTier::Premium)
            .unwrap();
        assert_eq!(premium.plan, "plan_premium_monthly");
        assert_eq!(premium.amount_cents, 999);
    }

    #[test]
    fn test_start_session_free_is_rejected() {
        let err = bridge()
            .start_session("alice", SubscriptionTier::Free)
            .unwrap_err();
        assert_eq!(err, BillingError::NoPlanForTier(SubscriptionTier::Free));
    }

    #[test]
    fn test_verify_and_parse_valid_event() {
        let now = Utc::now();
        let (body, header) = signed_event(
            r#"{"event_id":"evt_1","event_type":"checkout.completed","user_id":"alice","plan":"plan_pro_monthly"}"#,
            now,
        );

        let event = bridge().verify_and_parse(&body, &header, now).unwrap();
        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.plan.as_deref(), Some("plan_pro_monthly"));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let now = Utc::now();
        let (_, header) = signed_event(
            r#"{"event_id":"evt_1","event_type":"checkout.completed","user_id":"alice","plan":"plan_pro_monthly"}"#,
            now,
        );
        let tampered =
            br#"{"event_id":"evt_1","event_type":"checkout.completed","user_id":"alice","plan":"plan_premium_monthly"}"#;

        let err = bridge().verify_and_parse(tampered, &header, now).unwrap_err();
        assert_eq!(err, BillingError::SignatureMismatch);
    }

    #[test]
    fn test_stale_signature_is_rejected() {
        let signed_at = Utc::now() - Duration::seconds(SIGNATURE_TOLERANCE_SECS + 60);
        let (body, header) = signed_event(
            r#"{"event_id":"evt_1","event_type":"subscription.updated","user_id":"alice","plan":"plan_pro_monthly"}"#,
            signed_at,
        );

        let err = bridge()
            .verify_and_parse(&body, &header, Utc::now())
            .unwrap_err();
        assert_eq!(err, BillingError::StaleSignature);
    }

    #[test]
    fn test_non_ascii_signature_hex_is_rejected() {
        // Multibyte v1 value of even byte length must fail cleanly,
        // not panic on a char boundary
        let now = Utc::now();
        let header = format!("t={},v1=日a", now.timestamp());

        let err = bridge().verify_and_parse(b"{}", &header, now).unwrap_err();
        assert_eq!(err, BillingError::MalformedSignature);
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        let bridge = bridge();
        let now = Utc::now();
        for header in ["", "t=abc,v1=00", "v1=00", "t=123"] {
            let err = bridge.verify_and_parse(b"{}", header, now).unwrap_err();
            assert_eq!(err, BillingError::MalformedSignature, "header {:?}", header);
        }
    }

    #[test]
    fn test_reconcile_upgrade() {
        let event = WebhookEvent {
            event_id: "evt_2".to_string(),
            event_type: "checkout.completed".to_string(),
            user_id: "alice".to_string(),
            plan: Some("plan_pro_monthly".to_string()),
        };

        let command = bridge()
            .reconcile_tier_change(&event, SubscriptionTier::Free)
            .unwrap();
        assert_eq!(
            command,
            TierCommand::Upgrade(TierUpdate {
                user_id: "alice".to_string(),
                new_tier: SubscriptionTier::Pro,
                source_event_id: "evt_2".to_string(),
            })
        );
    }

    #[test]
    fn test_reconcile_cancellation_downgrades_to_free() {
        let event = WebhookEvent {
            event_id: "evt_3".to_string(),
            event_type: "subscription.canceled".to_string(),
            user_id: "alice".to_string(),
            plan: None,
        };

        let command = bridge()
            .reconcile_tier_change(&event, SubscriptionTier::Premium)
            .unwrap();
        match command {
            TierCommand::Downgrade(update) => {
                assert_eq!(update.new_tier, SubscriptionTier::Free)
            }
            other => panic!("expected downgrade, got {:?}", other),
        }
    }

    #[test]
    fn test_reconcile_same_tier_is_noop() {
        // Renewal event for the plan the user already holds
        let event = WebhookEvent {
            event_id: "evt_4".to_string(),
            event_type: "subscription.updated".to_string(),
            user_id: "alice".to_string(),
            plan: Some("plan_pro_monthly".to_string()),
        };

        let command = bridge()
            .reconcile_tier_change(&event, SubscriptionTier::Pro)
            .unwrap();
        assert_eq!(command, TierCommand::Noop);
        assert!(command.update().is_none());
    }

    #[test]
    fn test_reconcile_unknown_plan_fails_whole() {
        let event = WebhookEvent {
            event_id: "evt_5".to_string(),
            event_type: "subscription.updated".to_string(),
            user_id: "alice".to_string(),
            plan: Some("plan_gold_yearly".to_string()),
        };

        let err = bridge()
            .reconcile_tier_change(&event, SubscriptionTier::Free)
            .unwrap_err();
        assert_eq!(err, BillingError::UnknownPlan("plan_gold_yearly".to_string()));
    }

    #[test]
    fn test_reconcile_missing_plan_fails() {
        let event = WebhookEvent {
            event_id: "evt_6".to_string(),
            event_type: "checkout.completed".to_string(),
            user_id: "alice".to_string(),
            plan: None,
        };

        assert!(matches!(
            bridge().reconcile_tier_change(&event, SubscriptionTier::Free),
            Err(BillingError::MalformedEvent(_))
        ));
    }
}
