use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use std::env;

use finledger_entitlements::{
    apply_tier_update, check_limit, consume_ai_analysis, get_active_grants, get_tier,
    insert_grant, limits_for, monthly_price_cents, resolve, setup_database, shared_user_count,
    sign_payload, BillingBridge, CapabilitySet, ResourceKind, ShareGrant, SubscriptionTier,
    TierCommand,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("catalog") => print_catalog(),
        Some("demo") => run_demo()?,
        _ => print_usage(),
    }

    Ok(())
}

fn print_usage() {
    println!("Finledger Entitlements v{}", finledger_entitlements::VERSION);
    println!();
    println!("Usage:");
    println!("  finledger catalog   Print the tier → entitlement catalog");
    println!("  finledger demo      Run the end-to-end entitlement demo");
    println!();
    println!("API server: cargo run --bin finledger-server --features server");
}

fn print_catalog() {
    println!("📋 Entitlement Catalog");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for tier in SubscriptionTier::ALL {
        let set = limits_for(tier);
        let price = monthly_price_cents(tier);

        println!("\n{} (${}.{:02}/mo)", tier, price / 100, price % 100);
        println!("  accounts:            {}", set.max_accounts);
        println!("  shared users:        {}", set.max_shared_users);
        println!("  active credits:      {}", set.max_active_credits);
        println!("  active services:     {}", set.max_active_services);
        println!("  AI analyses/period:  {}", set.ai_analyses_per_period);
    }
}

fn run_demo() -> Result<()> {
    println!("🎫 Finledger Entitlements - Demo");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut conn = Connection::open("finledger.db")?;
    setup_database(&conn)?;
    println!("✓ Database initialized with WAL mode");

    // 1. Free user hits the account cap
    println!("\n🚦 Limit check: free user with 3 accounts adds a 4th...");
    let tier = get_tier(&conn, "alice")?;
    let decision = check_limit(tier, ResourceKind::Accounts, 3);
    if decision.upgrade_required() {
        println!(
            "✗ Denied (limit {}). Redirecting to the upgrade flow.",
            decision.limit
        );
    }

    // 2. Checkout + webhook reconciliation
    println!("\n💳 Starting checkout session for pro...");
    let secret = "whsec_demo".to_string();
    let bridge = BillingBridge::new(secret.clone(), "https://pay.example.com/checkout".to_string());
    let session = bridge.start_session("alice", SubscriptionTier::Pro)?;
    println!("✓ Session {} → {}", session.session_id, session.checkout_url);

    // Simulate the provider confirming payment
    let body = serde_json::json!({
        "event_id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "event_type": "checkout.completed",
        "user_id": "alice",
        "plan": session.plan,
    })
    .to_string();
    let now = Utc::now();
    let signature = sign_payload(&secret, body.as_bytes(), now);

    let event = bridge.verify_and_parse(body.as_bytes(), &signature, now)?;
    let current = get_tier(&conn, "alice")?;
    match bridge.reconcile_tier_change(&event, current)? {
        TierCommand::Upgrade(update) | TierCommand::Downgrade(update) => {
            let applied = apply_tier_update(&mut conn, &update)?;
            println!(
                "✓ Tier → {} (event {}, applied: {})",
                update.new_tier, update.source_event_id, applied
            );

            // Replaying the same event is a no-op
            let replayed = apply_tier_update(&mut conn, &update)?;
            println!("✓ Replay of the same event applied: {}", replayed);
        }
        TierCommand::Noop => println!("✓ Event was a no-op"),
    }

    // 3. Sharing within the tier's shared-user limit
    println!("\n🔐 Sharing credits view+edit with bob...");
    let tier = get_tier(&conn, "alice")?;
    let shared = shared_user_count(&conn, "alice")?;
    let decision = check_limit(tier, ResourceKind::SharedUsers, shared);
    if decision.allowed {
        insert_grant(
            &conn,
            &ShareGrant::new(
                "alice".to_string(),
                "bob".to_string(),
                ResourceKind::Credits,
                CapabilitySet {
                    view: true,
                    edit: true,
                    delete: false,
                },
            ),
        )?;
        let grants = get_active_grants(&conn, "alice")?;
        let caps = resolve("bob", "alice", ResourceKind::Credits, &grants);
        println!("✓ bob's effective capabilities on credits: {}", caps);
    } else {
        println!("✗ Shared-user limit reached ({})", decision.limit);
    }

    // 4. AI analysis quota
    println!("\n🤖 Consuming AI analyses on pro (4/period)...");
    let tier = get_tier(&conn, "alice")?;
    for attempt in 1..=5 {
        let (allowed, record) = consume_ai_analysis(&conn, "alice", tier, Utc::now())?;
        if allowed {
            println!("✓ Analysis {} recorded ({} used)", attempt, record.count);
        } else {
            println!("✗ Analysis {} denied - quota exhausted, upgrade required", attempt);
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Demo complete");

    Ok(())
}
