// 🗄️ Persistence - SQLite mirror of entitlement state
// Stores what the hosted backend would own in production: tier records,
// share grants, AI usage rows, and the billing-event ledger that makes
// webhook reconciliation idempotent.

use crate::billing::TierUpdate;
use crate::entitlements::limits_for;
use crate::limiter::ResourceKind;
use crate::permissions::{CapabilitySet, ShareGrant};
use crate::tier::SubscriptionTier;
use crate::usage::AiUsageRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

// ============================================================================
// SETUP
// ============================================================================

/// Create tables and enable WAL mode
pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("Failed to enable WAL mode")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user_tiers (
            user_id         TEXT PRIMARY KEY,
            tier            TEXT NOT NULL,
            source_event_id TEXT,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS share_grants (
            id         TEXT PRIMARY KEY,
            owner_id   TEXT NOT NULL,
            grantee_id TEXT NOT NULL,
            resource   TEXT NOT NULL,
            can_view   INTEGER NOT NULL,
            can_edit   INTEGER NOT NULL,
            can_delete INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            revoked_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_share_grants_owner
            ON share_grants(owner_id);

        CREATE TABLE IF NOT EXISTS ai_usage (
            user_id      TEXT PRIMARY KEY,
            period_start TEXT NOT NULL,
            period_end   TEXT NOT NULL,
            count        INTEGER NOT NULL
        );

        -- Idempotency ledger: one row per provider event ever applied
        CREATE TABLE IF NOT EXISTS billing_events (
            event_id   TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            tier       TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );
        ",
    )
    .context("Failed to create tables")?;

    Ok(())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp: {}", value))
}

// ============================================================================
// TIER RECORDS
// ============================================================================

/// Current tier for a user. Users without a row are on free - the default
/// for every new signup, distinct from an unknown STORED tier value, which
/// is a state inconsistency and surfaces as an error.
pub fn get_tier(conn: &Connection, user_id: &str) -> Result<SubscriptionTier> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT tier FROM user_tiers WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query user tier")?;

    match stored {
        Some(value) => SubscriptionTier::parse(&value)
            .with_context(|| format!("Corrupt tier record for user {}", user_id)),
        None => Ok(SubscriptionTier::Free),
    }
}

/// Apply a reconciled tier update, keyed on the provider event id.
///
/// The event-id insert and the tier write happen in one transaction, so a
/// replayed event either applies fully once or not at all. Returns false
/// when the event was already applied.
pub fn apply_tier_update(conn: &mut Connection, update: &TierUpdate) -> Result<bool> {
    let tx = conn
        .transaction()
        .context("Failed to start tier-update transaction")?;

    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO billing_events (event_id, user_id, tier, applied_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                update.source_event_id,
                update.user_id,
                update.new_tier.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to record billing event")?;

    if inserted == 0 {
        // Replay: the ledger already holds this event id
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO user_tiers (user_id, tier, source_event_id, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
             tier = excluded.tier,
             source_event_id = excluded.source_event_id,
             updated_at = excluded.updated_at",
        params![
            update.user_id,
            update.new_tier.as_str(),
            update.source_event_id,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("Failed to update user tier")?;

    tx.commit().context("Failed to commit tier update")?;
    Ok(true)
}

// ============================================================================
// SHARE GRANTS
// ============================================================================

pub fn insert_grant(conn: &Connection, grant: &ShareGrant) -> Result<()> {
    conn.execute(
        "INSERT INTO share_grants
            (id, owner_id, grantee_id, resource, can_view, can_edit, can_delete, created_at, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            grant.id,
            grant.owner_id,
            grant.grantee_id,
            grant.resource.as_str(),
            grant.capabilities.view as i64,
            grant.capabilities.edit as i64,
            grant.capabilities.delete as i64,
            grant.created_at.to_rfc3339(),
            grant.revoked_at.map(|t| t.to_rfc3339()),
        ],
    )
    .context("Failed to insert share grant")?;

    Ok(())
}

/// Revoke an active grant by id. Returns false if nothing matched.
pub fn revoke_grant(conn: &Connection, grant_id: &str) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE share_grants SET revoked_at = ?1
             WHERE id = ?2 AND revoked_at IS NULL",
            params![Utc::now().to_rfc3339(), grant_id],
        )
        .context("Failed to revoke share grant")?;

    Ok(updated > 0)
}

/// All active grants issued by an owner
pub fn get_active_grants(conn: &Connection, owner_id: &str) -> Result<Vec<ShareGrant>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_id, grantee_id, resource, can_view, can_edit, can_delete, created_at
             FROM share_grants
             WHERE owner_id = ?1 AND revoked_at IS NULL",
        )
        .context("Failed to prepare grant query")?;

    let rows = stmt
        .query_map(params![owner_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, String>(7)?,
            ))
        })
        .context("Failed to query share grants")?;

    let mut grants = Vec::new();
    for row in rows {
        let (id, owner_id, grantee_id, resource, view, edit, delete, created_at) =
            row.context("Failed to read grant row")?;

        grants.push(ShareGrant {
            id,
            owner_id,
            grantee_id,
            resource: ResourceKind::parse(&resource)
                .with_context(|| format!("Corrupt resource kind in grant: {}", resource))?,
            capabilities: CapabilitySet {
                view: view != 0,
                edit: edit != 0,
                delete: delete != 0,
            },
            created_at: parse_timestamp(&created_at)?,
            revoked_at: None,
        });
    }

    Ok(grants)
}

/// Distinct grantees an owner currently shares with
pub fn shared_user_count(conn: &Connection, owner_id: &str) -> Result<u32> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT grantee_id) FROM share_grants
             WHERE owner_id = ?1 AND revoked_at IS NULL",
            params![owner_id],
            |row| row.get(0),
        )
        .context("Failed to count shared users")?;

    Ok(count as u32)
}

// ============================================================================
// AI USAGE
// ============================================================================

/// Usage record for a user, rolled over to the period containing `now`.
///
/// Lazy check-on-read: a lapsed period is advanced (and persisted) here,
/// never mid-period. Users without a row get a fresh record.
pub fn load_usage(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<AiUsageRecord> {
    let stored: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT period_start, period_end, count FROM ai_usage WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .context("Failed to query AI usage")?;

    let record = match stored {
        Some((start, end, count)) => AiUsageRecord {
            user_id: user_id.to_string(),
            period_start: parse_timestamp(&start)?,
            period_end: parse_timestamp(&end)?,
            count: count as u32,
        },
        None => AiUsageRecord::new(user_id.to_string(), now),
    };

    let rolled = record.rolled_over(now);
    if rolled != record {
        save_usage(conn, &rolled)?;
    }

    Ok(rolled)
}

pub fn save_usage(conn: &Connection, record: &AiUsageRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO ai_usage (user_id, period_start, period_end, count)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
             period_start = excluded.period_start,
             period_end = excluded.period_end,
             count = excluded.count",
        params![
            record.user_id,
            record.period_start.to_rfc3339(),
            record.period_end.to_rfc3339(),
            record.count as i64,
        ],
    )
    .context("Failed to save AI usage")?;

    Ok(())
}

/// Consume one AI analysis for the user, against their tier's allowance.
///
/// Returns the updated record and whether the analysis was allowed; a
/// denied attempt persists nothing.
pub fn consume_ai_analysis(
    conn: &Connection,
    user_id: &str,
    tier: SubscriptionTier,
    now: DateTime<Utc>,
) -> Result<(bool, AiUsageRecord)> {
    let mut record = load_usage(conn, user_id, now)?;
    let allowance = limits_for(tier).ai_analyses_per_period;

    if record.consume(allowance) {
        save_usage(conn, &record)?;
        Ok((true, record))
    } else {
        Ok((false, record))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn update(event_id: &str, user: &str, tier: SubscriptionTier) -> TierUpdate {
        TierUpdate {
            user_id: user.to_string(),
            new_tier: tier,
            source_event_id: event_id.to_string(),
        }
    }

    #[test]
    fn test_unknown_user_defaults_to_free() {
        let conn = test_db();
        assert_eq!(get_tier(&conn, "nobody").unwrap(), SubscriptionTier::Free);
    }

    #[test]
    fn test_corrupt_tier_row_surfaces_error() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO user_tiers (user_id, tier, updated_at)
             VALUES ('alice', 'platinum', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        // Never silently coerced to free
        assert!(get_tier(&conn, "alice").is_err());
    }

    #[test]
    fn test_apply_tier_update() {
        let mut conn = test_db();

        let applied =
            apply_tier_update(&mut conn, &update("evt_1", "alice", SubscriptionTier::Pro)).unwrap();
        assert!(applied);
        assert_eq!(get_tier(&conn, "alice").unwrap(), SubscriptionTier::Pro);
    }

    #[test]
    fn test_replayed_event_applies_exactly_once() {
        let mut conn = test_db();
        let upgrade = update("evt_1", "alice", SubscriptionTier::Premium);

        assert!(apply_tier_update(&mut conn, &upgrade).unwrap());

        // Same event id again: no-op
        assert!(!apply_tier_update(&mut conn, &upgrade).unwrap());
        assert_eq!(get_tier(&conn, "alice").unwrap(), SubscriptionTier::Premium);

        // Replay cannot resurrect an old tier after a later downgrade
        assert!(
            apply_tier_update(&mut conn, &update("evt_2", "alice", SubscriptionTier::Free))
                .unwrap()
        );
        assert!(!apply_tier_update(&mut conn, &upgrade).unwrap());
        assert_eq!(get_tier(&conn, "alice").unwrap(), SubscriptionTier::Free);
    }

    #[test]
    fn test_grant_roundtrip_and_revoke() {
        let conn = test_db();
        let grant = ShareGrant::new(
            "alice".to_string(),
            "bob".to_string(),
            ResourceKind::Credits,
            CapabilitySet::view_only(),
        );
        insert_grant(&conn, &grant).unwrap();

        let grants = get_active_grants(&conn, "alice").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].grantee_id, "bob");
        assert_eq!(grants[0].resource, ResourceKind::Credits);
        assert!(grants[0].capabilities.view);
        assert!(!grants[0].capabilities.edit);

        assert!(revoke_grant(&conn, &grant.id).unwrap());
        assert!(get_active_grants(&conn, "alice").unwrap().is_empty());
        assert!(!revoke_grant(&conn, &grant.id).unwrap());
    }

    #[test]
    fn test_shared_user_count_distinct() {
        let conn = test_db();
        for resource in [ResourceKind::Credits, ResourceKind::Accounts] {
            insert_grant(
                &conn,
                &ShareGrant::new(
                    "alice".to_string(),
                    "bob".to_string(),
                    resource,
                    CapabilitySet::view_only(),
                ),
            )
            .unwrap();
        }
        insert_grant(
            &conn,
            &ShareGrant::new(
                "alice".to_string(),
                "carol".to_string(),
                ResourceKind::Credits,
                CapabilitySet::full(),
            ),
        )
        .unwrap();

        assert_eq!(shared_user_count(&conn, "alice").unwrap(), 2);
    }

    #[test]
    fn test_consume_ai_analysis_within_quota() {
        let conn = test_db();
        let now = Utc::now();

        // Pro allows 4 per period
        for expected in 1..=4 {
            let (allowed, record) =
                consume_ai_analysis(&conn, "alice", SubscriptionTier::Pro, now).unwrap();
            assert!(allowed);
            assert_eq!(record.count, expected);
        }

        let (allowed, record) =
            consume_ai_analysis(&conn, "alice", SubscriptionTier::Pro, now).unwrap();
        assert!(!allowed);
        assert_eq!(record.count, 4);
    }

    #[test]
    fn test_usage_rolls_over_on_read() {
        let conn = test_db();
        let now = Utc::now();

        for _ in 0..4 {
            consume_ai_analysis(&conn, "alice", SubscriptionTier::Pro, now).unwrap();
        }

        // Next period: quota is fresh
        let next_period = now + Duration::days(31);
        let record = load_usage(&conn, "alice", next_period).unwrap();
        assert_eq!(record.count, 0);

        let (allowed, _) =
            consume_ai_analysis(&conn, "alice", SubscriptionTier::Pro, next_period).unwrap();
        assert!(allowed);
    }

    #[test]
    fn test_free_user_denied_without_write() {
        let conn = test_db();
        let now = Utc::now();

        let (allowed, record) =
            consume_ai_analysis(&conn, "alice", SubscriptionTier::Free, now).unwrap();
        assert!(!allowed);
        assert_eq!(record.count, 0);
    }
}
