// ⏳ AI Usage Record - Per-period quota consumption
// Tracks AI analyses consumed against the tier allowance. Rollover is lazy
// check-on-read: the count resets only when `now` has passed period_end,
// never mid-period.

use crate::entitlements::Limit;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Billing period length used when the provider gives no explicit bounds
pub const DEFAULT_PERIOD_DAYS: i64 = 30;

// ============================================================================
// USAGE RECORD
// ============================================================================

/// {user, period_start, period_end, count}
///
/// Invariant: count never exceeds the tier's per-period allowance. The
/// record enforces it at consumption time via `consume`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiUsageRecord {
    pub user_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub count: u32,
}

impl AiUsageRecord {
    /// Fresh record with a period starting now
    pub fn new(user_id: String, now: DateTime<Utc>) -> Self {
        AiUsageRecord {
            user_id,
            period_start: now,
            period_end: now + Duration::days(DEFAULT_PERIOD_DAYS),
            count: 0,
        }
    }

    /// Whether `now` still falls inside this record's period
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        now < self.period_end
    }

    /// Roll the record forward so its period contains `now`.
    ///
    /// Advances by whole period lengths (count resets to zero exactly once
    /// per rollover, never mid-period). A record that is still current is
    /// returned unchanged.
    pub fn rolled_over(&self, now: DateTime<Utc>) -> AiUsageRecord {
        if self.is_current(now) {
            return self.clone();
        }

        let period_len = self.period_end - self.period_start;
        if period_len <= Duration::zero() {
            // Corrupt bounds cannot advance; restart with a fresh period
            return AiUsageRecord::new(self.user_id.clone(), now);
        }

        let mut start = self.period_end;
        while start + period_len <= now {
            start = start + period_len;
        }

        AiUsageRecord {
            user_id: self.user_id.clone(),
            period_start: start,
            period_end: start + period_len,
            count: 0,
        }
    }

    /// Count consumed in the period containing `now`.
    ///
    /// Zero if the stored period has lapsed - the read-side view of lazy
    /// rollover, for callers that only need a number for `check_limit`.
    pub fn current_count(&self, now: DateTime<Utc>) -> u32 {
        if self.is_current(now) {
            self.count
        } else {
            0
        }
    }

    /// Consume one analysis against `allowance`.
    ///
    /// Returns false (and leaves the record untouched) when the allowance
    /// is exhausted. Callers must have already rolled the record over.
    pub fn consume(&mut self, allowance: Limit) -> bool {
        if allowance.allows(self.count) {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
