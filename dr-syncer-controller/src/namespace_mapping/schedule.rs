//! Cron schedule evaluation for Scheduled-mode `NamespaceMapping`s, kept as
//! a pure function over `chrono` timestamps so it's directly unit-testable
//! without touching the cluster.

use chrono::{DateTime, Utc};
use std::str::FromStr;

/// Returns the next time `expr` fires strictly after `after`, or `None` if
/// `expr` doesn't parse (callers should surface this as a `Failed` phase,
/// not silently skip the sync).
pub fn next_occurrence(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron::Schedule::from_str(expr).ok()?.after(&after).next()
}

/// Whether `now` has reached or passed a previously computed `next_sync`.
pub fn is_due(next_sync: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match next_sync {
        Some(scheduled) => now >= scheduled,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn every_minute_fires_next_minute() {
        let after = at(2026, 1, 1, 12, 0);
        let next = next_occurrence("0 * * * * *", after).expect("valid schedule");
        assert_eq!(next, at(2026, 1, 1, 12, 1));
    }

    #[test]
    fn invalid_expression_returns_none() {
        assert_eq!(next_occurrence("not a cron expr", Utc::now()), None);
    }

    #[test]
    fn due_when_missing_or_past() {
        let now = at(2026, 1, 1, 12, 0);
        assert!(is_due(None, now));
        assert!(is_due(Some(at(2026, 1, 1, 11, 59)), now));
        assert!(is_due(Some(now), now));
        assert!(!is_due(Some(at(2026, 1, 1, 12, 1)), now));
    }
}
