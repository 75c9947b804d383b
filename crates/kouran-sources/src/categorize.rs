//! Today / future buckets relative to the local calendar day. Reporting only.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use kouran_core::Outage;
use kouran_core::types::local_offset;
use serde::Serialize;

/// Anything with an optional resolved start.
pub trait StartInstant {
    fn start_instant(&self) -> Option<DateTime<Utc>>;
}

impl StartInstant for Outage {
    fn start_instant(&self) -> Option<DateTime<Utc>> {
        Some(self.from)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Categorized<T> {
    pub today: Vec<T>,
    pub future: Vec<T>,
}

/// 23:59:59.999 local on the local date of `now`, as UTC.
pub fn end_of_local_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = local_offset();
    let local_date = now.with_timezone(&tz).date_naive();
    let last_ms = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    tz.from_local_datetime(&local_date.and_time(last_ms))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Split items by start: at or before the end of today is "today", later is "future".
/// Items without a start are in neither bucket.
pub fn categorize<T: StartInstant + Clone>(items: &[T], now: DateTime<Utc>) -> Categorized<T> {
    let boundary = end_of_local_day(now);
    let mut today = Vec::new();
    let mut future = Vec::new();
    for item in items {
        match item.start_instant() {
            Some(start) if start <= boundary => today.push(item.clone()),
            Some(_) => future.push(item.clone()),
            None => {}
        }
    }
    Categorized { today, future }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Clone)]
    struct Item(Option<DateTime<Utc>>);

    impl StartInstant for Item {
        fn start_instant(&self) -> Option<DateTime<Utc>> {
            self.0
        }
    }

    fn local(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_end_of_local_day() {
        // 21:00 UTC on the 13th is already the 14th in Mauritius
        let now = local("2022-03-13T21:00:00Z");
        assert_eq!(end_of_local_day(now), local("2022-03-14T23:59:59.999+04:00"));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let now = local("2022-03-13T10:00:00+04:00");
        let boundary = local("2022-03-13T23:59:59.999+04:00");
        let items = vec![
            Item(Some(boundary)),
            Item(Some(boundary + Duration::seconds(1))),
            Item(Some(local("2022-03-01T08:00:00+04:00"))),
            Item(None),
        ];
        let buckets = categorize(&items, now);
        assert_eq!(buckets.today.len(), 2);
        assert_eq!(buckets.future.len(), 1);
        assert_eq!(buckets.future[0].0, Some(boundary + Duration::seconds(1)));
    }

    #[test]
    fn test_outages_categorized() {
        let outage = Outage {
            id: "x".into(),
            date: String::new(),
            locality: "L".into(),
            streets: String::new(),
            district: "D".into(),
            from: local("2022-03-15T09:00:00+04:00"),
            to: local("2022-03-15T12:00:00+04:00"),
        };
        let buckets = categorize(&[outage], local("2022-03-13T10:00:00+04:00"));
        assert!(buckets.today.is_empty());
        assert_eq!(buckets.future.len(), 1);
    }
}
