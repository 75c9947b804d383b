//! French outage date grammar used by the CEB page.
//!
//! `Le <weekday> <day> <month> <year> de <HH:MM:SS> à <HH:MM:SS>`, in local
//! time. An end earlier than the start means the outage runs past midnight.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use kouran_core::types::local_offset;
use kouran_core::{KouranError, Result};
use regex::Regex;
use std::sync::LazyLock;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^Le\s+\w+\s+(\d{1,2})\s+(\w+)\s+(\d{4})\s+de\s+(\d{2}:\d{2}:\d{2})\s+[àa]\s+(\d{2}:\d{2}:\d{2})",
    )
    .expect("date pattern is valid")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Month number for a French month name, accented or not.
pub fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "janvier" => 1,
        "février" | "fevrier" => 2,
        "mars" => 3,
        "avril" => 4,
        "mai" => 5,
        "juin" => 6,
        "juillet" => 7,
        "août" | "aout" => 8,
        "septembre" => 9,
        "octobre" => 10,
        "novembre" => 11,
        "décembre" | "decembre" => 12,
        _ => return None,
    };
    Some(month)
}

/// Resolve a date description to UTC `(from, to)` instants.
pub fn parse_french_date(raw: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let normalized = WHITESPACE.replace_all(raw.trim(), " ");
    if normalized.is_empty() {
        return Err(KouranError::RowParse("empty date string".into()));
    }

    let caps = DATE_PATTERN
        .captures(&normalized)
        .ok_or_else(|| KouranError::RowParse(format!("unrecognized date: {normalized}")))?;

    let day: u32 = caps[1]
        .parse()
        .map_err(|_| KouranError::RowParse(format!("bad day in: {normalized}")))?;
    let month = month_number(&caps[2])
        .ok_or_else(|| KouranError::RowParse(format!("unknown French month: {}", &caps[2])))?;
    let year: i32 = caps[3]
        .parse()
        .map_err(|_| KouranError::RowParse(format!("bad year in: {normalized}")))?;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| KouranError::RowParse(format!("no such date: {normalized}")))?;
    let start = parse_time(&caps[4], &normalized)?;
    let end = parse_time(&caps[5], &normalized)?;

    let tz = local_offset();
    let from = tz
        .from_local_datetime(&date.and_time(start))
        .single()
        .ok_or_else(|| KouranError::RowParse(format!("unresolvable start: {normalized}")))?;
    let mut to = tz
        .from_local_datetime(&date.and_time(end))
        .single()
        .ok_or_else(|| KouranError::RowParse(format!("unresolvable end: {normalized}")))?;

    if to < from {
        to += Duration::days(1);
    }

    Ok((from.with_timezone(&Utc), to.with_timezone(&Utc)))
}

fn parse_time(value: &str, context: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .map_err(|e| KouranError::RowParse(format!("bad time '{value}' in '{context}': {e}")))
}
