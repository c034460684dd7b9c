use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::{Europe, Tz};
use tracing::warn;

const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses exchange timestamps such as "2024-01-15 10:30:45" or
/// "2024-01-15 10:30:45.1234".
pub(crate) fn parse_date_time(raw: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, FORMAT))
}

pub(crate) fn format_date_time(date_time: &NaiveDateTime) -> String {
    date_time.format(FORMAT).to_string()
}

/// Converts a UTC timestamp into UK local time (GMT or BST).
pub(crate) fn utc_to_uk(raw: &str) -> Option<String> {
    let utc = parse_date_time(raw).ok()?;
    let local = Utc.from_utc_datetime(&utc).with_timezone(&Europe::London);
    Some(format_date_time(&local.naive_local()))
}

/// Converts a central European timestamp (as used by nexo.io) into UK local time.
pub(crate) fn cet_to_uk(raw: &str) -> Option<String> {
    zone_to_uk(raw, Europe::Berlin)
}

fn zone_to_uk(raw: &str, zone: Tz) -> Option<String> {
    let naive = parse_date_time(raw).ok()?;
    // ambiguous times at the end of summer time resolve to the earlier instant
    let local = zone.from_local_datetime(&naive).earliest()?;
    Some(format_date_time(&local.with_timezone(&Europe::London).naive_local()))
}

/// How [`into_chronological`] found the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowOrder {
    Ascending,
    Reversed,
    /// No row has a readable time, so the order was kept.
    Unknown,
}

/// Puts rows in ascending time order. Exports that list the newest entry
/// first are reversed; rows are never otherwise reordered or altered.
///
/// The earliest and latest readable timestamps decide the direction, so a
/// malformed first or last row does not hide a newest-first export.
pub(crate) fn into_chronological<T>(rows: &mut [T], time: impl Fn(&T) -> &str) -> RowOrder {
    let readable = |row: &T| parse_date_time(time(row)).ok();
    let first = rows.iter().find_map(readable);
    let last = rows.iter().rev().find_map(readable);
    match (first, last) {
        (Some(first), Some(last)) if first > last => {
            rows.reverse();
            RowOrder::Reversed
        }
        (Some(_), Some(_)) => RowOrder::Ascending,
        _ => {
            if rows.len() > 1 {
                warn!("No readable timestamps, keeping the {} rows in file order", rows.len());
            }
            RowOrder::Unknown
        }
    }
}
