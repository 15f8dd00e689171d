use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::value::Value;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parses the textual date forms a store or a caller is likely to hand back.
/// Zone-less forms are read as UTC.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(input) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(input) {
        return Some(d.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn from_epoch_millis(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Turns numbers and parseable strings into dates. Anything else comes back
/// untouched so the validator can reject it.
pub fn coerce(value: Value) -> Value {
    match value {
        Value::Number(n) => match from_epoch_millis(n) {
            Some(d) => Value::Date(d),
            None => Value::Number(n),
        },
        Value::String(s) => match parse_date(&s) {
            Some(d) => Value::Date(d),
            None => Value::String(s),
        },
        other => other,
    }
}
