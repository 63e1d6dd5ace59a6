//! Timestamp normalization.
//!
//! The backend and the chain fallback emit timestamps as unix seconds, unix
//! milliseconds, digit strings or ISO strings. Everything funnels through
//! [`resolve_in`]; anything that does not resolve renders as
//! [`UNKNOWN_TIMESTAMP`].

use std::fmt::{Display, Write as _};
use std::sync::LazyLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel shown for missing or unparseable timestamps.
pub const UNKNOWN_TIMESTAMP: &str = "N/A";

/// `en-US` locale shape: `11/14/2023, 10:13:20 PM`.
pub const DISPLAY_PATTERN: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// Numbers below this are unix seconds, everything else is milliseconds.
const SECONDS_CUTOFF: f64 = 1e12;

/// Largest instant a JS `Date` accepts, in milliseconds either side of the epoch.
const MAX_EPOCH_MILLIS: f64 = 8.64e15;

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("digit pattern compiles"));

// naive forms are read in the display zone
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// A raw timestamp exactly as it arrived over the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum TimestampValue {
    #[default]
    Absent,
    Number(f64),
    Text(String),
    /// Booleans, arrays and objects. Never resolves.
    Other(Value),
}

impl From<Value> for TimestampValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => TimestampValue::Absent,
            Value::Number(n) => match n.as_f64() {
                Some(f) => TimestampValue::Number(f),
                None => TimestampValue::Other(Value::Number(n)),
            },
            Value::String(s) => TimestampValue::Text(s),
            other => TimestampValue::Other(other),
        }
    }
}

impl From<TimestampValue> for Value {
    fn from(value: TimestampValue) -> Self {
        match value {
            TimestampValue::Absent => Value::Null,
            TimestampValue::Number(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            TimestampValue::Number(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TimestampValue::Text(s) => Value::String(s),
            TimestampValue::Other(v) => v,
        }
    }
}

impl From<i64> for TimestampValue {
    fn from(n: i64) -> Self {
        TimestampValue::Number(n as f64)
    }
}

impl From<f64> for TimestampValue {
    fn from(n: f64) -> Self {
        TimestampValue::Number(n)
    }
}

impl From<&str> for TimestampValue {
    fn from(s: &str) -> Self {
        TimestampValue::Text(s.to_string())
    }
}

impl From<String> for TimestampValue {
    fn from(s: String) -> Self {
        TimestampValue::Text(s)
    }
}

impl<T: Into<TimestampValue>> From<Option<T>> for TimestampValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Render in the host's local zone with [`DISPLAY_PATTERN`].
pub fn normalize(value: &TimestampValue) -> String {
    normalize_in(value, &Local)
}

/// Render in `tz` with [`DISPLAY_PATTERN`].
pub fn normalize_in<Tz>(value: &TimestampValue, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format_with(value, tz, DISPLAY_PATTERN)
}

/// Render in `tz` with a caller supplied strftime pattern. A pattern chrono
/// cannot render also yields the sentinel.
pub fn format_with<Tz>(value: &TimestampValue, tz: &Tz, pattern: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(dt) = resolve_in(value, tz) else {
        return UNKNOWN_TIMESTAMP.to_string();
    };
    let mut out = String::new();
    match write!(out, "{}", dt.format(pattern)) {
        Ok(()) => out,
        Err(_) => UNKNOWN_TIMESTAMP.to_string(),
    }
}

/// Resolve a raw value to an instant in `tz`, or `None` if it is absent,
/// malformed or out of range.
pub fn resolve_in<Tz: TimeZone>(value: &TimestampValue, tz: &Tz) -> Option<DateTime<Tz>> {
    match value {
        TimestampValue::Number(n) => from_epoch(*n, tz),
        TimestampValue::Text(s) if DIGITS.is_match(s) => {
            s.parse::<f64>().ok().and_then(|n| from_epoch(n, tz))
        }
        TimestampValue::Text(s) => parse_calendar(s, tz),
        TimestampValue::Absent | TimestampValue::Other(_) => None,
    }
}

/// True if chrono can render every item of `pattern`.
pub fn is_valid_pattern(pattern: &str) -> bool {
    StrftimeItems::new(pattern).all(|item| !matches!(item, Item::Error))
}

fn from_epoch<Tz: TimeZone>(n: f64, tz: &Tz) -> Option<DateTime<Tz>> {
    let millis = if n < SECONDS_CUTOFF { n * 1000.0 } else { n };
    if !millis.is_finite() || millis.abs() > MAX_EPOCH_MILLIS {
        return None;
    }
    let utc = DateTime::<Utc>::from_timestamp_millis(millis.trunc() as i64)?;
    Some(utc.with_timezone(tz))
}

fn parse_calendar<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(tz));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(tz));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return tz.from_local_datetime(&naive).earliest();
        }
    }

    // date-only ISO strings are UTC midnight
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight).with_timezone(tz))
}

/// Which zone timestamps are displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayZone {
    #[default]
    Local,
    Utc,
}

/// Display settings shared by every writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampStyle {
    pub zone: DisplayZone,
    pub pattern: String,
}

impl Default for TimestampStyle {
    fn default() -> Self {
        Self {
            zone: DisplayZone::Local,
            pattern: DISPLAY_PATTERN.to_string(),
        }
    }
}

impl TimestampStyle {
    pub fn utc() -> Self {
        Self {
            zone: DisplayZone::Utc,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn render(&self, value: &TimestampValue) -> String {
        match self.zone {
            DisplayZone::Local => format_with(value, &Local, &self.pattern),
            DisplayZone::Utc => format_with(value, &Utc, &self.pattern),
        }
    }
}
