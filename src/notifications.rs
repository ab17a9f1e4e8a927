//! Notification trigger normalization.
//!
//! Scripts pass triggers in whatever shape the model remembered: a delay in
//! seconds, an epoch timestamp, an ISO string, a `Date`, or one of several
//! object forms. Everything is reduced to `Trigger`; anything unusable or in
//! the past becomes `Immediate`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numbers above this are epoch milliseconds; below it, seconds from now.
const EPOCH_MS_THRESHOLD: f64 = 1e11;
/// Repeating intervals shorter than this are stretched to it.
const MIN_REPEAT_SECONDS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Trigger {
    Immediate,
    TimeInterval {
        seconds: u64,
        repeats: bool,
    },
    Date {
        at: DateTime<Utc>,
    },
    Daily {
        hour: u32,
        minute: u32,
    },
    Calendar {
        #[serde(skip_serializing_if = "Option::is_none")]
        weekday: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        day: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        month: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hour: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        minute: Option<u32>,
        repeats: bool,
    },
}

pub fn normalize_trigger(raw: &Value) -> Trigger {
    normalize_trigger_at(raw, Utc::now())
}

pub fn normalize_trigger_at(raw: &Value, now: DateTime<Utc>) -> Trigger {
    let trigger = normalize_inner(raw, now).unwrap_or(Trigger::Immediate);
    tracing::trace!(target = "oracle", ?trigger, "notification trigger normalized");
    trigger
}

fn normalize_inner(raw: &Value, now: DateTime<Utc>) -> Option<Trigger> {
    match raw {
        Value::Null => Some(Trigger::Immediate),
        Value::Number(n) => from_number(n.as_f64()?, false, now),
        Value::String(s) => from_date_string(s, now),
        Value::Object(map) => {
            let repeats = map.get("repeats").and_then(Value::as_bool).unwrap_or(false);
            let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();

            if let Some(date) = map.get("date").or_else(|| map.get("timestamp")) {
                return match date {
                    Value::Number(n) => from_epoch_ms(n.as_f64()?, now),
                    Value::String(s) => from_date_string(s, now),
                    _ => None,
                };
            }
            if let Some(seconds) = map.get("seconds").and_then(Value::as_f64) {
                return from_number(seconds, repeats, now);
            }

            // Out-of-range values saturate so the range checks below reject them.
            let field = |name: &str| {
                map.get(name)
                    .and_then(Value::as_u64)
                    .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            };
            let (hour, minute) = (field("hour"), field("minute"));
            if hour.is_some_and(|h| h > 23) || minute.is_some_and(|m| m > 59) {
                return None;
            }
            let (weekday, day, month) = (field("weekday"), field("day"), field("month"));
            let calendar_only = weekday.is_some() || day.is_some() || month.is_some();

            if !calendar_only && (kind == "daily" || repeats) {
                if let (Some(hour), Some(minute)) = (hour, minute) {
                    return Some(Trigger::Daily { hour, minute });
                }
            }
            if calendar_only || hour.is_some() || minute.is_some() {
                if weekday.is_some_and(|w| !(1..=7).contains(&w))
                    || day.is_some_and(|d| !(1..=31).contains(&d))
                    || month.is_some_and(|m| !(1..=12).contains(&m))
                {
                    return None;
                }
                return Some(Trigger::Calendar {
                    weekday,
                    day,
                    month,
                    hour,
                    minute,
                    repeats,
                });
            }
            None
        }
        _ => None,
    }
}

fn from_number(value: f64, repeats: bool, now: DateTime<Utc>) -> Option<Trigger> {
    if !value.is_finite() {
        return None;
    }
    if value > EPOCH_MS_THRESHOLD {
        return from_epoch_ms(value, now);
    }
    if value < 1.0 {
        return Some(Trigger::Immediate);
    }
    let mut seconds = value.round() as u64;
    if repeats && seconds < MIN_REPEAT_SECONDS {
        seconds = MIN_REPEAT_SECONDS;
    }
    Some(Trigger::TimeInterval { seconds, repeats })
}

fn from_epoch_ms(ms: f64, now: DateTime<Utc>) -> Option<Trigger> {
    let at = Utc.timestamp_millis_opt(ms as i64).single()?;
    future_date(at, now)
}

fn from_date_string(raw: &str, now: DateTime<Utc>) -> Option<Trigger> {
    let at = DateTime::parse_from_rfc3339(raw.trim()).ok()?.with_timezone(&Utc);
    future_date(at, now)
}

fn future_date(at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Trigger> {
    (at > now).then_some(Trigger::Date { at })
}
