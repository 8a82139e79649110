//! The eight native value types recognized by the query subsystem, and the
//! `ValueType` tag used as the "type index" in the Expression AST
//! (SPEC_FULL.md §3.1, grounded on
//! `original_source/Beam/Include/Beam/Queries/StandardDataTypes.hpp`).

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A timestamp with the `+infinity`/`-infinity`/`not-a-date-time` sentinels
/// named in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampValue {
    At(DateTime<Utc>),
    PositiveInfinity,
    NegativeInfinity,
    NotADateTime,
}

/// Total order: `NegativeInfinity < At(_) < PositiveInfinity`.
/// `NotADateTime` sorts as greater than everything but itself, matching no
/// real instant (there is no meaningful numeric order for it).
impl TimestampValue {
    fn rank(&self) -> i8 {
        match self {
            TimestampValue::NegativeInfinity => 0,
            TimestampValue::At(_) => 1,
            TimestampValue::PositiveInfinity => 2,
            TimestampValue::NotADateTime => 3,
        }
    }
}

impl PartialOrd for TimestampValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimestampValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (TimestampValue::At(a), TimestampValue::At(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Serialize for TimestampValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TimestampValue::At(t) => serializer.serialize_str(&t.to_rfc3339()),
            TimestampValue::PositiveInfinity => serializer.serialize_str("+infinity"),
            TimestampValue::NegativeInfinity => serializer.serialize_str("-infinity"),
            TimestampValue::NotADateTime => serializer.serialize_str("not-a-date-time"),
        }
    }
}

impl<'de> Deserialize<'de> for TimestampValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "+infinity" => Ok(TimestampValue::PositiveInfinity),
            "-infinity" => Ok(TimestampValue::NegativeInfinity),
            "not-a-date-time" => Ok(TimestampValue::NotADateTime),
            _ => DateTime::parse_from_rfc3339(&raw)
                .map(|t| TimestampValue::At(t.with_timezone(&Utc)))
                .map_err(|e| D::Error::custom(format!("invalid timestamp '{raw}': {e}"))),
        }
    }
}

/// A duration with the `+infinity`/`-infinity` sentinels named in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationValue {
    Span(chrono::Duration),
    PositiveInfinity,
    NegativeInfinity,
}

impl DurationValue {
    fn rank(&self) -> i8 {
        match self {
            DurationValue::NegativeInfinity => 0,
            DurationValue::Span(_) => 1,
            DurationValue::PositiveInfinity => 2,
        }
    }
}

impl PartialOrd for DurationValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DurationValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (DurationValue::Span(a), DurationValue::Span(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Serialize for DurationValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DurationValue::Span(d) => {
                let negative = d.num_milliseconds() < 0;
                let millis = d.num_milliseconds().unsigned_abs();
                let hours = millis / 3_600_000;
                let minutes = (millis / 60_000) % 60;
                let seconds = (millis / 1000) % 60;
                let fractional = millis % 1000;
                let sign = if negative { "-" } else { "" };
                serializer.serialize_str(&format!(
                    "{sign}{hours:02}:{minutes:02}:{seconds:02}.{fractional:04}"
                ))
            }
            DurationValue::PositiveInfinity => serializer.serialize_str("+infinity"),
            DurationValue::NegativeInfinity => serializer.serialize_str("-infinity"),
        }
    }
}

impl<'de> Deserialize<'de> for DurationValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "+infinity" => return Ok(DurationValue::PositiveInfinity),
            "-infinity" => return Ok(DurationValue::NegativeInfinity),
            _ => {}
        }
        let (negative, rest) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.as_str()),
        };
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() != 3 {
            return Err(D::Error::custom(format!("invalid duration '{raw}'")));
        }
        let hours: i64 = parts[0].parse().map_err(D::Error::custom)?;
        let minutes: i64 = parts[1].parse().map_err(D::Error::custom)?;
        let sec_parts: Vec<&str> = parts[2].splitn(2, '.').collect();
        let seconds: i64 = sec_parts[0].parse().map_err(D::Error::custom)?;
        let fractional_millis: i64 = if sec_parts.len() == 2 {
            let frac_str = format!("{:0<4}", sec_parts[1]);
            frac_str[..4].parse().map_err(D::Error::custom)?
        } else {
            0
        };
        let total_millis = ((hours * 60 + minutes) * 60 + seconds) * 1000 + fractional_millis;
        let span = chrono::Duration::milliseconds(if negative {
            -total_millis
        } else {
            total_millis
        });
        Ok(DurationValue::Span(span))
    }
}

/// The type index reported by every Expression node (SPEC_FULL.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Char,
    Int,
    Double,
    UInt64,
    String,
    Timestamp,
    Duration,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Char => "char",
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::UInt64 => "uint64",
            ValueType::String => "string",
            ValueType::Timestamp => "timestamp",
            ValueType::Duration => "duration",
        };
        write!(f, "{name}")
    }
}

/// A value of one of the eight native types (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Char(char),
    Int(i32),
    Double(f64),
    UInt64(u64),
    String(String),
    Timestamp(TimestampValue),
    Duration(DurationValue),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Char(_) => ValueType::Char,
            Value::Int(_) => ValueType::Int,
            Value::Double(_) => ValueType::Double,
            Value::UInt64(_) => ValueType::UInt64,
            Value::String(_) => ValueType::String,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Duration(_) => ValueType::Duration,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}
