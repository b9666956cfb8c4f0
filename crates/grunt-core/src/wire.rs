//! Lenient decoding for coordinator task records.
//!
//! The coordinator is not strict about its column encodings: predecessor lists
//! come back as delimited strings or arrays, ids occasionally as strings, and
//! timestamps with or without an offset.

use crate::{TaskId, PREDECESSOR_DELIMITER};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn into_id<E: de::Error>(self) -> Result<TaskId, E> {
        match self {
            RawId::Number(n) => Ok(TaskId(n)),
            RawId::Text(s) => parse_id(&s).map_err(E::custom),
        }
    }
}

pub(crate) fn parse_id(s: &str) -> Result<TaskId, String> {
    s.trim()
        .parse::<i64>()
        .map(TaskId)
        .map_err(|_| format!("invalid task id '{}'", s))
}

pub(crate) fn task_id<'de, D>(deserializer: D) -> Result<TaskId, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer)?.into_id()
}

pub(crate) fn opt_task_id<'de, D>(deserializer: D) -> Result<Option<TaskId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(raw) => raw.into_id().map(Some),
        None => Ok(None),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPredecessors {
    Joined(String),
    List(Vec<RawId>),
}

/// Split a delimited predecessor string such as `"3,4"` into ids.
pub(crate) fn split_predecessors(joined: &str) -> Result<Vec<TaskId>, String> {
    joined
        .split(PREDECESSOR_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_id)
        .collect()
}

pub(crate) fn predecessors<'de, D>(deserializer: D) -> Result<Vec<TaskId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawPredecessors>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(RawPredecessors::Joined(joined)) => {
            split_predecessors(&joined).map_err(de::Error::custom)
        }
        Some(RawPredecessors::List(ids)) => ids.into_iter().map(RawId::into_id).collect(),
    }
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    // Naive timestamps are stored as UTC by the coordinator.
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("invalid timestamp '{}'", s))
}

/// Informational timestamps: anything unreadable decodes to `None`.
pub(crate) fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => parse_timestamp(s.trim()).ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_split_predecessors() {
        assert_eq!(split_predecessors("").unwrap(), vec![]);
        assert_eq!(
            split_predecessors("3, 4,").unwrap(),
            vec![TaskId(3), TaskId(4)]
        );
        assert!(split_predecessors("3,x").is_err());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let with_offset = parse_timestamp("2024-05-01T12:30:00+02:00").unwrap();
        assert_eq!(with_offset.hour(), 10);

        let naive = parse_timestamp("2024-05-01T12:30:00.250").unwrap();
        assert_eq!(naive.hour(), 12);
        assert_eq!(naive.day(), 1);

        let spaced = parse_timestamp("2024-05-01 08:00:00").unwrap();
        assert_eq!(spaced.hour(), 8);

        let postgres = parse_timestamp("2024-05-01 10:00:00.123+00").unwrap();
        assert_eq!(postgres.hour(), 10);

        assert!(parse_timestamp("yesterday").is_err());
    }
}
