//! Parsing for human duration values used by request timeouts (e.g. "250ms", "5s", "2m").

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::str::FromStr;
use std::time::Duration;

use crate::{FuzzStateError, FuzzStateResult};

/// A `Duration` that reads and writes as `"<n><unit>"` in config files and on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl FromStr for HumanDuration {
    type Err = FuzzStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(Self)
    }
}

impl std::fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = self.0.as_millis();
        if ms % 1000 == 0 {
            write!(f, "{}s", ms / 1000)
        } else {
            write!(f, "{ms}ms")
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn parse_duration(input: &str) -> FuzzStateResult<Duration> {
    let s = input.trim();
    let digits_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let (num_part, unit_part) = s.split_at(digits_end);
    if num_part.is_empty() {
        return Err(FuzzStateError::InvalidArgument(format!(
            "invalid duration {input:?} (missing number)"
        )));
    }
    let value: u64 = num_part.parse().map_err(|_| {
        FuzzStateError::InvalidArgument(format!("invalid duration number {num_part:?} (from {input:?})"))
    })?;

    match unit_part {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "" => Err(FuzzStateError::InvalidArgument(format!(
            "invalid duration {input:?} (missing unit; expected ms|s|m)"
        ))),
        other => Err(FuzzStateError::InvalidArgument(format!(
            "invalid duration unit {other:?} (expected ms|s|m)"
        ))),
    }
}
