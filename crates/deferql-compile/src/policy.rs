//! Explicit per-backend coercion and timestamp policies

use chrono::FixedOffset;
use deferql_ir::{Error, Result};
use serde::{Deserialize, Serialize};

/// How naive (zone-less) timestamps are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaiveTimestamps {
    /// Naive bounds and columns are ambiguous and rejected.
    Reject,
    /// Naive values are wall-clock times in the session timezone.
    SessionLocal,
}

impl std::str::FromStr for NaiveTimestamps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject" => Ok(NaiveTimestamps::Reject),
            "session_local" => Ok(NaiveTimestamps::SessionLocal),
            other => Err(Error::Invariant(format!(
                "unknown naive timestamp policy '{other}' (expected reject or session_local)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendPolicy {
    /// `UTC` or a fixed offset such as `+05:30`.
    pub session_timezone: String,
    pub naive_timestamps: NaiveTimestamps,
    /// Coerce unrepresentable types instead of failing, with a fidelity note.
    pub lossy_coercion: bool,
    /// Read native `DECIMAL(p, 0)` back as `Int64`.
    pub zero_scale_decimal_as_int64: bool,
    /// Null checks on floating operands also match NaN.
    pub nan_as_null: bool,
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self {
            session_timezone: "UTC".to_string(),
            naive_timestamps: NaiveTimestamps::Reject,
            lossy_coercion: false,
            zero_scale_decimal_as_int64: false,
            nan_as_null: false,
        }
    }
}

impl BackendPolicy {
    /// Policy for engines that store naive timestamps as session-local
    /// wall-clock time.
    pub fn session_local(timezone: impl Into<String>) -> Self {
        Self {
            session_timezone: timezone.into(),
            naive_timestamps: NaiveTimestamps::SessionLocal,
            ..Self::default()
        }
    }

    pub fn with_lossy_coercion(mut self, lossy: bool) -> Self {
        self.lossy_coercion = lossy;
        self
    }

    pub fn session_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.session_timezone)
    }
}

/// Parse `UTC`, `Z`, or `±HH:MM` into a fixed offset.
pub fn parse_offset(zone: &str) -> Result<FixedOffset> {
    let invalid = |reason: String| {
        Error::InvalidTimeContext(format!("unsupported timezone '{zone}': {reason}"))
    };
    if zone.eq_ignore_ascii_case("utc") || zone == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid("out of range".to_string()));
    }
    zone.parse::<FixedOffset>().map_err(|e| invalid(e.to_string()))
}
