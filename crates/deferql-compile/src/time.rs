//! Time contexts and their canonical, localized form

use crate::policy::{BackendPolicy, NaiveTimestamps};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use deferql_ir::{DataType, Error, Result, TypeKind, Value};

/// Column restricted when a time context names none.
pub const DEFAULT_TIME_COLUMN: &str = "time";

/// One end of a caller-supplied time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    Utc(DateTime<Utc>),
    Offset(DateTime<FixedOffset>),
    /// Wall-clock time with no zone; meaning depends on the backend policy.
    Naive(NaiveDateTime),
}

impl From<DateTime<Utc>> for TimeBound {
    fn from(t: DateTime<Utc>) -> Self {
        TimeBound::Utc(t)
    }
}

impl From<DateTime<FixedOffset>> for TimeBound {
    fn from(t: DateTime<FixedOffset>) -> Self {
        TimeBound::Offset(t)
    }
}

impl From<NaiveDateTime> for TimeBound {
    fn from(t: NaiveDateTime) -> Self {
        TimeBound::Naive(t)
    }
}

/// A `[start, end)` window as the caller wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeContext {
    pub start: TimeBound,
    pub end: TimeBound,
    pub column: Option<String>,
}

impl TimeContext {
    pub fn new(start: impl Into<TimeBound>, end: impl Into<TimeBound>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            column: None,
        }
    }

    pub fn on_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Normalize to UTC and localize once for the backend.
    pub fn canonicalize(&self, policy: &BackendPolicy) -> Result<TimeWindow> {
        let offset = policy.session_offset()?;
        let start = to_utc(self.start, policy, &offset)?;
        let end = to_utc(self.end, policy, &offset)?;
        if start >= end {
            return Err(Error::InvalidTimeContext(format!(
                "window start {start} is not before end {end}"
            )));
        }
        let local = match policy.naive_timestamps {
            NaiveTimestamps::SessionLocal => Some((
                start.with_timezone(&offset).naive_local(),
                end.with_timezone(&offset).naive_local(),
            )),
            NaiveTimestamps::Reject => None,
        };
        Ok(TimeWindow {
            start,
            end,
            local,
            column: self
                .column
                .clone()
                .unwrap_or_else(|| DEFAULT_TIME_COLUMN.to_string()),
        })
    }
}

fn to_utc(bound: TimeBound, policy: &BackendPolicy, offset: &FixedOffset) -> Result<DateTime<Utc>> {
    match bound {
        TimeBound::Utc(t) => Ok(t),
        TimeBound::Offset(t) => Ok(t.with_timezone(&Utc)),
        TimeBound::Naive(t) => match policy.naive_timestamps {
            NaiveTimestamps::Reject => Err(Error::InvalidTimeContext(format!(
                "naive bound {t} is ambiguous; give a zone or set naive_timestamps: session_local"
            ))),
            NaiveTimestamps::SessionLocal => offset
                .from_local_datetime(&t)
                .single()
                .map(|t| t.with_timezone(&Utc))
                .ok_or_else(|| {
                    Error::InvalidTimeContext(format!("{t} does not exist in {offset}"))
                }),
        },
    }
}

/// Canonical window: UTC bounds plus the session-local wall-clock bounds
/// when the backend stores naive timestamps as session-local time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub local: Option<(NaiveDateTime, NaiveDateTime)>,
    pub column: String,
}

impl TimeWindow {
    /// Whether a table with this column type gets restricted.
    pub fn applies_to(&self, dtype: &DataType) -> bool {
        dtype.is_timestamp()
    }

    /// Literal bounds comparable with a column of type `dtype`.
    pub fn bounds_for(&self, dtype: &DataType) -> Result<(Value, Value)> {
        match &dtype.kind {
            TypeKind::Timestamp {
                timezone: Some(_), ..
            } => Ok((
                Value::Timestamp {
                    value: self.start.naive_utc(),
                    timezone: Some("UTC".to_string()),
                },
                Value::Timestamp {
                    value: self.end.naive_utc(),
                    timezone: Some("UTC".to_string()),
                },
            )),
            TypeKind::Timestamp { timezone: None, .. } => {
                let (start, end) = self.local.ok_or_else(|| {
                    Error::Type(format!(
                        "column '{}' holds naive timestamps and the backend policy rejects them",
                        self.column
                    ))
                })?;
                Ok((
                    Value::Timestamp {
                        value: start,
                        timezone: None,
                    },
                    Value::Timestamp {
                        value: end,
                        timezone: None,
                    },
                ))
            }
            _ => Err(Error::Type(format!(
                "time column '{}' has non-timestamp type {dtype}",
                self.column
            ))),
        }
    }
}
