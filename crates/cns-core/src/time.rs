//! Timestamp normalization into the configured civil time zone.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("unparsable timestamp {raw:?}")]
    Unparsable { raw: String },
    #[error("unknown time zone {0:?}")]
    UnknownZone(String),
    #[error("horizon of -{lookback_days}/+{lookahead_days} days is out of range")]
    HorizonOutOfRange {
        lookback_days: u32,
        lookahead_days: u32,
    },
}

const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeNormalizer {
    zone: Tz,
}

impl TimeNormalizer {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn from_name(name: &str) -> Result<Self, TimeError> {
        name.trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|_| TimeError::UnknownZone(name.to_string()))
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.localize(Utc::now())
    }

    pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.zone)
    }

    /// Parse a source timestamp.
    ///
    /// Absent or blank input yields `Ok(None)`. Input without an offset is taken
    /// as UTC. Anything else that fails to parse is an error.
    pub fn parse(&self, raw: Option<&str>) -> Result<Option<DateTime<Tz>>, TimeError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(dt.with_timezone(&self.zone)));
        }
        if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
            return Ok(Some(dt.with_timezone(&self.zone)));
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(Some(self.from_utc_naive(naive)));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(Some(self.from_utc_naive(naive)));
            }
        }

        Err(TimeError::Unparsable {
            raw: raw.to_string(),
        })
    }

    fn from_utc_naive(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        Utc.from_utc_datetime(&naive).with_timezone(&self.zone)
    }
}

/// 12-hour clock without a leading zero, e.g. `9:05 PM`.
pub fn time_of_day(dt: &DateTime<Tz>) -> String {
    dt.format("%-I:%M %p").to_string()
}

/// Inclusive window of due instants a full scan considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl Horizon {
    pub fn around(
        now: DateTime<Tz>,
        lookback_days: u32,
        lookahead_days: u32,
    ) -> Result<Self, TimeError> {
        let out_of_range = || TimeError::HorizonOutOfRange {
            lookback_days,
            lookahead_days,
        };
        let start = Duration::try_days(i64::from(lookback_days))
            .and_then(|back| now.checked_sub_signed(back))
            .ok_or_else(out_of_range)?;
        let end = Duration::try_days(i64::from(lookahead_days))
            .and_then(|ahead| now.checked_add_signed(ahead))
            .ok_or_else(out_of_range)?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, instant: &DateTime<Tz>) -> bool {
        *instant >= self.start && *instant <= self.end
    }
}
