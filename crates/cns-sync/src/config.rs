use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

pub const DEFAULT_TIMEZONE: &str = "America/Phoenix";
pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 120;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const DEFAULT_STATE_PATH: &str = ".cns_watermark";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_UPSERT_DELAY_MS: u64 = 150;
pub const DEFAULT_SYNC_CRON: &str = "0 0 */6 * * *";
/// Upper bound for either side of the scan horizon.
pub const MAX_HORIZON_DAYS: u32 = 36_500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("COURSE_IDS does not contain any numeric course id")]
    NoCourses,
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("unknown time zone {0:?}")]
    UnknownZone(String),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub canvas_base_url: String,
    pub canvas_token: String,
    pub notion_token: String,
    pub notion_database_id: String,
    pub course_ids: Vec<u64>,
    pub course_name_overrides: BTreeMap<u64, String>,
    pub timezone: Tz,
    pub lookahead_days: u32,
    pub lookback_days: u32,
    pub state_path: PathBuf,
    pub http_timeout_secs: u64,
    pub upsert_delay: Duration,
    pub legacy_adoption: bool,
    pub sync_cron: String,
}

impl SyncConfig {
    /// Read settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let course_ids = parse_course_ids(&required("COURSE_IDS")?);
        if course_ids.is_empty() {
            return Err(ConfigError::NoCourses);
        }

        let zone_name = get("TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = zone_name
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownZone(zone_name.clone()))?;

        Ok(Self {
            canvas_base_url: required("CANVAS_BASE_URL")?.trim_end_matches('/').to_string(),
            canvas_token: required("CANVAS_TOKEN")?,
            notion_token: required("NOTION_TOKEN")?,
            notion_database_id: required("NOTION_DATABASE_ID")?,
            course_ids,
            course_name_overrides: get("COURSE_NAME_OVERRIDES")
                .map(|raw| parse_overrides(&raw))
                .unwrap_or_default(),
            timezone,
            lookahead_days: parse_bounded(
                "LOOKAHEAD_DAYS",
                get("LOOKAHEAD_DAYS"),
                DEFAULT_LOOKAHEAD_DAYS,
                0..=MAX_HORIZON_DAYS,
            )?,
            lookback_days: parse_bounded(
                "LOOKBACK_DAYS",
                get("LOOKBACK_DAYS"),
                DEFAULT_LOOKBACK_DAYS,
                0..=MAX_HORIZON_DAYS,
            )?,
            state_path: get("SYNC_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            http_timeout_secs: parse_bounded(
                "HTTP_TIMEOUT_SECS",
                get("HTTP_TIMEOUT_SECS"),
                DEFAULT_HTTP_TIMEOUT_SECS,
                1..=u64::MAX,
            )?,
            upsert_delay: Duration::from_millis(parse_number(
                "UPSERT_DELAY_MS",
                get("UPSERT_DELAY_MS"),
                DEFAULT_UPSERT_DELAY_MS,
            )?),
            legacy_adoption: get("LEGACY_ADOPTION")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(false),
            sync_cron: get("SYNC_CRON").unwrap_or_else(|| DEFAULT_SYNC_CRON.to_string()),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_bounded<T>(
    key: &'static str,
    raw: Option<String>,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + ToString,
{
    let value = parse_number(key, raw, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        })
    }
}

/// Comma-separated course ids. Entries that are not integers are dropped.
pub fn parse_course_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// `id:Label` pairs separated by commas. Malformed pairs are dropped.
pub fn parse_overrides(raw: &str) -> BTreeMap<u64, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (id, label) = pair.split_once(':')?;
            let label = label.trim();
            if label.is_empty() {
                return None;
            }
            Some((id.trim().parse().ok()?, label.to_string()))
        })
        .collect()
}
