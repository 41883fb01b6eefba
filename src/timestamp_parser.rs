use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Handles parsing timestamps from the formats our sources emit: epoch seconds from the
/// indexer, and whatever the accounting export put in its date column.
pub struct TimestampParser;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

impl TimestampParser {
    /// Parse a timestamp string into a DateTime<Utc>
    /// Handles Z suffix, explicit offsets, naive datetimes (assumed UTC) and bare dates.
    pub fn parse(timestamp_str: &str) -> Result<DateTime<Utc>> {
        let trimmed = timestamp_str.trim();

        // Handle both Z suffix and timezone info
        let timestamp = if trimmed.ends_with('Z') {
            trimmed.replace('Z', "+00:00")
        } else {
            trimmed.to_string()
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(&timestamp) {
            return Ok(dt.with_timezone(&Utc));
        }

        for format in DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&timestamp, format) {
                return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(&timestamp, format) {
                if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                    return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
                }
            }
        }

        anyhow::bail!("Failed to parse timestamp: {}", timestamp_str)
    }

    /// Parse an epoch-seconds string as sent by the indexer.
    pub fn parse_epoch_seconds(raw: &str) -> Result<DateTime<Utc>> {
        let seconds: i64 = raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Failed to parse epoch seconds: {}", raw))?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Epoch seconds out of range: {}", raw))
    }

    /// Lenient variant for row data: unparseable or empty values become `None`.
    pub fn parse_optional(timestamp_str: &str) -> Option<DateTime<Utc>> {
        if timestamp_str.trim().is_empty() {
            return None;
        }
        Self::parse(timestamp_str).ok()
    }
}
