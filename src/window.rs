//! The target day and the classification of free-text post times against it.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Listing times are shown in China Standard Time.
pub const TZ_OFFSET_SECS: i32 = 8 * 3600;

const ABSOLUTE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

static RELATIVE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)^@?\s*(\d+)\s*
        (秒|分钟|小时|天|secs?|seconds?|mins?|minutes?|hours?|days?)
        \s*(前|ago)?$",
    )
    .expect("relative time pattern is valid")
});

pub fn tz() -> FixedOffset {
    FixedOffset::east_opt(TZ_OFFSET_SECS).expect("offset is within a day")
}

pub fn now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&tz())
}

/// Where a post falls relative to the target window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    Newer,
    InWindow,
    Older,
    Unknown,
}

/// The half-open `[start, end)` window of one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetWindow {
    pub day: NaiveDate,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TargetWindow {
    pub fn for_day(day: NaiveDate) -> Self {
        let tz = tz();
        let midnight = day.and_hms_opt(0, 0, 0).unwrap_or_default();
        let start = tz
            .from_local_datetime(&midnight)
            .single()
            .unwrap_or_else(|| tz.from_utc_datetime(&midnight));
        Self {
            day,
            start,
            end: start + Duration::days(1),
        }
    }

    /// The day before `now`, in the fixed timezone.
    pub fn yesterday(now: DateTime<FixedOffset>) -> Self {
        let today = now.with_timezone(&tz()).date_naive();
        Self::for_day(today.pred_opt().unwrap_or(today))
    }

    /// `YYYYMMDD`, as used in page identifiers and folder names.
    pub fn date_key(&self) -> String {
        self.day.format("%Y%m%d").to_string()
    }

    pub fn contains(&self, time: DateTime<FixedOffset>) -> bool {
        self.start <= time && time < self.end
    }

    pub fn place(&self, time: DateTime<FixedOffset>) -> Recency {
        if time >= self.end {
            Recency::Newer
        } else if self.contains(time) {
            Recency::InWindow
        } else {
            Recency::Older
        }
    }

    /// Classifies a post's time text. Relative times resolve against `now`.
    pub fn classify(&self, text: &str, now: DateTime<FixedOffset>) -> Recency {
        match parse_post_time(text, now) {
            Some(time) => self.place(time),
            None => {
                debug!(text, "unparseable post time");
                Recency::Unknown
            }
        }
    }
}

/// Parses "2小时前", "@15 minutes ago", "2025-02-26 13:05:09" and friends.
pub fn parse_post_time(text: &str, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let lowered = text.trim_start_matches('@').trim().to_lowercase();
    if lowered == "刚刚" || lowered == "just now" {
        return Some(now);
    }

    if let Some(caps) = RELATIVE_TIME.captures(text) {
        let amount: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let ago = match unit.as_str() {
            "秒" | "sec" | "secs" | "second" | "seconds" => Duration::try_seconds(amount)?,
            "分钟" | "min" | "mins" | "minute" | "minutes" => Duration::try_minutes(amount)?,
            "小时" | "hour" | "hours" => Duration::try_hours(amount)?,
            _ => Duration::try_days(amount)?,
        };
        return now.checked_sub_signed(ago);
    }

    ABSOLUTE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(text, fmt)
            .ok()
            .and_then(|naive| tz().from_local_datetime(&naive).single())
    })
}
