//! History data structures

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Author of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire/storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(Error::Validation(format!(
                "role must be 'user' or 'assistant', got '{}'",
                other
            ))),
        }
    }
}

/// One entry of a user's history window, oldest first when listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Aggregate snapshot served to administrators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Distinct registered users
    pub total_users: u64,
    /// Messages currently stored across all users
    pub total_messages: u64,
    /// Stored messages with role `user`
    pub user_messages: u64,
    /// Distinct users with at least one message created today
    pub active_today: u64,
}

/// Registration record of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: i64,
    pub display_name: Option<String>,
    /// Set when the user is first registered and never changed afterwards
    pub first_seen: DateTime<Utc>,
    /// Refreshed by every `upsert_user`
    pub last_seen: DateTime<Utc>,
}

/// Calendar used to decide where "today" starts for the daily-active count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DayBoundary {
    #[default]
    Utc,
    /// The server's local time zone
    Local,
    /// A named IANA time zone
    Zone(chrono_tz::Tz),
}

impl DayBoundary {
    /// Half-open `[start, end)` range of the calendar day containing `now`
    pub fn day_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            DayBoundary::Utc => day_range_in(&Utc, now),
            DayBoundary::Local => day_range_in(&chrono::Local, now),
            DayBoundary::Zone(tz) => day_range_in(tz, now),
        }
    }
}

fn day_range_in<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.with_timezone(tz).date_naive();
    let start = first_instant(tz, today);
    let end = today
        .succ_opt()
        .map(|tomorrow| first_instant(tz, tomorrow))
        .unwrap_or_else(|| start + Duration::days(1));
    (start, end)
}

/// First instant of `date` in `tz`, stepping past a midnight skipped by DST
fn first_instant<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let mut local = date.and_time(NaiveTime::default());
    for _ in 0..4 {
        match tz.from_local_datetime(&local) {
            LocalResult::Single(t) => return t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => local += Duration::minutes(30),
        }
    }
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

impl FromStr for DayBoundary {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") {
            return Ok(DayBoundary::Utc);
        }
        if trimmed.eq_ignore_ascii_case("local") {
            return Ok(DayBoundary::Local);
        }
        trimmed
            .parse::<chrono_tz::Tz>()
            .map(DayBoundary::Zone)
            .map_err(|_| Error::Config(format!("unknown day boundary time zone: {}", trimmed)))
    }
}

impl fmt::Display for DayBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayBoundary::Utc => f.write_str("utc"),
            DayBoundary::Local => f.write_str("local"),
            DayBoundary::Zone(tz) => f.write_str(tz.name()),
        }
    }
}

/// Display names are only stored when they carry text
pub(crate) fn normalize_display_name(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

/// Stored timestamps are Unix milliseconds
pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, Error> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Internal(format!("timestamp {} is out of range", millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_role_rejects_unknown_values() {
        let err = "system".parse::<Role>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!("User".parse::<Role>().is_err());
    }

    #[test]
    fn test_day_boundary_parse() {
        assert_eq!("".parse::<DayBoundary>().unwrap(), DayBoundary::Utc);
        assert_eq!("UTC".parse::<DayBoundary>().unwrap(), DayBoundary::Utc);
        assert_eq!("local".parse::<DayBoundary>().unwrap(), DayBoundary::Local);
        assert_eq!(
            "Europe/Moscow".parse::<DayBoundary>().unwrap(),
            DayBoundary::Zone(chrono_tz::Europe::Moscow)
        );
        assert!("Mars/Olympus".parse::<DayBoundary>().is_err());
    }

    #[test]
    fn test_utc_day_range() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();
        let (start, end) = DayBoundary::Utc.day_range(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_zone_day_range_crosses_utc_date() {
        // 22:30 UTC is already the next day in Moscow (UTC+3)
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 22, 30, 0).unwrap();
        let (start, end) = DayBoundary::Zone(chrono_tz::Europe::Moscow).day_range(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 10, 21, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 11, 21, 0, 0).unwrap());
    }

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(normalize_display_name(Some(" anna ")), Some("anna"));
        assert_eq!(normalize_display_name(Some("   ")), None);
        assert_eq!(normalize_display_name(None), None);
    }

    #[test]
    fn test_from_millis() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(from_millis(at.timestamp_millis()).unwrap(), at);
        assert!(from_millis(i64::MAX).is_err());
    }
}
