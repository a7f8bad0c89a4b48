use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MetricsError, MetricsResult};

/// One flat record as supplied by the analytics source.
pub type Record = serde_json::Map<String, Value>;

/// Field names used to read work items. Defaults follow the source's
/// camelCase export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFields {
    pub key: String,
    pub issue_type: String,
    pub status: String,
    pub status_category: String,
    pub priority: String,
    pub created: String,
    pub started: String,
    pub resolved: String,
    pub story_points: String,
    pub sprint: String,
    /// Start date of the item's current sprint, when the feed carries one.
    pub sprint_start: String,
}

impl Default for RecordFields {
    fn default() -> Self {
        Self {
            key: "key".into(),
            issue_type: "issueType".into(),
            status: "status".into(),
            status_category: "statusCategory".into(),
            priority: "priority".into(),
            created: "created".into(),
            started: "started".into(),
            resolved: "resolved".into(),
            story_points: "storyPoints".into(),
            sprint: "sprint".into(),
            sprint_start: "sprintStart".into(),
        }
    }
}

impl RecordFields {
    pub fn created(&self, rec: &Record) -> Option<DateTime<Utc>> {
        field_time(rec, &self.created)
    }

    pub fn started(&self, rec: &Record) -> Option<DateTime<Utc>> {
        field_time(rec, &self.started)
    }

    pub fn sprint_start(&self, rec: &Record) -> Option<DateTime<Utc>> {
        field_time(rec, &self.sprint_start)
    }

    pub fn resolved(&self, rec: &Record) -> Option<DateTime<Utc>> {
        field_time(rec, &self.resolved)
    }

    pub fn points(&self, rec: &Record) -> f64 {
        field_f64(rec, &self.story_points).unwrap_or(0.0)
    }

    /// Done when the status category says so, or a resolution date is set.
    pub fn is_done(&self, rec: &Record) -> bool {
        match field_str(rec, &self.status_category) {
            Some(cat) => cat.eq_ignore_ascii_case("done"),
            None => self.resolved(rec).is_some(),
        }
    }

    pub fn is_in_progress(&self, rec: &Record) -> bool {
        if self.is_done(rec) {
            return false;
        }
        match field_str(rec, &self.status_category) {
            Some(cat) => {
                cat.eq_ignore_ascii_case("in progress") || cat.eq_ignore_ascii_case("in_progress")
            }
            None => self.started(rec).is_some(),
        }
    }

    pub fn is_bug(&self, rec: &Record) -> bool {
        field_str(rec, &self.issue_type).is_some_and(|t| t.eq_ignore_ascii_case("bug"))
    }

    /// Sprints the item was part of, oldest first. Accepts a single name or
    /// an array of names.
    pub fn sprints<'a>(&self, rec: &'a Record) -> Vec<&'a str> {
        match rec.get(&self.sprint) {
            Some(Value::String(s)) if !s.is_empty() => vec![s.as_str()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub fn field_str<'a>(rec: &'a Record, name: &str) -> Option<&'a str> {
    rec.get(name)?.as_str()
}

/// Numbers, or strings that parse as numbers.
pub fn field_f64(rec: &Record, name: &str) -> Option<f64> {
    match rec.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Strings are parsed with [`parse_timestamp`]; numbers are epoch millis.
pub fn field_time(rec: &Record, name: &str) -> Option<DateTime<Utc>> {
    match rec.get(name)? {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        _ => None,
    }
}

/// RFC 3339, the `+0000` offset style, naive date-times (taken as UTC) and
/// plain dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

pub(crate) fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<f64> {
    let secs = (to - from).num_seconds();
    (secs >= 0).then(|| secs as f64 / 3600.0)
}

/// Inclusive calendar range used for bucketing and cache keys.
/// ISO week label such as `2024-W07`.
pub fn iso_week_label(day: NaiveDate) -> String {
    let iso = day.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> MetricsResult<Self> {
        if start > end {
            return Err(MetricsError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn len_days(&self) -> u64 {
        (self.end - self.start).num_days().unsigned_abs() + 1
    }

    /// Every day in the range, one calendar day at a time.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let day = next?;
            next = day.checked_add_days(Days::new(1)).filter(|d| *d <= self.end);
            Some(day)
        })
    }
}
