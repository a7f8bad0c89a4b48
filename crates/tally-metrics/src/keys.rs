use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::records::DateRange;

pub const ON_DEMAND_TTL_SECS: i64 = 60 * 60;
pub const DAILY_TTL_SECS: i64 = 24 * 60 * 60;
pub const WEEKLY_TTL_SECS: i64 = 7 * DAILY_TTL_SECS;
pub const MONTHLY_TTL_SECS: i64 = 30 * DAILY_TTL_SECS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Flow,
    Sprint,
    Dora,
    Quality,
    CumulativeFlow,
    Forecast,
    DailyRollup,
    WeeklyRollup,
    MonthlyDora,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Flow => "flow",
            MetricKind::Sprint => "sprint",
            MetricKind::Dora => "dora",
            MetricKind::Quality => "quality",
            MetricKind::CumulativeFlow => "cfd",
            MetricKind::Forecast => "forecast",
            MetricKind::DailyRollup => "daily",
            MetricKind::WeeklyRollup => "weekly",
            MetricKind::MonthlyDora => "monthly_dora",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "flow" => Some(MetricKind::Flow),
            "sprint" | "sprints" => Some(MetricKind::Sprint),
            "dora" => Some(MetricKind::Dora),
            "quality" => Some(MetricKind::Quality),
            "cfd" | "cumulative_flow" => Some(MetricKind::CumulativeFlow),
            "forecast" => Some(MetricKind::Forecast),
            "daily" => Some(MetricKind::DailyRollup),
            "weekly" => Some(MetricKind::WeeklyRollup),
            "monthly_dora" | "monthly" => Some(MetricKind::MonthlyDora),
            _ => None,
        }
    }

    /// Cache lifetime, proportional to the bucket granularity for rollups.
    pub fn ttl(&self) -> Duration {
        let secs = match self {
            MetricKind::DailyRollup => DAILY_TTL_SECS,
            MetricKind::WeeklyRollup => WEEKLY_TTL_SECS,
            MetricKind::MonthlyDora => MONTHLY_TTL_SECS,
            _ => ON_DEMAND_TTL_SECS,
        };
        Duration::seconds(secs)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `metrics:{project}:{kind}` with `:{start}:{end}` appended when a range applies.
pub fn metric_key(project: &str, kind: MetricKind, range: Option<&DateRange>) -> String {
    match range {
        Some(r) => format!("metrics:{project}:{kind}:{}:{}", r.start, r.end),
        None => format!("metrics:{project}:{kind}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn keys_are_deterministic() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        assert_eq!(
            metric_key("PROJ", MetricKind::Dora, Some(&range)),
            "metrics:PROJ:dora:2024-01-01:2024-01-31"
        );
        assert_eq!(metric_key("PROJ", MetricKind::Flow, None), "metrics:PROJ:flow");
    }

    #[test]
    fn ttl_tracks_granularity() {
        assert_eq!(MetricKind::Flow.ttl(), Duration::hours(1));
        assert_eq!(MetricKind::DailyRollup.ttl(), Duration::days(1));
        assert_eq!(MetricKind::WeeklyRollup.ttl(), Duration::weeks(1));
        assert_eq!(MetricKind::MonthlyDora.ttl(), Duration::days(30));
        assert_eq!(MetricKind::from_slug("cumulative-flow"), Some(MetricKind::CumulativeFlow));
    }
}
