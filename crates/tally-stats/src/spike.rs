use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::series::MetricSeries;
use crate::toolkit;

/// Baseline multiples. A point is flagged above `flag`; severity rises at
/// `high` and `critical`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpikeThresholds {
    pub flag: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SpikeThresholds {
    fn default() -> Self {
        Self {
            flag: 2.0,
            high: 3.0,
            critical: 4.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeSeverity {
    Moderate,
    High,
    Critical,
}

impl SpikeSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpikeSeverity::Moderate => "moderate",
            SpikeSeverity::High => "high",
            SpikeSeverity::Critical => "critical",
        }
    }
}

/// Calendar position of a spike. A hint only; it says nothing about cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeHint {
    StartOfWeek,
    EndOfWeek,
    StartOfMonth,
    EndOfMonth,
}

impl SpikeHint {
    /// Reads an ISO date from the first ten characters of `period`.
    pub fn for_period(period: &str) -> Option<Self> {
        let date = NaiveDate::parse_from_str(period.get(..10)?, "%Y-%m-%d").ok()?;
        if date.day() <= 3 {
            return Some(SpikeHint::StartOfMonth);
        }
        if days_in_month(date) - date.day() < 3 {
            return Some(SpikeHint::EndOfMonth);
        }
        match date.weekday() {
            Weekday::Mon => Some(SpikeHint::StartOfWeek),
            Weekday::Fri => Some(SpikeHint::EndOfWeek),
            _ => None,
        }
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub period: String,
    pub value: f64,
    pub baseline: f64,
    pub ratio: f64,
    pub severity: SpikeSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<SpikeHint>,
}

#[derive(Clone, Debug, Default)]
pub struct SpikeDetector {
    thresholds: SpikeThresholds,
}

impl SpikeDetector {
    pub fn new(thresholds: SpikeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> SpikeThresholds {
        self.thresholds
    }

    /// Points strictly above `baseline * flag`, in period order. A
    /// non-positive baseline flags nothing.
    pub fn detect(&self, series: &MetricSeries, baseline: f64) -> Vec<Spike> {
        if baseline <= 0.0 || !baseline.is_finite() {
            return Vec::new();
        }
        let t = self.thresholds;
        series
            .iter()
            .filter(|p| p.value > baseline * t.flag)
            .map(|p| {
                let ratio = p.value / baseline;
                let severity = if ratio >= t.critical {
                    SpikeSeverity::Critical
                } else if ratio >= t.high {
                    SpikeSeverity::High
                } else {
                    SpikeSeverity::Moderate
                };
                Spike {
                    period: p.period.clone(),
                    value: p.value,
                    baseline,
                    ratio,
                    severity,
                    hint: SpikeHint::for_period(&p.period),
                }
            })
            .collect()
    }

    pub fn detect_against_median(&self, series: &MetricSeries) -> Vec<Spike> {
        self.detect(series, toolkit::median(&series.values()))
    }
}
