use std::collections::BTreeMap;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::dora::{compute_dora, DoraFields, DoraInput, DoraMetrics};
use crate::records::{hours_between, DateRange, Record, RecordFields};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub created: usize,
    pub started: usize,
    pub completed: usize,
    pub completed_points: f64,
    /// Sum over items completed this day; averaged in weekly rollups.
    pub cycle_time_total_days: f64,
    pub cycle_time_samples: usize,
}

impl DailyBucket {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            created: 0,
            started: 0,
            completed: 0,
            completed_points: 0.0,
            cycle_time_total_days: 0.0,
            cycle_time_samples: 0,
        }
    }

    pub fn average_cycle_time_days(&self) -> Option<f64> {
        (self.cycle_time_samples > 0)
            .then(|| self.cycle_time_total_days / self.cycle_time_samples as f64)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBucket {
    /// ISO week label, e.g. `2024-W07`.
    pub week: String,
    /// Days of the week actually covered by daily buckets.
    pub range: DateRange,
    pub days: usize,
    pub created: usize,
    pub started: usize,
    pub completed: usize,
    pub completed_points: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_cycle_time_days: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonthlyDoraBucket {
    /// `YYYY-MM`.
    pub month: String,
    pub metrics: DoraMetrics,
}

/// One bucket per calendar day of `range`, empty days included.
pub fn daily_buckets(records: &[Record], fields: &RecordFields, range: DateRange) -> Vec<DailyBucket> {
    let mut buckets: BTreeMap<NaiveDate, DailyBucket> = range
        .days()
        .map(|d| (d, DailyBucket::empty(d)))
        .collect();
    for rec in records {
        let created = fields.created(rec);
        let started = fields.started(rec);
        if let Some(b) = created.and_then(|t| buckets.get_mut(&t.date_naive())) {
            b.created += 1;
        }
        if let Some(b) = started.and_then(|t| buckets.get_mut(&t.date_naive())) {
            b.started += 1;
        }
        if !fields.is_done(rec) {
            continue;
        }
        let Some(resolved) = fields.resolved(rec) else {
            continue;
        };
        let Some(b) = buckets.get_mut(&resolved.date_naive()) else {
            continue;
        };
        b.completed += 1;
        b.completed_points += fields.points(rec);
        if let Some(hours) = started.and_then(|s| hours_between(s, resolved)) {
            b.cycle_time_total_days += hours / 24.0;
            b.cycle_time_samples += 1;
        }
    }
    buckets.into_values().collect()
}

/// Groups daily buckets by ISO week, ordered by week.
pub fn weekly_from_daily(daily: &[DailyBucket]) -> Vec<WeeklyBucket> {
    let mut weeks: BTreeMap<(i32, u32), Vec<&DailyBucket>> = BTreeMap::new();
    for bucket in daily {
        let iso = bucket.date.iso_week();
        weeks.entry((iso.year(), iso.week())).or_default().push(bucket);
    }
    weeks
        .into_iter()
        .filter_map(|((year, week), days)| {
            let start = days.iter().map(|d| d.date).min()?;
            let end = days.iter().map(|d| d.date).max()?;
            let samples: usize = days.iter().map(|d| d.cycle_time_samples).sum();
            let total: f64 = days.iter().map(|d| d.cycle_time_total_days).sum();
            Some(WeeklyBucket {
                week: format!("{year}-W{week:02}"),
                range: DateRange { start, end },
                days: days.len(),
                created: days.iter().map(|d| d.created).sum(),
                started: days.iter().map(|d| d.started).sum(),
                completed: days.iter().map(|d| d.completed).sum(),
                completed_points: days.iter().map(|d| d.completed_points).sum(),
                average_cycle_time_days: (samples > 0).then(|| total / samples as f64),
            })
        })
        .collect()
}

/// Splits `range` at calendar month boundaries.
pub fn month_ranges(range: DateRange) -> Vec<DateRange> {
    let mut out = Vec::new();
    let mut start = range.start;
    while start <= range.end {
        let next_month = start
            .with_day(1)
            .and_then(|first| first.checked_add_months(Months::new(1)));
        let month_end = next_month
            .and_then(|n| n.checked_sub_days(Days::new(1)))
            .unwrap_or(range.end);
        let end = month_end.min(range.end);
        out.push(DateRange { start, end });
        match next_month {
            Some(n) => start = n,
            None => break,
        }
    }
    out
}

pub fn monthly_dora(
    project: &str,
    input: &DoraInput,
    fields: &DoraFields,
    range: DateRange,
) -> Vec<MonthlyDoraBucket> {
    month_ranges(range)
        .into_iter()
        .map(|month| MonthlyDoraBucket {
            month: month.start.format("%Y-%m").to_string(),
            metrics: compute_dora(project, input, fields, month),
        })
        .collect()
}
