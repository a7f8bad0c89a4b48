use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_stats::{
    analyze_trend, average, percentile, MetricSeries, Polarity, Spike, SpikeDetector, TrendResult,
};

use crate::records::{hours_between, iso_week_label, DateRange, Record, RecordFields};

/// Distribution of a duration measured in days.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub samples: usize,
    pub average: f64,
    pub p50: f64,
    pub p75: f64,
    pub p85: f64,
    pub p95: f64,
}

impl DurationStats {
    pub fn from_days(values: &[f64]) -> Self {
        Self {
            samples: values.len(),
            average: average(values),
            p50: percentile(values, 50.0),
            p75: percentile(values, 75.0),
            p85: percentile(values, 85.0),
            p95: percentile(values, 95.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowMetrics {
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
    pub item_count: usize,
    pub completed_count: usize,
    pub cycle_time_days: DurationStats,
    pub lead_time_days: DurationStats,
    pub throughput_per_week: f64,
    /// Completions per ISO week (`2024-W07`).
    pub weekly_throughput: MetricSeries,
    pub throughput_trend: TrendResult,
    pub throughput_spikes: Vec<Spike>,
    pub wip_count: usize,
    /// average(cycle time) / average(lead time) * 100.
    pub flow_efficiency_pct: f64,
}

/// Cycle time runs started → resolved, lead time created → resolved. Only
/// items resolved inside `range` (when given) count as completed; WIP is the
/// current snapshot.
pub fn compute_flow(
    project: &str,
    records: &[Record],
    fields: &RecordFields,
    range: Option<DateRange>,
    spikes: &SpikeDetector,
) -> FlowMetrics {
    let mut cycle = Vec::new();
    let mut lead = Vec::new();
    let mut weekly: BTreeMap<String, f64> = BTreeMap::new();
    let mut first_done = None;
    let mut last_done = None;
    let mut completed = 0usize;
    let mut wip = 0usize;

    for rec in records {
        if fields.is_in_progress(rec) {
            wip += 1;
        }
        let Some(resolved) = fields.resolved(rec) else {
            continue;
        };
        if !fields.is_done(rec) {
            continue;
        }
        if range.is_some_and(|r| !r.contains(resolved.date_naive())) {
            continue;
        }
        completed += 1;
        first_done = Some(first_done.map_or(resolved, |f: DateTime<Utc>| f.min(resolved)));
        last_done = Some(last_done.map_or(resolved, |l: DateTime<Utc>| l.max(resolved)));
        *weekly.entry(iso_week_label(resolved.date_naive())).or_default() += 1.0;
        if let Some(hours) = fields.started(rec).and_then(|s| hours_between(s, resolved)) {
            cycle.push(hours / 24.0);
        }
        if let Some(hours) = fields.created(rec).and_then(|c| hours_between(c, resolved)) {
            lead.push(hours / 24.0);
        }
    }

    let span_days = match (range, first_done, last_done) {
        (Some(r), _, _) => r.len_days() as f64,
        (None, Some(first), Some(last)) => (last - first).num_days() as f64 + 1.0,
        _ => 0.0,
    };
    let weeks = (span_days / 7.0).max(1.0);
    // Weeks without completions stay in the series as zeros.
    let covered = range.or_else(|| {
        first_done
            .zip(last_done)
            .and_then(|(first, last)| DateRange::new(first.date_naive(), last.date_naive()).ok())
    });
    if let Some(covered) = covered {
        for day in covered.days() {
            weekly.entry(iso_week_label(day)).or_insert(0.0);
        }
    }
    let weekly_throughput: MetricSeries = weekly.into_iter().collect();
    let cycle_stats = DurationStats::from_days(&cycle);
    let lead_stats = DurationStats::from_days(&lead);
    let flow_efficiency_pct = if lead_stats.average > 0.0 {
        cycle_stats.average / lead_stats.average * 100.0
    } else {
        0.0
    };

    FlowMetrics {
        project: project.to_string(),
        range,
        item_count: records.len(),
        completed_count: completed,
        throughput_per_week: completed as f64 / weeks,
        throughput_trend: analyze_trend(&weekly_throughput.values(), Polarity::HigherIsBetter),
        throughput_spikes: spikes.detect_against_median(&weekly_throughput),
        weekly_throughput,
        cycle_time_days: cycle_stats,
        lead_time_days: lead_stats,
        wip_count: wip,
        flow_efficiency_pct,
    }
}
