use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tally_stats::average;

use crate::records::{field_str, hours_between, DateRange, Record, RecordFields};

/// Bug counts relative to all items. `defect_density_per_100` is a plain
/// bugs-per-hundred-items ratio, an approximation rather than a
/// size-normalised density.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
    pub total_items: usize,
    pub bug_count: usize,
    /// Bugs / items, 0..=1.
    pub bug_ratio: f64,
    pub defect_density_per_100: f64,
    pub open_bugs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_bug_resolution_hours: Option<f64>,
    pub bugs_by_priority: BTreeMap<String, usize>,
}

/// With a range, only items created inside it are counted.
pub fn compute_quality(
    project: &str,
    records: &[Record],
    fields: &RecordFields,
    range: Option<DateRange>,
) -> QualityMetrics {
    let in_scope: Vec<&Record> = records
        .iter()
        .filter(|r| match range {
            Some(range) => fields
                .created(r)
                .is_some_and(|c| range.contains(c.date_naive())),
            None => true,
        })
        .collect();

    let bugs: Vec<&Record> = in_scope.iter().copied().filter(|r| fields.is_bug(r)).collect();
    let mut by_priority = BTreeMap::new();
    for bug in &bugs {
        let priority = field_str(bug, &fields.priority).unwrap_or("unset");
        *by_priority.entry(priority.to_string()).or_insert(0) += 1;
    }
    let resolution_hours: Vec<f64> = bugs
        .iter()
        .filter_map(|b| hours_between(fields.created(b)?, fields.resolved(b)?))
        .collect();

    let total = in_scope.len();
    let bug_ratio = if total == 0 {
        0.0
    } else {
        bugs.len() as f64 / total as f64
    };
    QualityMetrics {
        project: project.to_string(),
        range,
        total_items: total,
        bug_count: bugs.len(),
        bug_ratio,
        defect_density_per_100: bug_ratio * 100.0,
        open_bugs: bugs.iter().filter(|b| !fields.is_done(b)).count(),
        mean_bug_resolution_hours: (!resolution_hours.is_empty())
            .then(|| average(&resolution_hours)),
        bugs_by_priority: by_priority,
    }
}
