use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::records::{DateRange, Record, RecordFields};

/// Minimum first-to-last-day growth factor for a bottleneck candidate.
pub const BOTTLENECK_MIN_GROWTH_RATIO: f64 = 1.2;
/// Minimum absolute growth, so 1 → 2 items does not qualify.
pub const BOTTLENECK_MIN_GROWTH_ITEMS: usize = 2;
/// Downstream states may move by this share of their first-day count (at
/// least one item) and still count as flat.
pub const DOWNSTREAM_FLAT_TOLERANCE: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    ToDo,
    InProgress,
    Done,
}

impl WorkflowState {
    pub const ORDERED: [WorkflowState; 3] =
        [WorkflowState::ToDo, WorkflowState::InProgress, WorkflowState::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::ToDo => "to_do",
            WorkflowState::InProgress => "in_progress",
            WorkflowState::Done => "done",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfdDay {
    pub date: NaiveDate,
    pub to_do: usize,
    pub in_progress: usize,
    pub done: usize,
}

impl CfdDay {
    pub fn count(&self, state: WorkflowState) -> usize {
        match state {
            WorkflowState::ToDo => self.to_do,
            WorkflowState::InProgress => self.in_progress,
            WorkflowState::Done => self.done,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub state: WorkflowState,
    pub start_count: usize,
    pub end_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CumulativeFlow {
    pub project: String,
    pub range: DateRange,
    pub days: Vec<CfdDay>,
    pub bottlenecks: Vec<Bottleneck>,
}

/// Item state at the end of `day`, or `None` if it did not exist yet.
fn state_on(
    day: NaiveDate,
    created: Option<DateTime<Utc>>,
    started: Option<DateTime<Utc>>,
    resolved: Option<DateTime<Utc>>,
) -> Option<WorkflowState> {
    let reached = |t: Option<DateTime<Utc>>| t.is_some_and(|t| t.date_naive() <= day);
    if !reached(created) {
        return None;
    }
    if reached(resolved) {
        Some(WorkflowState::Done)
    } else if reached(started) {
        Some(WorkflowState::InProgress)
    } else {
        Some(WorkflowState::ToDo)
    }
}

pub fn compute_cumulative_flow(
    project: &str,
    records: &[Record],
    fields: &RecordFields,
    range: DateRange,
) -> CumulativeFlow {
    let stamps: Vec<_> = records
        .iter()
        .map(|r| (fields.created(r), fields.started(r), fields.resolved(r)))
        .collect();
    let days: Vec<CfdDay> = range
        .days()
        .map(|date| {
            let mut day = CfdDay {
                date,
                to_do: 0,
                in_progress: 0,
                done: 0,
            };
            for (created, started, resolved) in &stamps {
                match state_on(date, *created, *started, *resolved) {
                    Some(WorkflowState::ToDo) => day.to_do += 1,
                    Some(WorkflowState::InProgress) => day.in_progress += 1,
                    Some(WorkflowState::Done) => day.done += 1,
                    None => {}
                }
            }
            day
        })
        .collect();
    let bottlenecks = detect_bottlenecks(&days);
    CumulativeFlow {
        project: project.to_string(),
        range,
        days,
        bottlenecks,
    }
}

/// A non-terminal state is a bottleneck when its count grows by at least
/// [`BOTTLENECK_MIN_GROWTH_RATIO`] and [`BOTTLENECK_MIN_GROWTH_ITEMS`] between
/// the first and last day while every later state stays flat.
pub fn detect_bottlenecks(days: &[CfdDay]) -> Vec<Bottleneck> {
    let (Some(first), Some(last)) = (days.first(), days.last()) else {
        return Vec::new();
    };
    if days.len() < 2 {
        return Vec::new();
    }
    let states = WorkflowState::ORDERED;
    states[..states.len() - 1]
        .iter()
        .enumerate()
        .filter_map(|(i, &state)| {
            let start = first.count(state);
            let end = last.count(state);
            let grew = end >= start + BOTTLENECK_MIN_GROWTH_ITEMS
                && end as f64 >= start as f64 * BOTTLENECK_MIN_GROWTH_RATIO;
            let downstream_flat = states[i + 1..].iter().all(|&down| {
                let before = first.count(down);
                let tolerance = (before as f64 * DOWNSTREAM_FLAT_TOLERANCE).max(1.0);
                (last.count(down) as f64 - before as f64).abs() <= tolerance
            });
            (grew && downstream_flat).then_some(Bottleneck {
                state,
                start_count: start,
                end_count: end,
            })
        })
        .collect()
}
