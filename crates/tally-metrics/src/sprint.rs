use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_stats::{
    analyze_trend, average, linear_regression_forecast, standard_deviation, MetricPoint, Polarity,
    TrendResult,
};

use crate::records::{Record, RecordFields};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SprintSummary {
    pub name: String,
    /// Declared start, else the earliest start (or creation) of the items
    /// that entered the backlog through this sprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    pub committed_items: usize,
    pub committed_points: f64,
    pub completed_items: usize,
    pub completed_points: f64,
    /// Equals `completed_points`.
    pub velocity: f64,
    pub completion_rate_pct: f64,
    pub carry_over_items: usize,
    pub carry_over_points: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprintMetrics {
    pub project: String,
    pub sprints: Vec<SprintSummary>,
    pub average_velocity: f64,
    pub velocity_std_dev: f64,
    pub velocity_trend: TrendResult,
    pub next_velocity_forecast: f64,
}

impl SprintMetrics {
    pub fn velocity_history(&self) -> Vec<MetricPoint> {
        self.sprints
            .iter()
            .map(|s| MetricPoint::new(s.name.clone(), s.velocity))
            .collect()
    }

    pub fn velocities(&self) -> Vec<f64> {
        self.sprints.iter().map(|s| s.velocity).collect()
    }
}

/// Groups items by sprint. An item listed in several sprints counts as
/// committed to each; it completes in its last sprint (when done) and is
/// carry-over in every earlier one. Sprints come back in chronological order
/// (see [`order_sprints`]).
pub fn compute_sprints(project: &str, records: &[Record], fields: &RecordFields) -> SprintMetrics {
    let mut tallies: Vec<SprintTally> = Vec::new();
    for rec in records {
        let names = fields.sprints(rec);
        let (Some(first), Some((last, earlier))) = (names.first(), names.split_last()) else {
            continue;
        };
        let points = fields.points(rec);
        let done = fields.is_done(rec);
        let entered = fields.started(rec).or_else(|| fields.created(rec));
        tally_for(&mut tallies, first).observe(entered);
        for name in earlier {
            let s = &mut tally_for(&mut tallies, name).summary;
            s.committed_items += 1;
            s.committed_points += points;
            s.carry_over_items += 1;
            s.carry_over_points += points;
        }
        let t = tally_for(&mut tallies, last);
        if let Some(declared) = fields.sprint_start(rec) {
            t.declared = Some(t.declared.map_or(declared, |d| d.min(declared)));
        }
        let s = &mut t.summary;
        s.committed_items += 1;
        s.committed_points += points;
        if done {
            s.completed_items += 1;
            s.completed_points += points;
        }
    }

    let mut sprints: Vec<SprintSummary> = tallies
        .into_iter()
        .map(|t| SprintSummary {
            start: t.declared.or(t.observed),
            ..t.summary
        })
        .collect();
    order_sprints(&mut sprints);
    for s in &mut sprints {
        s.velocity = s.completed_points;
        s.completion_rate_pct = if s.committed_points > 0.0 {
            s.completed_points / s.committed_points * 100.0
        } else if s.committed_items > 0 {
            s.completed_items as f64 / s.committed_items as f64 * 100.0
        } else {
            0.0
        };
    }

    let velocities: Vec<f64> = sprints.iter().map(|s| s.velocity).collect();
    SprintMetrics {
        project: project.to_string(),
        average_velocity: average(&velocities),
        velocity_std_dev: standard_deviation(&velocities),
        velocity_trend: analyze_trend(&velocities, Polarity::HigherIsBetter),
        next_velocity_forecast: linear_regression_forecast(&velocities),
        sprints,
    }
}

/// Oldest first: by start when every sprint has one, else by the trailing
/// number in every name (`Sprint 12`), else in order of first appearance.
/// Sorts are stable, so ties keep appearance order.
pub fn order_sprints(sprints: &mut [SprintSummary]) {
    if sprints.iter().all(|s| s.start.is_some()) {
        sprints.sort_by_key(|s| s.start);
    } else if sprints.iter().all(|s| trailing_number(&s.name).is_some()) {
        sprints.sort_by_key(|s| trailing_number(&s.name));
    }
}

fn trailing_number(name: &str) -> Option<u64> {
    let digits = name.trim_end().rsplit(|c: char| !c.is_ascii_digit()).next()?;
    digits.parse().ok()
}

struct SprintTally {
    summary: SprintSummary,
    declared: Option<DateTime<Utc>>,
    observed: Option<DateTime<Utc>>,
}

impl SprintTally {
    fn observe(&mut self, at: Option<DateTime<Utc>>) {
        if let Some(at) = at {
            self.observed = Some(self.observed.map_or(at, |o| o.min(at)));
        }
    }
}

fn tally_for<'a>(tallies: &'a mut Vec<SprintTally>, name: &str) -> &'a mut SprintTally {
    let idx = match tallies.iter().position(|t| t.summary.name == name) {
        Some(idx) => idx,
        None => {
            tallies.push(SprintTally {
                summary: SprintSummary {
                    name: name.to_string(),
                    ..SprintSummary::default()
                },
                declared: None,
                observed: None,
            });
            tallies.len() - 1
        }
    };
    &mut tallies[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tally_stats::TrendDirection;

    fn item(sprint: Value, points: f64, done: bool) -> Record {
        json!({
            "sprint": sprint,
            "storyPoints": points,
            "statusCategory": if done { "Done" } else { "To Do" },
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn committed_completed_and_carry_over() {
        let records = vec![
            item(json!("Sprint 1"), 5.0, true),
            item(json!("Sprint 1"), 3.0, true),
            item(json!(["Sprint 1", "Sprint 2"]), 8.0, true),
            item(json!("Sprint 2"), 2.0, false),
            item(json!(null), 13.0, true),
        ];
        let m = compute_sprints("PROJ", &records, &RecordFields::default());
        assert_eq!(m.sprints.len(), 2);
        let s1 = &m.sprints[0];
        assert_eq!(s1.name, "Sprint 1");
        assert_eq!(s1.committed_points, 16.0);
        assert_eq!(s1.completed_points, 8.0);
        assert_eq!(s1.carry_over_items, 1);
        assert_eq!(s1.completion_rate_pct, 50.0);
        let s2 = &m.sprints[1];
        assert_eq!(s2.committed_points, 10.0);
        assert_eq!(s2.velocity, 8.0);
        assert_eq!(s2.completion_rate_pct, 80.0);
        assert_eq!(m.average_velocity, 8.0);
        assert_eq!(m.velocity_trend.direction, TrendDirection::Stable);
    }

    fn dated(sprint: &str, points: f64, started: &str) -> Record {
        let mut rec = item(json!(sprint), points, true);
        rec.insert("started".into(), json!(started));
        rec
    }

    #[test]
    fn newest_first_feed_is_ordered_by_item_dates() {
        let trains = ["a", "b", "c", "d", "e", "f"];
        let records: Vec<Record> = (1..=6usize)
            .rev()
            .map(|i| {
                let name = format!("Release train {}", trains[i - 1]);
                dated(&name, i as f64 * 5.0, &format!("2024-0{i}-03"))
            })
            .collect();
        let m = compute_sprints("PROJ", &records, &RecordFields::default());
        assert_eq!(m.sprints[0].name, "Release train a");
        assert_eq!(m.velocities(), vec![5.0, 10.0, 15.0, 20.0, 25.0, 30.0]);
        assert_eq!(m.velocity_trend.direction, TrendDirection::Improving);
        assert!((m.next_velocity_forecast - 35.0).abs() < 1e-9);
    }

    #[test]
    fn newest_first_feed_without_dates_uses_sprint_numbers() {
        let records: Vec<Record> = (1..=6)
            .rev()
            .map(|i| item(json!(format!("Sprint {i}")), i as f64 * 5.0, true))
            .collect();
        let m = compute_sprints("PROJ", &records, &RecordFields::default());
        let names: Vec<&str> = m.sprints.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Sprint 1", "Sprint 2", "Sprint 3", "Sprint 4", "Sprint 5", "Sprint 6"]);
        assert_eq!(m.velocity_trend.direction, TrendDirection::Improving);
        assert!((m.next_velocity_forecast - 35.0).abs() < 1e-9);
    }

    #[test]
    fn declared_sprint_start_wins_over_item_dates() {
        let mut late = dated("Alpha", 3.0, "2024-01-02");
        late.insert("sprintStart".into(), json!("2024-02-01"));
        let mut early = dated("Beta", 8.0, "2024-01-20");
        early.insert("sprintStart".into(), json!("2024-01-15"));
        let m = compute_sprints("PROJ", &[late, early], &RecordFields::default());
        assert_eq!(m.sprints[0].name, "Beta");
        assert_eq!(m.sprints[1].name, "Alpha");
    }

    #[test]
    fn unordered_names_keep_first_appearance() {
        let records = vec![
            item(json!("Beta"), 2.0, true),
            item(json!("Alpha"), 4.0, true),
        ];
        let m = compute_sprints("PROJ", &records, &RecordFields::default());
        assert_eq!(m.sprints[0].name, "Beta");
    }

    #[test]
    fn rising_velocity_is_improving() {
        let records: Vec<Record> = (1..=6)
            .map(|i| item(json!(format!("S{i}")), i as f64 * 5.0, true))
            .collect();
        let m = compute_sprints("PROJ", &records, &RecordFields::default());
        assert_eq!(m.velocity_trend.direction, TrendDirection::Improving);
        assert!((m.next_velocity_forecast - 35.0).abs() < 1e-9);
        assert_eq!(m.velocity_history()[5].value, 30.0);
    }
}
