use serde::{Deserialize, Serialize};
use tally_stats::{average, median};

use crate::records::{field_str, field_time, hours_between, DateRange, Record};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DoraInput {
    #[serde(default)]
    pub deployments: Vec<Record>,
    #[serde(default)]
    pub incidents: Vec<Record>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoraFields {
    pub deployed_at: String,
    pub committed_at: String,
    pub status: String,
    pub created_at: String,
    pub resolved_at: String,
}

impl Default for DoraFields {
    fn default() -> Self {
        Self {
            deployed_at: "deployedAt".into(),
            committed_at: "committedAt".into(),
            status: "status".into(),
            created_at: "createdAt".into(),
            resolved_at: "resolvedAt".into(),
        }
    }
}

const FAILED_STATUSES: [&str; 5] = ["failed", "failure", "rolled_back", "rollback", "reverted"];

impl DoraFields {
    fn is_failed(&self, deployment: &Record) -> bool {
        field_str(deployment, &self.status).is_some_and(|s| {
            let s = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
            FAILED_STATUSES.contains(&s.as_str())
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Low,
    Medium,
    High,
    Elite,
}

impl PerformanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Elite => "elite",
            PerformanceTier::High => "high",
            PerformanceTier::Medium => "medium",
            PerformanceTier::Low => "low",
        }
    }

    pub fn score(&self) -> u8 {
        match self {
            PerformanceTier::Elite => 4,
            PerformanceTier::High => 3,
            PerformanceTier::Medium => 2,
            PerformanceTier::Low => 1,
        }
    }

    pub fn from_score(score: u8) -> Self {
        match score {
            4.. => PerformanceTier::Elite,
            3 => PerformanceTier::High,
            2 => PerformanceTier::Medium,
            _ => PerformanceTier::Low,
        }
    }
}

/// Deployments per day: ≥1 elite, ≥1/7 high, ≥1/30 medium.
pub fn classify_deployment_frequency(per_day: f64) -> PerformanceTier {
    if per_day >= 1.0 {
        PerformanceTier::Elite
    } else if per_day >= 1.0 / 7.0 {
        PerformanceTier::High
    } else if per_day >= 1.0 / 30.0 {
        PerformanceTier::Medium
    } else {
        PerformanceTier::Low
    }
}

/// Commit-to-deploy hours: <1 elite, <1 week high, <30 days medium.
pub fn classify_lead_time(hours: f64) -> PerformanceTier {
    if hours < 1.0 {
        PerformanceTier::Elite
    } else if hours < 24.0 * 7.0 {
        PerformanceTier::High
    } else if hours < 24.0 * 30.0 {
        PerformanceTier::Medium
    } else {
        PerformanceTier::Low
    }
}

/// Restore hours: <1 elite, <1 day high, <1 week medium.
pub fn classify_mttr(hours: f64) -> PerformanceTier {
    if hours < 1.0 {
        PerformanceTier::Elite
    } else if hours < 24.0 {
        PerformanceTier::High
    } else if hours < 24.0 * 7.0 {
        PerformanceTier::Medium
    } else {
        PerformanceTier::Low
    }
}

/// Failed share of deployments in percent: ≤15 elite, ≤30 high, ≤45 medium.
pub fn classify_change_failure_rate(pct: f64) -> PerformanceTier {
    if pct <= 15.0 {
        PerformanceTier::Elite
    } else if pct <= 30.0 {
        PerformanceTier::High
    } else if pct <= 45.0 {
        PerformanceTier::Medium
    } else {
        PerformanceTier::Low
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoraMeasure {
    pub value: f64,
    pub unit: String,
    pub samples: usize,
    /// `None` when there was nothing to measure.
    pub tier: Option<PerformanceTier>,
}

impl DoraMeasure {
    fn new(value: f64, unit: &str, samples: usize, tier: Option<PerformanceTier>) -> Self {
        Self {
            value,
            unit: unit.to_string(),
            samples,
            tier,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoraMetrics {
    pub project: String,
    pub range: DateRange,
    pub period_days: u64,
    pub deployment_frequency: DoraMeasure,
    pub lead_time_for_changes: DoraMeasure,
    pub mean_time_to_restore: DoraMeasure,
    pub change_failure_rate: DoraMeasure,
    /// Rounded mean of the classified measures' scores.
    pub overall_tier: Option<PerformanceTier>,
}

/// Deployments are attributed by deploy date and incidents by creation date;
/// both must fall inside `range`.
pub fn compute_dora(
    project: &str,
    input: &DoraInput,
    fields: &DoraFields,
    range: DateRange,
) -> DoraMetrics {
    let deployments: Vec<&Record> = input
        .deployments
        .iter()
        .filter(|d| {
            field_time(d, &fields.deployed_at).is_some_and(|t| range.contains(t.date_naive()))
        })
        .collect();
    let incidents: Vec<&Record> = input
        .incidents
        .iter()
        .filter(|i| {
            field_time(i, &fields.created_at).is_some_and(|t| range.contains(t.date_naive()))
        })
        .collect();

    let period_days = range.len_days();
    let per_day = deployments.len() as f64 / period_days as f64;
    let deployment_frequency = DoraMeasure::new(
        per_day,
        "deployments/day",
        deployments.len(),
        Some(classify_deployment_frequency(per_day)),
    );

    let lead_hours: Vec<f64> = deployments
        .iter()
        .filter_map(|d| {
            let committed = field_time(d, &fields.committed_at)?;
            let deployed = field_time(d, &fields.deployed_at)?;
            hours_between(committed, deployed)
        })
        .collect();
    let lead = median(&lead_hours);
    let lead_time_for_changes = DoraMeasure::new(
        lead,
        "hours",
        lead_hours.len(),
        (!lead_hours.is_empty()).then(|| classify_lead_time(lead)),
    );

    let restore_hours: Vec<f64> = incidents
        .iter()
        .filter_map(|i| {
            let opened = field_time(i, &fields.created_at)?;
            let resolved = field_time(i, &fields.resolved_at)?;
            hours_between(opened, resolved)
        })
        .collect();
    let mttr = average(&restore_hours);
    let mean_time_to_restore = DoraMeasure::new(
        mttr,
        "hours",
        restore_hours.len(),
        (!restore_hours.is_empty()).then(|| classify_mttr(mttr)),
    );

    let failed = deployments.iter().filter(|d| fields.is_failed(d)).count();
    let cfr = if deployments.is_empty() {
        0.0
    } else {
        failed as f64 / deployments.len() as f64 * 100.0
    };
    let change_failure_rate = DoraMeasure::new(
        cfr,
        "percent",
        deployments.len(),
        (!deployments.is_empty()).then(|| classify_change_failure_rate(cfr)),
    );

    let scores: Vec<f64> = [
        &deployment_frequency,
        &lead_time_for_changes,
        &mean_time_to_restore,
        &change_failure_rate,
    ]
    .iter()
    .filter_map(|m| m.tier.map(|t| f64::from(t.score())))
    .collect();
    let overall_tier =
        (!scores.is_empty()).then(|| PerformanceTier::from_score(average(&scores).round() as u8));

    DoraMetrics {
        project: project.to_string(),
        range,
        period_days,
        deployment_frequency,
        lead_time_for_changes,
        mean_time_to_restore,
        change_failure_rate,
        overall_tier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn rec(v: serde_json::Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn march() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn deployment_frequency_boundary() {
        assert_eq!(classify_deployment_frequency(1.0), PerformanceTier::Elite);
        assert_eq!(classify_deployment_frequency(0.99), PerformanceTier::High);
        assert_eq!(classify_deployment_frequency(1.0 / 7.0), PerformanceTier::High);
        assert_eq!(classify_deployment_frequency(0.1), PerformanceTier::Medium);
        assert_eq!(classify_deployment_frequency(0.0), PerformanceTier::Low);
    }

    #[test]
    fn other_thresholds() {
        assert_eq!(classify_lead_time(0.5), PerformanceTier::Elite);
        assert_eq!(classify_lead_time(168.0), PerformanceTier::Medium);
        assert_eq!(classify_lead_time(720.0), PerformanceTier::Low);
        assert_eq!(classify_mttr(23.9), PerformanceTier::High);
        assert_eq!(classify_mttr(24.0), PerformanceTier::Medium);
        assert_eq!(classify_change_failure_rate(15.0), PerformanceTier::Elite);
        assert_eq!(classify_change_failure_rate(30.0), PerformanceTier::High);
        assert_eq!(classify_change_failure_rate(45.1), PerformanceTier::Low);
    }

    #[test]
    fn computes_all_four_measures() {
        let input = DoraInput {
            deployments: vec![
                rec(json!({"deployedAt": "2024-03-02T12:00:00Z", "committedAt": "2024-03-02T10:00:00Z", "status": "success"})),
                rec(json!({"deployedAt": "2024-03-04T12:00:00Z", "committedAt": "2024-03-03T12:00:00Z", "status": "Rolled Back"})),
                rec(json!({"deployedAt": "2024-03-08T12:00:00Z", "committedAt": "2024-03-08T08:00:00Z", "status": "success"})),
                rec(json!({"deployedAt": "2024-03-09T12:00:00Z", "status": "success"})),
                rec(json!({"deployedAt": "2024-04-01T12:00:00Z", "status": "failed"})),
            ],
            incidents: vec![
                rec(json!({"createdAt": "2024-03-04T12:00:00Z", "resolvedAt": "2024-03-04T15:00:00Z"})),
                rec(json!({"createdAt": "2024-03-05T00:00:00Z", "resolvedAt": "2024-03-05T05:00:00Z"})),
                rec(json!({"createdAt": "2024-03-06T00:00:00Z"})),
            ],
        };
        let m = compute_dora("PROJ", &input, &DoraFields::default(), march());
        assert_eq!(m.period_days, 10);
        assert_eq!(m.deployment_frequency.samples, 4);
        assert!((m.deployment_frequency.value - 0.4).abs() < 1e-12);
        assert_eq!(m.deployment_frequency.tier, Some(PerformanceTier::High));
        assert_eq!(m.lead_time_for_changes.value, 4.0);
        assert_eq!(m.lead_time_for_changes.tier, Some(PerformanceTier::High));
        assert_eq!(m.mean_time_to_restore.value, 4.0);
        assert_eq!(m.mean_time_to_restore.samples, 2);
        assert_eq!(m.change_failure_rate.value, 25.0);
        assert_eq!(m.change_failure_rate.tier, Some(PerformanceTier::High));
        assert_eq!(m.overall_tier, Some(PerformanceTier::High));
    }

    #[test]
    fn empty_window_leaves_measures_unclassified() {
        let m = compute_dora("PROJ", &DoraInput::default(), &DoraFields::default(), march());
        assert_eq!(m.deployment_frequency.tier, Some(PerformanceTier::Low));
        assert_eq!(m.lead_time_for_changes.tier, None);
        assert_eq!(m.mean_time_to_restore.tier, None);
        assert_eq!(m.change_failure_rate.tier, None);
        assert_eq!(m.overall_tier, Some(PerformanceTier::Low));
    }
}
