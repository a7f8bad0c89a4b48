use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tally_stats::{
    analyze_trend, linear_regression_forecast, DeliveryForecast, DeliveryInput, ForecastEngine,
    MetricPoint, Polarity, TrendResult,
};

use crate::records::{Record, RecordFields};
use crate::sprint::SprintMetrics;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryForecastBundle {
    pub project: String,
    pub remaining_work: f64,
    pub velocity_history: Vec<MetricPoint>,
    pub velocity_trend: TrendResult,
    pub regression_next_velocity: f64,
    pub monte_carlo: DeliveryForecast,
}

/// Story points on items that are not done yet.
pub fn remaining_points(records: &[Record], fields: &RecordFields) -> f64 {
    records
        .iter()
        .filter(|r| !fields.is_done(r))
        .map(|r| fields.points(r))
        .sum()
}

pub fn build_forecast<R: Rng + ?Sized>(
    project: &str,
    sprints: &SprintMetrics,
    remaining_work: f64,
    engine: &ForecastEngine,
    start: NaiveDate,
    rng: &mut R,
) -> DeliveryForecastBundle {
    let velocities = sprints.velocities();
    let input = DeliveryInput::from_history(
        &velocities,
        remaining_work,
        engine.settings().confidence_level,
    );
    DeliveryForecastBundle {
        project: project.to_string(),
        remaining_work,
        velocity_history: sprints.velocity_history(),
        velocity_trend: analyze_trend(&velocities, Polarity::HigherIsBetter),
        regression_next_velocity: linear_regression_forecast(&velocities),
        monte_carlo: engine.simulate_delivery_with_rng(&input, start, rng),
    }
}
