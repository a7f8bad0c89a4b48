use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub period: String,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(period: impl Into<String>, value: f64) -> Self {
        Self {
            period: period.into(),
            value,
        }
    }
}

/// Period-ordered sequence of values; the common input to the toolkit,
/// spike detector and forecaster.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSeries {
    points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Sorts ascending by period. Periods are compared as strings, so use
    /// sortable labels (ISO dates, `2024-W07`, zero-padded sprint numbers).
    pub fn new(mut points: Vec<MetricPoint>) -> Self {
        points.sort_by(|a, b| a.period.cmp(&b.period));
        Self { points }
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricPoint> {
        self.points.iter()
    }
}

impl<P: Into<String>> FromIterator<(P, f64)> for MetricSeries {
    fn from_iter<I: IntoIterator<Item = (P, f64)>>(iter: I) -> Self {
        MetricSeries::new(
            iter.into_iter()
                .map(|(period, value)| MetricPoint::new(period, value))
                .collect(),
        )
    }
}
