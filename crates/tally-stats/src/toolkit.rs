use serde::{Deserialize, Serialize};

/// A half must beat the other by this factor before the trend is called.
pub const TREND_UP_FACTOR: f64 = 1.1;
pub const TREND_DOWN_FACTOR: f64 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
    Improving,
    Degrading,
    InsufficientData,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Stable => "stable",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Improving => "improving",
            TrendDirection::Degrading => "degrading",
            TrendDirection::InsufficientData => "insufficient_data",
        }
    }
}

/// Whether a rising value is good news for the metric being classified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    Neutral,
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub direction: TrendDirection,
    pub average: f64,
    pub standard_deviation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast_next_period: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted_copy(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Nearest-rank percentile: the value at `ceil(p/100 * n) - 1` of an
/// ascending copy, clamped into range. The input is never reordered.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted_copy(values);
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

/// Population standard deviation (divides by n).
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = average(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Ordinary least squares of `values` against their indices 0..n-1.
pub fn linear_regression(values: &[f64]) -> Option<Regression> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = average(values);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy == 0.0 {
        // A flat line is perfectly explained by a flat fit.
        1.0
    } else {
        ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0)
    };
    Some(Regression {
        slope,
        intercept,
        r_squared,
    })
}

/// Projects the next index (n) along the least-squares line.
pub fn linear_regression_forecast(values: &[f64]) -> f64 {
    match values {
        [] => 0.0,
        [only] => *only,
        _ => linear_regression(values)
            .map(|fit| fit.slope * values.len() as f64 + fit.intercept)
            .unwrap_or(0.0),
    }
}

pub fn trend(values: &[f64]) -> TrendDirection {
    trend_with_polarity(values, Polarity::Neutral)
}

/// Compares the average of the second half (which takes the extra point on
/// odd lengths) against the first.
pub fn trend_with_polarity(values: &[f64], polarity: Polarity) -> TrendDirection {
    if values.len() < 2 {
        return TrendDirection::InsufficientData;
    }
    let (first, second) = values.split_at(values.len() / 2);
    let first_avg = average(first);
    let second_avg = average(second);
    let rising = if second_avg > first_avg * TREND_UP_FACTOR {
        true
    } else if second_avg < first_avg * TREND_DOWN_FACTOR {
        false
    } else {
        return TrendDirection::Stable;
    };
    match (polarity, rising) {
        (Polarity::Neutral, true) => TrendDirection::Increasing,
        (Polarity::Neutral, false) => TrendDirection::Decreasing,
        (Polarity::HigherIsBetter, true) | (Polarity::LowerIsBetter, false) => {
            TrendDirection::Improving
        }
        (Polarity::HigherIsBetter, false) | (Polarity::LowerIsBetter, true) => {
            TrendDirection::Degrading
        }
    }
}

/// Direction plus summary statistics. Confidence is the regression r²
/// and needs at least three points.
pub fn analyze_trend(values: &[f64], polarity: Polarity) -> TrendResult {
    let fit = linear_regression(values);
    TrendResult {
        direction: trend_with_polarity(values, polarity),
        average: average(values),
        standard_deviation: standard_deviation(values),
        forecast_next_period: fit.map(|f| f.slope * values.len() as f64 + f.intercept),
        confidence: fit
            .filter(|_| values.len() >= 3)
            .map(|f| f.r_squared),
    }
}
