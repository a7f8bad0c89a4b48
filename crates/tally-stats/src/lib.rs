//! Pure statistics over metric series: summary statistics and trend
//! classification, spike detection, and Monte Carlo delivery forecasts.

pub mod forecast;
pub mod series;
pub mod spike;
pub mod toolkit;

pub use forecast::{
    DeliveryForecast, DeliveryInput, ForecastBand, ForecastEngine, ForecastSettings,
    DEFAULT_CONFIDENCE_LEVEL, DEFAULT_SPRINT_LENGTH_DAYS, DEFAULT_TRIALS, MAX_SPRINTS_PER_TRIAL,
};
pub use series::{MetricPoint, MetricSeries};
pub use spike::{Spike, SpikeDetector, SpikeHint, SpikeSeverity, SpikeThresholds};
pub use toolkit::{
    analyze_trend, average, linear_regression, linear_regression_forecast, median, percentile,
    standard_deviation, trend, trend_with_polarity, Polarity, Regression, TrendDirection,
    TrendResult,
};
