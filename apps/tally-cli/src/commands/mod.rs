pub mod cache;
pub mod config;
pub mod forecast;
pub mod metrics;
pub mod paths;
pub mod report;
pub mod util;

pub use cache::CacheCmd;
pub use config::ConfigCmd;
pub use forecast::ForecastArgs;
pub use metrics::MetricsCmd;
pub use report::ReportCmd;
