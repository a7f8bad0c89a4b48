use once_cell::sync::OnceCell;
use tally_core::{env_bool, env_string};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Hourly,
    Daily,
    Never,
}

impl Rotation {
    pub fn from_slug(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "never" | "none" => Rotation::Never,
            _ => Rotation::Daily,
        }
    }
}

/// Installs the global subscriber: stderr output filtered by `RUST_LOG`
/// (default `info`), plus a rolling file of `tally::*` events when
/// `TALLY_LOG_ROLL=1`. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(console);

    if env_bool("TALLY_LOG_ROLL") == Some(true) {
        let dir = env_string("TALLY_LOGS_DIR").unwrap_or_else(|| "logs".to_string());
        let prefix = env_string("TALLY_LOG_PREFIX").unwrap_or_else(|| "tally".into());
        let rotation = Rotation::from_slug(&env_string("TALLY_LOG_ROTATION").unwrap_or_default());
        if std::fs::create_dir_all(&dir).is_err() {
            tracing::warn!(directory = %dir, "failed to create log directory");
        }
        let writer = match rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&dir, &prefix),
            Rotation::Never => tracing_appender::rolling::never(&dir, &prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&dir, &prefix),
        };
        let (nb, guard) = tracing_appender::non_blocking(writer);
        let _ = FILE_GUARD.set(guard);
        let targets = Targets::new().with_target("tally", tracing::Level::DEBUG);
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(nb)
            .with_filter(targets);
        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}
