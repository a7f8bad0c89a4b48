//! Configuration model, schema validation and effective settings resolution.

pub mod config;
pub mod settings;
pub mod util;

pub use config::{
    config_schema_json, load_config, parse_config, write_schema_file, Config, ForecastConfig,
    StorageConfig,
};
pub use settings::{effective_settings, Settings};
pub use util::{env_bool, env_string, parse_bool_flag};
