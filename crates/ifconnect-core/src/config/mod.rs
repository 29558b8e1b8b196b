mod dirs;
mod settings;
mod validation;

pub use dirs::Directories;
pub use settings::{
    ClientConfig, DiscoveryConfig, FrameConfig, LogLevel, LoggingConfig, TelemetryConfig,
    resolve_intervals,
};
pub use validation::warn_unknown_fields;
