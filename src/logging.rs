//! Logging initialization helpers.
//!
//! Thin wrappers over `tracing-subscriber`. `RUST_LOG` overrides the
//! programmatic level when set.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{LoggingError, LoggingResult};

/// Initialize console logging at the given level.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|err| LoggingError::InitFailed(err.to_string()))
}
