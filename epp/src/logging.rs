use std::fmt::Display;

use tracing::error;

pub fn init_log() {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{
        layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("EPP_LOG")
                .from_env_lossy(),
        )
        .init();
}

/// Logs `err` and exits with status 1. Only for process wiring.
pub fn fatal(err: impl Display, msg: &str) -> ! {
    error!(error = %err, "{}", msg);
    std::process::exit(1)
}
