//! Tracing subscriber setup.

use giftlist_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(logging: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Subsequent calls are no-ops.
pub fn init_subscriber(logging: &LoggingSettings) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(logging))
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.compact().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let logging = LoggingSettings::default();
        init_subscriber(&logging);
        init_subscriber(&LoggingSettings {
            format: LogFormat::Json,
            ..logging
        });
        tracing::info!("subscriber ready");
    }
}
