use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::configuration::TelemetrySettings;

/// Initialise structured logging.
///
/// `RUST_LOG` wins over the configured level. `log` records emitted by
/// actix-web are forwarded into the same subscriber.
pub fn init_telemetry(settings: &TelemetrySettings) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if settings.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stdout)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("telemetry already initialised: {}", e);
    }
}
