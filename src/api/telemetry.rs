use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT_TRACING: Once = Once::new();

/// Install the global tracing subscriber. Safe to call more than once.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_tracing(default_level: &str) {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{},hyper=warn,tower_http=warn", default_level))
        });

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("tracing initialized");
    });
}
