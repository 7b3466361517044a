//! Process-wide logging setup

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "DESCWALLET_LOG";

/// Filter used when [`LOG_ENV`] is unset or invalid
pub const DEFAULT_LOG_FILTER: &str = "descwallet=info";

static INIT: OnceCell<()> = OnceCell::new();

/// Install the fmt subscriber once per process
///
/// Later calls are no-ops. If another global subscriber is already set, it is
/// left in place.
pub fn init() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok();
        if installed {
            tracing::info!("Logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(INIT.get().is_some());
    }
}
