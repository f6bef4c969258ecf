//! Tracing subscriber setup.
//!
//! The embedding application normally owns the global subscriber. These
//! helpers cover binaries and tests that want the resolver's logs without
//! wiring their own: a `fmt` layer behind a reloadable [`EnvFilter`], so the
//! level can follow configuration reloads.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Installs the subscriber at the configured level.
///
/// Returns `false` if another global subscriber was already installed, in
/// which case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    init_tracing_with_level(&config.level)
}

/// Installs the subscriber with an explicit filter. `RUST_LOG` takes
/// precedence when set.
pub fn init_tracing_with_level(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));
    let (filter_layer, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER_HANDLE.set(handle);
        tracing::debug!(level, "Tracing initialized");
    }
    installed
}

/// Swaps the active filter, e.g. after the logging section was reloaded.
///
/// Returns `false` when [`init_tracing`] did not install the subscriber.
pub fn apply_logging_level(level: &str) -> bool {
    FILTER_HANDLE
        .get()
        .is_some_and(|handle| handle.modify(|filter| *filter = filter_for(level)).is_ok())
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|err| {
        eprintln!("invalid log filter {level:?} ({err}), falling back to info");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_leaves_first_in_place() {
        let first = init_tracing(&LoggingConfig {
            level: "debug".to_string(),
        });
        let second = init_tracing_with_level("warn");

        assert!(!second);
        assert_eq!(apply_logging_level("carbonmark_auth=trace"), first);
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let filter = filter_for("carbonmark_auth=loud");
        assert_eq!(filter.to_string(), "info");
    }
}
