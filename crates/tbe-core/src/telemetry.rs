//! Centralised tracing initialisation for the `tbe` binary.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level. Everything else,
/// notably reqwest and hyper, stays at `warn`.
const HARNESS_TARGETS: &[&str] = &["tbe", "tbe_core", "tbe_scenario", "tbe_forge", "tbe_cosign"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_filter(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    std::iter::once("warn".to_string())
        .chain(HARNESS_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the harness crates log at `level`
/// and dependencies at `warn`. With `json` set, every event is written as
/// one JSON object per line and carries its target.
///
/// Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).compact())
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_scopes_level_to_harness_crates() {
        let filter = default_filter(Level::DEBUG);
        assert!(filter.starts_with("warn,"));
        for target in ["tbe=debug", "tbe_core=debug", "tbe_scenario=debug", "tbe_cosign=debug"] {
            assert!(filter.split(',').any(|d| d == target), "missing {target} in {filter}");
        }
        assert!(!filter.contains("reqwest"));
    }

    #[test]
    fn test_default_filter_parses() {
        let filter: EnvFilter = default_filter(Level::INFO).parse().unwrap();
        assert!(filter.to_string().contains("tbe_forge=info"));
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
