//! Structured logging setup.
//!
//! Library code only emits `tracing` events. Drivers (the Python module, test
//! harnesses) call [`init_logging`] once to route them to stderr.

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a stderr subscriber filtered at `level` for this crate.
///
/// `RUST_LOG` overrides `level` when set. Returns `false` if a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rwfit_core={level}")));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        init_logging("debug");
        assert!(!init_logging("info"));
        tracing::info!(check = true, "logging initialised");
    }
}
