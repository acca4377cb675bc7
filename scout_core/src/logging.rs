//! Tracing setup shared by the `scout` binary and the test suites.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map a `-v` count onto a filter directive for this workspace's crates.
fn directive_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,scout_core=info,scout_cli=info",
        1 => "info,scout_core=debug,scout_cli=debug",
        _ => "debug,scout_core=trace,scout_cli=trace",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbosity` when it is set. Output goes to stderr so
/// that JSON printed by the CLI on stdout stays machine-readable.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive_for(verbosity)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("scout_core=debug"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_directives_escalate() {
        assert!(directive_for(0).contains("scout_core=info"));
        assert!(directive_for(1).contains("scout_core=debug"));
        assert_eq!(directive_for(2), directive_for(9));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init(0);
        init(1);
    }
}
