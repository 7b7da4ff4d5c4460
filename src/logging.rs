//! Subscriber setup for the CLI.

use localnet_common::LogLevel;
use tracing_subscriber::EnvFilter;

/// Default filter for `level`: our crates at `level`, everything else at
/// `warn` so HTTP and websocket internals stay quiet.
pub fn default_directives(level: LogLevel) -> String {
    format!("warn,localnet={level},localnet_common={level}")
}

/// Install the global subscriber, logging to stderr. `RUST_LOG` wins over
/// `level`. Calling this twice is harmless.
pub fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_scope_the_level_to_our_crates() {
        assert_eq!(
            default_directives(LogLevel::Debug),
            "warn,localnet=debug,localnet_common=debug"
        );
        assert!(EnvFilter::try_new(default_directives(LogLevel::Trace)).is_ok());
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing(LogLevel::Info);
        init_tracing(LogLevel::Debug);
    }
}
