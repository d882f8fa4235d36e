//! Stderr tracing setup shared by every command.

use tracing_subscriber::EnvFilter;

fn resolve_filter(verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env("DIGEST_LOG") {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

/// Initialize the global subscriber. Safe to call once per process; a second
/// call (e.g. from tests) is ignored.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .try_init();
}
