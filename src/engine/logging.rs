//! Log subscriber setup for the binary

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set; otherwise `duodb=info`, or `duodb=debug` when verbose.
pub fn filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("duodb={},duodb_lib={},tower_http={}", level, level, level)))
}

/// Logs go to stderr so `--format json` output on stdout stays parseable
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
