//! Tracing subscriber setup for the `vault` binary.
//!
//! Logs go to stderr so stdout carries only answers and JSON. `RUST_LOG`
//! overrides the default filter; `--verbose` raises both crates to `debug`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "memory_vault=info,memory_vault_core=info";
const VERBOSE_FILTER: &str = "memory_vault=debug,memory_vault_core=debug";

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
