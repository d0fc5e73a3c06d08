//! Public SDK surface for Parley.
//!
//! Re-exports the engine crates and provides a logging helper so binaries
//! and embedding applications initialise output the same way.

/// Re-export for convenience.
pub use parley_config as config;
pub use parley_core as core;
/// Re-export for convenience.
pub use parley_protocol as protocol;
pub use parley_providers as providers;
pub use parley_server as server;

/// Initialize `env_logger` once.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` is used.
pub fn init_logging(default_filter: &str) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .format_timestamp_millis()
    .try_init();
}
