#![forbid(unsafe_code)]

//! Command-line access to a persisted review draft.

pub mod cli;
pub mod error;

pub use cli::{Cli, Commands, run, run_from_env};
pub use error::{CliError, Result};

use tracing_subscriber::EnvFilter;

/// Install a stderr formatter honoring `RUST_LOG`, `warn` when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish(),
    );
}
