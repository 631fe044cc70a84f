//! CLI command implementations.

pub mod cursor;
pub mod envelope;

use clap::ValueEnum;
use theorydb_core::{CoreError, SortDirection};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The `--key` argument is not a wire JSON object.
    #[error("invalid key JSON: {0}")]
    InvalidKey(#[source] serde_json::Error),

    /// A cursor or envelope operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Rendering output failed.
    #[error("failed to render output: {0}")]
    Render(#[source] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// `--sort` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl From<SortArg> for SortDirection {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Asc => SortDirection::Asc,
            SortArg::Desc => SortDirection::Desc,
        }
    }
}
