//! TheoryDB CLI
//!
//! Command-line helpers for debugging TheoryDB tables.
//!
//! # Commands
//!
//! - `cursor decode` - Show the key, index and sort carried by a cursor
//! - `cursor encode` - Build a cursor from a last-evaluated key
//! - `envelope aad` - Print the associated data bound to an encrypted attribute

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::SortArg;

/// TheoryDB command-line tools.
#[derive(Parser)]
#[command(name = "theorydb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or build pagination cursors
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Encrypted attribute envelopes
    Envelope {
        #[command(subcommand)]
        action: EnvelopeAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CursorAction {
    /// Decode a cursor token to JSON
    Decode {
        /// The token returned as `next_cursor`
        token: String,
    },

    /// Encode a last-evaluated key as a cursor token
    Encode {
        /// Key as wire JSON, e.g. '{"pk":{"S":"A"}}'
        #[arg(short, long)]
        key: String,

        /// Index the page was read from
        #[arg(short, long)]
        index: Option<String>,

        /// Sort direction of the originating query
        #[arg(short, long, value_enum)]
        sort: Option<SortArg>,
    },
}

#[derive(Subcommand)]
enum EnvelopeAction {
    /// Print the associated data for an attribute name
    Aad {
        /// Attribute name as stored
        attribute: String,

        /// Print as lowercase hex instead of text
        #[arg(long)]
        hex: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Cursor { action } => match action {
            CursorAction::Decode { token } => {
                println!("{}", commands::cursor::decode(&token)?);
            }
            CursorAction::Encode { key, index, sort } => {
                println!(
                    "{}",
                    commands::cursor::encode(&key, index.as_deref(), sort.map(Into::into))?
                );
            }
        },
        Commands::Envelope { action } => match action {
            EnvelopeAction::Aad { attribute, hex } => {
                println!("{}", commands::envelope::aad(&attribute, hex));
            }
        },
        Commands::Version => {
            println!("TheoryDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("TheoryDB Core v{}", theorydb_core::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_cursor_encode() {
        let cli = Cli::try_parse_from([
            "theorydb", "cursor", "encode", "--key", r#"{"pk":{"S":"A"}}"#, "--sort", "desc",
        ])
        .unwrap();
        match cli.command {
            Commands::Cursor {
                action: CursorAction::Encode { key, index, sort },
            } => {
                assert_eq!(key, r#"{"pk":{"S":"A"}}"#);
                assert_eq!(index, None);
                assert_eq!(sort, Some(SortArg::Desc));
            }
            _ => panic!("expected cursor encode"),
        }
    }

    #[test]
    fn envelope_requires_attribute() {
        assert!(Cli::try_parse_from(["theorydb", "envelope", "aad"]).is_err());
    }
}
