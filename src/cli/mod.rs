//! Command-line front-end for inspecting WAL segments and delta files and for
//! recording delta files locally.

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};

use crate::config::Config;
use crate::Result;

pub mod bitmap;
pub mod locations;
pub mod record;
pub mod show_delta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub enum Command {
    Locations(locations::LocationsArgs),
    ShowDelta(show_delta::ShowDeltaArgs),
    Record(record::RecordArgs),
    Bitmap(bitmap::BitmapArgs),
    None,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            command: Command::None,
        }
    }
}

pub fn dispatch(args: CliArgs, config: &Config) -> Result<()> {
    match args.command {
        Command::Locations(l) => locations::execute(l),
        Command::ShowDelta(s) => show_delta::execute(s),
        Command::Record(r) => record::execute(r, config),
        Command::Bitmap(b) => bitmap::execute(b, config),
        Command::None => Ok(()),
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "pgdelta",
    version,
    about = "PostgreSQL WAL delta extraction for incremental backups"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Print the block locations referenced by the records of a WAL segment.
    Locations(locations::LocationsArgs),
    /// Print the contents of a delta file or a delta part file.
    ShowDelta(show_delta::ShowDeltaArgs),
    /// Record delta files for WAL segments and flush them to an upload directory.
    Record(record::RecordArgs),
    /// Print changed blocks of relation files between two LSNs.
    Bitmap(bitmap::BitmapArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = Cli::parse_from(argv);
    let command = match cli.command {
        Some(Subcommands::Locations(args)) => Command::Locations(args),
        Some(Subcommands::ShowDelta(args)) => Command::ShowDelta(args),
        Some(Subcommands::Record(args)) => Command::Record(args),
        Some(Subcommands::Bitmap(args)) => Command::Bitmap(args),
        None => Command::None,
    };

    Ok(CliArgs { command })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
