//! CLI command implementations

pub mod error;
pub mod run;

pub use error::CliError;
pub use run::{Cli, Commands, HistoryArgs, ListingArgs, OutputFormat, RunArgs};
