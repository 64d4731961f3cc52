use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::io_utils::parse_delimiter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Reconcile and write back tabular edits", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect changed cells between an original snapshot and an edited one
    Diff(DiffArgs),
    /// Validate changed cells against declared column constraints
    Validate(ValidateArgs),
    /// Print the staged-merge and audit SQL a save would execute
    Plan(PlanArgs),
    /// Emit field-level change-log records for the approval queue
    Log(LogArgs),
    /// Infer semantic column tags and date bounds from a snapshot
    Tags(TagsArgs),
}

#[derive(Debug, Args)]
pub struct SnapshotPairArgs {
    /// Original snapshot CSV (the baseline taken at edit-mode entry)
    #[arg(short = 'b', long = "base")]
    pub base: PathBuf,
    /// Edited snapshot CSV
    #[arg(short = 'e', long = "edited")]
    pub edited: PathBuf,
    /// Primary key column(s), display-named, comma separated
    #[arg(short = 'k', long = "pk", value_delimiter = ',', required = true)]
    pub pk: Vec<String>,
    /// Lock column excluded from the diff and stamped at merge time
    #[arg(long = "lock-column")]
    pub lock_column: Option<String>,
    /// CSV delimiter character (supports ',', ';', '|', 'tab')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub snapshots: SnapshotPairArgs,
    /// Emit the change set as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub snapshots: SnapshotPairArgs,
    /// Column constraint YAML file
    #[arg(short = 'c', long = "constraints")]
    pub constraints: PathBuf,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub snapshots: SnapshotPairArgs,
    /// Write-back target as DATABASE.SCHEMA.TABLE
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// Staging table name for changed rows
    #[arg(long = "stage-table")]
    pub stage_table: Option<String>,
    /// Pending-approval table name
    #[arg(long = "pending-table")]
    pub pending_table: Option<String>,
    /// Staging table name for audit records
    #[arg(long = "pending-stage-table")]
    pub pending_stage_table: Option<String>,
}

#[derive(Debug, Args)]
pub struct LogArgs {
    #[command(flatten)]
    pub snapshots: SnapshotPairArgs,
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Emit records as JSON instead of CSV
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TagsArgs {
    /// Input snapshot CSV
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', ';', '|', 'tab')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Emit tags as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
