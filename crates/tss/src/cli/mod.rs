//! Command-line interface for tss.
//!
//! This module provides the CLI structure for the `tss` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, ExtractCommand, GencsvCommand, GenmdCommand, InfoCommand, RecordCommand,
    RecordFormatArg,
};

/// tss - Synchronized video and sensor telemetry recordings
///
/// Records a video stream together with sensor samples tagged by frame,
/// packs both into a `.tss` archive, and exports tables and illustrated
/// reports from archives.
#[derive(Debug, Parser)]
#[command(name = "tss")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export an archive's samples as CSV
    Gencsv(GencsvCommand),

    /// Export an archive as a Markdown report with frame stills
    Genmd(GenmdCommand),

    /// Unpack an archive into a directory
    Extract(ExtractCommand),

    /// Summarize an archive
    Info(InfoCommand),

    /// Record test-pattern video alongside a sensor
    Record(RecordCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
