//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::config::RecordFormat;

/// Table export arguments.
#[derive(Debug, Args)]
pub struct GencsvCommand {
    /// Archive to read
    pub tssfile: PathBuf,

    /// CSV file to write (replaced if present)
    pub output: PathBuf,

    /// First frame to include (inclusive)
    #[arg(long, allow_negative_numbers = true)]
    pub start: Option<i64>,

    /// Last frame to include (inclusive)
    #[arg(long, allow_negative_numbers = true)]
    pub end: Option<i64>,
}

/// Report export arguments.
#[derive(Debug, Args)]
pub struct GenmdCommand {
    /// Archive to read
    pub tssfile: PathBuf,

    /// Directory receiving the document and its stills
    pub outdir: PathBuf,
}

/// Extract command arguments.
#[derive(Debug, Args)]
pub struct ExtractCommand {
    /// Archive to unpack
    pub tssfile: PathBuf,

    /// Target directory
    pub dir: PathBuf,

    /// Replace the target directory if it exists
    #[arg(short, long)]
    pub force: bool,
}

/// Info command arguments.
#[derive(Debug, Args)]
pub struct InfoCommand {
    /// Archive to inspect
    pub tssfile: PathBuf,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Headless record command arguments.
#[derive(Debug, Args)]
pub struct RecordCommand {
    /// Sensor device or file yielding newline-terminated records
    #[arg(short, long, value_name = "PATH")]
    pub sensor: PathBuf,

    /// Record format of the sensor (defaults to the configured format)
    #[arg(short, long, value_enum)]
    pub format: Option<RecordFormatArg>,

    /// Archive to write (defaults to a timestamped name)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Recording length in seconds
    #[arg(short, long, default_value = "10")]
    pub duration: f64,

    /// Overwrite the output archive if it exists
    #[arg(long)]
    pub force: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Sensor record format argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordFormatArg {
    /// Hex-encoded packed IMU records
    Packed,
    /// Colon-delimited text records
    Delimited,
}

impl From<RecordFormatArg> for RecordFormat {
    fn from(arg: RecordFormatArg) -> Self {
        match arg {
            RecordFormatArg::Packed => Self::Packed,
            RecordFormatArg::Delimited => Self::Delimited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_format_arg_conversion() {
        assert_eq!(
            RecordFormat::from(RecordFormatArg::Packed),
            RecordFormat::Packed
        );
        assert_eq!(
            RecordFormat::from(RecordFormatArg::Delimited),
            RecordFormat::Delimited
        );
    }

    #[test]
    fn test_gencsv_command_debug() {
        let cmd = GencsvCommand {
            tssfile: PathBuf::from("run.tss"),
            output: PathBuf::from("run.csv"),
            start: Some(3),
            end: None,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("run.tss"));
        assert!(debug_str.contains("start"));
    }

    #[test]
    fn test_extract_command_debug() {
        let cmd = ExtractCommand {
            tssfile: PathBuf::from("run.tss"),
            dir: PathBuf::from("out"),
            force: true,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("force: true"));
    }

    #[test]
    fn test_record_command_debug() {
        let cmd = RecordCommand {
            sensor: PathBuf::from("/dev/ttyUSB0"),
            format: Some(RecordFormatArg::Delimited),
            output: None,
            duration: 5.0,
            force: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("ttyUSB0"));
        assert!(debug_str.contains("Delimited"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_record_format_arg_debug() {
        let arg = RecordFormatArg::Packed;
        assert_eq!(format!("{arg:?}"), "Packed");
    }
}
