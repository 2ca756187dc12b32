//! `tss` - CLI for timeseries-sensing
//!
//! This binary records synchronized video and sensor telemetry into `.tss`
//! archives and exports tables and reports from them.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use tss::cli::{
    Cli, Command, ConfigCommand, ExtractCommand, GencsvCommand, GenmdCommand, InfoCommand,
    RecordCommand,
};
use tss::container::{ContainerManager, FrameRange, EXTENSION};
use tss::sensor::{LineTransport, SensorObserver};
use tss::session::{NoopListener, Overwrite, RecordingSession, SaveTarget};
use tss::video::TestPatternSource;
use tss::{init_logging, Config};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    // Execute the command
    match cli.command {
        Command::Gencsv(cmd) => handle_gencsv(&config, &cmd),
        Command::Genmd(cmd) => handle_genmd(&config, &cmd),
        Command::Extract(cmd) => handle_extract(&config, &cmd),
        Command::Info(cmd) => handle_info(&cmd),
        Command::Record(cmd) => handle_record(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

/// Reject paths that do not name a `.tss` archive.
fn check_extension(path: &Path) -> anyhow::Result<()> {
    if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        bail!("{} is not a .{EXTENSION} archive", path.display());
    }
    Ok(())
}

fn open_archive(config: &Config, path: &Path) -> anyhow::Result<ContainerManager> {
    check_extension(path)?;
    let mut manager = ContainerManager::new(path).force_scratch(config.storage.force_scratch);
    if let Some(dir) = &config.storage.scratch_dir {
        manager = manager.with_scratch_dir(dir.join(tss::container::SCRATCH_DIR_NAME));
    }
    Ok(manager)
}

fn handle_gencsv(config: &Config, cmd: &GencsvCommand) -> anyhow::Result<()> {
    let mut manager = open_archive(config, &cmd.tssfile)?;
    let rows = manager
        .export_table(&cmd.output, FrameRange::new(cmd.start, cmd.end), true)
        .with_context(|| format!("failed to export {}", cmd.tssfile.display()))?;
    println!("Wrote {rows} rows to {}", cmd.output.display());
    Ok(())
}

fn handle_genmd(config: &Config, cmd: &GenmdCommand) -> anyhow::Result<()> {
    let mut manager = open_archive(config, &cmd.tssfile)?;
    let summary = manager
        .export_report(&cmd.outdir, true)
        .with_context(|| format!("failed to export {}", cmd.tssfile.display()))?;
    println!(
        "Wrote {} ({} sections, {} images)",
        summary.document.display(),
        summary.sections,
        summary.images
    );
    Ok(())
}

fn handle_extract(config: &Config, cmd: &ExtractCommand) -> anyhow::Result<()> {
    let mut manager = open_archive(config, &cmd.tssfile)?;
    manager
        .extract(&cmd.dir, cmd.force)
        .with_context(|| format!("failed to extract {}", cmd.tssfile.display()))?;
    println!("Extracted to {}", cmd.dir.display());
    Ok(())
}

fn handle_info(cmd: &InfoCommand) -> anyhow::Result<()> {
    check_extension(&cmd.tssfile)?;
    let manager = ContainerManager::new(&cmd.tssfile);
    let recording = manager
        .load_recording()
        .with_context(|| format!("failed to read {}", cmd.tssfile.display()))?;
    let span = recording.frame_span();

    if cmd.json {
        let info = serde_json::json!({
            "archive": cmd.tssfile,
            "labels": recording.labels,
            "samples": recording.len(),
            "first_frame": span.map(|(first, _)| first),
            "last_frame": span.map(|(_, last)| last),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Archive:   {}", cmd.tssfile.display());
        println!("Labels:    {}", recording.labels.join(", "));
        println!("Samples:   {}", recording.len());
        match span {
            Some((first, last)) => println!("Frames:    {first}..={last}"),
            None => println!("Frames:    (none)"),
        }
    }
    Ok(())
}

fn handle_record(config: &Config, cmd: &RecordCommand) -> anyhow::Result<()> {
    let duration = Duration::try_from_secs_f64(cmd.duration)
        .ok()
        .filter(|d| !d.is_zero())
        .context("duration must be a positive number of seconds")?;
    let output = cmd.output.clone().unwrap_or_else(default_output);
    check_extension(&output)?;
    if output.exists() && !cmd.force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let format = cmd.format.map_or(config.sensor.record_format, Into::into);
    let transport = LineTransport::open(&cmd.sensor)
        .with_context(|| format!("failed to open sensor {}", cmd.sensor.display()))?;
    let observer = Arc::new(
        SensorObserver::new(Box::new(transport), format.decoder())
            .with_read_timeout(config.read_timeout()),
    );

    let source = TestPatternSource::new(config.frame_size(), config.recorder.fps);
    let session = RecordingSession::spawn(
        Box::new(source),
        Arc::clone(&observer),
        config.session_config()?,
        Arc::new(NoopListener),
    )?;

    observer.start()?;
    session.start_recording()?;
    info!(
        sensor = %cmd.sensor.display(),
        %format,
        duration = cmd.duration,
        "Recording"
    );
    std::thread::sleep(duration);

    let status = session.status();
    let target: Box<dyn SaveTarget> = if cmd.force {
        Box::new(Overwrite(output))
    } else {
        Box::new(output)
    };
    let saved = session.shutdown(target.as_ref());
    observer.stop()?;

    let saved = saved.context("recording did not complete cleanly")?;
    if let Some(path) = saved {
        println!(
            "Saved {} ({} samples, {} dropped)",
            path.display(),
            status.samples,
            status.dropped_samples
        );
    }
    Ok(())
}

fn default_output() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("tss-{stamp}.{EXTENSION}"))
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Recorder]");
                println!("  Frame rate:         {}", config.recorder.fps);
                println!("  Codec:              {}", config.recorder.codec);
                println!("  Frame size:         {}", config.frame_size());
                println!();
                println!("[Sensor]");
                println!("  Record format:      {}", config.sensor.record_format);
                println!("  Read timeout (ms):  {}", config.sensor.read_timeout_ms);
                println!();
                println!("[Storage]");
                println!("  Scratch dir:        {}", config.scratch_dir().display());
                println!("  Delete originals:   {}", config.storage.delete_originals);
                println!("  Force scratch:      {}", config.storage.force_scratch);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
