//! Illustrated Markdown report export.
//!
//! One document per archive, named after it, with one section per sample:
//! a heading naming the frame, the frame still, and a two-row table.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::telemetry::{FrameIndex, Labels, Recording, TelemetrySample};
use crate::video::FrameReader;

/// Subfolder holding the frame stills.
pub const IMAGE_DIR: &str = "img";

/// What a report export produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    /// Path of the generated document.
    pub document: PathBuf,
    /// Number of sections (one per sample).
    pub sections: usize,
    /// Number of distinct stills written.
    pub images: usize,
}

/// Output locations of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLayout {
    /// Document title, usually the archive's file stem.
    pub title: String,
    /// Folder for frame stills.
    pub image_dir: PathBuf,
    /// The Markdown document.
    pub document: PathBuf,
}

impl ReportLayout {
    /// Lay out a report named `title` inside `output_dir`.
    #[must_use]
    pub fn new(output_dir: &Path, title: &str) -> Self {
        Self {
            title: title.to_string(),
            image_dir: output_dir.join(IMAGE_DIR),
            document: output_dir.join(format!("{title}.md")),
        }
    }

    /// Fail if a previous report is present, or remove it when `exists_ok`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] naming the colliding path.
    pub fn clear(&self, exists_ok: bool) -> Result<()> {
        let colliding = if self.image_dir.is_dir() {
            &self.image_dir
        } else if self.document.is_file() {
            &self.document
        } else {
            return Ok(());
        };

        if !exists_ok {
            return Err(Error::already_exists(colliding));
        }
        let _ = fs::remove_dir_all(&self.image_dir);
        match fs::remove_file(&self.document) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn remove(&self) {
        let _ = fs::remove_dir_all(&self.image_dir);
        let _ = fs::remove_file(&self.document);
    }
}

/// File name of the still for a frame.
#[must_use]
pub fn image_name(frame: FrameIndex) -> String {
    format!("frame{frame}.png")
}

/// Render one document section.
#[must_use]
pub fn render_section(labels: &Labels, sample: &TelemetrySample) -> String {
    let frame = sample.frame_index;
    let mut section = String::new();
    let _ = writeln!(section, "## frame{frame}");
    let _ = writeln!(section, "![frame{frame}]({IMAGE_DIR}/{})", image_name(frame));
    let _ = writeln!(section, "|{}|", labels.join("|"));
    let _ = writeln!(
        section,
        "| :--- |{}",
        " :--- |".repeat(labels.len().saturating_sub(1))
    );
    let _ = writeln!(section, "|{}|", sample.join("|"));
    section
}

/// Write the document and stills for `recording`.
///
/// On failure everything written so far is removed.
///
/// # Errors
///
/// Returns an error if a frame is missing from the video or any file cannot
/// be written.
pub fn write_report(
    layout: &ReportLayout,
    recording: &Recording,
    video: &mut dyn FrameReader,
) -> Result<ReportSummary> {
    fs::create_dir_all(&layout.image_dir)?;
    let result = write_contents(layout, recording, video);
    if result.is_err() {
        warn!(document = %layout.document.display(), "Report export failed, removing partial output");
        layout.remove();
    }
    result
}

fn write_contents(
    layout: &ReportLayout,
    recording: &Recording,
    video: &mut dyn FrameReader,
) -> Result<ReportSummary> {
    let mut doc = BufWriter::new(File::create(&layout.document)?);
    writeln!(doc, "# {}", layout.title)?;

    let mut written = HashSet::new();
    for sample in &recording.samples {
        let frame = sample.frame_index;
        if written.insert(frame) {
            video.seek(frame)?;
            let still = video.read_frame()?.ok_or_else(|| Error::InvalidContainer {
                path: layout.document.clone(),
                message: format!(
                    "video has {} frames, sample refers to frame {frame}",
                    video.frame_count()
                ),
            })?;
            still.save_png(layout.image_dir.join(image_name(frame)))?;
            debug!(frame, "Wrote report still");
        }
        doc.write_all(render_section(&recording.labels, sample).as_bytes())?;
    }
    doc.flush()?;

    Ok(ReportSummary {
        document: layout.document.clone(),
        sections: recording.len(),
        images: written.len(),
    })
}
