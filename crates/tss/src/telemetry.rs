//! Core telemetry types for tss.
//!
//! This module defines the frame-indexed record produced by a recording
//! session and persisted inside a container: labels, samples, and the
//! values a sensor decoder yields.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Index of a captured video frame within one recording.
pub type FrameIndex = u64;

/// The ordered, fixed field names of a sensor's samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<String>);

impl Labels {
    /// Create labels from an ordered list of names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Number of fields per sample.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Position of the field with the given name.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|label| label == name)
    }

    /// Join the names with a separator.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.0.join(separator)
    }

    /// The names as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// One decoded field of a telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A signed integer field.
    Int(i64),
    /// A floating-point field, e.g. a calibrated channel.
    Float(f64),
    /// A textual field passed through from the transport.
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            // Integral floats keep their fractional marker so exports stay typed.
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{v:.1}")
            }
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A sensor reading tagged with the most recently completed video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// The frame that was fully written when the sample arrived.
    #[serde(rename = "frame")]
    pub frame_index: FrameIndex,

    /// Decoded values, one per label.
    #[serde(rename = "data")]
    pub values: Vec<FieldValue>,
}

impl TelemetrySample {
    /// Create a new sample.
    #[must_use]
    pub fn new(frame_index: FrameIndex, values: Vec<FieldValue>) -> Self {
        Self {
            frame_index,
            values,
        }
    }

    /// Render the values joined by a separator.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// The labels and ordered samples of one recording.
///
/// Serialized as `{"labels": [...], "data": [{"frame": n, "data": [...]}]}`.
/// Older archives tag samples that arrived before the first frame with
/// frame `-1`; those samples are skipped on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredRecording")]
pub struct Recording {
    /// Field names shared by every sample.
    pub labels: Labels,

    /// Samples in arrival order.
    #[serde(rename = "data")]
    pub samples: Vec<TelemetrySample>,
}

/// On-disk form of a recording, accepting signed frame numbers.
#[derive(Deserialize)]
struct StoredRecording {
    labels: Labels,
    data: Vec<StoredSample>,
}

#[derive(Deserialize)]
struct StoredSample {
    frame: i64,
    data: Vec<FieldValue>,
}

impl From<StoredRecording> for Recording {
    fn from(stored: StoredRecording) -> Self {
        let total = stored.data.len();
        let samples: Vec<_> = stored
            .data
            .into_iter()
            .filter_map(|sample| {
                let frame = FrameIndex::try_from(sample.frame).ok()?;
                Some(TelemetrySample::new(frame, sample.data))
            })
            .collect();
        if samples.len() < total {
            warn!(
                skipped = total - samples.len(),
                "Skipped samples recorded before the first frame"
            );
        }
        Self {
            labels: stored.labels,
            samples,
        }
    }
}

impl Recording {
    /// Create an empty recording for the given labels.
    #[must_use]
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            samples: Vec::new(),
        }
    }

    /// Append a sample.
    pub fn push(&mut self, frame_index: FrameIndex, values: Vec<FieldValue>) {
        self.samples.push(TelemetrySample::new(frame_index, values));
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// First and last frame index, if any samples exist.
    #[must_use]
    pub fn frame_span(&self) -> Option<(FrameIndex, FrameIndex)> {
        let first = self.samples.first()?.frame_index;
        let last = self.samples.last()?.frame_index;
        Some((first, last))
    }

    /// Serialize as JSON into a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn to_writer(&self, writer: impl Write) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Deserialize from a JSON reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Write the recording to a JSON file, replacing it if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a recording from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}
