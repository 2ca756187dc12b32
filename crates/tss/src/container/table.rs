//! Comma-separated table export.

use std::io::{self, Write};

use crate::telemetry::{FrameIndex, Recording};

/// Lower bound used when no start frame is requested.
///
/// It sits below every valid frame index, so the first sample is always
/// included.
pub const DEFAULT_START_FRAME: i64 = -1;

/// Inclusive frame bounds for a table export.
///
/// Bounds are signed so callers may pass the same values a user typed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRange {
    /// First frame to include; defaults to [`DEFAULT_START_FRAME`].
    pub start: Option<i64>,
    /// Last frame to include; defaults to the last sample's frame.
    pub end: Option<i64>,
}

impl FrameRange {
    /// Create a range from optional bounds.
    #[must_use]
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    /// Every sample.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Concrete bounds for a recording.
    ///
    /// The upper bound is `None` only when the recording has no samples.
    #[must_use]
    pub fn resolve(&self, recording: &Recording) -> (i64, Option<i64>) {
        let start = self.start.unwrap_or(DEFAULT_START_FRAME);
        let end = self.end.or_else(|| {
            recording
                .samples
                .last()
                .map(|sample| clamp_frame(sample.frame_index))
        });
        (start, end)
    }
}

fn clamp_frame(frame: FrameIndex) -> i64 {
    i64::try_from(frame).unwrap_or(i64::MAX)
}

/// Write the header and every sample inside `range`.
///
/// Returns the number of data rows written.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_table<W: Write>(
    recording: &Recording,
    range: FrameRange,
    mut out: W,
) -> io::Result<usize> {
    writeln!(out, "{}", recording.labels.join(","))?;

    let (start, end) = range.resolve(recording);
    let Some(end) = end else {
        out.flush()?;
        return Ok(0);
    };

    let mut rows = 0;
    for sample in &recording.samples {
        let frame = clamp_frame(sample.frame_index);
        if start <= frame && frame <= end {
            writeln!(out, "{}", sample.join(","))?;
            rows += 1;
        }
    }
    out.flush()?;
    Ok(rows)
}
