//! Synthetic frame source.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::{FourCc, Frame, FrameSize, FrameSource, RawVideoWriter, VideoSink};
use crate::error::DeviceError;

/// Generates a moving gradient at a fixed rate.
///
/// Useful for headless recording and for exercising the session without a
/// camera. Frames are paced to the configured rate.
#[derive(Debug)]
pub struct TestPatternSource {
    size: FrameSize,
    period: Duration,
    tick: u64,
    next_due: Option<Instant>,
}

impl TestPatternSource {
    /// Create a source producing `fps` frames per second.
    ///
    /// An `fps` of zero disables pacing.
    #[must_use]
    pub fn new(size: FrameSize, fps: u32) -> Self {
        let period = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / fps
        };
        Self {
            size,
            period,
            tick: 0,
            next_due: None,
        }
    }

    /// Number of frames produced so far.
    #[must_use]
    pub fn frames_produced(&self) -> u64 {
        self.tick
    }

    #[allow(clippy::cast_possible_truncation)]
    fn render(&self) -> Frame {
        let FrameSize { width, height } = self.size;
        let shift = self.tick;
        let mut pixels = Vec::with_capacity(self.size.rgb_len());
        for y in 0..u64::from(height) {
            for x in 0..u64::from(width) {
                pixels.extend_from_slice(&[
                    ((x + shift) % 256) as u8,
                    ((y + shift) % 256) as u8,
                    (shift % 256) as u8,
                ]);
            }
        }
        Frame {
            size: self.size,
            pixels,
        }
    }

    fn pace(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        // Re-anchor after a stall instead of bursting to catch up.
        self.next_due = Some(due.max(now) + self.period);
    }
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> &'static str {
        "test-pattern"
    }

    fn frame_size(&self) -> FrameSize {
        self.size
    }

    fn capture_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        self.pace();
        let frame = self.render();
        self.tick += 1;
        Ok(Some(frame))
    }

    fn open_sink(
        &self,
        path: &Path,
        codec: FourCc,
        fps: u32,
        size: FrameSize,
    ) -> Result<Box<dyn VideoSink>, DeviceError> {
        let writer = RawVideoWriter::create(path, codec, fps, size).map_err(|e| DeviceError::sink(&e))?;
        Ok(Box::new(writer))
    }
}
