//! Video frames, capture sources and encoded video artifacts.
//!
//! The session only depends on the [`FrameSource`] / [`VideoSink`] pair and
//! the container only on [`VideoDecoder`] / [`FrameReader`]. The built-in
//! [`raw`] codec implements both sides so recordings can be produced and
//! re-rendered without a native video library.

pub mod channel;
pub mod pattern;
pub mod raw;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

pub use channel::ChannelFrameSource;
pub use pattern::TestPatternSource;
pub use raw::{RawVideoDecoder, RawVideoReader, RawVideoWriter};

/// Width and height of a frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameSize {
    /// Create a frame size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes needed for one RGB8 frame of this size.
    #[must_use]
    pub fn rgb_len(self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A four-character codec tag, e.g. `mp4v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// The default codec tag.
    pub const MP4V: Self = Self(*b"mp4v");

    /// Create a tag from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The raw tag bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl Default for FourCc {
    fn default() -> Self {
        Self::MP4V
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("codec tag must be 4 characters, got '{s}'"))?;
        if !bytes.iter().all(u8::is_ascii_graphic) {
            return Err(format!("codec tag must be printable ASCII, got '{s}'"));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// One RGB8 image.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    size: FrameSize,
    pixels: Vec<u8>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("size", &self.size)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl Frame {
    /// Wrap packed RGB8 pixels.
    ///
    /// Returns `None` if the buffer length does not match the size.
    #[must_use]
    pub fn from_rgb(size: FrameSize, pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == size.rgb_len()).then_some(Self { size, pixels })
    }

    /// A frame filled with one color.
    #[must_use]
    pub fn solid(size: FrameSize, rgb: [u8; 3]) -> Self {
        let pixels = rgb.iter().copied().cycle().take(size.rgb_len()).collect();
        Self { size, pixels }
    }

    /// Frame dimensions.
    #[must_use]
    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Packed RGB8 pixel data, row-major.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Save the frame as a PNG still.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be encoded or written.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let image = image::RgbImage::from_raw(self.size.width, self.size.height, self.pixels.clone())
            .ok_or_else(|| crate::Error::internal("frame buffer does not match its size"))?;
        image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// A capture device delivering frames at its own rate.
pub trait FrameSource: Send {
    /// The name of this source (for logging).
    fn name(&self) -> &'static str;

    /// Size of the frames this source produces.
    fn frame_size(&self) -> FrameSize;

    /// Pull the next frame, blocking for at most about one frame period.
    ///
    /// Returns `Ok(None)` if no frame was ready this tick.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the device failed.
    fn capture_frame(&mut self) -> std::result::Result<Option<Frame>, DeviceError>;

    /// Open an encoder writing a video artifact at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the sink cannot be created.
    fn open_sink(
        &self,
        path: &Path,
        codec: FourCc,
        fps: u32,
        size: FrameSize,
    ) -> std::result::Result<Box<dyn VideoSink>, DeviceError>;
}

/// An open video encoder.
pub trait VideoSink: Send {
    /// Append one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the frame cannot be written.
    fn write_frame(&mut self, frame: &Frame) -> std::result::Result<(), DeviceError>;

    /// Number of frames written so far.
    fn frames_written(&self) -> u64;

    /// Flush and close the artifact.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the artifact cannot be finalized.
    fn close(self: Box<Self>) -> std::result::Result<(), DeviceError>;
}

/// Opens video artifacts for random frame access.
pub trait VideoDecoder: Send + Sync {
    /// Open the artifact at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not in this decoder's format.
    fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>>;
}

/// Sequential reader over a video artifact with seeking.
pub trait FrameReader {
    /// Number of frames in the artifact.
    fn frame_count(&self) -> u64;

    /// Position the reader so the next `read_frame` returns frame `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying file cannot be repositioned.
    fn seek(&mut self, index: u64) -> Result<()>;

    /// Read the frame at the current position and advance.
    ///
    /// Returns `Ok(None)` past the last frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame data cannot be read.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}
