//! Uncompressed RGB8 video artifacts.
//!
//! Layout: a 21-byte header followed by fixed-size frames.
//!
//! | offset | size | field                    |
//! |--------|------|--------------------------|
//! | 0      | 4    | magic `TSSV`             |
//! | 4      | 1    | format version           |
//! | 5      | 4    | codec tag                |
//! | 9      | 4    | fps (u32 LE)             |
//! | 13     | 4    | width (u32 LE)           |
//! | 17     | 4    | height (u32 LE)          |
//!
//! The frame count is implicit in the file length.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{FourCc, Frame, FrameReader, FrameSize, VideoDecoder, VideoSink};
use crate::error::{DeviceError, Result};

const MAGIC: &[u8; 4] = b"TSSV";
const VERSION: u8 = 1;

/// Size of the header in bytes.
pub const HEADER_LEN: u64 = 21;

/// Stream parameters stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    /// Codec tag requested by the recorder.
    pub codec: FourCc,
    /// Nominal frame rate.
    pub fps: u32,
    /// Frame dimensions.
    pub size: FrameSize,
}

impl RawHeader {
    fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = VERSION;
        buf[5..9].copy_from_slice(&self.codec.as_bytes());
        buf[9..13].copy_from_slice(&self.fps.to_le_bytes());
        buf[13..17].copy_from_slice(&self.size.width.to_le_bytes());
        buf[17..21].copy_from_slice(&self.size.height.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_LEN as usize]) -> io::Result<Self> {
        if &buf[0..4] != MAGIC {
            return Err(invalid_data("not a raw video artifact"));
        }
        if buf[4] != VERSION {
            return Err(invalid_data(format!("unsupported raw video version {}", buf[4])));
        }
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Ok(Self {
            codec: FourCc::from_bytes([buf[5], buf[6], buf[7], buf[8]]),
            fps: u32_at(9),
            size: FrameSize::new(u32_at(13), u32_at(17)),
        })
    }
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Writes frames to a raw video artifact.
#[derive(Debug)]
pub struct RawVideoWriter {
    path: PathBuf,
    out: BufWriter<File>,
    size: FrameSize,
    frames: u64,
}

impl RawVideoWriter {
    /// Create (or truncate) the artifact and write its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path, codec: FourCc, fps: u32, size: FrameSize) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&RawHeader { codec, fps, size }.encode())?;
        debug!(path = %path.display(), %size, %codec, fps, "Opened raw video sink");
        Ok(Self {
            path: path.to_path_buf(),
            out,
            size,
            frames: 0,
        })
    }
}

impl VideoSink for RawVideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> std::result::Result<(), DeviceError> {
        if frame.size() != self.size {
            return Err(DeviceError::Sink(format!(
                "frame is {}, sink expects {}",
                frame.size(),
                self.size
            )));
        }
        self.out
            .write_all(frame.pixels())
            .map_err(|e| DeviceError::sink(&e))?;
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn close(mut self: Box<Self>) -> std::result::Result<(), DeviceError> {
        self.out.flush().map_err(|e| DeviceError::sink(&e))?;
        debug!(path = %self.path.display(), frames = self.frames, "Closed raw video sink");
        Ok(())
    }
}

/// Random-access reader over a raw video artifact.
#[derive(Debug)]
pub struct RawVideoReader {
    file: File,
    header: RawHeader,
    frame_count: u64,
    position: u64,
}

impl RawVideoReader {
    /// Open an artifact and read its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or has no valid header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut buf)?;
        let header = RawHeader::decode(&buf)?;

        let frame_len = header.size.rgb_len() as u64;
        let body = file.metadata()?.len().saturating_sub(HEADER_LEN);
        let frame_count = if frame_len == 0 { 0 } else { body / frame_len };

        Ok(Self {
            file,
            header,
            frame_count,
            position: 0,
        })
    }

    /// The stream parameters.
    #[must_use]
    pub fn header(&self) -> RawHeader {
        self.header
    }
}

impl FrameReader for RawVideoReader {
    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        // Past the end: nothing to position, `read_frame` yields `None`.
        if index >= self.frame_count {
            self.position = index;
            return Ok(());
        }
        let offset = HEADER_LEN + index * self.header.size.rgb_len() as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = index;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.frame_count {
            return Ok(None);
        }
        let mut pixels = vec![0u8; self.header.size.rgb_len()];
        self.file.read_exact(&mut pixels)?;
        self.position += 1;
        Ok(Frame::from_rgb(self.header.size, pixels))
    }
}

/// [`VideoDecoder`] for raw artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawVideoDecoder;

impl VideoDecoder for RawVideoDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameReader>> {
        Ok(Box::new(RawVideoReader::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: FrameSize = FrameSize::new(4, 3);

    fn write_frames(path: &Path, shades: &[u8]) {
        let mut sink: Box<dyn VideoSink> =
            Box::new(RawVideoWriter::create(path, FourCc::MP4V, 20, SIZE).unwrap());
        for &shade in shades {
            sink.write_frame(&Frame::solid(SIZE, [shade; 3])).unwrap();
        }
        assert_eq!(sink.frames_written(), shades.len() as u64);
        sink.close().unwrap();
    }

    #[test]
    fn test_header_round_trip() {
        let header = RawHeader {
            codec: "XVID".parse().unwrap(),
            fps: 30,
            size: FrameSize::new(1920, 1080),
        };
        assert_eq!(RawHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = RawHeader {
            codec: FourCc::MP4V,
            fps: 1,
            size: SIZE,
        }
        .encode();
        buf[0] = b'X';
        assert_eq!(
            RawHeader::decode(&buf).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_seek_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mp4");
        write_frames(&path, &[10, 20, 30]);

        let mut reader = RawVideoDecoder.open(&path).unwrap();
        assert_eq!(reader.frame_count(), 3);

        reader.seek(2).unwrap();
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.pixels()[0], 30);
        assert!(reader.read_frame().unwrap().is_none());

        reader.seek(0).unwrap();
        assert_eq!(reader.read_frame().unwrap().unwrap().pixels()[0], 10);
        assert_eq!(reader.read_frame().unwrap().unwrap().pixels()[0], 20);
    }

    #[test]
    fn test_seek_past_end_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mp4");
        write_frames(&path, &[10, 20]);

        let mut reader = RawVideoReader::open(&path).unwrap();
        reader.seek(u64::MAX / 4).unwrap();
        assert!(reader.read_frame().unwrap().is_none());
        reader.seek(2).unwrap();
        assert!(reader.read_frame().unwrap().is_none());

        reader.seek(1).unwrap();
        assert_eq!(reader.read_frame().unwrap().unwrap().pixels()[0], 20);
    }

    #[test]
    fn test_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mp4");
        write_frames(&path, &[]);

        let mut reader = RawVideoReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 0);
        assert_eq!(reader.header().fps, 20);
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_wrong_frame_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            RawVideoWriter::create(&dir.path().join("v"), FourCc::MP4V, 20, SIZE).unwrap();
        let err = writer
            .write_frame(&Frame::solid(FrameSize::new(2, 2), [0; 3]))
            .unwrap_err();
        assert!(matches!(err, DeviceError::Sink(_)));
        assert_eq!(writer.frames_written(), 0);
    }

    #[test]
    fn test_open_missing_file() {
        assert!(RawVideoReader::open(Path::new("/nonexistent/movie.mp4")).is_err());
    }
}
