//! Frame source fed by a callback-driven capture library.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{FourCc, Frame, FrameSize, FrameSource, RawVideoWriter, VideoSink};
use crate::error::DeviceError;

/// Receives frames pushed by another thread.
///
/// Capture libraries that deliver frames through callbacks push into the
/// returned sender. Dropping every sender disconnects the source.
#[derive(Debug)]
pub struct ChannelFrameSource {
    rx: Receiver<Frame>,
    size: FrameSize,
    timeout: Duration,
}

impl ChannelFrameSource {
    /// Create a source of `size` frames and the sender that feeds it.
    ///
    /// `capture_frame` waits at most `timeout` for a frame.
    #[must_use]
    pub fn new(size: FrameSize, timeout: Duration) -> (Sender<Frame>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self { rx, size, timeout })
    }
}

impl FrameSource for ChannelFrameSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn frame_size(&self) -> FrameSize {
        self.size
    }

    fn capture_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(frame) if frame.size() == self.size => Ok(Some(frame)),
            Ok(frame) => Err(DeviceError::Capture(format!(
                "received {} frame from a {} source",
                frame.size(),
                self.size
            ))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: FrameSize = FrameSize::new(2, 2);

    #[test]
    fn test_receives_pushed_frames() {
        let (tx, mut source) = ChannelFrameSource::new(SIZE, Duration::from_secs(5));
        tx.send(Frame::solid(SIZE, [9; 3])).unwrap();
        let frame = source.capture_frame().unwrap().unwrap();
        assert_eq!(frame.pixels()[0], 9);
    }

    #[test]
    fn test_timeout_yields_no_frame() {
        let (_tx, mut source) = ChannelFrameSource::new(SIZE, Duration::from_millis(5));
        assert_eq!(source.capture_frame(), Ok(None));
    }

    #[test]
    fn test_disconnect_is_a_device_error() {
        let (tx, mut source) = ChannelFrameSource::new(SIZE, Duration::from_secs(5));
        drop(tx);
        assert_eq!(source.capture_frame(), Err(DeviceError::Disconnected));
    }

    #[test]
    fn test_mismatched_frame_is_rejected() {
        let (tx, mut source) = ChannelFrameSource::new(SIZE, Duration::from_secs(5));
        tx.send(Frame::solid(FrameSize::new(1, 1), [0; 3])).unwrap();
        assert!(matches!(
            source.capture_frame(),
            Err(DeviceError::Capture(_))
        ));
    }
}
