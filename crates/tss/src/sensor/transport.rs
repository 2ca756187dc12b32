//! Sensor transports.
//!
//! [`ChannelTransport`] receives records pushed by another thread and is the
//! building block for the others. [`LineTransport`] reads newline-terminated
//! records from any byte stream (a serial device node, a replay file, stdin).

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::SensorTransport;
use crate::error::DeviceError;

/// Transport fed through an in-process channel.
///
/// Dropping every sender disconnects the transport.
#[derive(Debug)]
pub struct ChannelTransport {
    rx: Receiver<Vec<u8>>,
}

impl ChannelTransport {
    /// Create a transport and the sender that feeds it.
    #[must_use]
    pub fn unbounded() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self { rx })
    }

    /// Create a transport whose queue holds at most `capacity` records.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (tx, Self { rx })
    }
}

impl SensorTransport for ChannelTransport {
    fn read_raw_record(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(record) => Ok(Some(record)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }
}

/// Transport over a newline-terminated byte stream.
///
/// A helper thread performs the blocking reads so that
/// [`SensorTransport::read_raw_record`] can honor its timeout. End of stream
/// or a read error disconnects the transport. The helper thread is detached;
/// it exits at the next record once the transport is dropped.
#[derive(Debug)]
pub struct LineTransport {
    inner: ChannelTransport,
}

impl LineTransport {
    /// Start reading records from `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader thread cannot be spawned.
    pub fn spawn<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, inner) = ChannelTransport::bounded(1024);
        thread::Builder::new()
            .name("tss-sensor-reader".to_string())
            .spawn(move || read_lines(reader, &tx))?;
        Ok(Self { inner })
    }

    /// Open a device node or file and read records from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!(path = %path.display(), "Opened sensor stream");
        Self::spawn(BufReader::new(file))
    }
}

impl SensorTransport for LineTransport {
    fn read_raw_record(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError> {
        self.inner.read_raw_record(timeout)
    }
}

fn read_lines<R: BufRead>(mut reader: R, tx: &Sender<Vec<u8>>) {
    loop {
        let mut record = Vec::new();
        match reader.read_until(b'\n', &mut record) {
            Ok(0) => {
                debug!("Sensor stream reached end of input");
                return;
            }
            Ok(_) => {
                if tx.send(record).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "Sensor stream read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_channel_transport_delivers_records() {
        let (tx, mut transport) = ChannelTransport::unbounded();
        tx.send(b"abc".to_vec()).unwrap();
        assert_eq!(transport.read_raw_record(WAIT), Ok(Some(b"abc".to_vec())));
    }

    #[test]
    fn test_channel_transport_times_out() {
        let (_tx, mut transport) = ChannelTransport::unbounded();
        assert_eq!(
            transport.read_raw_record(Duration::from_millis(5)),
            Ok(None)
        );
    }

    #[test]
    fn test_channel_transport_disconnects() {
        let (tx, mut transport) = ChannelTransport::bounded(1);
        drop(tx);
        assert_eq!(
            transport.read_raw_record(WAIT),
            Err(DeviceError::Disconnected)
        );
    }

    #[test]
    fn test_line_transport_splits_records() {
        let input = Cursor::new(b":0001\r\n:0002\r\n:0003".to_vec());
        let mut transport = LineTransport::spawn(input).unwrap();

        assert_eq!(transport.read_raw_record(WAIT), Ok(Some(b":0001\r\n".to_vec())));
        assert_eq!(transport.read_raw_record(WAIT), Ok(Some(b":0002\r\n".to_vec())));
        assert_eq!(transport.read_raw_record(WAIT), Ok(Some(b":0003".to_vec())));
        assert_eq!(
            transport.read_raw_record(WAIT),
            Err(DeviceError::Disconnected)
        );
    }

    #[test]
    fn test_line_transport_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"one\ntwo\n").unwrap();
        file.flush().unwrap();

        let mut transport = LineTransport::open(file.path()).unwrap();
        assert_eq!(transport.read_raw_record(WAIT), Ok(Some(b"one\n".to_vec())));
        assert_eq!(transport.read_raw_record(WAIT), Ok(Some(b"two\n".to_vec())));
    }

    #[test]
    fn test_line_transport_missing_file() {
        assert!(LineTransport::open("/nonexistent/tss/sensor").is_err());
    }
}
