//! Sensor observation.
//!
//! A [`SensorObserver`] owns a dedicated polling thread over a
//! [`SensorTransport`]. Each raw record is decoded by a [`RecordDecoder`]
//! into a labeled tuple and fanned out to subscribers.
//!
//! Subscribers are invoked synchronously on the polling thread. A subscriber
//! that blocks stalls ingestion for every other subscriber, so handlers must
//! only do bounded work (append to a buffer, forward to a channel).

pub mod delimited;
pub mod packed;
pub mod transport;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::error::DeviceError;
use crate::telemetry::{FieldValue, Labels};

pub use delimited::{DelimitedRecordDecoder, TextFieldSpec};
pub use packed::{sign_extend, FieldSpec, LinearTransform, PackedRecordDecoder};
pub use transport::{ChannelTransport, LineTransport};

/// Default time a single transport read may block before the polling loop
/// re-checks its stop signal.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// A raw record could not be parsed into a sample.
///
/// Decode errors stay inside the polling loop: the record is dropped and
/// the loop continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The record is not valid UTF-8 text.
    #[error("record is not valid UTF-8")]
    Utf8,

    /// The record payload is not hexadecimal.
    #[error("invalid hexadecimal digit '{0}'")]
    Hex(char),

    /// A field named by the decode table is absent from the record.
    #[error("field '{label}' is missing from the record")]
    MissingField {
        /// Label of the missing field.
        label: String,
    },

    /// A decode table entry does not fit inside the record layout.
    #[error("field '{label}' does not fit in a {record_width}-byte record")]
    FieldOutOfBounds {
        /// Label of the offending field.
        label: String,
        /// Declared record width in bytes.
        record_width: usize,
    },

    /// The decoded tuple does not match the observer's labels.
    #[error("expected {expected} fields, decoded {actual}")]
    FieldCount {
        /// Number of labels.
        expected: usize,
        /// Number of decoded values.
        actual: usize,
    },
}

/// Errors raised by observer lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    /// `start()` was called while the polling loop is running.
    #[error("observer already running")]
    AlreadyRunning,

    /// `stop()` was called while no polling loop is running.
    #[error("observer not running")]
    NotRunning,

    /// `stop()` was called from a subscriber on the polling thread.
    #[error("observer cannot be stopped from its own polling thread")]
    StopFromPollingThread,

    /// The polling thread could not be spawned.
    #[error("failed to spawn polling thread: {0}")]
    Spawn(String),

    /// The transport was lost because the polling thread panicked.
    #[error("sensor transport lost")]
    TransportLost,
}

/// A byte-oriented link that yields one raw sensor record per read.
pub trait SensorTransport: Send {
    /// Read one raw record.
    ///
    /// Returns `Ok(None)` if nothing arrived within `timeout`, which lets the
    /// polling loop honor a stop request within a bounded time.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] if the link failed; the polling loop stops.
    fn read_raw_record(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError>;
}

/// Maps one raw record onto an ordered tuple of typed fields.
pub trait RecordDecoder: Send + Sync {
    /// The field names, in output order.
    fn labels(&self) -> &Labels;

    /// Decode one raw record.
    ///
    /// Returns `Ok(None)` if the record carries no data.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the record is malformed.
    fn decode(&self, raw: &[u8]) -> Result<Option<Vec<FieldValue>>, DecodeError>;
}

/// Identifies a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SampleHandler = Arc<dyn Fn(&[FieldValue]) + Send + Sync>;
type FaultHandler = Arc<dyn Fn(&DeviceError) + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sample(SampleHandler),
    Fault(FaultHandler),
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

/// Copy-on-write subscriber list.
///
/// The polling thread iterates over a snapshot, so subscribing or
/// unsubscribing never waits on a running notification.
#[derive(Clone, Default)]
struct Subscribers {
    list: Arc<RwLock<Arc<Vec<Subscription>>>>,
    next_id: Arc<AtomicU64>,
}

impl Subscribers {
    fn insert(&self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut list = self.list.write();
        let mut next = Vec::clone(&list);
        next.push(Subscription { id, handler });
        *list = Arc::new(next);
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut list = self.list.write();
        if !list.iter().any(|sub| sub.id == id) {
            return false;
        }
        let next: Vec<_> = list.iter().filter(|sub| sub.id != id).cloned().collect();
        *list = Arc::new(next);
        true
    }

    fn snapshot(&self) -> Arc<Vec<Subscription>> {
        Arc::clone(&self.list.read())
    }

    fn notify_sample(&self, values: &[FieldValue]) {
        for sub in self.snapshot().iter() {
            if let Handler::Sample(handler) = &sub.handler {
                handler(values);
            }
        }
    }

    fn notify_fault(&self, fault: &DeviceError) {
        for sub in self.snapshot().iter() {
            if let Handler::Fault(handler) = &sub.handler {
                handler(fault);
            }
        }
    }

    fn len(&self) -> usize {
        self.list.read().len()
    }
}

/// Counters maintained by the polling loop.
///
/// A record is counted once every subscriber has seen it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStats {
    /// Raw records read from the transport.
    pub records: u64,
    /// Records delivered to subscribers.
    pub decoded: u64,
    /// Records dropped because they were empty or undecodable.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    records: AtomicU64,
    decoded: AtomicU64,
    dropped: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> ObserverStats {
        ObserverStats {
            records: self.records.load(Ordering::Acquire),
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

enum ObserverState {
    /// Idle; the transport is parked here between runs.
    Stopped(Box<dyn SensorTransport>),
    /// The polling thread owns the transport and hands it back on exit.
    Polling {
        handle: JoinHandle<Box<dyn SensorTransport>>,
        stop: Arc<AtomicBool>,
    },
    /// `stop()` is joining the polling thread.
    Stopping,
    /// The polling thread panicked and took the transport with it.
    Lost,
}

impl ObserverState {
    fn idle_error(&self) -> ObserverError {
        match self {
            Self::Lost => ObserverError::TransportLost,
            _ => ObserverError::NotRunning,
        }
    }
}

/// Everything the polling thread needs, moved into it on `start()`.
struct PollingLoop {
    transport: Box<dyn SensorTransport>,
    decoder: Arc<dyn RecordDecoder>,
    subscribers: Subscribers,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stats: Arc<StatCounters>,
    read_timeout: Duration,
}

impl PollingLoop {
    fn run(mut self) -> Box<dyn SensorTransport> {
        debug!("Sensor polling loop started");

        while !self.stop.load(Ordering::Acquire) {
            match self.transport.read_raw_record(self.read_timeout) {
                Ok(Some(raw)) => {
                    self.dispatch(&raw);
                    self.stats.records.fetch_add(1, Ordering::Release);
                }
                Ok(None) => {}
                Err(fault) => {
                    error!(error = %fault, "Sensor transport failed, stopping observer");
                    self.subscribers.notify_fault(&fault);
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        debug!("Sensor polling loop exited");
        self.transport
    }

    fn dispatch(&self, raw: &[u8]) {
        match decode_checked(self.decoder.as_ref(), raw) {
            Ok(Some(values)) => {
                self.subscribers.notify_sample(&values);
                self.stats.decoded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(len = raw.len(), "Sensor record carried no data");
            }
            Err(err) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, len = raw.len(), "Dropping undecodable sensor record");
            }
        }
    }
}

/// Decode a record and enforce the label-count invariant.
fn decode_checked(
    decoder: &dyn RecordDecoder,
    raw: &[u8],
) -> Result<Option<Vec<FieldValue>>, DecodeError> {
    let Some(values) = decoder.decode(raw)? else {
        return Ok(None);
    };
    let expected = decoder.labels().len();
    if values.len() != expected {
        return Err(DecodeError::FieldCount {
            expected,
            actual: values.len(),
        });
    }
    Ok(Some(values))
}

/// Turns a byte transport into a stream of labeled samples.
pub struct SensorObserver {
    labels: Labels,
    decoder: Arc<dyn RecordDecoder>,
    subscribers: Subscribers,
    state: Mutex<ObserverState>,
    running: Arc<AtomicBool>,
    stats: Arc<StatCounters>,
    read_timeout: Duration,
}

impl fmt::Debug for SensorObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorObserver")
            .field("labels", &self.labels)
            .field("running", &self.is_running())
            .field("subscribers", &self.subscribers.len())
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl SensorObserver {
    /// Create a stopped observer over a transport and its decoder.
    #[must_use]
    pub fn new(transport: Box<dyn SensorTransport>, decoder: Arc<dyn RecordDecoder>) -> Self {
        Self {
            labels: decoder.labels().clone(),
            decoder,
            subscribers: Subscribers::default(),
            state: Mutex::new(ObserverState::Stopped(transport)),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StatCounters::default()),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set how long one transport read may block.
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// The field names of every sample this observer produces.
    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Whether the polling loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> ObserverStats {
        self.stats.snapshot()
    }

    /// Register a callback for every successfully decoded sample.
    ///
    /// The callback runs on the polling thread and must not block.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[FieldValue]) + Send + Sync + 'static,
    {
        self.subscribers.insert(Handler::Sample(Arc::new(callback)))
    }

    /// Register a callback for a transport failure that stops the loop.
    pub fn subscribe_faults<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceError) + Send + Sync + 'static,
    {
        self.subscribers.insert(Handler::Fault(Arc::new(callback)))
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Start the polling loop on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::AlreadyRunning`] if a loop is active, or
    /// [`ObserverError::TransportLost`] if a previous loop panicked.
    pub fn start(&self) -> Result<(), ObserverError> {
        let mut state = self.state.lock();

        // Reap a loop that exited on its own after a transport fault.
        if let ObserverState::Polling { handle, .. } = &*state {
            if !handle.is_finished() {
                return Err(ObserverError::AlreadyRunning);
            }
        }
        if matches!(&*state, ObserverState::Stopping) {
            return Err(ObserverError::AlreadyRunning);
        }

        let transport = match std::mem::replace(&mut *state, ObserverState::Lost) {
            ObserverState::Stopped(transport) => transport,
            ObserverState::Polling { handle, .. } => match handle.join() {
                Ok(transport) => transport,
                Err(_) => return Err(ObserverError::TransportLost),
            },
            ObserverState::Stopping | ObserverState::Lost => {
                return Err(ObserverError::TransportLost)
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let polling = PollingLoop {
            transport,
            decoder: Arc::clone(&self.decoder),
            subscribers: self.subscribers.clone(),
            stop: Arc::clone(&stop),
            running: Arc::clone(&self.running),
            stats: Arc::clone(&self.stats),
            read_timeout: self.read_timeout,
        };

        self.running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("tss-sensor".to_string())
            .spawn(move || polling.run())
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                ObserverError::Spawn(e.to_string())
            })?;

        *state = ObserverState::Polling { handle, stop };
        info!(labels = self.labels.len(), "Sensor observer started");
        Ok(())
    }

    /// Signal the polling loop to exit and wait for it.
    ///
    /// No subscriber is invoked after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::NotRunning`] if no loop was started,
    /// [`ObserverError::StopFromPollingThread`] if called from a subscriber,
    /// or [`ObserverError::TransportLost`] if the loop panicked.
    pub fn stop(&self) -> Result<(), ObserverError> {
        let (handle, stop) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ObserverState::Stopping) {
                ObserverState::Polling { handle, stop } => {
                    if handle.thread().id() == thread::current().id() {
                        *state = ObserverState::Polling { handle, stop };
                        return Err(ObserverError::StopFromPollingThread);
                    }
                    (handle, stop)
                }
                other => {
                    let err = other.idle_error();
                    *state = other;
                    return Err(err);
                }
            }
        };

        // Join without the state lock; subscribers may call into the observer.
        stop.store(true, Ordering::Release);
        let joined = handle.join();

        let mut state = self.state.lock();
        if let Ok(transport) = joined {
            *state = ObserverState::Stopped(transport);
            info!("Sensor observer stopped");
            Ok(())
        } else {
            *state = ObserverState::Lost;
            self.running.store(false, Ordering::Release);
            error!("Sensor polling thread panicked");
            Err(ObserverError::TransportLost)
        }
    }
}

impl Drop for SensorObserver {
    fn drop(&mut self) {
        if let ObserverState::Polling { handle, stop } =
            std::mem::replace(self.state.get_mut(), ObserverState::Lost)
        {
            stop.store(true, Ordering::Release);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
