//! Recording sessions.
//!
//! A [`RecordingSession`] is the rendezvous point between a [`FrameSource`]
//! and a [`SensorObserver`]. It owns a capture thread that pulls one frame
//! per tick, republishes it as the live preview and, while recording, writes
//! it to a video sink and advances the frame clock. Sensor samples are
//! tagged with the clock value current at their arrival.
//!
//! The frame clock and the telemetry buffer live behind one lock. The
//! capture thread takes it only after a frame has been written, so a sample
//! is never attributed to a frame that is not yet in the sink.
//!
//! # Lock order
//!
//! Session state, then the telemetry log. Listener callbacks run with no
//! session lock held.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::container::{ContainerManager, SaveOptions};
use crate::error::{DeviceError, Error, Result};
use crate::sensor::{SensorObserver, SubscriptionId};
use crate::telemetry::{FieldValue, FrameIndex, Labels, Recording};
use crate::video::{FourCc, Frame, FrameSource, VideoSink};

/// Scratch file receiving the video while recording.
pub const SCRATCH_VIDEO: &str = "~temp.mp4";

/// Scratch file receiving the recording when it is sealed.
pub const SCRATCH_RECORD: &str = "~temp.json";

/// Recording state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Previewing only.
    Idle,
    /// Writing frames and buffering telemetry.
    Recording,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
        }
    }
}

/// Callbacks for a presentation layer.
///
/// `on_preview_frame` and `on_device_fault` run on the capture thread,
/// `on_telemetry_sample` on the sensor polling thread. All of them must
/// return quickly. Calling session lifecycle methods from
/// `on_preview_frame` or a capture-side `on_device_fault` is rejected.
pub trait SessionListener: Send + Sync {
    /// A new frame is available for preview.
    fn on_preview_frame(&self, _frame: &Arc<Frame>) {}

    /// A sensor sample arrived, whether or not a recording is active.
    fn on_telemetry_sample(&self, _labels: &Labels, _values: &[FieldValue]) {}

    /// The session moved between idle and recording.
    fn on_state_changed(&self, _state: SessionState) {}

    /// A device failed. During a recording the caller should finish it.
    fn on_device_fault(&self, _fault: &DeviceError) {}
}

/// A listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {}

/// Chooses where a finished recording is saved.
pub trait SaveTarget {
    /// The archive path, or `None` to discard the recording.
    fn destination(&self) -> Option<PathBuf>;

    /// Whether an existing archive at the destination may be replaced.
    fn allow_overwrite(&self) -> bool {
        false
    }
}

impl SaveTarget for PathBuf {
    fn destination(&self) -> Option<PathBuf> {
        Some(self.clone())
    }
}

/// Save to a path, replacing any existing archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overwrite(pub PathBuf);

impl SaveTarget for Overwrite {
    fn destination(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }

    fn allow_overwrite(&self) -> bool {
        true
    }
}

/// Throw the recording away.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl SaveTarget for Discard {
    fn destination(&self) -> Option<PathBuf> {
        None
    }
}

/// Ask a closure for the destination, e.g. a file dialog.
pub struct Prompt<F>(pub F);

impl<F> fmt::Debug for Prompt<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Prompt")
    }
}

impl<F> SaveTarget for Prompt<F>
where
    F: Fn() -> Option<PathBuf>,
{
    fn destination(&self) -> Option<PathBuf> {
        (self.0)()
    }
}

/// Parameters of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Frame rate written into the video.
    pub fps: u32,
    /// Codec tag for the video sink.
    pub codec: FourCc,
    /// Directory for the scratch video and recording.
    pub scratch_dir: PathBuf,
    /// Remove the scratch files once the archive is written.
    pub delete_originals: bool,
    /// Pause after a failed capture while idle.
    pub capture_retry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fps: 20,
            codec: FourCc::MP4V,
            scratch_dir: std::env::temp_dir().join("tss"),
            delete_originals: true,
            capture_retry: Duration::from_millis(100),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current state.
    pub state: SessionState,
    /// Most recently written frame of the current recording.
    pub frame_clock: Option<FrameIndex>,
    /// Samples buffered in the current recording.
    pub samples: usize,
    /// Samples dropped because no frame had been written yet.
    pub dropped_samples: u64,
    /// Device fault that ended the current recording, if any.
    pub fault: Option<DeviceError>,
}

/// Frame clock and telemetry buffer, mutated under one lock.
#[derive(Debug, Default)]
struct TelemetryLog {
    clock: Option<FrameIndex>,
    recording: Option<Recording>,
    fault: Option<DeviceError>,
    dropped: u64,
}

impl TelemetryLog {
    fn begin(labels: &Labels) -> Self {
        Self {
            recording: Some(Recording::new(labels.clone())),
            ..Self::default()
        }
    }

    fn append(&mut self, values: &[FieldValue]) {
        if self.fault.is_some() {
            return;
        }
        let Some(recording) = &mut self.recording else {
            return;
        };
        match self.clock {
            Some(frame) => recording.push(frame, values.to_vec()),
            None => self.dropped += 1,
        }
    }

    fn advance(&mut self) {
        self.clock = Some(self.clock.map_or(0, |frame| frame + 1));
    }
}

struct Shared {
    labels: Labels,
    log: Mutex<TelemetryLog>,
    preview: Mutex<Option<Arc<Frame>>>,
    listener: Arc<dyn SessionListener>,
}

enum Command {
    Begin {
        path: PathBuf,
        codec: FourCc,
        fps: u32,
        reply: Sender<std::result::Result<(), DeviceError>>,
    },
    End {
        reply: Sender<std::result::Result<(), DeviceError>>,
    },
    Shutdown,
}

/// The capture thread: owns the frame source and the active sink.
struct CaptureLoop {
    source: Box<dyn FrameSource>,
    sink: Option<Box<dyn VideoSink>>,
    commands: Receiver<Command>,
    shared: Arc<Shared>,
    retry: Duration,
    failing: bool,
}

impl CaptureLoop {
    fn run(mut self) {
        debug!(source = self.source.name(), "Capture loop started");
        loop {
            match self.commands.try_recv() {
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => break,
                Ok(command) => {
                    self.handle(command);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
            }
            self.tick();
        }
        if let Some(sink) = self.sink.take() {
            close_sink(sink);
        }
        debug!(source = self.source.name(), "Capture loop exited");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Begin {
                path,
                codec,
                fps,
                reply,
            } => {
                if let Some(sink) = self.sink.take() {
                    close_sink(sink);
                }
                let size = self.source.frame_size();
                let opened = self.source.open_sink(&path, codec, fps, size).map(|sink| {
                    self.sink = Some(sink);
                });
                let _ = reply.send(opened);
            }
            Command::End { reply } => {
                let closed = self.sink.take().map_or(Ok(()), |sink| sink.close());
                let _ = reply.send(closed);
            }
            Command::Shutdown => {}
        }
    }

    fn tick(&mut self) {
        match self.source.capture_frame() {
            Ok(Some(frame)) => {
                self.failing = false;
                self.record(&frame);
                let frame = Arc::new(frame);
                *self.shared.preview.lock() = Some(Arc::clone(&frame));
                self.shared.listener.on_preview_frame(&frame);
            }
            Ok(None) => {}
            Err(fault) => self.capture_failed(fault),
        }

        if self.sink.is_some() {
            let sensor_fault = self.shared.log.lock().fault.clone();
            if let Some(fault) = sensor_fault {
                warn!(error = %fault, "Sensor fault during recording, closing video sink");
                if let Some(sink) = self.sink.take() {
                    close_sink(sink);
                }
            }
        }
    }

    /// Write the frame, then advance the clock.
    fn record(&mut self, frame: &Frame) {
        let Some(sink) = &mut self.sink else {
            return;
        };
        match sink.write_frame(frame) {
            Ok(()) => self.shared.log.lock().advance(),
            Err(fault) => self.abort_recording(fault),
        }
    }

    fn capture_failed(&mut self, fault: DeviceError) {
        if self.sink.is_some() {
            self.abort_recording(fault);
            return;
        }
        if !self.failing {
            warn!(source = self.source.name(), error = %fault, "Frame capture failed");
            self.failing = true;
        }
        thread::sleep(self.retry);
    }

    fn abort_recording(&mut self, fault: DeviceError) {
        error!(error = %fault, "Device fault during recording, closing video sink");
        {
            let mut log = self.shared.log.lock();
            if log.fault.is_none() {
                log.fault = Some(fault.clone());
            }
        }
        if let Some(sink) = self.sink.take() {
            close_sink(sink);
        }
        self.shared.listener.on_device_fault(&fault);
    }
}

fn close_sink(sink: Box<dyn VideoSink>) {
    let frames = sink.frames_written();
    if let Err(e) = sink.close() {
        warn!(error = %e, frames, "Failed to close video sink");
    }
}

/// Synchronizes a frame source and a sensor observer into recordings.
pub struct RecordingSession {
    shared: Arc<Shared>,
    state: Mutex<SessionState>,
    config: SessionConfig,
    observer: Arc<SensorObserver>,
    subscriptions: Mutex<Option<[SubscriptionId; 2]>>,
    commands: Sender<Command>,
    capture: Option<JoinHandle<()>>,
    capture_thread: ThreadId,
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("observer", &self.observer)
            .finish_non_exhaustive()
    }
}

impl RecordingSession {
    /// Start previewing `source`.
    ///
    /// The observer is subscribed on the first recording; starting and
    /// stopping it stays with the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture thread cannot be spawned.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        observer: Arc<SensorObserver>,
        config: SessionConfig,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            labels: observer.labels().clone(),
            log: Mutex::new(TelemetryLog::default()),
            preview: Mutex::new(None),
            listener,
        });

        let (commands, rx) = crossbeam_channel::unbounded();
        let source_name = source.name();
        let capture_loop = CaptureLoop {
            source,
            sink: None,
            commands: rx,
            shared: Arc::clone(&shared),
            retry: config.capture_retry,
            failing: false,
        };
        let capture = thread::Builder::new()
            .name("tss-capture".to_string())
            .spawn(move || capture_loop.run())?;
        let capture_thread = capture.thread().id();

        info!(source = source_name, fps = config.fps, codec = %config.codec, "Recording session ready");
        Ok(Self {
            shared,
            state: Mutex::new(SessionState::Idle),
            config,
            observer,
            subscriptions: Mutex::new(None),
            commands,
            capture: Some(capture),
            capture_thread,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Field names of recorded samples.
    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.shared.labels
    }

    /// The session parameters.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Most recently written frame of the current or last recording.
    #[must_use]
    pub fn frame_clock(&self) -> Option<FrameIndex> {
        self.shared.log.lock().clock
    }

    /// Samples buffered in the current recording.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.shared
            .log
            .lock()
            .recording
            .as_ref()
            .map_or(0, Recording::len)
    }

    /// Samples dropped in the current or last recording because no frame
    /// had been written yet.
    #[must_use]
    pub fn dropped_samples(&self) -> u64 {
        self.shared.log.lock().dropped
    }

    /// The latest captured frame.
    #[must_use]
    pub fn preview_frame(&self) -> Option<Arc<Frame>> {
        self.shared.preview.lock().clone()
    }

    /// Device fault raised during the current recording.
    #[must_use]
    pub fn fault(&self) -> Option<DeviceError> {
        self.shared.log.lock().fault.clone()
    }

    /// Snapshot of state and counters.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        let log = self.shared.log.lock();
        SessionStatus {
            state: *state,
            frame_clock: log.clock,
            samples: log.recording.as_ref().map_or(0, Recording::len),
            dropped_samples: log.dropped,
            fault: log.fault.clone(),
        }
    }

    /// Path of the scratch video.
    #[must_use]
    pub fn scratch_video(&self) -> PathBuf {
        self.config.scratch_dir.join(SCRATCH_VIDEO)
    }

    /// Path of the scratch recording.
    #[must_use]
    pub fn scratch_record(&self) -> PathBuf {
        self.config.scratch_dir.join(SCRATCH_RECORD)
    }

    /// Begin writing frames and buffering telemetry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRecording`] if a recording is active, or
    /// [`Error::Device`] if the video sink cannot be opened.
    pub fn start_recording(&self) -> Result<()> {
        self.ensure_off_capture_thread()?;
        let mut state = self.state.lock();
        if *state == SessionState::Recording {
            return Err(Error::AlreadyRecording);
        }

        fs::create_dir_all(&self.config.scratch_dir)?;
        *self.shared.log.lock() = TelemetryLog::begin(&self.shared.labels);
        self.ensure_subscribed();

        let video = self.scratch_video();
        let (reply, opened) = crossbeam_channel::bounded(1);
        let result = self
            .request(Command::Begin {
                path: video.clone(),
                codec: self.config.codec,
                fps: self.config.fps,
                reply,
            })
            .and_then(|()| opened.recv().unwrap_or_else(|_| Err(capture_stopped())));

        if let Err(fault) = result {
            *self.shared.log.lock() = TelemetryLog::default();
            let _ = fs::remove_file(&video);
            return Err(fault.into());
        }

        *state = SessionState::Recording;
        drop(state);
        info!(video = %video.display(), "Recording started");
        self.shared.listener.on_state_changed(SessionState::Recording);
        Ok(())
    }

    /// Stop recording and save the result to the target's destination.
    ///
    /// Returns the archive path, or `None` if the target discarded the
    /// recording (in which case no scratch file is left behind).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRecording`] if idle, a container error if saving
    /// failed, or [`Error::Device`] if a device fault ended the recording.
    /// In the device case the captured data has already been saved.
    pub fn finish_recording(&self, target: &dyn SaveTarget) -> Result<Option<PathBuf>> {
        self.ensure_off_capture_thread()?;
        let mut state = self.state.lock();
        if *state == SessionState::Idle {
            return Err(Error::NotRecording);
        }

        let (reply, closed) = crossbeam_channel::bounded(1);
        let closed = self
            .request(Command::End { reply })
            .and_then(|()| closed.recv().unwrap_or_else(|_| Err(capture_stopped())));

        let (recording, fault) = {
            let mut log = self.shared.log.lock();
            (log.recording.take(), log.fault.take())
        };
        *state = SessionState::Idle;
        drop(state);
        self.shared.listener.on_state_changed(SessionState::Idle);

        let recording = recording.unwrap_or_else(|| Recording::new(self.shared.labels.clone()));
        info!(samples = recording.len(), "Recording finished");

        let fault = fault.or_else(|| closed.err());
        let saved = self.persist(&recording, target)?;
        match fault {
            Some(fault) => {
                warn!(error = %fault, archive = ?saved, "Recording ended by device fault");
                Err(fault.into())
            }
            None => Ok(saved),
        }
    }

    /// Finish any active recording, then stop capturing and detach from the
    /// observer.
    ///
    /// # Errors
    ///
    /// Returns the error of the implicit [`finish_recording`](Self::finish_recording).
    pub fn shutdown(mut self, target: &dyn SaveTarget) -> Result<Option<PathBuf>> {
        let saved = if self.state() == SessionState::Recording {
            self.finish_recording(target)
        } else {
            Ok(None)
        };
        self.stop_capture();
        self.unsubscribe();
        info!("Recording session shut down");
        saved
    }

    fn persist(&self, recording: &Recording, target: &dyn SaveTarget) -> Result<Option<PathBuf>> {
        let video = self.scratch_video();
        let record = self.scratch_record();
        if let Err(e) = recording.write_json(&record) {
            discard(&[&video, &record]);
            return Err(e);
        }

        let Some(destination) = target.destination() else {
            discard(&[&video, &record]);
            info!("Recording discarded");
            return Ok(None);
        };

        let options = SaveOptions {
            delete_originals: self.config.delete_originals,
            overwrite: target.allow_overwrite(),
        };
        if let Err(e) = ContainerManager::new(&destination).save(&video, &record, options) {
            warn!(
                error = %e,
                video = %video.display(),
                record = %record.display(),
                "Save failed, scratch files kept"
            );
            return Err(e);
        }
        Ok(Some(destination))
    }

    fn ensure_subscribed(&self) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let samples = self.observer.subscribe(move |values| {
            shared.listener.on_telemetry_sample(&shared.labels, values);
            shared.log.lock().append(values);
        });

        let shared = Arc::clone(&self.shared);
        let faults = self.observer.subscribe_faults(move |fault| {
            {
                let mut log = shared.log.lock();
                if log.recording.is_some() && log.fault.is_none() {
                    log.fault = Some(fault.clone());
                }
            }
            shared.listener.on_device_fault(fault);
        });

        *subscriptions = Some([samples, faults]);
        debug!("Subscribed to sensor observer");
    }

    fn unsubscribe(&self) {
        if let Some(ids) = self.subscriptions.lock().take() {
            for id in ids {
                self.observer.unsubscribe(id);
            }
        }
    }

    fn request(&self, command: Command) -> std::result::Result<(), DeviceError> {
        self.commands.send(command).map_err(|_| capture_stopped())
    }

    fn stop_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }

    fn ensure_off_capture_thread(&self) -> Result<()> {
        if thread::current().id() == self.capture_thread {
            return Err(Error::internal(
                "session lifecycle methods cannot be called from the capture thread",
            ));
        }
        Ok(())
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if thread::current().id() != self.capture_thread {
            self.stop_capture();
        }
        self.unsubscribe();
    }
}

fn capture_stopped() -> DeviceError {
    DeviceError::Capture("capture thread is not running".to_string())
}

fn discard(paths: &[&Path]) {
    for path in paths {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::tests::IntListDecoder;
    use crate::sensor::ChannelTransport;
    use crate::video::{ChannelFrameSource, FrameSize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const SIZE: FrameSize = FrameSize::new(2, 2);

    struct Rig {
        frames: Sender<Frame>,
        records: Sender<Vec<u8>>,
        observer: Arc<SensorObserver>,
        session: RecordingSession,
        dir: tempfile::TempDir,
    }

    impl Rig {
        fn new(listener: Arc<dyn SessionListener>) -> Self {
            crate::logging::init_test_logging();
            let dir = tempfile::tempdir().unwrap();
            let (frames, source) = ChannelFrameSource::new(SIZE, Duration::from_millis(5));
            let (records, transport) = ChannelTransport::unbounded();
            let observer = Arc::new(
                SensorObserver::new(Box::new(transport), Arc::new(IntListDecoder::new(&["A", "B"])))
                    .with_read_timeout(Duration::from_millis(5)),
            );
            observer.start().unwrap();

            let config = SessionConfig {
                scratch_dir: dir.path().join("scratch"),
                capture_retry: Duration::from_millis(5),
                ..SessionConfig::default()
            };
            let session =
                RecordingSession::spawn(Box::new(source), Arc::clone(&observer), config, listener)
                    .unwrap();
            Self {
                frames,
                records,
                observer,
                session,
                dir,
            }
        }

        fn frame(&self) {
            let before = self.session.frame_clock();
            self.frames.send(Frame::solid(SIZE, [1; 3])).unwrap();
            if self.session.state() == SessionState::Recording {
                wait_until(|| self.session.frame_clock() != before);
            }
        }

        fn sample(&self, record: &str) {
            let before = self.observer.stats().records;
            self.records.send(record.as_bytes().to_vec()).unwrap();
            wait_until(|| self.observer.stats().records > before);
        }

        fn archive(&self) -> PathBuf {
            self.dir.path().join("out.tss")
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[derive(Default)]
    struct Counting {
        previews: AtomicUsize,
        samples: AtomicUsize,
        states: Mutex<Vec<SessionState>>,
        faults: AtomicUsize,
    }

    impl SessionListener for Counting {
        fn on_preview_frame(&self, _frame: &Arc<Frame>) {
            self.previews.fetch_add(1, Ordering::SeqCst);
        }

        fn on_telemetry_sample(&self, labels: &Labels, values: &[FieldValue]) {
            assert_eq!(labels.len(), values.len());
            self.samples.fetch_add(1, Ordering::SeqCst);
        }

        fn on_state_changed(&self, state: SessionState) {
            self.states.lock().push(state);
        }

        fn on_device_fault(&self, _fault: &DeviceError) {
            self.faults.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_samples_are_tagged_with_written_frames() {
        let rig = Rig::new(Arc::new(NoopListener));
        rig.session.start_recording().unwrap();
        assert_eq!(rig.session.state(), SessionState::Recording);

        rig.frame();
        rig.sample("1,2");
        rig.sample("3,4");
        rig.frame();
        rig.frame();
        rig.sample("5,6");
        assert_eq!(rig.session.frame_clock(), Some(2));
        assert_eq!(rig.session.sample_count(), 3);

        let saved = rig.session.finish_recording(&rig.archive()).unwrap();
        assert_eq!(saved, Some(rig.archive()));

        let recording = ContainerManager::new(rig.archive()).load_recording().unwrap();
        let frames: Vec<_> = recording.samples.iter().map(|s| s.frame_index).collect();
        assert_eq!(frames, vec![0, 0, 2]);
        assert!(!rig.session.scratch_video().exists());
        assert!(!rig.session.scratch_record().exists());
    }

    #[test]
    fn test_samples_before_first_frame_are_dropped() {
        let rig = Rig::new(Arc::new(NoopListener));
        rig.session.start_recording().unwrap();
        rig.sample("9,9");
        wait_until(|| rig.session.dropped_samples() == 1);
        rig.frame();
        rig.sample("1,2");

        let status = rig.session.status();
        assert_eq!(status.samples, 1);
        assert_eq!(status.dropped_samples, 1);
        assert_eq!(status.frame_clock, Some(0));
        rig.session.finish_recording(&Discard).unwrap();
    }

    #[test]
    fn test_samples_while_idle_are_not_buffered() {
        let listener = Arc::new(Counting::default());
        let rig = Rig::new(listener.clone());
        rig.session.start_recording().unwrap();
        rig.session.finish_recording(&Discard).unwrap();

        rig.sample("1,2");
        assert_eq!(rig.session.sample_count(), 0);
        assert_eq!(listener.samples.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_frame_recording_is_saved() {
        let rig = Rig::new(Arc::new(NoopListener));
        rig.session.start_recording().unwrap();
        rig.session.finish_recording(&rig.archive()).unwrap();

        let recording = ContainerManager::new(rig.archive()).load_recording().unwrap();
        assert_eq!(recording.labels, Labels::new(["A", "B"]));
        assert!(recording.is_empty());
    }

    #[test]
    fn test_discard_leaves_no_files() {
        let rig = Rig::new(Arc::new(NoopListener));
        rig.session.start_recording().unwrap();
        rig.frame();
        rig.sample("1,2");

        assert_eq!(rig.session.finish_recording(&Discard).unwrap(), None);
        assert!(!rig.session.scratch_video().exists());
        assert!(!rig.session.scratch_record().exists());
        assert!(!rig.archive().exists());
    }

    #[test]
    fn test_prompt_target() {
        let rig = Rig::new(Arc::new(NoopListener));
        let archive = rig.archive();
        rig.session.start_recording().unwrap();
        let saved = rig
            .session
            .finish_recording(&Prompt(move || Some(archive.clone())))
            .unwrap();
        assert_eq!(saved, Some(rig.archive()));
    }

    #[test]
    fn test_lifecycle_errors() {
        let rig = Rig::new(Arc::new(NoopListener));
        assert!(matches!(
            rig.session.finish_recording(&Discard),
            Err(Error::NotRecording)
        ));
        rig.session.start_recording().unwrap();
        assert!(matches!(
            rig.session.start_recording(),
            Err(Error::AlreadyRecording)
        ));
        rig.session.finish_recording(&Discard).unwrap();
    }

    #[test]
    fn test_existing_archive_needs_overwrite() {
        let rig = Rig::new(Arc::new(NoopListener));
        fs::write(rig.archive(), b"old").unwrap();

        rig.session.start_recording().unwrap();
        let err = rig.session.finish_recording(&rig.archive()).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(rig.session.state(), SessionState::Idle);

        rig.session.start_recording().unwrap();
        rig.session
            .finish_recording(&Overwrite(rig.archive()))
            .unwrap();
        assert!(ContainerManager::new(rig.archive()).load_recording().is_ok());
    }

    #[test]
    fn test_frame_fault_persists_and_surfaces() {
        let listener = Arc::new(Counting::default());
        let rig = Rig::new(listener.clone());
        let archive = rig.archive();
        rig.session.start_recording().unwrap();
        rig.frame();
        rig.sample("1,2");

        drop(rig.frames);
        wait_until(|| rig.session.fault().is_some());
        assert_eq!(listener.faults.load(Ordering::SeqCst), 1);

        let err = rig.session.finish_recording(&archive).unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::Disconnected)));

        let recording = ContainerManager::new(&archive).load_recording().unwrap();
        assert_eq!(recording.len(), 1);
    }

    #[test]
    fn test_sensor_fault_persists_and_surfaces() {
        let rig = Rig::new(Arc::new(NoopListener));
        let archive = rig.archive();
        rig.session.start_recording().unwrap();
        rig.frame();
        rig.sample("1,2");

        drop(rig.records);
        wait_until(|| rig.session.fault().is_some());

        let err = rig.session.finish_recording(&archive).unwrap_err();
        assert!(err.is_device_error());
        assert_eq!(
            ContainerManager::new(&archive)
                .load_recording()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_listener_sees_previews_and_state_changes() {
        let listener = Arc::new(Counting::default());
        let rig = Rig::new(listener.clone());

        rig.frames.send(Frame::solid(SIZE, [7; 3])).unwrap();
        wait_until(|| rig.session.preview_frame().is_some());
        assert_eq!(rig.session.preview_frame().unwrap().pixels()[0], 7);
        assert!(listener.previews.load(Ordering::SeqCst) >= 1);

        rig.session.start_recording().unwrap();
        rig.session.finish_recording(&Discard).unwrap();
        assert_eq!(
            *listener.states.lock(),
            vec![SessionState::Recording, SessionState::Idle]
        );
    }

    #[test]
    fn test_shutdown_finishes_active_recording() {
        let rig = Rig::new(Arc::new(NoopListener));
        let archive = rig.archive();
        rig.session.start_recording().unwrap();
        rig.frame();

        let saved = rig.session.shutdown(&archive).unwrap();
        assert_eq!(saved, Some(archive.clone()));
        assert!(archive.is_file());
    }
}
