//! `tss` - Synchronized video and sensor telemetry recording
//!
//! This library captures video frames and sensor samples side by side,
//! tags every sample with the video frame it belongs to, packs both into a
//! single archive, and exports tables and illustrated reports from archives.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod sensor;
pub mod session;
pub mod telemetry;
pub mod video;

pub use config::Config;
pub use container::{ContainerManager, FrameRange, SaveOptions};
pub use error::{DeviceError, Error, Result};
pub use logging::init_logging;
pub use sensor::{RecordDecoder, SensorObserver, SensorTransport};
pub use session::{RecordingSession, SaveTarget, SessionListener, SessionState};
pub use telemetry::{FieldValue, FrameIndex, Labels, Recording, TelemetrySample};
pub use video::{FourCc, Frame, FrameSize, FrameSource};
