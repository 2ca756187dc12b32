//! Error types for tss.
//!
//! This module defines the error taxonomy shared by the recording session
//! and the container manager. Sensor decode failures have their own local
//! type in [`crate::sensor`] because they never cross the subscriber boundary.

use std::path::PathBuf;
use thiserror::Error;

/// A capture device, video sink, or sensor transport failure.
///
/// These are cloneable so a single fault can be recorded in the session,
/// handed to the presentation layer, and returned to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The frame source failed to produce a frame.
    #[error("frame capture failed: {0}")]
    Capture(String),

    /// The video sink could not be opened, written, or closed.
    #[error("video sink failed: {0}")]
    Sink(String),

    /// The sensor transport failed while reading a record.
    #[error("sensor transport failed: {0}")]
    Transport(String),

    /// The device or its producer went away.
    #[error("device disconnected")]
    Disconnected,
}

impl DeviceError {
    /// Wrap an I/O error raised by a video sink.
    #[must_use]
    pub fn sink(err: &std::io::Error) -> Self {
        Self::Sink(err.to_string())
    }
}

/// The main error type for tss operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Container Errors ===
    /// The referenced archive does not exist.
    #[error("archive not found: {}", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A write target exists and overwriting it was not allowed.
    #[error("already exists: {}", path.display())]
    AlreadyExists {
        /// The colliding path.
        path: PathBuf,
    },

    /// An automatic scratch extraction could not take its location.
    #[error("automatic extraction to {} failed: {reason}", path.display())]
    ExtractFailed {
        /// The scratch directory.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The archive exists but is not a valid container.
    #[error("invalid container {}: {message}", path.display())]
    InvalidContainer {
        /// Path to the archive.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    // === Session Errors ===
    /// A recording is already in progress.
    #[error("a recording is already in progress")]
    AlreadyRecording,

    /// No recording is in progress.
    #[error("no recording is in progress")]
    NotRecording,

    /// A device failed during capture.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The sensor observer was misused or lost its transport.
    #[error("sensor observer error: {0}")]
    Observer(#[from] crate::sensor::ObserverError),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O and Format Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The archive could not be read or written.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A still image could not be encoded.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for tss operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new not-found error.
    #[must_use]
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a new already-exists error.
    #[must_use]
    pub fn already_exists(path: impl Into<PathBuf>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error reports a missing archive.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error reports a write-target collision.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Check if this error reports a device failure.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}
