//! Configuration management for tss.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sensor::{DelimitedRecordDecoder, PackedRecordDecoder, RecordDecoder};
use crate::session::SessionConfig;
use crate::video::{FourCc, FrameSize};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "tss";

/// Prefix of configuration environment variables.
const ENV_PREFIX: &str = "TSS_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TSS_`)
/// 2. TOML config file at `~/.config/tss/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Video recording configuration.
    pub recorder: RecorderConfig,
    /// Sensor configuration.
    pub sensor: SensorConfig,
    /// Scratch and archive storage configuration.
    pub storage: StorageConfig,
}

/// Video recording configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Frame rate written into recordings.
    pub fps: u32,
    /// Four-character codec tag for the video sink.
    pub codec: String,
    /// Capture width in pixels.
    pub frame_width: u32,
    /// Capture height in pixels.
    pub frame_height: u32,
}

/// Wire format of sensor records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// Hex-encoded fixed-width packed records (IMU layout).
    #[default]
    Packed,
    /// Colon-delimited text records.
    Delimited,
}

impl std::fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Packed => write!(f, "packed"),
            Self::Delimited => write!(f, "delimited"),
        }
    }
}

impl RecordFormat {
    /// The built-in decoder for this format.
    #[must_use]
    pub fn decoder(self) -> Arc<dyn RecordDecoder> {
        match self {
            Self::Packed => Arc::new(PackedRecordDecoder::imu()),
            Self::Delimited => Arc::new(DelimitedRecordDecoder::coordinates()),
        }
    }
}

/// Sensor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Record format of the attached sensor.
    pub record_format: RecordFormat,
    /// Maximum time one transport read may block, in milliseconds.
    pub read_timeout_ms: u64,
}

/// Scratch and archive storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for scratch video, recording and extraction files.
    /// Defaults to `~/.local/share/tss`
    pub scratch_dir: Option<PathBuf>,
    /// Remove scratch files once an archive is written.
    pub delete_originals: bool,
    /// Replace an occupied scratch extraction directory.
    pub force_scratch: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            fps: 20,
            codec: "mp4v".to_string(),
            frame_width: 640,
            frame_height: 360,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            record_format: RecordFormat::Packed,
            read_timeout_ms: 200,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None, // Will be resolved to default at runtime
            delete_originals: true,
            force_scratch: true,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing, or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.recorder.fps == 0 {
            return Err(invalid("fps must be greater than 0"));
        }

        if self.recorder.frame_width == 0 || self.recorder.frame_height == 0 {
            return Err(invalid(format!(
                "frame size {}x{} must be non-zero",
                self.recorder.frame_width, self.recorder.frame_height
            )));
        }

        self.codec()?;

        if self.sensor.read_timeout_ms == 0 {
            return Err(invalid("read_timeout_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Get the codec tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is not four printable ASCII characters.
    pub fn codec(&self) -> Result<FourCc> {
        self.recorder.codec.parse().map_err(invalid)
    }

    /// Get the capture frame size.
    #[must_use]
    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.recorder.frame_width, self.recorder.frame_height)
    }

    /// Get the scratch directory, resolving defaults if not set.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.storage
            .scratch_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the sensor read timeout as a Duration.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor.read_timeout_ms)
    }

    /// Build recording session parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec tag is invalid.
    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            fps: self.recorder.fps,
            codec: self.codec()?,
            scratch_dir: self.scratch_dir(),
            delete_originals: self.storage.delete_originals,
            ..SessionConfig::default()
        })
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.recorder.fps, 20);
        assert_eq!(config.recorder.codec, "mp4v");
        assert_eq!(config.sensor.record_format, RecordFormat::Packed);
        assert!(config.storage.delete_originals);
        assert!(config.storage.force_scratch);
    }

    #[test]
    fn test_default_recorder_config() {
        let recorder = RecorderConfig::default();

        assert_eq!(recorder.frame_width, 640);
        assert_eq!(recorder.frame_height, 360);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_fps() {
        let mut config = Config::default();
        config.recorder.fps = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("fps"));
    }

    #[test]
    fn test_validate_zero_frame_size() {
        let mut config = Config::default();
        config.recorder.frame_height = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("640x0"));
    }

    #[test]
    fn test_validate_bad_codec() {
        let mut config = Config::default();
        config.recorder.codec = "h264x".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("codec"));
    }

    #[test]
    fn test_validate_zero_read_timeout() {
        let mut config = Config::default();
        config.sensor.read_timeout_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("read_timeout_ms"));
    }

    #[test]
    fn test_scratch_dir_default() {
        let config = Config::default();
        assert!(config.scratch_dir().to_string_lossy().contains("tss"));
    }

    #[test]
    fn test_scratch_dir_custom() {
        let mut config = Config::default();
        config.storage.scratch_dir = Some(PathBuf::from("/custom/scratch"));

        assert_eq!(config.scratch_dir(), PathBuf::from("/custom/scratch"));
    }

    #[test]
    fn test_read_timeout() {
        let config = Config::default();
        assert_eq!(config.read_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_session_config() {
        let mut config = Config::default();
        config.recorder.fps = 30;
        config.storage.delete_originals = false;

        let session = config.session_config().unwrap();
        assert_eq!(session.fps, 30);
        assert_eq!(session.codec, FourCc::MP4V);
        assert!(!session.delete_originals);
    }

    #[test]
    fn test_record_format_decoder_labels() {
        assert_eq!(RecordFormat::Packed.decoder().labels().len(), 15);
        assert_eq!(
            RecordFormat::Delimited.decoder().labels().join(","),
            "ID,No,x,y,z"
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("tss"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[recorder]\nfps = 30\n\n[sensor]\nrecord_format = \"delimited\"\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.recorder.fps, 30);
        assert_eq!(config.recorder.codec, "mp4v");
        assert_eq!(config.sensor.record_format, RecordFormat::Delimited);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[recorder]\nfps = 0\n").unwrap();

        let err = Config::load_from(Some(path)).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_record_format_serialize() {
        let json = serde_json::to_string(&SensorConfig::default()).unwrap();
        assert!(json.contains("\"packed\""));
    }
}
