//! Recorder configuration

use crate::capture::{LensFacing, Resolution};
use crate::encoder::EncoderProfile;
use crate::render::{Orientation, RenderSettings};
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything fixed when the recorder is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Encoded output width
    pub file_width: u32,

    /// Encoded output height
    pub file_height: u32,

    /// Requested capture width
    pub camera_width: u32,

    /// Requested capture height
    pub camera_height: u32,

    pub lens_facing: LensFacing,

    /// Mirror the recorded frames horizontally
    pub flip_horizontal: bool,

    /// Mirror the recorded frames vertically
    pub flip_vertical: bool,

    /// Device orientation in degrees, multiple of 90
    pub rotation_degrees: i32,

    /// Record without an audio track
    pub mute: bool,

    /// Keep the active filter off the recording (preview only)
    pub record_no_filter: bool,

    /// Output file for the first recording
    pub output_path: Option<PathBuf>,

    /// Delete the output file when the encoder fails to finalize it
    pub discard_invalid_output: bool,

    pub encoder: EncoderProfile,

    pub render: RenderSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            file_width: 720,
            file_height: 1280,
            camera_width: 1280,
            camera_height: 720,
            lens_facing: LensFacing::Front,
            flip_horizontal: false,
            flip_vertical: false,
            rotation_degrees: 0,
            mute: false,
            record_no_filter: false,
            output_path: None,
            discard_invalid_output: false,
            encoder: EncoderProfile::default(),
            render: RenderSettings::default(),
        }
    }
}

impl RecorderConfig {
    pub fn from_json_str(json: &str) -> RecorderResult<Self> {
        let config: RecorderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> RecorderResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.file_resolution().is_none() {
            return Err(RecorderError::Config(format!(
                "file size {}x{} must be non-zero",
                self.file_width, self.file_height
            )));
        }
        if self.camera_resolution().is_none() {
            return Err(RecorderError::Config(format!(
                "camera size {}x{} must be non-zero",
                self.camera_width, self.camera_height
            )));
        }
        if self.rotation_degrees % 90 != 0 {
            return Err(RecorderError::Config(format!(
                "rotation {} is not a multiple of 90",
                self.rotation_degrees
            )));
        }
        if self.encoder.video_bitrate == 0 || self.encoder.frame_rate == 0 {
            return Err(RecorderError::Config(
                "video bitrate and frame rate must be non-zero".to_string(),
            ));
        }
        if !self.mute && (self.encoder.audio_sample_rate == 0 || self.encoder.audio_bitrate == 0) {
            return Err(RecorderError::Config(
                "audio sample rate and bitrate must be non-zero unless muted".to_string(),
            ));
        }
        if self.render.frame_queue_depth == 0 || self.render.command_queue_depth == 0 {
            return Err(RecorderError::Config("render queue depths must be non-zero".to_string()));
        }
        if matches!(&self.output_path, Some(p) if p.as_os_str().is_empty()) {
            return Err(RecorderError::Config("output path is empty".to_string()));
        }
        Ok(())
    }

    pub fn file_resolution(&self) -> Option<Resolution> {
        Resolution::new(self.file_width, self.file_height)
    }

    pub fn camera_resolution(&self) -> Option<Resolution> {
        Resolution::new(self.camera_width, self.camera_height)
    }

    /// Preview follows the device rotation only
    pub fn preview_orientation(&self) -> Orientation {
        Orientation {
            rotation_degrees: self.rotation_degrees,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }

    /// Recording gets the device rotation plus the configured mirroring
    pub fn encoder_orientation(&self) -> Orientation {
        Orientation {
            rotation_degrees: self.rotation_degrees,
            flip_horizontal: self.flip_horizontal,
            flip_vertical: self.flip_vertical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.file_resolution(), Resolution::new(720, 1280));
        assert_eq!(config.camera_resolution(), Resolution::new(1280, 720));
        assert_eq!(config.lens_facing, LensFacing::Front);
        assert!(config.output_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RecorderConfig::from_json_str(
            r#"{"fileWidth":1080,"fileHeight":1920,"mute":true,"encoder":{"videoBitrate":8000000}}"#,
        )
        .unwrap();
        assert_eq!(config.file_width, 1080);
        assert!(config.mute);
        assert_eq!(config.encoder.video_bitrate, 8_000_000);
        assert_eq!(config.encoder.frame_rate, 30);
        assert_eq!(config.render.frame_queue_depth, 8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = RecorderConfig::from_json_str(r#"{"rotationDegrees":45}"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let err = RecorderConfig::from_json_str(r#"{"fileWidth":0}"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let err = RecorderConfig::from_json_str(r#"{"render":{"frameQueueDepth":0}}"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let err = RecorderConfig::from_json_str("{not json").unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"lensFacing":"back","flipHorizontal":true,"rotationDegrees":270}}"#).unwrap();

        let config = RecorderConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.lens_facing, LensFacing::Back);
        assert!(!config.preview_orientation().flip_horizontal);
        assert!(config.encoder_orientation().flip_horizontal);
        assert_eq!(config.encoder_orientation().rotation_degrees, 270);

        let missing = RecorderConfig::from_json_file(file.path().with_extension("missing")).unwrap_err();
        assert_eq!(missing.code(), "IO_ERROR");
    }
}
