//! Encoder trait definitions

use crate::capture::Resolution;
use crate::surface::NativeSurface;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Video codec requested from the hardware encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// Whatever the device picks
    Default,
    H264,
    Hevc,
}

impl Default for VideoCodec {
    fn default() -> Self {
        Self::Default
    }
}

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mpeg4,
    Webm,
}

impl Default for ContainerFormat {
    fn default() -> Self {
        Self::Mpeg4
    }
}

impl ContainerFormat {
    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mpeg4 => "mp4",
            ContainerFormat::Webm => "webm",
        }
    }
}

/// Encoder knobs that do not change between recordings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncoderProfile {
    /// Video bitrate in bits per second
    pub video_bitrate: u32,

    /// Target frame rate
    pub frame_rate: u32,

    /// Audio sample rate in Hz (ignored when muted)
    pub audio_sample_rate: u32,

    /// Audio bitrate in bits per second (ignored when muted)
    pub audio_bitrate: u32,

    pub codec: VideoCodec,

    pub container: ContainerFormat,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            video_bitrate: 12_000_000,
            frame_rate: 30,
            audio_sample_rate: 44_100,
            audio_bitrate: 96_000,
            codec: VideoCodec::Default,
            container: ContainerFormat::Mpeg4,
        }
    }
}

/// Full configuration handed to the hardware encoder on prepare
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u32,
    pub frame_rate: u32,
    pub audio_enabled: bool,
    pub audio_sample_rate: u32,
    pub audio_bitrate: u32,
    pub codec: VideoCodec,
    pub container: ContainerFormat,
}

impl EncoderConfig {
    /// Build the encoder configuration for one recording
    pub fn new(output_path: PathBuf, size: Resolution, mute: bool, profile: &EncoderProfile) -> Self {
        Self {
            output_path,
            width: size.width,
            height: size.height,
            video_bitrate: profile.video_bitrate,
            frame_rate: profile.frame_rate,
            audio_enabled: !mute,
            audio_sample_rate: profile.audio_sample_rate,
            audio_bitrate: profile.audio_bitrate,
            codec: profile.codec,
            container: profile.container,
        }
    }
}

/// Factory for encoder input surfaces and encoder instances
pub trait EncoderBackend: Send + Sync {
    /// Allocate a persistent GPU-writable input surface
    fn create_input_surface(&self, size: Resolution) -> anyhow::Result<NativeSurface>;

    /// Destroy a surface returned by `create_input_surface`
    fn destroy_input_surface(&self, surface: NativeSurface);

    /// Create an unconfigured encoder
    fn create_encoder(&self) -> Box<dyn HardwareEncoder>;
}

/// A single hardware encoder + muxer instance
#[async_trait]
pub trait HardwareEncoder: Send {
    /// Configure codec, bitrate, audio and output file, reading from `input`
    async fn configure(&mut self, config: &EncoderConfig, input: NativeSurface) -> anyhow::Result<()>;

    /// Begin encoding frames written to the input surface
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Flush and finalize the output file
    async fn stop(&mut self) -> anyhow::Result<()>;

    /// Free the encoder
    async fn release(&mut self) -> anyhow::Result<()>;
}
