//! Hardware encoder boundary
//!
//! The concrete video/audio encoder and muxer are platform collaborators.
//! The core only needs a persistent GPU-writable input surface and a
//! prepare/start/stop/release lifecycle.

pub mod traits;

pub use traits::{
    ContainerFormat, EncoderBackend, EncoderConfig, EncoderProfile, HardwareEncoder, VideoCodec,
};
