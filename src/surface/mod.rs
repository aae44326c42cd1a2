//! Capability surface registry
//!
//! Every GPU-consumable surface (camera input, on-screen preview, encoder
//! input) is registered here with exactly one owner. Binding and release go
//! through the registry so a surface is never written after its owner
//! released it, and never released twice.

pub mod encoder_surface;
pub mod registry;

pub use encoder_surface::EncoderSurface;
pub use registry::{NativeSurface, SurfaceId, SurfaceInfo, SurfaceOwner, SurfaceRegistry, SurfaceRole};
