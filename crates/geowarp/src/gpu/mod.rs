//! `wgpu` implementation of [`WarpDevice`](crate::device::WarpDevice).
//!
//! - `context` requests a headless adapter/device pair.
//! - `shader` holds the GLSL warp program and compiles it through naga.
//! - `program` builds the render pipeline and its bind group layout.
//! - `device` implements the trait: buffers, textures, passes, readback.

mod context;
mod device;
mod program;
mod shader;

pub use context::{GpuPower, HeadlessContext};
pub use device::{WgpuBuffer, WgpuDevice, WgpuTexture};
pub use program::WarpProgram;
