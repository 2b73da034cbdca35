//! Geo-referenced image layers warped into planet-surface textures.
//!
//! A layer owns one raster image anchored to four geographic corners. The image
//! arrives asynchronously (already decoded, still decoding, or behind a URL),
//! is uploaded to the GPU once, and is then re-projected through a shared
//! render-to-texture pass into an output texture that a terrain renderer can
//! sample directly. The overall flow is:
//!
//! ```text
//!   consumer
//!      │ load_material / set_src / set_corners
//!      ▼
//!   GeoImagePipeline ──▶ GeoImageLayer ──▶ SourceLoader ──▶ ImageFetcher (worker)
//!      │                      ▲                                   │
//!      │ pump()               └──────── decode completion ◀───────┘
//!      ▼
//!   GeoImageCreator queue ──▶ SourceTexture + CornerGeometry ──▶ WarpRenderer
//!                                                                   │
//!                                       PassCompletion ◀── WarpDevice (wgpu)
//! ```
//!
//! Everything runs on the thread that drives [`GeoImagePipeline`]; the only
//! suspension points are decode completions and GPU pass completions, both of
//! which are observed in [`GeoImagePipeline::pump`]. The GPU is reached through
//! the [`WarpDevice`] trait, implemented for `wgpu` by [`gpu::WgpuDevice`].

pub mod creator;
pub mod device;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod instance;
pub mod layer;
pub mod pipeline;
pub mod projection;
pub mod renderer;
pub mod source;
pub mod types;
pub mod upload;

#[cfg(test)]
mod testing;

pub use creator::{Framebuffer, GeoImageCreator, PassScope, SharedRenderContext};
pub use device::{PassCompletion, PassSignal, PassState, WarpDevice, WarpPass};
pub use error::{WarpError, WarpResult};
pub use geometry::{CornerGeometry, GridTopology, WarpMesh};
pub use instance::GeoImageInstance;
pub use layer::{GeoImageLayer, LayerPhase, LoadOutcome, Material, MaterialStatus, RenderEvent};
pub use pipeline::{FrameReport, GeoImagePipeline, PipelineOptions};
pub use projection::{Extent, ExtentParams};
pub use renderer::WarpRenderer;
pub use source::{
    pending_image, Bitmap, ImageCompleter, ImageFetcher, ImageSource, LoadStatus, PendingImage,
    SourceEvent, SourceLoader, ThreadedFetcher,
};
pub use types::{Corners, GeoImageOptions, LayerId, LonLat, ProjectionMode};
pub use upload::SourceTexture;
