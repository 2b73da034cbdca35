use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use image::RgbaImage;

use crate::error::WarpError;

/// The GPU operations the warp pipeline needs.
///
/// Implemented for `wgpu` by [`crate::gpu::WgpuDevice`]. All methods take
/// `&self`; implementations that need mutation keep it internal.
pub trait WarpDevice {
    type Texture;
    type Buffer;
    type Program;

    fn max_texture_dimension(&self) -> u32;

    fn create_program(&self) -> Result<Self::Program, WarpError>;

    fn create_vertex_buffer(
        &self,
        label: &str,
        data: &[[f32; 2]],
    ) -> Result<Self::Buffer, WarpError>;

    fn create_index_buffer(&self, label: &str, data: &[u32]) -> Result<Self::Buffer, WarpError>;

    /// Uploads RGBA8 pixels into a sampled texture.
    fn upload_texture(&self, image: &RgbaImage) -> Result<Self::Texture, WarpError>;

    /// Allocates a texture that can be rendered into and sampled afterwards.
    fn create_render_target(&self, width: u32, height: u32) -> Result<Self::Texture, WarpError>;

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32);

    /// Records and submits one warp pass.
    fn draw_warp(&self, pass: &WarpPass<'_, Self>) -> Result<PassCompletion, WarpError>;

    /// Lets the device make progress on submitted work and fire completions.
    fn maintain(&self);
}

/// Everything bound for a single warp draw.
pub struct WarpPass<'a, D: WarpDevice + ?Sized> {
    pub program: &'a D::Program,
    pub index_buffer: &'a D::Buffer,
    pub index_count: u32,
    /// Vertex stream 0: shared unit texture coordinates.
    pub tex_coords: &'a D::Buffer,
    /// Vertex stream 1: per-instance projected corner grid.
    pub corners: &'a D::Buffer,
    pub source: &'a D::Texture,
    pub target: &'a D::Texture,
    pub viewport: (u32, u32),
    pub clear: [f64; 4],
    pub extent_params: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Pending,
    Complete,
    Lost,
}

/// Signals completion of a submitted pass. Dropping it unsignalled reports the
/// pass as lost.
#[derive(Debug)]
pub struct PassSignal {
    sender: Sender<()>,
}

impl PassSignal {
    pub fn complete(self) {
        let _ = self.sender.send(());
    }
}

/// Resolves once the GPU finished a submitted pass.
#[derive(Debug)]
pub struct PassCompletion {
    receiver: Receiver<()>,
    state: PassState,
}

impl PassCompletion {
    pub fn channel() -> (PassSignal, PassCompletion) {
        let (sender, receiver) = bounded(1);
        (
            PassSignal { sender },
            PassCompletion {
                receiver,
                state: PassState::Pending,
            },
        )
    }

    /// A completion that has already resolved.
    pub fn completed() -> Self {
        let (signal, completion) = Self::channel();
        signal.complete();
        completion
    }

    pub fn poll(&mut self) -> PassState {
        if self.state == PassState::Pending {
            self.state = match self.receiver.try_recv() {
                Ok(()) => PassState::Complete,
                Err(TryRecvError::Empty) => PassState::Pending,
                Err(TryRecvError::Disconnected) => PassState::Lost,
            };
        }
        self.state
    }
}
