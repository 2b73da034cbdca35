//! Shared warp resources and the render queue.

use std::cell::Cell;

use renderqueue::RenderQueue;
use tracing::{debug, warn};

use crate::device::WarpDevice;
use crate::error::WarpError;
use crate::geometry::GridTopology;
use crate::types::LayerId;

/// State of the single framebuffer every warp pass renders through.
#[derive(Debug)]
pub struct Framebuffer {
    size: Cell<(u32, u32)>,
    active: Cell<bool>,
    cull_faces: Cell<bool>,
    activations: Cell<usize>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self {
            size: Cell::new((1, 1)),
            active: Cell::new(false),
            cull_faces: Cell::new(true),
            activations: Cell::new(0),
        }
    }
}

impl Framebuffer {
    pub fn set_size(&self, width: u32, height: u32) {
        self.size.set((width, height));
    }

    pub fn size(&self) -> (u32, u32) {
        self.size.get()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn cull_faces_enabled(&self) -> bool {
        self.cull_faces.get()
    }

    pub fn activation_count(&self) -> usize {
        self.activations.get()
    }

    /// Binds the framebuffer for one pass with face culling disabled.
    ///
    /// Only one scope may be alive at a time. Dropping the scope unbinds the
    /// framebuffer and restores the previous culling state.
    pub fn activate(&self) -> Result<PassScope<'_>, WarpError> {
        if self.active.replace(true) {
            return Err(WarpError::FramebufferBusy);
        }
        let restore_cull = self.cull_faces.replace(false);
        self.activations.set(self.activations.get() + 1);
        Ok(PassScope {
            framebuffer: self,
            restore_cull,
        })
    }
}

#[derive(Debug)]
pub struct PassScope<'a> {
    framebuffer: &'a Framebuffer,
    restore_cull: bool,
}

impl PassScope<'_> {
    pub fn size(&self) -> (u32, u32) {
        self.framebuffer.size()
    }
}

impl Drop for PassScope<'_> {
    fn drop(&mut self) {
        self.framebuffer.cull_faces.set(self.restore_cull);
        self.framebuffer.active.set(false);
    }
}

/// Resources shared by all instances: framebuffer, grid buffers and program.
pub struct SharedRenderContext<D: WarpDevice> {
    framebuffer: Framebuffer,
    topology: GridTopology,
    index_buffer: D::Buffer,
    tex_coords: D::Buffer,
    program: D::Program,
}

impl<D: WarpDevice> SharedRenderContext<D> {
    pub fn new(device: &D, subdivisions: u32) -> Result<Self, WarpError> {
        let topology = GridTopology::new(subdivisions);
        let program = device.create_program()?;
        let index_buffer = device.create_index_buffer("warp grid indices", topology.indices())?;
        let tex_coords = device.create_vertex_buffer("warp grid texcoords", topology.tex_coords())?;
        debug!(
            subdivisions = topology.subdivisions(),
            vertices = topology.vertex_count(),
            indices = topology.index_count(),
            "created shared warp resources"
        );
        Ok(Self {
            framebuffer: Framebuffer::default(),
            topology,
            index_buffer,
            tex_coords,
            program,
        })
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    pub fn index_buffer(&self) -> &D::Buffer {
        &self.index_buffer
    }

    pub fn tex_coords(&self) -> &D::Buffer {
        &self.tex_coords
    }

    pub fn program(&self) -> &D::Program {
        &self.program
    }
}

/// Owns the shared render context and the queue of instances awaiting a pass.
pub struct GeoImageCreator<D: WarpDevice> {
    context: SharedRenderContext<D>,
    queue: RenderQueue<LayerId>,
}

impl<D: WarpDevice> GeoImageCreator<D> {
    pub fn new(device: &D, subdivisions: u32) -> Result<Self, WarpError> {
        Ok(Self {
            context: SharedRenderContext::new(device, subdivisions)?,
            queue: RenderQueue::new(),
        })
    }

    pub fn context(&self) -> &SharedRenderContext<D> {
        &self.context
    }

    /// Schedules a pass. Returns `false` when the layer was already queued.
    pub fn enqueue(&mut self, id: LayerId) -> bool {
        match self.queue.enqueue(id) {
            Ok(added) => {
                if added {
                    debug!(layer = %id, pending = self.queue.len(), "queued warp pass");
                }
                added
            }
            Err(err) => {
                warn!(layer = %id, error = %err, "failed to queue warp pass");
                false
            }
        }
    }

    /// Drops a scheduled pass, if any.
    pub fn dequeue(&mut self, id: LayerId) -> bool {
        self.queue.remove(&id)
    }

    pub fn is_queued(&self, id: LayerId) -> bool {
        self.queue.contains(&id)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn next_batch(&mut self, limit: usize) -> Vec<LayerId> {
        self.queue.drain_batch(limit)
    }
}
