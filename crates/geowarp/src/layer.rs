//! Per-layer state machine.
//!
//! ```text
//!   Idle ──load_material──▶ SourceLoading ──decode──▶ SourceReady ──render──▶ Rendering ──GPU──▶ Ready
//!     ▲                           │                        ▲                      │
//!     └──── set_src (idle) ───────┴──── set_src (busy) ────┘◀── set_corners ──────┘
//!
//!   any phase ──abort_material_loading──▶ Aborted        failures ──▶ Failed
//! ```

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::creator::SharedRenderContext;
use crate::device::{PassCompletion, PassState, WarpDevice};
use crate::error::WarpError;
use crate::instance::GeoImageInstance;
use crate::renderer::WarpRenderer;
use crate::source::{ImageFetcher, ImageSource, LoadStatus, SourceEvent};
use crate::types::{Corners, GeoImageOptions, LayerId, ProjectionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialStatus {
    pub is_loading: bool,
    pub is_ready: bool,
}

/// Handle through which a layer reports progress to whoever displays it.
#[derive(Debug, Clone, Default)]
pub struct Material {
    status: Rc<Cell<MaterialStatus>>,
}

impl Material {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.status.get().is_loading
    }

    pub fn is_ready(&self) -> bool {
        self.status.get().is_ready
    }

    pub fn status(&self) -> MaterialStatus {
        self.status.get()
    }

    fn set(&self, is_loading: bool, is_ready: bool) {
        self.status.set(MaterialStatus {
            is_loading,
            is_ready,
        });
    }

    fn same_as(&self, other: &Material) -> bool {
        Rc::ptr_eq(&self.status, &other.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhase {
    Idle,
    SourceLoading,
    SourceReady,
    Rendering,
    Ready,
    Aborted,
    Failed,
}

/// What the host should do after a layer transition.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The source is ready; queue a warp pass.
    Schedule,
    /// The source is still loading.
    Waiting,
    /// Nothing to do until the next `load_material`.
    Idle,
    NoSource,
    Failed(WarpError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Completed,
    Failed(WarpError),
}

struct InFlightPass {
    token: u64,
    completion: PassCompletion,
}

pub struct GeoImageLayer<D: WarpDevice> {
    id: LayerId,
    name: String,
    instance: GeoImageInstance<D>,
    phase: LayerPhase,
    materials: Vec<Material>,
    pass: Option<InFlightPass>,
    render_generation: u64,
    passes_submitted: usize,
    last_error: Option<WarpError>,
}

impl<D: WarpDevice> GeoImageLayer<D> {
    pub fn new(id: LayerId, name: impl Into<String>, options: GeoImageOptions, subdivisions: u32) -> Self {
        Self {
            id,
            name: name.into(),
            instance: GeoImageInstance::new(options, subdivisions),
            phase: LayerPhase::Idle,
            materials: Vec::new(),
            pass: None,
            render_generation: 0,
            passes_submitted: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> LayerPhase {
        self.phase
    }

    pub fn instance(&self) -> &GeoImageInstance<D> {
        &self.instance
    }

    pub fn last_error(&self) -> Option<&WarpError> {
        self.last_error.as_ref()
    }

    pub fn passes_submitted(&self) -> usize {
        self.passes_submitted
    }

    /// True from a load request until the pass completes, fails or is aborted.
    pub fn creation_in_progress(&self) -> bool {
        matches!(
            self.phase,
            LayerPhase::SourceLoading | LayerPhase::SourceReady | LayerPhase::Rendering
        )
    }

    /// Registers `material` and starts a load cycle unless one is already
    /// running, in which case the material simply joins it.
    pub fn load_material(&mut self, material: &Material, fetcher: &dyn ImageFetcher) -> LoadOutcome {
        material.set(true, false);
        if !self.materials.iter().any(|known| known.same_as(material)) {
            self.materials.push(material.clone());
        }
        match self.phase {
            LayerPhase::SourceLoading | LayerPhase::Rendering => LoadOutcome::Waiting,
            LayerPhase::SourceReady => LoadOutcome::Schedule,
            _ => {
                self.last_error = None;
                self.start_cycle(fetcher)
            }
        }
    }

    fn start_cycle(&mut self, fetcher: &dyn ImageFetcher) -> LoadOutcome {
        match self.instance.loader.request_load(fetcher) {
            Ok(LoadStatus::Ready) => {
                self.phase = LayerPhase::SourceReady;
                LoadOutcome::Schedule
            }
            Ok(LoadStatus::Pending) => {
                self.phase = LayerPhase::SourceLoading;
                LoadOutcome::Waiting
            }
            Ok(LoadStatus::NoSource) => {
                debug!(layer = %self.name, "load requested without a source");
                self.release_materials();
                self.phase = LayerPhase::Idle;
                LoadOutcome::NoSource
            }
            Err(err) => {
                self.fail(err.clone());
                LoadOutcome::Failed(err)
            }
        }
    }

    /// Cancels the current cycle. Pending completions for it are ignored.
    pub fn abort_material_loading(&mut self, material: &Material) {
        self.instance.loader.cancel();
        self.cancel_pass();
        material.set(false, false);
        self.release_materials();
        if self.phase != LayerPhase::Aborted {
            debug!(layer = %self.name, from = ?self.phase, "aborted material loading");
        }
        self.phase = LayerPhase::Aborted;
    }

    /// Replaces the source. A cycle that was in progress restarts for the new
    /// source right away.
    pub fn set_source(&mut self, source: ImageSource, fetcher: &dyn ImageFetcher) -> LoadOutcome {
        let restart = self.creation_in_progress() && !self.materials.is_empty();
        debug!(layer = %self.name, src = %source.label(), restart, "replacing source");

        self.instance.loader.set_source(source);
        self.instance.source_texture.invalidate();
        self.cancel_pass();

        if restart {
            for material in &self.materials {
                material.set(true, false);
            }
            self.start_cycle(fetcher)
        } else {
            self.release_materials();
            self.phase = LayerPhase::Idle;
            LoadOutcome::Idle
        }
    }

    pub fn set_src(&mut self, src: impl Into<String>, fetcher: &dyn ImageFetcher) -> LoadOutcome {
        self.set_source(ImageSource::Url(src.into()), fetcher)
    }

    pub fn set_image(&mut self, image: impl Into<ImageSource>, fetcher: &dyn ImageFetcher) -> LoadOutcome {
        self.set_source(image.into(), fetcher)
    }

    /// Returns `true` when the layer needs a fresh pass.
    pub fn set_corners(&mut self, corners: Corners) -> bool {
        let changed = self.instance.geometry.set_corners(corners);
        changed && self.requeue_after_geometry_change()
    }

    /// Returns `true` when the layer needs a fresh pass.
    pub fn set_projection(&mut self, projection: ProjectionMode) -> bool {
        let changed = self.instance.geometry.set_projection(projection);
        changed && self.requeue_after_geometry_change()
    }

    fn requeue_after_geometry_change(&mut self) -> bool {
        match self.phase {
            LayerPhase::SourceReady | LayerPhase::Rendering | LayerPhase::Ready => {
                self.cancel_pass();
                for material in &self.materials {
                    material.set(true, material.is_ready());
                }
                self.phase = LayerPhase::SourceReady;
                true
            }
            _ => false,
        }
    }

    /// Observes the source decode while loading.
    pub fn poll_source(&mut self) -> Option<LoadOutcome> {
        if self.phase != LayerPhase::SourceLoading {
            return None;
        }
        match self.instance.loader.poll()? {
            SourceEvent::Ready { width, height } => {
                debug!(layer = %self.name, width, height, "source decoded");
                self.phase = LayerPhase::SourceReady;
                Some(LoadOutcome::Schedule)
            }
            SourceEvent::Failed(err) => {
                self.fail(err.clone());
                Some(LoadOutcome::Failed(err))
            }
        }
    }

    /// Uploads the source if needed and submits the warp pass.
    pub fn render(&mut self, context: &SharedRenderContext<D>, device: &D) -> Result<(), WarpError> {
        if self.phase != LayerPhase::SourceReady || !self.instance.is_source_ready() {
            debug_assert!(
                self.phase != LayerPhase::SourceReady,
                "layer scheduled with a source that is not ready"
            );
            warn!(layer = %self.name, phase = ?self.phase, "ignoring render request for a layer that is not ready");
            return Ok(());
        }

        let submitted = self
            .instance
            .upload_source(device)
            .and_then(|()| WarpRenderer::render(&mut self.instance, context, device));

        match submitted {
            Ok(completion) => {
                self.render_generation += 1;
                self.pass = Some(InFlightPass {
                    token: self.render_generation,
                    completion,
                });
                self.passes_submitted += 1;
                self.phase = LayerPhase::Rendering;
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Observes the in-flight GPU pass.
    pub fn poll_render(&mut self) -> Option<RenderEvent> {
        let state = self.pass.as_mut()?.completion.poll();
        if state == PassState::Pending {
            return None;
        }
        let pass = self.pass.take()?;
        if pass.token != self.render_generation || self.phase != LayerPhase::Rendering {
            debug!(layer = %self.name, token = pass.token, "discarding stale pass completion");
            return None;
        }

        match state {
            PassState::Complete => {
                self.phase = LayerPhase::Ready;
                for material in &self.materials {
                    material.set(false, true);
                }
                debug!(layer = %self.name, passes = self.passes_submitted, "layer ready");
                Some(RenderEvent::Completed)
            }
            _ => {
                self.fail(WarpError::DeviceLost);
                Some(RenderEvent::Failed(WarpError::DeviceLost))
            }
        }
    }

    fn cancel_pass(&mut self) {
        if self.pass.take().is_some() {
            debug!(layer = %self.name, "dropping in-flight pass completion");
        }
        self.render_generation += 1;
    }

    fn release_materials(&mut self) {
        for material in self.materials.drain(..) {
            material.set(false, false);
        }
    }

    fn fail(&mut self, err: WarpError) {
        warn!(layer = %self.name, error = %err, "geo image layer failed");
        self.instance.loader.cancel();
        self.cancel_pass();
        self.release_materials();
        self.phase = LayerPhase::Failed;
        self.last_error = Some(err);
    }
}
