use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::creator::GeoImageCreator;
use crate::device::WarpDevice;
use crate::error::WarpError;
use crate::geometry::clamp_subdivisions;
use crate::layer::{GeoImageLayer, LayerPhase, LoadOutcome, Material, RenderEvent};
use crate::projection::validate_corners;
use crate::source::{ImageFetcher, ImageSource};
use crate::types::{Corners, GeoImageOptions, LayerId, ProjectionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub grid_subdivisions: u32,
    /// Upper bound on warp passes submitted per `pump`.
    pub renders_per_frame: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            grid_subdivisions: 16,
            renders_per_frame: 1,
        }
    }
}

/// What happened during one `pump`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub rendered: Vec<LayerId>,
    pub completed: Vec<LayerId>,
    pub failed: Vec<(LayerId, WarpError)>,
}

impl FrameReport {
    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty() && self.completed.is_empty() && self.failed.is_empty()
    }
}

/// Hosts geo image layers, the shared creator and the GPU device.
pub struct GeoImagePipeline<D: WarpDevice> {
    device: D,
    creator: GeoImageCreator<D>,
    fetcher: Box<dyn ImageFetcher>,
    layers: BTreeMap<LayerId, GeoImageLayer<D>>,
    next_id: u64,
    options: PipelineOptions,
}

impl<D: WarpDevice> GeoImagePipeline<D> {
    pub fn new(
        device: D,
        fetcher: Box<dyn ImageFetcher>,
        options: PipelineOptions,
    ) -> Result<Self, WarpError> {
        let grid_subdivisions = clamp_subdivisions(options.grid_subdivisions);
        if grid_subdivisions != options.grid_subdivisions {
            warn!(
                requested = options.grid_subdivisions,
                used = grid_subdivisions,
                "grid subdivisions out of range; clamping"
            );
        }
        let creator = GeoImageCreator::new(&device, grid_subdivisions)?;
        Ok(Self {
            device,
            creator,
            fetcher,
            layers: BTreeMap::new(),
            next_id: 1,
            options: PipelineOptions {
                grid_subdivisions,
                renders_per_frame: options.renders_per_frame.max(1),
            },
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn creator(&self) -> &GeoImageCreator<D> {
        &self.creator
    }

    pub fn attach(
        &mut self,
        name: impl Into<String>,
        options: GeoImageOptions,
    ) -> Result<LayerId, WarpError> {
        validate_corners(&options.corners)?;
        let id = LayerId(self.next_id);
        self.next_id += 1;
        let layer = GeoImageLayer::new(id, name, options, self.options.grid_subdivisions);
        debug!(layer = %layer.name(), %id, "attached geo image layer");
        self.layers.insert(id, layer);
        Ok(id)
    }

    /// Removes a layer together with its GPU resources.
    pub fn detach(&mut self, id: LayerId) -> bool {
        self.creator.dequeue(id);
        self.layers.remove(&id).is_some()
    }

    pub fn layer(&self, id: LayerId) -> Option<&GeoImageLayer<D>> {
        self.layers.get(&id)
    }

    pub fn layers(&self) -> impl Iterator<Item = &GeoImageLayer<D>> {
        self.layers.values()
    }

    pub fn load_material(&mut self, id: LayerId, material: &Material) -> Result<LoadOutcome, WarpError> {
        let layer = self.layers.get_mut(&id).ok_or(WarpError::UnknownLayer(id))?;
        let outcome = layer.load_material(material, self.fetcher.as_ref());
        Self::apply(&mut self.creator, id, &outcome);
        Ok(outcome)
    }

    pub fn abort_material_loading(&mut self, id: LayerId, material: &Material) -> Result<(), WarpError> {
        let layer = self.layers.get_mut(&id).ok_or(WarpError::UnknownLayer(id))?;
        self.creator.dequeue(id);
        layer.abort_material_loading(material);
        Ok(())
    }

    pub fn set_src(&mut self, id: LayerId, src: impl Into<String>) -> Result<LoadOutcome, WarpError> {
        self.set_source(id, ImageSource::Url(src.into()))
    }

    pub fn set_image(&mut self, id: LayerId, image: impl Into<ImageSource>) -> Result<LoadOutcome, WarpError> {
        self.set_source(id, image.into())
    }

    fn set_source(&mut self, id: LayerId, source: ImageSource) -> Result<LoadOutcome, WarpError> {
        let layer = self.layers.get_mut(&id).ok_or(WarpError::UnknownLayer(id))?;
        self.creator.dequeue(id);
        let outcome = layer.set_source(source, self.fetcher.as_ref());
        Self::apply(&mut self.creator, id, &outcome);
        Ok(outcome)
    }

    pub fn set_corners(&mut self, id: LayerId, corners: Corners) -> Result<(), WarpError> {
        validate_corners(&corners)?;
        let layer = self.layers.get_mut(&id).ok_or(WarpError::UnknownLayer(id))?;
        if layer.set_corners(corners) {
            self.creator.dequeue(id);
            self.creator.enqueue(id);
        }
        Ok(())
    }

    pub fn set_projection(&mut self, id: LayerId, projection: ProjectionMode) -> Result<(), WarpError> {
        let layer = self.layers.get_mut(&id).ok_or(WarpError::UnknownLayer(id))?;
        if layer.set_projection(projection) {
            self.creator.dequeue(id);
            self.creator.enqueue(id);
        }
        Ok(())
    }

    fn apply(creator: &mut GeoImageCreator<D>, id: LayerId, outcome: &LoadOutcome) {
        if matches!(outcome, LoadOutcome::Schedule) {
            creator.enqueue(id);
        }
    }

    /// True when no layer has work outstanding.
    pub fn is_idle(&self) -> bool {
        self.creator.pending() == 0 && self.layers.values().all(|layer| !layer.creation_in_progress())
    }

    /// Observes completions and submits up to `renders_per_frame` passes.
    pub fn pump(&mut self) -> FrameReport {
        let mut report = FrameReport::default();
        self.device.maintain();

        for (id, layer) in self.layers.iter_mut() {
            match layer.poll_source() {
                Some(LoadOutcome::Schedule) => {
                    self.creator.enqueue(*id);
                }
                Some(LoadOutcome::Failed(err)) => report.failed.push((*id, err)),
                _ => {}
            }
        }

        for id in self.creator.next_batch(self.options.renders_per_frame) {
            let Some(layer) = self.layers.get_mut(&id) else {
                continue;
            };
            if layer.phase() != LayerPhase::SourceReady {
                debug!(layer = %layer.name(), phase = ?layer.phase(), "skipping stale queue entry");
                continue;
            }
            match layer.render(self.creator.context(), &self.device) {
                Ok(()) => report.rendered.push(id),
                Err(err) => report.failed.push((id, err)),
            }
        }

        self.device.maintain();

        for (id, layer) in self.layers.iter_mut() {
            match layer.poll_render() {
                Some(RenderEvent::Completed) => report.completed.push(*id),
                Some(RenderEvent::Failed(err)) => report.failed.push((*id, err)),
                None => {}
            }
        }

        for (id, err) in &report.failed {
            warn!(layer = %id, error = %err, "geo image layer failed this frame");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::pending_image;
    use crate::testing::{solid_bitmap, test_corners, ManualFetcher, RecordingDevice};
    use crate::types::LonLat;

    fn pipeline(
        device: RecordingDevice,
        renders_per_frame: usize,
    ) -> (GeoImagePipeline<RecordingDevice>, ManualFetcher) {
        let fetcher = ManualFetcher::default();
        let pipeline = GeoImagePipeline::new(
            device,
            Box::new(fetcher.clone()),
            PipelineOptions {
                grid_subdivisions: 1,
                renders_per_frame,
            },
        )
        .unwrap();
        (pipeline, fetcher)
    }

    #[test]
    fn scenario_single_instance_becomes_ready() {
        let (mut pipeline, fetcher) = pipeline(RecordingDevice::new(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()))
            .unwrap();
        pipeline.set_src(id, "img.png").unwrap();

        let material = Material::new();
        assert_eq!(pipeline.load_material(id, &material).unwrap(), LoadOutcome::Waiting);
        assert!(material.is_loading());
        assert!(pipeline.pump().is_empty());

        assert!(fetcher.complete("img.png", 100, 50));
        let report = pipeline.pump();
        assert_eq!(report.rendered, vec![id]);
        assert_eq!(report.completed, vec![id]);

        let layer = pipeline.layer(id).unwrap();
        assert_eq!(layer.phase(), LayerPhase::Ready);
        assert_eq!(layer.instance().frame_size(), Some((100, 50)));
        assert_eq!(layer.passes_submitted(), 1);
        assert!(material.is_ready());
        assert!(!material.is_loading());

        let draws = pipeline.device().draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].extent_params, [10.0, 9.0, 2.0, 2.0]);
        assert_eq!(draws[0].target_size, (100, 50));
        assert!(pipeline.is_idle());
    }

    #[test]
    fn scenario_source_replaced_while_loading() {
        let (mut pipeline, fetcher) = pipeline(RecordingDevice::new(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()).with_src("img.png"))
            .unwrap();
        let material = Material::new();
        pipeline.load_material(id, &material).unwrap();

        assert_eq!(pipeline.set_src(id, "other.png").unwrap(), LoadOutcome::Waiting);
        assert!(!fetcher.complete("img.png", 100, 50));
        assert!(pipeline.pump().is_empty());
        assert_eq!(fetcher.requests_for("other.png"), 1);

        assert!(fetcher.complete("other.png", 64, 32));
        let report = pipeline.pump();
        assert_eq!(report.completed, vec![id]);
        let layer = pipeline.layer(id).unwrap();
        assert_eq!(layer.instance().frame_size(), Some((64, 32)));
        assert_eq!(layer.instance().loader().ready_transitions(), 1);
        assert_eq!(pipeline.device().draws().len(), 1);
    }

    #[test]
    fn scenario_passes_are_serialized_across_instances() {
        let (mut pipeline, fetcher) = pipeline(RecordingDevice::new().holding_passes(), 1);
        let a = pipeline
            .attach("a", GeoImageOptions::new(test_corners()).with_src("a.png"))
            .unwrap();
        let b = pipeline
            .attach("b", GeoImageOptions::new(test_corners()).with_src("b.png"))
            .unwrap();
        let (ma, mb) = (Material::new(), Material::new());
        pipeline.load_material(a, &ma).unwrap();
        pipeline.load_material(b, &mb).unwrap();

        fetcher.complete("b.png", 8, 8);
        fetcher.complete("a.png", 16, 16);

        let first = pipeline.pump();
        assert_eq!(first.rendered.len(), 1);
        assert_eq!(pipeline.creator().pending(), 1);
        assert!(!pipeline.creator().context().framebuffer().is_active());

        pipeline.device().release_passes();
        let second = pipeline.pump();
        assert_eq!(second.rendered.len(), 1);
        assert_eq!(second.completed, first.rendered);

        pipeline.device().release_passes();
        let third = pipeline.pump();
        assert_eq!(third.completed, second.rendered);

        assert_eq!(pipeline.device().draws().len(), 2);
        assert_eq!(
            pipeline.creator().context().framebuffer().activation_count(),
            2
        );
        assert!(ma.is_ready() && mb.is_ready());
    }

    #[test]
    fn scenario_abort_while_rendering_suppresses_ready() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new().holding_passes(), 1);
        let id = pipeline
            .attach(
                "overlay",
                GeoImageOptions::new(test_corners()).with_image(solid_bitmap(100, 50)),
            )
            .unwrap();
        let material = Material::new();
        pipeline.load_material(id, &material).unwrap();
        let report = pipeline.pump();
        assert_eq!(report.rendered, vec![id]);
        assert_eq!(pipeline.layer(id).unwrap().phase(), LayerPhase::Rendering);

        pipeline.abort_material_loading(id, &material).unwrap();
        pipeline.device().release_passes();
        let report = pipeline.pump();
        assert!(report.completed.is_empty());

        assert_eq!(pipeline.layer(id).unwrap().phase(), LayerPhase::Aborted);
        assert!(!material.is_ready());
        assert!(!material.is_loading());
    }

    #[test]
    fn abort_dequeues_scheduled_pass() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()).with_image(solid_bitmap(4, 4)))
            .unwrap();
        let material = Material::new();
        pipeline.load_material(id, &material).unwrap();
        assert!(pipeline.creator().is_queued(id));

        pipeline.abort_material_loading(id, &material).unwrap();
        assert!(!pipeline.creator().is_queued(id));
        assert!(pipeline.pump().is_empty());
        assert!(pipeline.device().draws().is_empty());
    }

    #[test]
    fn corner_change_after_ready_renders_again() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()).with_image(solid_bitmap(4, 4)))
            .unwrap();
        let material = Material::new();
        pipeline.load_material(id, &material).unwrap();
        pipeline.pump();

        pipeline.set_corners(id, test_corners()).unwrap();
        assert!(!pipeline.creator().is_queued(id));

        let mut moved = test_corners();
        moved[0] = LonLat::new(9.0, 10.0);
        pipeline.set_corners(id, moved).unwrap();
        assert!(pipeline.creator().is_queued(id));
        let report = pipeline.pump();
        assert_eq!(report.completed, vec![id]);

        let draws = pipeline.device().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[1].extent_params[0], 9.0);
        assert_eq!(pipeline.device().upload_count(), 1);
    }

    #[test]
    fn projection_switch_uses_mercator_extent() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()).with_image(solid_bitmap(4, 4)))
            .unwrap();
        pipeline.load_material(id, &Material::new()).unwrap();
        pipeline.pump();

        pipeline.set_projection(id, ProjectionMode::Mercator).unwrap();
        pipeline.pump();

        let layer = pipeline.layer(id).unwrap();
        let mesh = layer.instance().geometry().mesh().unwrap();
        let draws = pipeline.device().draws();
        assert_eq!(Some(draws[1].extent_params), mesh.extent.mercator);
    }

    #[test]
    fn decode_failure_is_local_to_one_layer() {
        let (mut pipeline, fetcher) = pipeline(RecordingDevice::new(), 4);
        let good = pipeline
            .attach("good", GeoImageOptions::new(test_corners()).with_src("good.png"))
            .unwrap();
        let bad = pipeline
            .attach("bad", GeoImageOptions::new(test_corners()).with_src("bad.png"))
            .unwrap();
        let (mg, mb) = (Material::new(), Material::new());
        pipeline.load_material(good, &mg).unwrap();
        pipeline.load_material(bad, &mb).unwrap();

        fetcher.fail("bad.png", "not a PNG");
        fetcher.complete("good.png", 2, 2);
        let report = pipeline.pump();

        assert_eq!(report.completed, vec![good]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bad);
        assert!(matches!(
            report.failed[0].1,
            WarpError::SourceDecodeFailure { .. }
        ));
        assert_eq!(pipeline.layer(bad).unwrap().phase(), LayerPhase::Failed);
        assert!(!mb.is_loading() && !mb.is_ready());
        assert!(mg.is_ready());
    }

    #[test]
    fn oversized_frame_fails_with_resource_exhaustion() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new().with_max_dimension(32), 1);
        let id = pipeline
            .attach("big", GeoImageOptions::new(test_corners()).with_image(solid_bitmap(64, 8)))
            .unwrap();
        pipeline.load_material(id, &Material::new()).unwrap();
        let report = pipeline.pump();
        assert!(matches!(
            report.failed.as_slice(),
            [(failed, WarpError::ResourceExhaustion(_))] if *failed == id
        ));
    }

    #[test]
    fn unknown_layer_and_detach() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()).with_image(solid_bitmap(4, 4)))
            .unwrap();
        pipeline.load_material(id, &Material::new()).unwrap();
        assert!(pipeline.detach(id));
        assert!(!pipeline.detach(id));
        assert!(!pipeline.creator().is_queued(id));
        assert_eq!(
            pipeline.load_material(id, &Material::new()),
            Err(WarpError::UnknownLayer(id))
        );
    }

    #[test]
    fn attach_rejects_invalid_corners() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new(), 1);
        let mut corners = test_corners();
        corners[0].lat = 120.0;
        assert!(matches!(
            pipeline.attach("bad", GeoImageOptions::new(corners)),
            Err(WarpError::InvalidCorners(_))
        ));
    }

    #[test]
    fn oversized_grid_is_clamped() {
        let fetcher = ManualFetcher::default();
        let pipeline = GeoImagePipeline::new(
            RecordingDevice::new(),
            Box::new(fetcher),
            PipelineOptions {
                grid_subdivisions: u32::MAX,
                renders_per_frame: 0,
            },
        )
        .unwrap();
        assert_eq!(
            pipeline.creator().context().topology().subdivisions(),
            crate::geometry::MAX_SUBDIVISIONS
        );
    }

    #[test]
    fn polar_geodetic_layer_renders() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new(), 1);
        let polar = [
            LonLat::new(0.0, 89.0),
            LonLat::new(10.0, 89.0),
            LonLat::new(10.0, 86.0),
            LonLat::new(0.0, 86.0),
        ];
        let id = pipeline
            .attach("arctic", GeoImageOptions::new(polar).with_image(solid_bitmap(4, 4)))
            .unwrap();
        let material = Material::new();
        pipeline.load_material(id, &material).unwrap();
        let report = pipeline.pump();
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(report.completed, vec![id]);
        assert_eq!(pipeline.device().draws()[0].extent_params[1], 86.0);
        assert!(material.is_ready());

        pipeline.set_projection(id, ProjectionMode::Mercator).unwrap();
        let report = pipeline.pump();
        assert!(matches!(
            report.failed.as_slice(),
            [(failed, WarpError::InvalidCorners(_))] if *failed == id
        ));
    }

    #[test]
    fn second_material_does_not_resubmit_pass() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new().holding_passes(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()).with_image(solid_bitmap(4, 4)))
            .unwrap();
        let (first, second) = (Material::new(), Material::new());
        pipeline.load_material(id, &first).unwrap();
        assert_eq!(pipeline.pump().rendered, vec![id]);

        assert_eq!(pipeline.load_material(id, &second).unwrap(), LoadOutcome::Waiting);
        assert!(!pipeline.creator().is_queued(id));

        pipeline.device().release_passes();
        let report = pipeline.pump();
        assert!(report.rendered.is_empty());
        assert_eq!(report.completed, vec![id]);
        assert!(pipeline.pump().is_empty());

        assert_eq!(pipeline.device().draws().len(), 1);
        assert_eq!(pipeline.layer(id).unwrap().passes_submitted(), 1);
        assert!(first.is_ready() && second.is_ready());
    }

    #[test]
    fn set_image_while_rendering_discards_pass_and_reuploads() {
        let (mut pipeline, _fetcher) = pipeline(RecordingDevice::new().holding_passes(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()).with_image(solid_bitmap(4, 4)))
            .unwrap();
        let material = Material::new();
        pipeline.load_material(id, &material).unwrap();
        assert_eq!(pipeline.pump().rendered, vec![id]);
        let epoch = pipeline.layer(id).unwrap().instance().loader().source_epoch();

        assert_eq!(
            pipeline.set_image(id, solid_bitmap(8, 8)).unwrap(),
            LoadOutcome::Schedule
        );
        assert!(material.is_loading() && !material.is_ready());
        assert!(pipeline.creator().is_queued(id));

        pipeline.device().release_passes();
        let report = pipeline.pump();
        assert_eq!(report.rendered, vec![id]);
        assert!(report.completed.is_empty());

        pipeline.device().release_passes();
        let report = pipeline.pump();
        assert_eq!(report.completed, vec![id]);

        let layer = pipeline.layer(id).unwrap();
        assert!(layer.instance().loader().source_epoch() > epoch);
        assert_eq!(layer.instance().frame_size(), Some((8, 8)));
        let draws = pipeline.device().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[1].source_size, (8, 8));
        assert_ne!(draws[0].source_id, draws[1].source_id);
        assert_eq!(pipeline.device().upload_count(), 2);
        assert!(material.is_ready());
    }

    #[test]
    fn set_image_with_pending_decode() {
        let (mut pipeline, fetcher) = pipeline(RecordingDevice::new(), 1);
        let id = pipeline
            .attach("overlay", GeoImageOptions::new(test_corners()))
            .unwrap();
        let (completer, pending) = pending_image();
        assert_eq!(pipeline.set_image(id, pending).unwrap(), LoadOutcome::Idle);

        let material = Material::new();
        assert_eq!(pipeline.load_material(id, &material).unwrap(), LoadOutcome::Waiting);
        assert!(pipeline.pump().is_empty());

        assert!(completer.succeed(image::RgbaImage::new(6, 4)));
        let report = pipeline.pump();
        assert_eq!(report.completed, vec![id]);
        assert_eq!(pipeline.layer(id).unwrap().instance().frame_size(), Some((6, 4)));
        assert_eq!(fetcher.request_count(), 0);
        assert!(material.is_ready());
    }
}
