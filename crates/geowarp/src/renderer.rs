use crate::creator::SharedRenderContext;
use crate::device::{PassCompletion, WarpDevice, WarpPass};
use crate::error::WarpError;
use crate::instance::GeoImageInstance;
use crate::types::ProjectionMode;

/// Drives the shared render-to-texture warp pass.
pub struct WarpRenderer;

impl WarpRenderer {
    /// Warps the instance's source into its output texture using the
    /// instance's current projection.
    pub fn render<D: WarpDevice>(
        instance: &mut GeoImageInstance<D>,
        context: &SharedRenderContext<D>,
        device: &D,
    ) -> Result<PassCompletion, WarpError> {
        let mode = instance.geometry.projection();
        Self::render_projection(mode, instance, context, device)
    }

    /// Warps the source with the mesh and extent of `mode`.
    ///
    /// `mode` must be the instance's configured projection; switching
    /// projections goes through `GeoImageLayer::set_projection` so the layer
    /// can requeue and update its materials.
    pub fn render_projection<D: WarpDevice>(
        mode: ProjectionMode,
        instance: &mut GeoImageInstance<D>,
        context: &SharedRenderContext<D>,
        device: &D,
    ) -> Result<PassCompletion, WarpError> {
        let (width, height) = instance
            .frame_size()
            .ok_or(WarpError::NotReady("source is not ready"))?;
        if !instance.is_source_texture_created() {
            return Err(WarpError::NotReady("source texture has not been uploaded"));
        }

        if instance.geometry.projection() != mode {
            return Err(WarpError::NotReady(
                "instance is configured for a different projection",
            ));
        }
        instance.ensure_warp_geometry(device)?;

        let max = device.max_texture_dimension();
        if width > max || height > max {
            return Err(WarpError::ResourceExhaustion(format!(
                "frame is {width}x{height}, device limit is {max}"
            )));
        }

        let framebuffer = context.framebuffer();
        let scope = framebuffer.activate()?;
        framebuffer.set_size(width, height);

        instance.ensure_output_texture(device, width, height)?;

        let extent = instance
            .geometry
            .mesh()
            .ok_or(WarpError::NotReady("warp mesh has not been built"))?
            .extent
            .for_mode(mode)?;
        let corners = instance
            .warp_geometry()
            .ok_or(WarpError::NotReady("warp geometry buffer missing"))?;
        let source = instance
            .source_texture
            .texture()
            .ok_or(WarpError::NotReady("source texture has not been uploaded"))?;
        let target = instance
            .output_texture()
            .ok_or(WarpError::NotReady("output texture missing"))?;
        let [r, g, b] = instance.transparent_color();

        let pass = WarpPass {
            program: context.program(),
            index_buffer: context.index_buffer(),
            index_count: context.topology().index_count(),
            tex_coords: context.tex_coords(),
            corners,
            source,
            target,
            viewport: scope.size(),
            clear: [r as f64, g as f64, b as f64, 0.0],
            extent_params: extent,
        };
        let completion = device.draw_warp(&pass);
        drop(scope);
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ImageSource, LoadStatus};
    use crate::testing::{solid_bitmap, test_corners, ManualFetcher, RecordingDevice};
    use crate::types::GeoImageOptions;

    fn ready_instance(
        device: &RecordingDevice,
        projection: ProjectionMode,
    ) -> GeoImageInstance<RecordingDevice> {
        let options = GeoImageOptions::new(test_corners())
            .with_image(ImageSource::Bitmap(solid_bitmap(100, 50)))
            .with_projection(projection)
            .with_transparent_color([1.0, 0.5, 0.0]);
        let mut instance = GeoImageInstance::new(options, 1);
        assert_eq!(
            instance.loader.request_load(&ManualFetcher::default()),
            Ok(LoadStatus::Ready)
        );
        instance.upload_source(device).unwrap();
        instance
    }

    #[test]
    fn geodetic_pass_reads_geodetic_extent_only() {
        let device = RecordingDevice::new();
        let context = SharedRenderContext::new(&device, 1).unwrap();
        let mut instance = ready_instance(&device, ProjectionMode::Geodetic);

        WarpRenderer::render(&mut instance, &context, &device).unwrap();

        let draws = device.draws();
        assert_eq!(draws.len(), 1);
        let mesh = instance.geometry().mesh().unwrap();
        assert_eq!(Some(draws[0].extent_params), mesh.extent.geodetic);
        assert_ne!(Some(draws[0].extent_params), mesh.extent.mercator);
        assert_eq!(draws[0].viewport, (100, 50));
        assert_eq!(draws[0].target_size, (100, 50));
        assert_eq!(draws[0].clear, [1.0, 0.5, 0.0, 0.0]);
        assert_eq!(draws[0].index_count, 4);
        assert_eq!(context.framebuffer().size(), (100, 50));
        assert!(!context.framebuffer().is_active());
        assert!(context.framebuffer().cull_faces_enabled());
    }

    #[test]
    fn mercator_dispatch_reads_mercator_extent() {
        let device = RecordingDevice::new();
        let context = SharedRenderContext::new(&device, 2).unwrap();
        let mut instance = ready_instance(&device, ProjectionMode::Mercator);

        WarpRenderer::render_projection(ProjectionMode::Mercator, &mut instance, &context, &device)
            .unwrap();

        let draws = device.draws();
        let mesh = instance.geometry().mesh().unwrap();
        assert_eq!(mesh.projection, ProjectionMode::Mercator);
        assert_eq!(Some(draws[0].extent_params), mesh.extent.mercator);
        assert_eq!(draws[0].corner_vertices, 9);
    }

    #[test]
    fn mismatched_projection_leaves_instance_untouched() {
        let device = RecordingDevice::new();
        let context = SharedRenderContext::new(&device, 1).unwrap();
        let mut instance = ready_instance(&device, ProjectionMode::Geodetic);

        let err = WarpRenderer::render_projection(
            ProjectionMode::Mercator,
            &mut instance,
            &context,
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, WarpError::NotReady(_)));
        assert_eq!(instance.geometry().projection(), ProjectionMode::Geodetic);
        assert!(device.draws().is_empty());
    }

    #[test]
    fn output_texture_is_reused_for_same_size() {
        let device = RecordingDevice::new();
        let context = SharedRenderContext::new(&device, 1).unwrap();
        let mut instance = ready_instance(&device, ProjectionMode::Geodetic);

        WarpRenderer::render(&mut instance, &context, &device).unwrap();
        WarpRenderer::render(&mut instance, &context, &device).unwrap();
        assert_eq!(device.render_target_count(), 1);
        assert_eq!(instance.geometry().build_count(), 1);

        let draws = device.draws();
        assert_eq!(draws[0].target_id, draws[1].target_id);
        assert_eq!(draws[0].corners_id, draws[1].corners_id);
        assert_eq!(draws[0].source_id, draws[1].source_id);
        assert_eq!(draws[0].source_size, (100, 50));
    }

    #[test]
    fn requires_uploaded_source() {
        let device = RecordingDevice::new();
        let context = SharedRenderContext::new(&device, 1).unwrap();
        let options = GeoImageOptions::new(test_corners()).with_src("img.png");
        let mut instance: GeoImageInstance<RecordingDevice> = GeoImageInstance::new(options, 1);

        let err = WarpRenderer::render(&mut instance, &context, &device).unwrap_err();
        assert!(matches!(err, WarpError::NotReady(_)));
        assert!(device.draws().is_empty());
    }

    #[test]
    fn busy_framebuffer_fails_and_stays_bound() {
        let device = RecordingDevice::new();
        let context = SharedRenderContext::new(&device, 1).unwrap();
        let mut instance = ready_instance(&device, ProjectionMode::Geodetic);

        context.framebuffer().set_size(8, 8);

        let held = context.framebuffer().activate().unwrap();
        let err = WarpRenderer::render(&mut instance, &context, &device).unwrap_err();
        assert_eq!(err, WarpError::FramebufferBusy);
        assert_eq!(held.size(), (8, 8));
        drop(held);
        assert!(device.draws().is_empty());

        WarpRenderer::render(&mut instance, &context, &device).unwrap();
        assert_eq!(context.framebuffer().size(), (100, 50));
    }
}
