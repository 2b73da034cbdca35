use tracing::debug;

use crate::device::WarpDevice;
use crate::error::WarpError;
use crate::geometry::CornerGeometry;
use crate::source::SourceLoader;
use crate::types::GeoImageOptions;
use crate::upload::SourceTexture;

/// Per-layer GPU and source state.
pub struct GeoImageInstance<D: WarpDevice> {
    pub(crate) loader: SourceLoader,
    pub(crate) source_texture: SourceTexture<D::Texture>,
    pub(crate) geometry: CornerGeometry,
    pub(crate) transparent_color: [f32; 3],
    pub(crate) output_texture: Option<D::Texture>,
    warp_geometry: Option<D::Buffer>,
    warp_geometry_build: Option<usize>,
}

impl<D: WarpDevice> GeoImageInstance<D> {
    pub fn new(options: GeoImageOptions, subdivisions: u32) -> Self {
        Self {
            loader: SourceLoader::new(options.source),
            source_texture: SourceTexture::default(),
            geometry: CornerGeometry::new(options.corners, options.projection, subdivisions),
            transparent_color: options.transparent_color,
            output_texture: None,
            warp_geometry: None,
            warp_geometry_build: None,
        }
    }

    pub fn loader(&self) -> &SourceLoader {
        &self.loader
    }

    pub fn geometry(&self) -> &CornerGeometry {
        &self.geometry
    }

    pub fn source_texture(&self) -> &SourceTexture<D::Texture> {
        &self.source_texture
    }

    pub fn is_source_ready(&self) -> bool {
        self.loader.is_ready()
    }

    pub fn is_source_texture_created(&self) -> bool {
        self.source_texture.is_created()
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.loader.frame_size()
    }

    pub fn transparent_color(&self) -> [f32; 3] {
        self.transparent_color
    }

    pub fn output_texture(&self) -> Option<&D::Texture> {
        self.output_texture.as_ref()
    }

    pub fn warp_geometry(&self) -> Option<&D::Buffer> {
        self.warp_geometry.as_ref()
    }

    /// Uploads the decoded source if it is not on the GPU yet.
    pub fn upload_source(&mut self, device: &D) -> Result<(), WarpError> {
        self.source_texture.ensure(device, &self.loader).map(|_| ())
    }

    /// Rebuilds the mesh if needed and keeps the vertex buffer in sync with it.
    pub(crate) fn ensure_warp_geometry(&mut self, device: &D) -> Result<(), WarpError> {
        self.geometry.ensure_built()?;
        let build = self.geometry.build_count();
        if self.warp_geometry.is_some() && self.warp_geometry_build == Some(build) {
            return Ok(());
        }
        let mesh = self
            .geometry
            .mesh()
            .ok_or(WarpError::NotReady("warp mesh has not been built"))?;
        let buffer = device.create_vertex_buffer("warp geometry", &mesh.vertices)?;
        debug!(vertices = mesh.vertices.len(), build, "uploaded warp geometry");
        self.warp_geometry = Some(buffer);
        self.warp_geometry_build = Some(build);
        Ok(())
    }

    /// Makes sure the output texture matches the frame size.
    pub(crate) fn ensure_output_texture(
        &mut self,
        device: &D,
        width: u32,
        height: u32,
    ) -> Result<(), WarpError> {
        let current = self
            .output_texture
            .as_ref()
            .map(|texture| device.texture_size(texture));
        if current != Some((width, height)) {
            self.output_texture = None;
            self.output_texture = Some(device.create_render_target(width, height)?);
        }
        Ok(())
    }
}
