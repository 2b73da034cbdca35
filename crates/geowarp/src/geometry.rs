//! Warp mesh construction.
//!
//! The mesh is a regular `(n + 1) x (n + 1)` vertex grid over the source image.
//! Texture coordinates and the triangle-strip index list depend only on `n`
//! and are shared by every instance ([`GridTopology`]); the projected corner
//! positions are per instance ([`CornerGeometry`]). With `n == 1` the grid is
//! the plain quad spanned by the four corners.

use tracing::debug;

use crate::error::WarpError;
use crate::projection::{project, validate_corners, ExtentParams};
use crate::types::{Corners, LonLat, ProjectionMode};

/// Index value that restarts the triangle strip between grid rows.
pub const STRIP_RESTART_INDEX: u32 = u32::MAX;

/// Largest supported grid; keeps vertex indices well below the restart index.
pub const MAX_SUBDIVISIONS: u32 = 256;

/// Clamps a requested subdivision count into `1..=MAX_SUBDIVISIONS`.
pub fn clamp_subdivisions(subdivisions: u32) -> u32 {
    subdivisions.clamp(1, MAX_SUBDIVISIONS)
}

/// Shared texcoords and strip indices for an `n x n` cell grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTopology {
    subdivisions: u32,
    tex_coords: Vec<[f32; 2]>,
    indices: Vec<u32>,
}

impl GridTopology {
    pub fn new(subdivisions: u32) -> Self {
        let n = clamp_subdivisions(subdivisions);
        let side = n + 1;

        let mut tex_coords = Vec::with_capacity((side * side) as usize);
        for row in 0..side {
            for col in 0..side {
                tex_coords.push([col as f32 / n as f32, row as f32 / n as f32]);
            }
        }

        let mut indices = Vec::with_capacity((n * (2 * side + 1)) as usize);
        for row in 0..n {
            if row > 0 {
                indices.push(STRIP_RESTART_INDEX);
            }
            for col in 0..side {
                indices.push(row * side + col);
                indices.push((row + 1) * side + col);
            }
        }

        Self {
            subdivisions: n,
            tex_coords,
            indices,
        }
    }

    pub fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    pub fn vertex_count(&self) -> usize {
        self.tex_coords.len()
    }

    /// Unit texture coordinates, `v == 0` on the northern edge.
    pub fn tex_coords(&self) -> &[[f32; 2]] {
        &self.tex_coords
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Bilinear blend of `[NW, NE, SE, SW]` at unit coordinates `(u, v)`.
pub fn interpolate(corners: &Corners, u: f64, v: f64) -> LonLat {
    let [nw, ne, se, sw] = corners;
    let weights = [(1.0 - u) * (1.0 - v), u * (1.0 - v), u * v, (1.0 - u) * v];
    let points = [nw, ne, se, sw];
    let mut lon = 0.0;
    let mut lat = 0.0;
    for (weight, point) in weights.iter().zip(points) {
        lon += weight * point.lon;
        lat += weight * point.lat;
    }
    LonLat::new(lon, lat)
}

/// Projected vertex positions plus the extent uniforms for both modes.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpMesh {
    pub projection: ProjectionMode,
    pub vertices: Vec<[f32; 2]>,
    pub extent: ExtentParams,
}

/// Per-instance corner state with a dirty flag guarding mesh rebuilds.
#[derive(Debug, Clone)]
pub struct CornerGeometry {
    corners: Corners,
    projection: ProjectionMode,
    subdivisions: u32,
    dirty: bool,
    mesh: Option<WarpMesh>,
    builds: usize,
}

impl CornerGeometry {
    pub fn new(corners: Corners, projection: ProjectionMode, subdivisions: u32) -> Self {
        Self {
            corners,
            projection,
            subdivisions: clamp_subdivisions(subdivisions),
            dirty: true,
            mesh: None,
            builds: 0,
        }
    }

    pub fn corners(&self) -> &Corners {
        &self.corners
    }

    pub fn projection(&self) -> ProjectionMode {
        self.projection
    }

    pub fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    /// Returns `true` when the corners actually changed.
    pub fn set_corners(&mut self, corners: Corners) -> bool {
        if self.corners == corners {
            return false;
        }
        self.corners = corners;
        self.dirty = true;
        true
    }

    /// Returns `true` when the projection actually changed.
    pub fn set_projection(&mut self, projection: ProjectionMode) -> bool {
        if self.projection == projection {
            return false;
        }
        self.projection = projection;
        self.dirty = true;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.mesh.is_none()
    }

    pub fn mesh(&self) -> Option<&WarpMesh> {
        self.mesh.as_ref()
    }

    pub fn build_count(&self) -> usize {
        self.builds
    }

    /// Rebuilds the mesh when dirty and returns it.
    pub fn ensure_built(&mut self) -> Result<&WarpMesh, WarpError> {
        if self.is_dirty() {
            let mesh = self.build()?;
            self.mesh = Some(mesh);
            self.dirty = false;
            self.builds += 1;
            debug!(
                projection = %self.projection,
                subdivisions = self.subdivisions,
                builds = self.builds,
                "rebuilt warp mesh"
            );
        }
        self.mesh
            .as_ref()
            .ok_or(WarpError::NotReady("warp mesh missing after build"))
    }

    fn build(&self) -> Result<WarpMesh, WarpError> {
        validate_corners(&self.corners)?;
        let extent = ExtentParams::from_corners(&self.corners)?;
        extent.for_mode(self.projection)?;

        let n = self.subdivisions;
        let side = n + 1;
        let mut vertices = Vec::with_capacity((side * side) as usize);
        for row in 0..side {
            let v = row as f64 / n as f64;
            for col in 0..side {
                let u = col as f64 / n as f64;
                let [x, y] = project(interpolate(&self.corners, u, v), self.projection);
                vertices.push([x as f32, y as f32]);
            }
        }

        Ok(WarpMesh {
            projection: self.projection,
            vertices,
            extent,
        })
    }
}
