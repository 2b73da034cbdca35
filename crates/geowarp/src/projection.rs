use std::f64::consts::FRAC_PI_4;

use crate::error::WarpError;
use crate::types::{Corners, LonLat, ProjectionMode};

/// Sphere radius used by Web Mercator, in metres.
pub const EARTH_RADIUS: f64 = 6_378_137.0;
/// Latitude at which Web Mercator becomes square.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_8;

/// Projects a position onto spherical Web Mercator metres.
pub fn forward_mercator(point: LonLat) -> [f64; 2] {
    let lat = point.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS * point.lon.to_radians();
    let y = EARTH_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    [x, y]
}

pub fn project(point: LonLat, mode: ProjectionMode) -> [f64; 2] {
    match mode {
        ProjectionMode::Geodetic => [point.lon, point.lat],
        ProjectionMode::Mercator => forward_mercator(point),
    }
}

/// Axis-aligned bounds in projected units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Extent {
    pub fn from_points(points: impl IntoIterator<Item = [f64; 2]>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut extent = Extent {
            min: first,
            max: first,
        };
        for [x, y] in points {
            extent.min[0] = extent.min[0].min(x);
            extent.min[1] = extent.min[1].min(y);
            extent.max[0] = extent.max[0].max(x);
            extent.max[1] = extent.max[1].max(y);
        }
        Some(extent)
    }

    pub fn of_corners(corners: &Corners, mode: ProjectionMode) -> Option<Self> {
        Extent::from_points(corners.iter().map(|corner| project(*corner, mode)))
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    /// `[min_x, min_y, 2 / width, 2 / height]`, the uniform the warp shader uses
    /// to map projected coordinates into clip space.
    pub fn params(&self) -> [f32; 4] {
        [
            self.min[0] as f32,
            self.min[1] as f32,
            (2.0 / self.width()) as f32,
            (2.0 / self.height()) as f32,
        ]
    }
}

/// Extent uniforms for both projection modes.
///
/// A mode whose projected extent collapses (e.g. Mercator for corners that all
/// lie past the clamp latitude) has no uniform; only layers rendering in that
/// mode are affected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtentParams {
    pub geodetic: Option<[f32; 4]>,
    pub mercator: Option<[f32; 4]>,
}

impl ExtentParams {
    /// Fails only when neither mode has a usable extent.
    pub fn from_corners(corners: &Corners) -> Result<Self, WarpError> {
        let geodetic = nondegenerate(corners, ProjectionMode::Geodetic);
        let mercator = nondegenerate(corners, ProjectionMode::Mercator);
        match (geodetic, mercator) {
            (Err(err), Err(_)) => Err(err),
            (geodetic, mercator) => Ok(Self {
                geodetic: geodetic.ok().map(|extent| extent.params()),
                mercator: mercator.ok().map(|extent| extent.params()),
            }),
        }
    }

    pub fn for_mode(&self, mode: ProjectionMode) -> Result<[f32; 4], WarpError> {
        let params = match mode {
            ProjectionMode::Geodetic => self.geodetic,
            ProjectionMode::Mercator => self.mercator,
        };
        params.ok_or_else(|| WarpError::InvalidCorners(format!("{mode} extent is degenerate")))
    }
}

fn nondegenerate(corners: &Corners, mode: ProjectionMode) -> Result<Extent, WarpError> {
    let extent = Extent::of_corners(corners, mode)
        .ok_or_else(|| WarpError::InvalidCorners("no corners supplied".into()))?;
    if !(extent.width() > 0.0 && extent.height() > 0.0) {
        return Err(WarpError::InvalidCorners(format!(
            "{mode} extent is degenerate ({} x {})",
            extent.width(),
            extent.height()
        )));
    }
    Ok(extent)
}

/// Checks ranges and finiteness of every corner.
pub fn validate_corners(corners: &Corners) -> Result<(), WarpError> {
    for (index, corner) in corners.iter().enumerate() {
        if !corner.lon.is_finite() || !(-180.0..=180.0).contains(&corner.lon) {
            return Err(WarpError::InvalidCorners(format!(
                "corner {index} longitude {} is outside -180..=180",
                corner.lon
            )));
        }
        if !corner.lat.is_finite() || !(-90.0..=90.0).contains(&corner.lat) {
            return Err(WarpError::InvalidCorners(format!(
                "corner {index} latitude {} is outside -90..=90",
                corner.lat
            )));
        }
    }
    Ok(())
}
