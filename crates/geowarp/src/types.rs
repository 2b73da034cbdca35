use std::fmt;

use crate::source::ImageSource;

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl From<[f64; 2]> for LonLat {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

/// Image corners ordered north-west, north-east, south-east, south-west.
pub type Corners = [LonLat; 4];

/// Coordinate system the warp mesh is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProjectionMode {
    /// Plain longitude/latitude degrees.
    #[default]
    Geodetic,
    /// Spherical Web Mercator metres.
    Mercator,
}

impl fmt::Display for ProjectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionMode::Geodetic => f.write_str("geodetic"),
            ProjectionMode::Mercator => f.write_str("mercator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) u64);

impl LayerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Construction options for a geo image layer.
#[derive(Debug, Clone)]
pub struct GeoImageOptions {
    pub source: Option<ImageSource>,
    pub corners: Corners,
    pub projection: ProjectionMode,
    /// RGB in `0.0..=1.0`; the output is cleared to this color with zero alpha.
    pub transparent_color: [f32; 3],
}

impl GeoImageOptions {
    pub fn new(corners: Corners) -> Self {
        Self {
            source: None,
            corners,
            projection: ProjectionMode::default(),
            transparent_color: [0.0; 3],
        }
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.source = Some(ImageSource::Url(src.into()));
        self
    }

    pub fn with_image(mut self, image: impl Into<ImageSource>) -> Self {
        self.source = Some(image.into());
        self
    }

    pub fn with_projection(mut self, projection: ProjectionMode) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_transparent_color(mut self, color: [f32; 3]) -> Self {
        self.transparent_color = color;
        self
    }
}
