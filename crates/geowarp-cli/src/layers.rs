use anyhow::{Context, Result};
use geowarp::gpu::GpuPower;
use geowarp::{Corners, ExtentParams, GeoImageOptions, LonLat, ProjectionMode};
use layerconfig::{LayerEntry, PowerSetting, ProjectionSetting};
use serde::Serialize;

pub fn corners(entry: &LayerEntry) -> Corners {
    entry.corners.map(LonLat::from)
}

pub fn projection(setting: ProjectionSetting) -> ProjectionMode {
    match setting {
        ProjectionSetting::Geodetic => ProjectionMode::Geodetic,
        ProjectionSetting::Mercator => ProjectionMode::Mercator,
    }
}

pub fn power(setting: PowerSetting) -> GpuPower {
    match setting {
        PowerSetting::Low => GpuPower::Low,
        PowerSetting::High => GpuPower::High,
    }
}

pub fn geo_options(entry: &LayerEntry) -> GeoImageOptions {
    GeoImageOptions::new(corners(entry))
        .with_src(entry.src.clone())
        .with_projection(projection(entry.projection))
        .with_transparent_color(entry.transparent_color_unit())
}

#[derive(Debug, Serialize)]
pub struct ExtentReport {
    pub name: String,
    pub projection: String,
    /// `None` when the corners collapse in that projection.
    pub geodetic: Option<[f32; 4]>,
    pub mercator: Option<[f32; 4]>,
}

pub fn extent_report(entry: &LayerEntry) -> Result<ExtentReport> {
    let params = ExtentParams::from_corners(&corners(entry))
        .with_context(|| format!("layer '{}' has unusable corners", entry.name))?;
    Ok(ExtentReport {
        name: entry.name.clone(),
        projection: projection(entry.projection).to_string(),
        geodetic: params.geodetic,
        mercator: params.mercator,
    })
}
