use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub const MAX_GRID_SUBDIVISIONS: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionSetting {
    #[default]
    Geodetic,
    Mercator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    Low,
    #[default]
    High,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerConfig {
    pub version: u32,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub layers: Vec<LayerEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderSettings {
    #[serde(default = "default_grid_subdivisions")]
    pub grid_subdivisions: u32,
    #[serde(default = "default_renders_per_frame")]
    pub renders_per_frame: usize,
    #[serde(
        default = "default_fetch_timeout",
        deserialize_with = "deserialize_duration",
        skip_serializing
    )]
    pub fetch_timeout: Duration,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub power: PowerSetting,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            grid_subdivisions: default_grid_subdivisions(),
            renders_per_frame: default_renders_per_frame(),
            fetch_timeout: default_fetch_timeout(),
            user_agent: None,
            power: PowerSetting::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerEntry {
    pub name: String,
    pub src: String,
    /// `[lon, lat]` pairs ordered north-west, north-east, south-east, south-west.
    pub corners: [[f64; 2]; 4],
    #[serde(default)]
    pub projection: ProjectionSetting,
    #[serde(
        default,
        deserialize_with = "deserialize_color",
        skip_serializing
    )]
    pub transparent_color: [u8; 3],
}

impl LayerEntry {
    /// Transparent color scaled to `0.0..=1.0`.
    pub fn transparent_color_unit(&self) -> [f32; 3] {
        self.transparent_color.map(|channel| channel as f32 / 255.0)
    }
}

fn default_grid_subdivisions() -> u32 {
    16
}

fn default_renders_per_frame() -> usize {
    1
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn deserialize_color<'de, D>(deserializer: D) -> Result<[u8; 3], D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Rgb([i64; 3]),
    }

    match Helper::deserialize(deserializer)? {
        Helper::Str(raw) => parse_hex_color(&raw).map_err(de::Error::custom),
        Helper::Rgb(channels) => {
            let mut rgb = [0u8; 3];
            for (slot, value) in rgb.iter_mut().zip(channels) {
                *slot = u8::try_from(value).map_err(|_| {
                    de::Error::custom(format!("color channel {value} is outside 0..=255"))
                })?;
            }
            Ok(rgb)
        }
    }
}

fn parse_hex_color(raw: &str) -> Result<[u8; 3], String> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if hex.len() != 6 || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(format!(
            "invalid color '{trimmed}'; expected '#rrggbb' or [r, g, b]"
        ));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|err| format!("invalid color '{trimmed}': {err}"))
    };
    Ok([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

impl LayerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: LayerConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerEntry> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let subdivisions = self.render.grid_subdivisions;
        if subdivisions == 0 || subdivisions > MAX_GRID_SUBDIVISIONS {
            return Err(ConfigError::Invalid(format!(
                "render.grid_subdivisions must be within 1..={MAX_GRID_SUBDIVISIONS}, got {subdivisions}"
            )));
        }

        if self.render.renders_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "render.renders_per_frame must be at least 1".into(),
            ));
        }

        if self.render.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "render.fetch_timeout must be greater than zero".into(),
            ));
        }

        let mut names = BTreeSet::new();
        for layer in &self.layers {
            let name = layer.name.trim();
            if name.is_empty() {
                return Err(ConfigError::Invalid(
                    "layer name may not be empty".into(),
                ));
            }
            if !names.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "layer '{name}' is defined more than once"
                )));
            }
            if layer.src.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "layer '{name}' must define a non-empty src"
                )));
            }
            for (index, [lon, lat]) in layer.corners.iter().copied().enumerate() {
                if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                    return Err(ConfigError::Invalid(format!(
                        "layer '{name}' corner {index} longitude {lon} is outside -180..=180"
                    )));
                }
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                    return Err(ConfigError::Invalid(format!(
                        "layer '{name}' corner {index} latitude {lat} is outside -90..=90"
                    )));
                }
            }
        }

        Ok(())
    }
}
