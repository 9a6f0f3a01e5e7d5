use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl Location {
    pub fn new(lat: f64, lng: f64, address: impl Into<String>) -> anyhow::Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            bail!("latitude {lat} out of range [-90, 90]");
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            bail!("longitude {lng} out of range [-180, 180]");
        }
        Ok(Self {
            lat,
            lng,
            address: address.into().trim().to_string(),
        })
    }

    pub fn microdegrees(&self) -> (i64, i64) {
        (
            (self.lat * 1_000_000.0).round() as i64,
            (self.lng * 1_000_000.0).round() as i64,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    Isometric,
    Hologram,
    LineDrawing,
}

impl ImageType {
    pub const ALL: [ImageType; 3] = [
        ImageType::Isometric,
        ImageType::Hologram,
        ImageType::LineDrawing,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ImageType::Isometric => "isometric",
            ImageType::Hologram => "hologram",
            ImageType::LineDrawing => "line_drawing",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ImageType::Isometric => "isometric",
            ImageType::Hologram => "hologram",
            ImageType::LineDrawing => "line-drawing",
        }
    }

    pub fn generator_key(self) -> String {
        format!("{}_generator", self.slug())
    }

    pub fn legacy_generator_key(self) -> Option<&'static str> {
        match self {
            ImageType::Isometric => Some("cad_generator"),
            _ => None,
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ImageType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "isometric" | "cad" => Ok(ImageType::Isometric),
            "hologram" => Ok(ImageType::Hologram),
            "line_drawing" | "lineart" | "line_art" => Ok(ImageType::LineDrawing),
            _ => bail!(
                "unknown image type '{raw}' (expected isometric, hologram or line-drawing)"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImages {
    pub cad: Option<String>,
    pub hologram: Option<String>,
    pub line_art: Option<String>,
}

impl GeneratedImages {
    pub fn get(&self, image_type: ImageType) -> Option<&str> {
        match image_type {
            ImageType::Isometric => self.cad.as_deref(),
            ImageType::Hologram => self.hologram.as_deref(),
            ImageType::LineDrawing => self.line_art.as_deref(),
        }
    }

    pub fn set(&mut self, image_type: ImageType, value: Option<String>) {
        let slot = match image_type {
            ImageType::Isometric => &mut self.cad,
            ImageType::Hologram => &mut self.hologram,
            ImageType::LineDrawing => &mut self.line_art,
        };
        *slot = value;
    }

    pub fn generated_count(&self) -> usize {
        ImageType::ALL
            .iter()
            .filter(|image_type| self.get(**image_type).is_some())
            .count()
    }
}
