/// Sites and the per-fetch request derived from them.
use crate::error::GeometryError;
use crate::quantify;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied site identifier. Integer ids stay integers in the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleId {
    Int(i64),
    Text(String),
}

impl SampleId {
    /// Parse a raw id, keeping it numeric when it is a plain integer.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(n) => SampleId::Int(n),
            Err(_) => SampleId::Text(trimmed.to_string()),
        }
    }

    /// File-system safe form used for per-site artifacts. Distinct ids can
    /// share a stem (`a/b` and `a_b`); the batch runner disambiguates.
    pub fn file_stem(&self) -> String {
        match self {
            SampleId::Int(n) => n.to_string(),
            SampleId::Text(s) if s.is_empty() => "_".to_string(),
            SampleId::Text(s) => s
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleId::Int(n) => write!(f, "{}", n),
            SampleId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A geocoded site (WGS84 degrees).
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: SampleId,
    pub lat: f64,
    pub lon: f64,
}

impl Site {
    pub fn new(id: SampleId, lat: f64, lon: f64) -> Self {
        Self { id, lat, lon }
    }
}

/// Which of the two configured buffer radii a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiusTier {
    Primary,
    Secondary,
}

/// Buffer area in square feet around a site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferRadius {
    pub tier: RadiusTier,
    pub sqft: u32,
}

impl BufferRadius {
    pub fn new(tier: RadiusTier, sqft: u32) -> Self {
        Self { tier, sqft }
    }

    /// Radius in meters of the circle whose area is `sqft`.
    pub fn meters(&self) -> f64 {
        sqft_to_radius_meters(self.sqft)
    }
}

/// Convert a buffer area in square feet to the equivalent circle radius in meters.
pub fn sqft_to_radius_meters(sqft: u32) -> f64 {
    let radius_feet = (sqft as f64 / std::f64::consts::PI).sqrt();
    radius_feet * 0.3048
}

/// One imagery request: a site at a radius and zoom, cropped to `tile_px`.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub site: &'a Site,
    pub radius: BufferRadius,
    pub zoom: u8,
    pub tile_px: u32,
    /// Meters per pixel at the site, for this zoom
    pub gsd: f64,
}

impl<'a> FetchRequest<'a> {
    /// Fails when the site can't be projected at this zoom.
    pub fn new(
        site: &'a Site,
        radius: BufferRadius,
        zoom: u8,
        tile_px: u32,
    ) -> Result<Self, GeometryError> {
        let gsd = quantify::validate_coordinate(site.lat, site.lon, zoom)?;
        Ok(Self {
            site,
            radius,
            zoom,
            tile_px,
            gsd,
        })
    }

    /// Same request at another radius.
    pub fn with_radius(&self, radius: BufferRadius) -> Self {
        Self {
            radius,
            ..self.clone()
        }
    }
}
