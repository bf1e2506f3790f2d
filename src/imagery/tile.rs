use crate::site::BufferRadius;
use image::RgbImage;

/// A fetched, validated raster around a site.
#[derive(Debug, Clone)]
pub struct ImageryTile {
    pub image: RgbImage,
    /// Provider that answered
    pub provider: String,
    pub zoom: u8,
    /// Meters per pixel at the tile center
    pub gsd: f64,
    /// Radius the tile was requested at
    pub radius: BufferRadius,
    /// Not the first provider, or not the primary radius
    pub fallback: bool,
}

impl ImageryTile {
    /// Buffer radius in pixels of this tile, zero when the scale is unknown
    pub fn buffer_radius_px(&self) -> f64 {
        if self.gsd > 0.0 {
            self.radius.meters() / self.gsd
        } else {
            0.0
        }
    }
}

/// Detect "map data not yet available" placeholders: near-uniform tiles
/// whose colour sits close to the placeholder grey.
pub fn is_placeholder(image: &RgbImage) -> bool {
    let total = image.width() as f64 * image.height() as f64;
    if total == 0.0 {
        return true;
    }

    let mut sums = [0f64; 3];
    let mut sum_sq = 0f64;
    for px in image.pixels() {
        for c in 0..3 {
            let v = px[c] as f64;
            sums[c] += v;
            sum_sq += v * v;
        }
    }
    let means = sums.map(|s| s / total);
    let overall_mean = means.iter().sum::<f64>() / 3.0;
    let variance = sum_sq / (total * 3.0) - overall_mean * overall_mean;

    let channel_spread = (means
        .iter()
        .map(|m| (m - overall_mean).powi(2))
        .sum::<f64>()
        / 3.0)
        .sqrt();

    let is_uniform = variance < 500.0;
    let is_gray = channel_spread < 10.0;
    let near_placeholder = means.iter().all(|m| (m - 200.0).abs() < 30.0);
    is_uniform && is_gray && near_placeholder
}
