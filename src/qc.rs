/// Imagery quality control
///
/// Brightness heuristics over the raw tile, independent of what detection
/// found. Luminance uses the BT.601 weights in fixed point:
/// (77*R + 150*G + 29*B) / 256.
use crate::config::QcConfig;
use crate::imagery::ImageryTile;
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QcStatus {
    Verifiable,
    Unverifiable,
    Flagged,
}

/// Reason codes, serialized as snake_case strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcReason {
    CloudCoverSuspected,
    ExcessiveShadow,
    LowResolution,
    FallbackImagery,
    PixelStatisticsUnavailable,
    ImageryUnavailable,
    InvalidCoordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcResult {
    pub status: QcStatus,
    pub reasons: Vec<QcReason>,
}

impl QcResult {
    pub fn verifiable() -> Self {
        Self {
            status: QcStatus::Verifiable,
            reasons: Vec::new(),
        }
    }

    pub fn unverifiable(reason: QcReason) -> Self {
        Self {
            status: QcStatus::Unverifiable,
            reasons: vec![reason],
        }
    }
}

/// Aggregate luminance statistics of a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessStats {
    pub mean: f32,
    pub p5: u8,
    pub p95: u8,
    /// Fraction of pixels above the cloud threshold
    pub bright_fraction: f32,
    /// Fraction of pixels below the shadow threshold
    pub dark_fraction: f32,
}

pub struct QualityController {
    config: QcConfig,
}

impl QualityController {
    pub fn new(config: QcConfig) -> Self {
        Self { config }
    }

    /// Classify the tile a site's result was computed from.
    pub fn assess(&self, tile: &ImageryTile) -> QcResult {
        self.assess_image(&tile.image, tile.fallback)
    }

    pub fn assess_image(&self, image: &RgbImage, fallback: bool) -> QcResult {
        let Some(stats) = self.brightness_stats(image) else {
            return QcResult::unverifiable(QcReason::PixelStatisticsUnavailable);
        };

        let mut reasons = self.anomalies_from(&stats);
        let (w, h) = image.dimensions();
        if w < self.config.min_resolution_px || h < self.config.min_resolution_px {
            reasons.push(QcReason::LowResolution);
        }

        if !reasons.is_empty() {
            QcResult {
                status: QcStatus::Flagged,
                reasons,
            }
        } else if fallback {
            QcResult::unverifiable(QcReason::FallbackImagery)
        } else {
            QcResult::verifiable()
        }
    }

    fn anomalies_from(&self, stats: &BrightnessStats) -> Vec<QcReason> {
        let c = &self.config;
        let mut reasons = Vec::new();
        if stats.mean >= c.cloud_threshold || stats.bright_fraction > c.max_anomaly_fraction {
            reasons.push(QcReason::CloudCoverSuspected);
        }
        if stats.mean <= c.shadow_threshold || stats.dark_fraction > c.max_anomaly_fraction {
            reasons.push(QcReason::ExcessiveShadow);
        }
        reasons
    }

    /// None when the image has no pixels.
    pub fn brightness_stats(&self, image: &RgbImage) -> Option<BrightnessStats> {
        let (width, height) = image.dimensions();
        let total = width as u64 * height as u64;
        if total == 0 {
            return None;
        }

        let histogram = luminance_histogram(image);

        let sum: u64 = histogram
            .iter()
            .enumerate()
            .map(|(lum, &count)| lum as u64 * count)
            .sum();
        let count_where = |pred: &dyn Fn(f32) -> bool| -> u64 {
            histogram
                .iter()
                .enumerate()
                .filter(|(lum, _)| pred(*lum as f32))
                .map(|(_, &count)| count)
                .sum()
        };
        let bright = count_where(&|lum| lum > self.config.cloud_threshold);
        let dark = count_where(&|lum| lum < self.config.shadow_threshold);

        Some(BrightnessStats {
            mean: (sum as f64 / total as f64) as f32,
            p5: percentile(&histogram, total, 0.05),
            p95: percentile(&histogram, total, 0.95),
            bright_fraction: (bright as f64 / total as f64) as f32,
            dark_fraction: (dark as f64 / total as f64) as f32,
        })
    }
}

/// 256-bin luminance histogram, rows processed in parallel
fn luminance_histogram(image: &RgbImage) -> [u64; 256] {
    let row_size = image.width() as usize * 3;
    image
        .as_raw()
        .par_chunks(row_size)
        .map(|row| {
            let mut histogram = [0u64; 256];
            for px in row.chunks_exact(3) {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                histogram[((77 * r + 150 * g + 29 * b) >> 8) as usize] += 1;
            }
            histogram
        })
        .reduce(
            || [0u64; 256],
            |mut acc, part| {
                for (a, p) in acc.iter_mut().zip(part.iter()) {
                    *a += p;
                }
                acc
            },
        )
}

fn percentile(histogram: &[u64; 256], total: u64, p: f64) -> u8 {
    let target = ((total as f64) * p).ceil().max(1.0) as u64;
    let mut seen = 0u64;
    for (lum, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= target {
            return lum as u8;
        }
    }
    255
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn controller() -> QualityController {
        QualityController::new(QcConfig {
            cloud_threshold: 220.0,
            shadow_threshold: 40.0,
            max_anomaly_fraction: 0.4,
            min_resolution_px: 300,
        })
    }

    fn flat(value: u8) -> RgbImage {
        RgbImage::from_pixel(320, 320, Rgb([value, value, value]))
    }

    #[test]
    fn test_clean_primary_tile_is_verifiable() {
        let result = controller().assess_image(&flat(120), false);
        assert_eq!(result, QcResult::verifiable());
    }

    #[test]
    fn test_cloud_flagged() {
        let result = controller().assess_image(&flat(240), false);
        assert_eq!(result.status, QcStatus::Flagged);
        assert_eq!(result.reasons, vec![QcReason::CloudCoverSuspected]);
    }

    #[test]
    fn test_shadow_flagged() {
        let result = controller().assess_image(&flat(10), true);
        assert_eq!(result.status, QcStatus::Flagged);
        assert_eq!(result.reasons, vec![QcReason::ExcessiveShadow]);
    }

    #[test]
    fn test_cloud_before_shadow() {
        // Half white, half black: both fractions are 0.5
        let mut image = flat(0);
        for y in 0..160 {
            for x in 0..320 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let result = controller().assess_image(&image, false);
        assert_eq!(
            result.reasons,
            vec![QcReason::CloudCoverSuspected, QcReason::ExcessiveShadow]
        );
    }

    #[test]
    fn test_fallback_without_anomaly_is_unverifiable() {
        let result = controller().assess_image(&flat(120), true);
        assert_eq!(result.status, QcStatus::Unverifiable);
        assert_eq!(result.reasons, vec![QcReason::FallbackImagery]);
    }

    #[test]
    fn test_anomaly_beats_fallback() {
        let result = controller().assess_image(&flat(250), true);
        assert_eq!(result.status, QcStatus::Flagged);
    }

    #[test]
    fn test_low_resolution_flagged() {
        let image = RgbImage::from_pixel(200, 200, Rgb([120, 120, 120]));
        let result = controller().assess_image(&image, false);
        assert_eq!(result.reasons, vec![QcReason::LowResolution]);
    }

    #[test]
    fn test_empty_tile_is_unverifiable() {
        let result = controller().assess_image(&RgbImage::new(0, 0), false);
        assert_eq!(
            result,
            QcResult::unverifiable(QcReason::PixelStatisticsUnavailable)
        );
    }

    #[test]
    fn test_stats_percentiles() {
        let mut image = RgbImage::from_pixel(10, 10, Rgb([100, 100, 100]));
        for x in 0..10 {
            image.put_pixel(x, 0, Rgb([0, 0, 0]));
        }
        let stats = controller().brightness_stats(&image).unwrap();
        assert_eq!(stats.p5, 0);
        // (77 + 150 + 29) * 100 >> 8 = 100
        assert_eq!(stats.p95, 100);
        assert!((stats.mean - 90.0).abs() < 1e-4);
        assert!((stats.dark_fraction - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&QcStatus::Unverifiable).unwrap(),
            "\"UNVERIFIABLE\""
        );
        assert_eq!(
            serde_json::to_string(&QcReason::CloudCoverSuspected).unwrap(),
            "\"cloud_cover_suspected\""
        );
    }
}
