/// Detection adapter
///
/// Runs the shared model on a tile, then validates, thresholds and
/// suppresses its output.
use super::detector::{Detection, DetectionModel, RawDetection, RepresentationKind};
use crate::config::DetectionConfig;
use image::RgbImage;
use std::sync::Arc;

/// Thresholds applied to raw model output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    /// Minimum confidence kept
    pub confidence: f32,
    /// IoU above which the lower-confidence detection is dropped
    pub iou: f32,
}

impl From<&DetectionConfig> for DetectionThresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            confidence: config.confidence_threshold,
            iou: config.iou_threshold,
        }
    }
}

pub struct DetectionAdapter {
    model: Arc<dyn DetectionModel>,
    thresholds: DetectionThresholds,
}

impl DetectionAdapter {
    pub fn new(model: Arc<dyn DetectionModel>, thresholds: DetectionThresholds) -> Self {
        Self { model, thresholds }
    }

    /// Representation the underlying model returns
    pub fn representation(&self) -> RepresentationKind {
        self.model.representation()
    }

    /// Detect panels on a tile, sorted by descending confidence.
    ///
    /// Geometry is conformed to the tile before filtering, so every box lies
    /// inside it and every mask has the tile's dimensions.
    /// Model failures yield no detections; they are logged, never propagated.
    pub fn infer(&self, image: &RgbImage) -> Vec<Detection> {
        let (width, height) = image.dimensions();
        match self.model.predict(image) {
            Ok(raw) => {
                let conformed = raw
                    .into_iter()
                    .map(|d| RawDetection {
                        geometry: d.geometry.conformed(width, height),
                        confidence: d.confidence,
                    })
                    .collect();
                filter_detections(conformed, &self.thresholds)
            }
            Err(e) => {
                tracing::warn!(
                    model = self.model.name(),
                    error = %e,
                    "Detection failed, treating as zero detections"
                );
                Vec::new()
            }
        }
    }
}

/// Validate, threshold and suppress raw detections.
pub fn filter_detections(raw: Vec<RawDetection>, thresholds: &DetectionThresholds) -> Vec<Detection> {
    let mut candidates: Vec<Detection> = raw
        .into_iter()
        .filter(|d| {
            let valid = (0.0..=1.0).contains(&d.confidence) && d.geometry.is_valid();
            if !valid {
                tracing::debug!(confidence = d.confidence, "Dropping malformed detection");
            }
            valid
        })
        .filter(|d| d.confidence >= thresholds.confidence)
        .map(|d| Detection {
            geometry: d.geometry,
            confidence: d.confidence,
        })
        .collect();

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    non_max_suppression(candidates, thresholds.iou)
}

/// Greedy NMS over detections already sorted by descending confidence.
fn non_max_suppression(sorted: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut kept: Vec<Detection> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        let suppressed = kept
            .iter()
            .any(|k| k.geometry.overlap(&candidate.geometry) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
