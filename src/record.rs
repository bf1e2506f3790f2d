/// Per-site decision record, the only persisted artifact of a site.
use crate::detection::RepresentationKind;
use crate::qc::{QcReason, QcStatus};
use crate::site::SampleId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Provider that answered
    pub source: String,
    pub zoom: u8,
    /// Not the first provider, or not the primary radius
    pub fallback: bool,
}

/// Created once by the orchestrator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub sample_id: SampleId,
    pub lat: f64,
    pub lon: f64,
    pub has_solar: bool,
    /// Best surviving detection, null when there is none
    pub confidence: Option<f32>,
    pub pv_area_sqm_est: f64,
    pub buffer_radius_sqft: u32,
    pub qc_status: QcStatus,
    pub qc_reasons: Vec<QcReason>,
    pub bbox_or_mask: RepresentationKind,
    /// Null when no imagery could be acquired
    pub image_metadata: Option<ImageMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_and_values() {
        let record = DecisionRecord {
            sample_id: SampleId::Int(1001),
            lat: 40.7128,
            lon: -74.006,
            has_solar: true,
            confidence: Some(0.92),
            pv_area_sqm_est: 45.3,
            buffer_radius_sqft: 1200,
            qc_status: QcStatus::Verifiable,
            qc_reasons: Vec::new(),
            bbox_or_mask: RepresentationKind::Box,
            image_metadata: Some(ImageMetadata {
                source: "esri_world_imagery".to_string(),
                zoom: 18,
                fallback: false,
            }),
        };

        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sample_id"], 1001);
        assert_eq!(json["has_solar"], true);
        assert_eq!(json["buffer_radius_sqft"], 1200);
        assert_eq!(json["qc_status"], "VERIFIABLE");
        assert_eq!(json["qc_reasons"], serde_json::json!([]));
        assert_eq!(json["bbox_or_mask"], "box");
        assert_eq!(json["image_metadata"]["source"], "esri_world_imagery");
        assert_eq!(json["image_metadata"]["fallback"], false);

        let back: DecisionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_missing_values_are_null() {
        let record = DecisionRecord {
            sample_id: SampleId::Text("roof-a".to_string()),
            lat: 1.0,
            lon: 2.0,
            has_solar: false,
            confidence: None,
            pv_area_sqm_est: 0.0,
            buffer_radius_sqft: 2400,
            qc_status: QcStatus::Unverifiable,
            qc_reasons: vec![QcReason::ImageryUnavailable],
            bbox_or_mask: RepresentationKind::Mask,
            image_metadata: None,
        };
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert!(json["confidence"].is_null());
        assert!(json["image_metadata"].is_null());
        assert_eq!(json["qc_reasons"][0], "imagery_unavailable");
        assert_eq!(json["sample_id"], "roof-a");
    }
}
