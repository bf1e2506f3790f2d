/// Detection module
///
/// Wraps the external panel detection capability.
///
/// ## Architecture
///
/// ```text
/// DetectionAdapter
///   ├── DetectionModel (shared, read-only)
///   │     └── CommandModel (external program, JSON on stdout)
///   ├── Validation (confidence in [0, 1], non-degenerate geometry)
///   ├── Confidence threshold
///   └── Non-max suppression (descending confidence)
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// use detection::{CommandModel, DetectionAdapter, DetectionThresholds};
///
/// let model = Arc::new(CommandModel::new(&config.detection)?);
/// let adapter = DetectionAdapter::new(model, DetectionThresholds::from(&config.detection));
///
/// for detection in adapter.infer(&tile.image) {
///     println!("{:?} at {:.2}", detection.geometry.kind(), detection.confidence);
/// }
/// ```

pub mod adapter;
pub mod command;
pub mod detector;

// Re-export commonly used types
pub use adapter::{filter_detections, DetectionAdapter, DetectionThresholds};
pub use command::CommandModel;
pub use detector::{
    Detection, DetectionModel, Geometry, PixelBox, PixelMask, RawDetection, RepresentationKind,
};
