/// Detector trait and common types
///
/// Defines the interface to the external detection capability and the
/// geometry it reports.
use crate::error::DetectionError;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// How the detection capability describes a panel region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepresentationKind {
    Box,
    Mask,
}

/// Axis-aligned box in pixel coordinates (x1, y1) top-left, (x2, y2) bottom-right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl PixelBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Finite and with positive extent
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    pub fn intersection(&self, other: &PixelBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    pub fn iou(&self, other: &PixelBox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp to the `width` × `height` image. A box entirely outside the
    /// image comes back with zero extent and fails `is_valid`.
    pub fn clipped(&self, width: u32, height: u32) -> PixelBox {
        let (w, h) = (width as f32, height as f32);
        PixelBox::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }
}

/// Binary pixel mask, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<bool>,
}

impl PixelMask {
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == (self.width * self.height) as usize
    }

    /// Number of set pixels
    pub fn pixel_count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.data[(y * self.width + x) as usize]
    }

    /// Nearest-neighbour rescale onto a `width` × `height` grid
    pub fn resized(&self, width: u32, height: u32) -> PixelMask {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height as u64) as u32;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width as u64) as u32;
                data.push(self.get(sx, sy));
            }
        }
        PixelMask::new(width, height, data)
    }

    /// Tight box around the set pixels, None for an empty mask
    pub fn bounding_box(&self) -> Option<PixelBox> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut any = false;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) {
                    any = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        any.then(|| PixelBox::new(min_x as f32, min_y as f32, (max_x + 1) as f32, (max_y + 1) as f32))
    }

    /// Pixel IoU, only defined for masks of the same dimensions
    pub fn iou(&self, other: &PixelMask) -> Option<f32> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        let (mut inter, mut union) = (0usize, 0usize);
        for (a, b) in self.data.iter().zip(&other.data) {
            if *a && *b {
                inter += 1;
            }
            if *a || *b {
                union += 1;
            }
        }
        Some(if union == 0 { 0.0 } else { inter as f32 / union as f32 })
    }
}

/// Region geometry, tagged by representation
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Box(PixelBox),
    Mask {
        /// Box reported alongside the mask (used for drawing)
        bbox: PixelBox,
        mask: PixelMask,
    },
}

impl Geometry {
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Geometry::Box(_) => RepresentationKind::Box,
            Geometry::Mask { .. } => RepresentationKind::Mask,
        }
    }

    pub fn bbox(&self) -> PixelBox {
        match self {
            Geometry::Box(b) => *b,
            Geometry::Mask { bbox, .. } => *bbox,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Geometry::Box(b) => b.is_valid(),
            Geometry::Mask { bbox, mask } => bbox.is_valid() && mask.is_valid(),
        }
    }

    /// Express the geometry on the `width` × `height` tile it was detected
    /// on: boxes are clipped to the tile, masks of another size rescaled.
    pub fn conformed(self, width: u32, height: u32) -> Geometry {
        match self {
            Geometry::Box(b) => Geometry::Box(b.clipped(width, height)),
            Geometry::Mask { bbox, mask } if mask.is_valid() => {
                if mask.width == width && mask.height == height {
                    return Geometry::Mask {
                        bbox: bbox.clipped(width, height),
                        mask,
                    };
                }
                // The reported box was in mask coordinates; rebuild it
                let mask = mask.resized(width, height);
                let bbox = mask
                    .bounding_box()
                    .unwrap_or_else(|| bbox.clipped(width, height));
                Geometry::Mask { bbox, mask }
            }
            invalid => invalid,
        }
    }

    /// Overlap used for suppression: pixel IoU for same-sized masks,
    /// box IoU otherwise
    pub fn overlap(&self, other: &Geometry) -> f32 {
        if let (Geometry::Mask { mask: a, .. }, Geometry::Mask { mask: b, .. }) = (self, other) {
            if let Some(iou) = a.iou(b) {
                return iou;
            }
        }
        self.bbox().iou(&other.bbox())
    }
}

/// A detection as reported by the model, before any validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub geometry: Geometry,
    pub confidence: f32,
}

/// A detection that passed validation, thresholding and suppression.
/// Confidence is always within [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub geometry: Geometry,
    pub confidence: f32,
}

/// Detection capability trait
///
/// Loaded once at start-up and shared read-only across all sites and threads.
pub trait DetectionModel: Send + Sync {
    /// Run the model on a tile
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectionError>;

    /// Representation the model returns
    fn representation(&self) -> RepresentationKind;

    /// Model name (for logging)
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_iou() {
        let a = PixelBox::new(0.0, 0.0, 10.0, 10.0);
        let b = PixelBox::new(5.0, 0.0, 15.0, 10.0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(a.iou(&PixelBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_box_validity() {
        assert!(PixelBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
        assert!(!PixelBox::new(5.0, 0.0, 5.0, 1.0).is_valid());
        assert!(!PixelBox::new(0.0, f32::NAN, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_mask_count_and_bbox() {
        let mask = PixelMask::new(
            4,
            3,
            vec![
                false, false, false, false, //
                false, true, true, false, //
                false, true, false, false,
            ],
        );
        assert!(mask.is_valid());
        assert_eq!(mask.pixel_count(), 3);
        assert_eq!(mask.bounding_box(), Some(PixelBox::new(1.0, 1.0, 3.0, 3.0)));
        assert!(PixelMask::new(2, 2, vec![false; 4]).bounding_box().is_none());
    }

    #[test]
    fn test_mask_iou_needs_same_size() {
        let a = PixelMask::new(2, 1, vec![true, true]);
        let b = PixelMask::new(2, 1, vec![true, false]);
        assert_eq!(a.iou(&b), Some(0.5));
        assert_eq!(a.iou(&PixelMask::new(1, 2, vec![true, true])), None);
    }

    #[test]
    fn test_box_clipped_to_tile() {
        let b = PixelBox::new(-5000.0, -5000.0, 5000.0, 5000.0).clipped(640, 640);
        assert_eq!(b, PixelBox::new(0.0, 0.0, 640.0, 640.0));
        assert_eq!(b.area(), 409_600.0);

        let outside = PixelBox::new(700.0, 10.0, 800.0, 20.0).clipped(640, 640);
        assert!(!outside.is_valid());
    }

    #[test]
    fn test_mask_resized_nearest() {
        let full = PixelMask::new(160, 160, vec![true; 160 * 160]).resized(640, 640);
        assert_eq!((full.width, full.height), (640, 640));
        assert_eq!(full.pixel_count(), 409_600);

        // Left half set stays the left half
        let half = PixelMask::new(2, 1, vec![true, false]).resized(4, 2);
        assert_eq!(
            half.data,
            vec![true, true, false, false, true, true, false, false]
        );
    }

    #[test]
    fn test_geometry_conformed_to_tile() {
        let g = Geometry::Mask {
            bbox: PixelBox::new(0.0, 0.0, 160.0, 160.0),
            mask: PixelMask::new(160, 160, vec![true; 160 * 160]),
        }
        .conformed(640, 640);
        match g {
            Geometry::Mask { bbox, mask } => {
                assert_eq!(bbox, PixelBox::new(0.0, 0.0, 640.0, 640.0));
                assert_eq!(mask.pixel_count(), 409_600);
            }
            other => panic!("expected mask, got {:?}", other),
        }
    }

    #[test]
    fn test_geometry_kind() {
        let b = PixelBox::new(0.0, 0.0, 2.0, 1.0);
        assert_eq!(Geometry::Box(b).kind(), RepresentationKind::Box);
        let m = Geometry::Mask {
            bbox: b,
            mask: PixelMask::new(2, 1, vec![true, true]),
        };
        assert_eq!(m.kind(), RepresentationKind::Mask);
        assert!(m.is_valid());
    }
}
