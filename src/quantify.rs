/// Area quantification
///
/// Converts detected pixel regions into real-world area using the ground
/// sampling distance of the tile.
use crate::detection::{Detection, Geometry};
use crate::error::GeometryError;
use std::f64::consts::PI;

/// WGS84 equatorial radius in meters
pub const EARTH_EQUATORIAL_RADIUS_M: f64 = 6_378_137.0;

/// Edge of one slippy-map tile in pixels
pub const TILE_PIXEL_SIZE: f64 = 256.0;

/// Latitude bound of the Web Mercator projection
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;

pub const MAX_ZOOM: u8 = 23;

/// Meters per pixel at `lat_deg` for slippy-map zoom `zoom`.
///
/// mpp = cos(lat) * 2π * R / (256 * 2^zoom)
pub fn ground_sampling_distance(lat_deg: f64, zoom: u8) -> Result<f64, GeometryError> {
    if !lat_deg.is_finite() || lat_deg.abs() > MAX_MERCATOR_LATITUDE {
        return Err(GeometryError::InvalidLatitude(lat_deg));
    }
    if zoom > MAX_ZOOM {
        return Err(GeometryError::InvalidZoom(zoom));
    }
    let circumference = 2.0 * PI * EARTH_EQUATORIAL_RADIUS_M;
    Ok(lat_deg.to_radians().cos() * circumference / (TILE_PIXEL_SIZE * 2f64.powi(zoom as i32)))
}

/// Check a coordinate before any imagery is requested for it.
pub fn validate_coordinate(lat_deg: f64, lon_deg: f64, zoom: u8) -> Result<f64, GeometryError> {
    if !lon_deg.is_finite() || lon_deg.abs() > 180.0 {
        return Err(GeometryError::InvalidLongitude(lon_deg));
    }
    ground_sampling_distance(lat_deg, zoom)
}

/// Estimated area of one detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantifiedArea {
    /// Pixel area the estimate was derived from
    pub pixels: f64,
    /// Square meters, never negative
    pub square_meters: f64,
}

/// Pixel area of a detection: box width × height, or set mask pixels.
pub fn pixel_area(geometry: &Geometry) -> f64 {
    match geometry {
        Geometry::Box(b) => b.width() as f64 * b.height() as f64,
        Geometry::Mask { mask, .. } => mask.pixel_count() as f64,
    }
}

/// Whether any part of `geometry` lies within `radius_px` of the centre of a
/// `width` × `height` tile. Boxes are treated as continuous rectangles, mask
/// pixels by their centres.
pub fn touches_buffer(geometry: &Geometry, width: u32, height: u32, radius_px: f64) -> bool {
    let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
    let r2 = radius_px * radius_px;
    match geometry {
        Geometry::Box(b) => {
            let dx = (b.x1 as f64 - cx).max(cx - b.x2 as f64).max(0.0);
            let dy = (b.y1 as f64 - cy).max(cy - b.y2 as f64).max(0.0);
            dx * dx + dy * dy <= r2
        }
        Geometry::Mask { mask, .. } => {
            let reach = radius_px.ceil().max(0.0);
            let y0 = (cy - reach).floor().max(0.0) as u32;
            let y1 = ((cy + reach).ceil().max(0.0) as u32).min(mask.height);
            let x0 = (cx - reach).floor().max(0.0) as u32;
            let x1 = ((cx + reach).ceil().max(0.0) as u32).min(mask.width);
            (y0..y1).any(|y| {
                (x0..x1).any(|x| {
                    let (dx, dy) = (x as f64 + 0.5 - cx, y as f64 + 0.5 - cy);
                    mask.get(x, y) && dx * dx + dy * dy <= r2
                })
            })
        }
    }
}

/// Keep the detections that reach into the buffer circle of a tile, in the
/// order given. Detections elsewhere on the tile belong to neighbouring
/// roofs.
pub fn within_buffer(
    detections: Vec<Detection>,
    width: u32,
    height: u32,
    radius_px: f64,
) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| touches_buffer(&d.geometry, width, height, radius_px))
        .collect()
}

/// Area per detection, in the order given.
pub fn quantify(detections: &[Detection], gsd: f64) -> Vec<QuantifiedArea> {
    let pixel_m2 = gsd * gsd;
    detections
        .iter()
        .map(|d| {
            let pixels = pixel_area(&d.geometry);
            QuantifiedArea {
                pixels,
                square_meters: (pixels * pixel_m2).max(0.0),
            }
        })
        .collect()
}

pub fn total_area(areas: &[QuantifiedArea]) -> f64 {
    areas.iter().map(|a| a.square_meters).sum()
}

/// Round to 3 decimals, as reported in the record.
pub fn round_area(square_meters: f64) -> f64 {
    (square_meters * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{PixelBox, PixelMask};

    #[test]
    fn test_gsd_at_equator() {
        // 156543.03392 m/px at zoom 0
        let gsd = ground_sampling_distance(0.0, 0).unwrap();
        assert!((gsd - 156_543.033_92).abs() < 1e-3, "got {}", gsd);
    }

    #[test]
    fn test_gsd_decreases_with_zoom() {
        let mut previous = f64::INFINITY;
        for zoom in 0..=21 {
            let gsd = ground_sampling_distance(40.7128, zoom).unwrap();
            assert!(gsd < previous);
            assert!((previous / gsd - 2.0).abs() < 1e-9 || zoom == 0);
            previous = gsd;
        }
    }

    #[test]
    fn test_gsd_scales_with_cos_latitude() {
        let (lat1, lat2) = (10.0_f64, 60.0_f64);
        let g1 = ground_sampling_distance(lat1, 18).unwrap();
        let g2 = ground_sampling_distance(lat2, 18).unwrap();
        let expected = lat1.to_radians().cos() / lat2.to_radians().cos();
        assert!((g1 / g2 - expected).abs() < 1e-12);
        // Symmetric about the equator
        assert_eq!(g1, ground_sampling_distance(-lat1, 18).unwrap());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            ground_sampling_distance(91.0, 18),
            Err(GeometryError::InvalidLatitude(_))
        ));
        assert!(ground_sampling_distance(f64::NAN, 18).is_err());
        assert!(matches!(
            ground_sampling_distance(10.0, 30),
            Err(GeometryError::InvalidZoom(30))
        ));
        assert!(matches!(
            validate_coordinate(10.0, 200.0, 18),
            Err(GeometryError::InvalidLongitude(_))
        ));
    }

    #[test]
    fn test_box_and_mask_area() {
        let gsd = 0.5;
        let detections = vec![
            Detection {
                geometry: Geometry::Box(PixelBox::new(10.0, 10.0, 30.0, 20.0)),
                confidence: 0.9,
            },
            Detection {
                geometry: Geometry::Mask {
                    bbox: PixelBox::new(0.0, 0.0, 2.0, 2.0),
                    mask: PixelMask::new(2, 2, vec![true, true, true, false]),
                },
                confidence: 0.7,
            },
        ];
        let areas = quantify(&detections, gsd);
        assert_eq!(areas[0].pixels, 200.0);
        assert_eq!(areas[0].square_meters, 50.0);
        assert_eq!(areas[1].pixels, 3.0);
        assert_eq!(areas[1].square_meters, 0.75);
        assert_eq!(total_area(&areas), 50.75);
    }

    #[test]
    fn test_quantify_is_deterministic() {
        let detections = vec![Detection {
            geometry: Geometry::Box(PixelBox::new(1.5, 2.25, 17.75, 33.0)),
            confidence: 0.5,
        }];
        let gsd = ground_sampling_distance(47.3, 19).unwrap();
        assert_eq!(quantify(&detections, gsd), quantify(&detections, gsd));
    }

    fn boxed(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            geometry: Geometry::Box(PixelBox::new(x1, y1, x2, y2)),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_buffer_selection_follows_radius() {
        // 320 px tile at NYC zoom 18: 1200 sqft ≈ 13.2 px, 2400 sqft ≈ 18.6 px
        let gsd = ground_sampling_distance(40.7128, 18).unwrap();
        let primary = crate::site::sqft_to_radius_meters(1200) / gsd;
        let secondary = crate::site::sqft_to_radius_meters(2400) / gsd;

        // Nearest edge 16 px from the centre
        let ring = vec![boxed(176.0, 155.0, 186.0, 165.0)];
        assert!(within_buffer(ring.clone(), 320, 320, primary).is_empty());
        assert_eq!(within_buffer(ring, 320, 320, secondary).len(), 1);
    }

    #[test]
    fn test_buffer_keeps_overlapping_box_whole() {
        let kept = within_buffer(
            vec![boxed(150.0, 150.0, 250.0, 250.0), boxed(0.0, 0.0, 10.0, 10.0)],
            320,
            320,
            13.0,
        );
        assert_eq!(kept.len(), 1);
        // Full area counts, not just the part inside the circle
        assert_eq!(quantify(&kept, 1.0)[0].pixels, 10_000.0);
    }

    #[test]
    fn test_buffer_selection_on_masks() {
        let mut near = vec![false; 32 * 32];
        near[16 * 32 + 17] = true;
        let mut far = vec![false; 32 * 32];
        far[0] = true;
        let detection = |data: Vec<bool>| Detection {
            geometry: Geometry::Mask {
                bbox: PixelBox::new(0.0, 0.0, 32.0, 32.0),
                mask: PixelMask::new(32, 32, data),
            },
            confidence: 0.8,
        };
        let kept = within_buffer(vec![detection(near), detection(far)], 32, 32, 3.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(pixel_area(&kept[0].geometry), 1.0);
    }

    #[test]
    fn test_round_area() {
        assert_eq!(round_area(45.30049), 45.3);
        assert_eq!(round_area(0.0), 0.0);
    }
}
