/// Diagnostic overlays
///
/// Draws a site's detections and search buffer onto its tile. Overlays are
/// for human review only; nothing reads them back.
use crate::detection::{Detection, Geometry, PixelBox};
use crate::imagery::ImageryTile;
use image::{ImageError, Rgb, RgbImage};
use std::path::{Path, PathBuf};

const MASK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BUFFER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

pub struct OverlayRenderer {
    /// Opacity of mask fill, 0.0 - 1.0
    mask_alpha: f32,
    /// Outline thickness in pixels
    line_width: u32,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self {
            mask_alpha: 0.4,
            line_width: 3,
        }
    }
}

impl OverlayRenderer {
    /// Tile copy with masks filled, boxes outlined and the buffer circle.
    pub fn render(&self, tile: &ImageryTile, detections: &[Detection]) -> RgbImage {
        let mut canvas = tile.image.clone();

        for detection in detections {
            if let Geometry::Mask { mask, .. } = &detection.geometry {
                let (w, h) = (mask.width.min(canvas.width()), mask.height.min(canvas.height()));
                for y in 0..h {
                    for x in 0..w {
                        if mask.get(x, y) {
                            let px = canvas.get_pixel_mut(x, y);
                            *px = blend(*px, MASK_COLOR, self.mask_alpha);
                        }
                    }
                }
            }
        }

        for detection in detections {
            self.draw_box(&mut canvas, &detection.geometry.bbox());
        }

        if tile.gsd > 0.0 {
            self.draw_circle(&mut canvas, tile.buffer_radius_px());
        }

        canvas
    }

    /// Render and write `<dir>/<stem>_overlay.png`.
    pub fn save(
        &self,
        dir: &Path,
        stem: &str,
        tile: &ImageryTile,
        detections: &[Detection],
    ) -> Result<PathBuf, ImageError> {
        let path = overlay_path(dir, stem);
        self.render(tile, detections).save(&path)?;
        Ok(path)
    }

    fn draw_box(&self, canvas: &mut RgbImage, b: &PixelBox) {
        let (w, h) = canvas.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
        let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
        let (x1, y1, x2, y2) = (clamp_x(b.x1), clamp_y(b.y1), clamp_x(b.x2), clamp_y(b.y2));

        for t in 0..self.line_width {
            for x in x1..=x2 {
                put(canvas, x as i64, (y1 + t) as i64, BOX_COLOR);
                put(canvas, x as i64, y2 as i64 - t as i64, BOX_COLOR);
            }
            for y in y1..=y2 {
                put(canvas, (x1 + t) as i64, y as i64, BOX_COLOR);
                put(canvas, x2 as i64 - t as i64, y as i64, BOX_COLOR);
            }
        }
    }

    /// Circle outline centred on the tile
    fn draw_circle(&self, canvas: &mut RgbImage, radius: f64) {
        let cx = canvas.width() as f64 / 2.0;
        let cy = canvas.height() as f64 / 2.0;
        let half = self.line_width as f64 / 2.0;
        let (inner, outer) = ((radius - half).max(0.0), radius + half);

        let y0 = (cy - outer).floor().max(0.0) as u32;
        let y1 = ((cy + outer).ceil() as u32).min(canvas.height());
        let x0 = (cx - outer).floor().max(0.0) as u32;
        let x1 = ((cx + outer).ceil() as u32).min(canvas.width());
        for y in y0..y1 {
            for x in x0..x1 {
                let d = ((x as f64 + 0.5 - cx).powi(2) + (y as f64 + 0.5 - cy).powi(2)).sqrt();
                if d >= inner && d <= outer {
                    canvas.put_pixel(x, y, BUFFER_COLOR);
                }
            }
        }
    }
}

pub fn overlay_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}_overlay.png", stem))
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn blend(base: Rgb<u8>, over: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mix = |a: u8, b: u8| (a as f32 * (1.0 - alpha) + b as f32 * alpha).round() as u8;
    Rgb([mix(base[0], over[0]), mix(base[1], over[1]), mix(base[2], over[2])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::PixelMask;
    use crate::site::{BufferRadius, RadiusTier};

    fn thin(mask_alpha: f32) -> OverlayRenderer {
        OverlayRenderer {
            mask_alpha,
            line_width: 1,
        }
    }

    fn tile(gsd: f64) -> ImageryTile {
        ImageryTile {
            image: RgbImage::from_pixel(100, 100, Rgb([0, 0, 0])),
            provider: "test".to_string(),
            zoom: 18,
            gsd,
            radius: BufferRadius::new(RadiusTier::Primary, 1200),
            fallback: false,
        }
    }

    #[test]
    fn test_box_outline_is_red() {
        let detection = Detection {
            geometry: Geometry::Box(PixelBox::new(10.0, 10.0, 30.0, 30.0)),
            confidence: 0.9,
        };
        // Huge gsd keeps the buffer circle out of the way
        let canvas = OverlayRenderer::default().render(&tile(1000.0), &[detection]);
        assert_eq!(*canvas.get_pixel(10, 20), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(20, 30), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_mask_is_blended_green() {
        let mut data = vec![false; 100 * 100];
        data[50 * 100 + 70] = true;
        let detection = Detection {
            geometry: Geometry::Mask {
                bbox: PixelBox::new(70.0, 50.0, 71.0, 51.0),
                mask: PixelMask::new(100, 100, data),
            },
            confidence: 0.9,
        };
        let canvas = thin(0.5).render(&tile(1000.0), &[detection]);
        // Box outline drawn over the single mask pixel
        assert_eq!(*canvas.get_pixel(70, 50), BOX_COLOR);

        let mut data = vec![false; 100 * 100];
        data[5 * 100 + 5] = true;
        let detection = Detection {
            geometry: Geometry::Mask {
                bbox: PixelBox::new(90.0, 90.0, 95.0, 95.0),
                mask: PixelMask::new(100, 100, data),
            },
            confidence: 0.9,
        };
        let canvas = thin(0.5).render(&tile(1000.0), &[detection]);
        assert_eq!(*canvas.get_pixel(5, 5), Rgb([0, 128, 0]));
    }

    #[test]
    fn test_buffer_circle_radius() {
        // 1200 sqft ≈ 5.9 m; at 0.5 m/px the circle sits ~11.8 px from centre
        let canvas = thin(0.4).render(&tile(0.5), &[]);
        let radius_px = BufferRadius::new(RadiusTier::Primary, 1200).meters() / 0.5;
        let x = (50.0 + radius_px) as u32;
        assert_eq!(*canvas.get_pixel(x, 50), BUFFER_COLOR);
        assert_eq!(*canvas.get_pixel(50, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = OverlayRenderer::default()
            .save(dir.path(), "7", &tile(0.5), &[])
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "7_overlay.png");
        assert!(image::open(&path).is_ok());
    }
}
