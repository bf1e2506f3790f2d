/// Slippy-map tile math and 3×3 mosaic assembly.
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

pub const TILE_SIZE: u32 = 256;

/// Canvas holding the 3×3 block around the center tile
pub const MOSAIC_SIZE: u32 = TILE_SIZE * 3;

/// Fill for tiles that could not be downloaded
pub const PLACEHOLDER_GREY: Rgb<u8> = Rgb([200, 200, 200]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

/// Fractional tile position of a coordinate (Web Mercator).
pub fn tile_fraction(lat_deg: f64, lon_deg: f64, zoom: u8) -> (f64, f64) {
    let n = 2f64.powi(zoom as i32);
    let lat = lat_deg.to_radians();
    let x = (lon_deg + 180.0) / 360.0 * n;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * n;
    (x, y)
}

/// Bing quadkey for a tile.
pub fn quadkey(tile: TileCoord) -> String {
    (1..=tile.z)
        .rev()
        .map(|i| {
            let mask = 1u32 << (i - 1);
            let mut digit = 0u8;
            if tile.x & mask != 0 {
                digit += 1;
            }
            if tile.y & mask != 0 {
                digit += 2;
            }
            char::from(b'0' + digit)
        })
        .collect()
}

/// Which tiles make up the mosaic and where the site falls in it.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicPlan {
    /// In-range tiles with their (column, row) slot in the 3×3 grid
    pub tiles: Vec<((u32, u32), TileCoord)>,
    /// Site position in canvas pixels
    pub center_px: (u32, u32),
}

pub fn plan_mosaic(lat_deg: f64, lon_deg: f64, zoom: u8) -> MosaicPlan {
    let (fx, fy) = tile_fraction(lat_deg, lon_deg, zoom);
    let n = 1i64 << zoom;
    let (cx, cy) = (fx.floor() as i64, fy.floor() as i64);

    let mut tiles = Vec::with_capacity(9);
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            let (x, y) = (cx + dx, cy + dy);
            if x < 0 || y < 0 || x >= n || y >= n {
                tracing::debug!("Tile {}/{}/{} out of range, skipping", zoom, x, y);
                continue;
            }
            tiles.push((
                ((dx + 1) as u32, (dy + 1) as u32),
                TileCoord {
                    x: x as u32,
                    y: y as u32,
                    z: zoom,
                },
            ));
        }
    }

    let offset_x = ((fx - cx as f64) * TILE_SIZE as f64) as u32;
    let offset_y = ((fy - cy as f64) * TILE_SIZE as f64) as u32;
    MosaicPlan {
        tiles,
        center_px: (TILE_SIZE + offset_x, TILE_SIZE + offset_y),
    }
}

/// Paste downloaded tiles onto a grey canvas and crop `out_px` square
/// around the site, clamped to the canvas.
pub fn assemble(plan: &MosaicPlan, fetched: &[((u32, u32), RgbImage)], out_px: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(MOSAIC_SIZE, MOSAIC_SIZE, PLACEHOLDER_GREY);
    for ((col, row), tile) in fetched {
        let x = (*col * TILE_SIZE) as i64;
        let y = (*row * TILE_SIZE) as i64;
        if tile.dimensions() == (TILE_SIZE, TILE_SIZE) {
            imageops::replace(&mut canvas, tile, x, y);
        } else {
            let resized = imageops::resize(tile, TILE_SIZE, TILE_SIZE, FilterType::Triangle);
            imageops::replace(&mut canvas, &resized, x, y);
        }
    }

    let out_px = out_px.min(MOSAIC_SIZE);
    let max_origin = MOSAIC_SIZE - out_px;
    let left = plan.center_px.0.saturating_sub(out_px / 2).min(max_origin);
    let top = plan.center_px.1.saturating_sub(out_px / 2).min(max_origin);
    imageops::crop_imm(&canvas, left, top, out_px, out_px).to_image()
}
