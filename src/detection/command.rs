/// External-process detection backend
///
/// The tile is written as a PNG and its path appended to the configured
/// command line. The program prints JSON on stdout:
///
/// ```text
/// {"detections": [
///   {"box": [x1, y1, x2, y2], "conf": 0.91,
///    "mask": {"width": 640, "height": 640, "counts": [1200, 35, 605, ...]}}
/// ]}
/// ```
///
/// `mask` is optional. `counts` is a row-major run-length encoding that
/// starts with a run of unset pixels.
use super::detector::{
    DetectionModel, Geometry, PixelBox, PixelMask, RawDetection, RepresentationKind,
};
use crate::config::DetectionConfig;
use crate::error::{ConfigError, DetectionError};
use image::RgbImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

static STAGED_TILES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize)]
struct CommandOutput {
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(rename = "box")]
    bbox: [f32; 4],
    conf: f32,
    #[serde(default)]
    mask: Option<WireMask>,
}

#[derive(Debug, Deserialize)]
struct WireMask {
    width: u32,
    height: u32,
    counts: Vec<u32>,
}

pub struct CommandModel {
    program: PathBuf,
    args: Vec<String>,
    representation: RepresentationKind,
    staging_dir: PathBuf,
}

impl CommandModel {
    /// Resolve the detection program once; a missing program is a
    /// start-up error.
    pub fn new(config: &DetectionConfig) -> Result<Self, ConfigError> {
        let program = resolve_program(&config.command)
            .ok_or_else(|| ConfigError::DetectorNotFound(config.command.clone()))?;
        tracing::info!(
            "✓ Detection command: {} {}",
            program.display(),
            config.args.join(" ")
        );

        Ok(Self {
            program,
            args: config.args.clone(),
            representation: config.representation,
            staging_dir: std::env::temp_dir(),
        })
    }

    fn stage(&self, image: &RgbImage) -> Result<PathBuf, DetectionError> {
        let n = STAGED_TILES.fetch_add(1, Ordering::Relaxed);
        let path = self
            .staging_dir
            .join(format!("pv-verify-{}-{}.png", std::process::id(), n));
        image
            .save(&path)
            .map_err(|e| DetectionError::StagingFailed(Box::new(e)))?;
        Ok(path)
    }
}

impl DetectionModel for CommandModel {
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectionError> {
        let tile_path = self.stage(image)?;
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&tile_path)
            .output();
        if let Err(e) = std::fs::remove_file(&tile_path) {
            tracing::debug!("Failed to remove staged tile {}: {}", tile_path.display(), e);
        }

        let output = output.map_err(|source| DetectionError::LaunchFailed {
            command: self.program.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(DetectionError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_output(&output.stdout)
    }

    fn representation(&self) -> RepresentationKind {
        self.representation
    }

    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("detector")
    }
}

/// Parse the program's JSON output into raw detections.
pub fn parse_output(stdout: &[u8]) -> Result<Vec<RawDetection>, DetectionError> {
    let parsed: CommandOutput =
        serde_json::from_slice(stdout).map_err(DetectionError::MalformedOutput)?;

    Ok(parsed
        .detections
        .into_iter()
        .map(|d| {
            let [x1, y1, x2, y2] = d.bbox;
            let bbox = PixelBox::new(x1, y1, x2, y2);
            let geometry = match d.mask {
                Some(mask) => Geometry::Mask {
                    bbox,
                    mask: decode_rle(&mask),
                },
                None => Geometry::Box(bbox),
            };
            RawDetection {
                geometry,
                confidence: d.conf,
            }
        })
        .collect())
}

/// A count mismatch leaves the mask invalid, so the adapter drops it.
fn decode_rle(mask: &WireMask) -> PixelMask {
    let expected = mask.width as usize * mask.height as usize;
    let mut data = Vec::with_capacity(expected);
    let mut value = false;
    for &run in &mask.counts {
        let room = (expected + 1).saturating_sub(data.len());
        data.extend(std::iter::repeat(value).take((run as usize).min(room)));
        value = !value;
    }
    PixelMask::new(mask.width, mask.height, data)
}

fn resolve_program(command: &str) -> Option<PathBuf> {
    let direct = Path::new(command);
    if direct.components().count() > 1 || direct.is_absolute() {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}
