use crate::detection::RepresentationKind;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// The four imagery sources, in their fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    EsriWorldImagery,
    GoogleStaticMaps,
    BingAerial,
    OsmStandard,
}

impl ProviderKind {
    /// Name recorded in `image_metadata.source`.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::EsriWorldImagery => "esri_world_imagery",
            ProviderKind::GoogleStaticMaps => "google_static_maps",
            ProviderKind::BingAerial => "bing_aerial",
            ProviderKind::OsmStandard => "osm_standard",
        }
    }

    pub fn requires_credential(&self) -> bool {
        matches!(self, ProviderKind::GoogleStaticMaps)
    }

    fn default_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::GoogleStaticMaps => Some("GOOGLE_MAPS_API_KEY"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Deadline for a whole provider call, across all of its HTTP requests
    pub timeout_secs: u64,

    /// Inline credential (takes precedence over `api_key_env`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            timeout_secs: 15,
            api_key: None,
            api_key_env: kind.default_key_env().map(str::to_string),
        }
    }

    /// Resolve the credential from the inline value or the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| self.api_key_env.as_deref().and_then(|name| env::var(name).ok()))
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detections below this confidence are rejected (0.0-1.0)
    pub confidence_threshold: f32,

    /// Overlap (IoU) above which the lower-confidence detection is suppressed
    pub iou_threshold: f32,

    /// External detection program
    pub command: String,

    /// Arguments passed before the tile path
    #[serde(default)]
    pub args: Vec<String>,

    /// What the detection program returns
    pub representation: RepresentationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// First buffer area tried, in square feet
    pub primary_sqft: u32,

    /// Larger buffer area used for the single escalation
    pub secondary_sqft: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcConfig {
    /// Luminance (0-255) at or above which the tile is suspected cloudy
    pub cloud_threshold: f32,

    /// Luminance (0-255) at or below which the tile is suspected shadowed
    pub shadow_threshold: f32,

    /// Fraction of bright or dark pixels that triggers the same checks
    pub max_anomaly_fraction: f32,

    /// Minimum tile width and height in pixels
    pub min_resolution_px: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageryConfig {
    /// Slippy-map zoom level used for every request
    pub zoom: u8,

    /// Edge of the square tile handed to detection, in pixels
    pub tile_px: u32,

    /// User-Agent header sent to tile servers
    pub user_agent: String,

    /// Providers in priority order
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Upper bound on sites processed at once
    pub max_parallel_sites: usize,

    /// Write `<id>_overlay.png` next to each record
    pub render_overlays: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub buffers: BufferConfig,
    pub qc: QcConfig,
    pub imagery: ImageryConfig,
    pub batch: BatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig {
                confidence_threshold: 0.25,
                iou_threshold: 0.45,
                command: "solar-detect".to_string(),
                args: vec!["--weights".to_string(), "solar_model.pt".to_string()],
                representation: RepresentationKind::Mask,
            },
            buffers: BufferConfig {
                primary_sqft: 1200,
                secondary_sqft: 2400,
            },
            qc: QcConfig {
                cloud_threshold: 220.0,
                shadow_threshold: 40.0,
                max_anomaly_fraction: 0.4,
                min_resolution_px: 300,
            },
            imagery: ImageryConfig {
                zoom: 18,
                tile_px: 640,
                user_agent: format!("pv-verify/{}", env!("CARGO_PKG_VERSION")),
                providers: vec![
                    ProviderConfig::new(ProviderKind::EsriWorldImagery),
                    ProviderConfig::new(ProviderKind::GoogleStaticMaps),
                    ProviderConfig::new(ProviderKind::BingAerial),
                    ProviderConfig::new(ProviderKind::OsmStandard),
                ],
            },
            batch: BatchConfig {
                max_parallel_sites: 4,
                render_overlays: true,
            },
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location next to
    /// the executable. The default file is created if it doesn't exist; an
    /// explicit path must exist.
    ///
    /// The loaded configuration is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default_path = Self::default_path()?;
                if default_path.exists() {
                    Self::read(&default_path)?
                } else {
                    let config = Config::default();
                    config.save(&default_path)?;
                    tracing::info!("✓ Created default config at: {}", default_path.display());
                    config
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let load_failed = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::LoadFailed {
            path: path.display().to_string(),
            source,
        };
        let content = fs::read_to_string(path).map_err(|e| load_failed(Box::new(e)))?;
        let config: Config = serde_json::from_str(&content).map_err(|e| load_failed(Box::new(e)))?;
        tracing::info!("✓ Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::DirectoryCreationFailed {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let save_failed = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::SaveFailed {
            path: path.display().to_string(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| save_failed(Box::new(e)))?;
        fs::write(path, json).map_err(|e| save_failed(Box::new(e)))?;
        Ok(())
    }

    /// Get the default config file path (in app's base directory)
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let exe_path = env::current_exe().map_err(|e| {
            ConfigError::Invalid(format!("could not locate executable: {}", e))
        })?;
        let exe_dir = exe_path
            .parent()
            .ok_or_else(|| ConfigError::Invalid("could not determine executable directory".into()))?;

        Ok(exe_dir.join("config").join("config.json"))
    }

    /// Check thresholds, radii and provider credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                d.confidence_threshold
            ));
        }
        if !(d.iou_threshold > 0.0 && d.iou_threshold <= 1.0) {
            return invalid(format!(
                "iou_threshold must be within (0, 1], got {}",
                d.iou_threshold
            ));
        }
        if d.command.trim().is_empty() {
            return invalid("detection command is empty".into());
        }

        let b = &self.buffers;
        if b.primary_sqft == 0 || b.primary_sqft >= b.secondary_sqft {
            return invalid(format!(
                "buffer radii must satisfy 0 < primary < secondary, got {} / {}",
                b.primary_sqft, b.secondary_sqft
            ));
        }

        let q = &self.qc;
        let luminance = 0.0..=255.0;
        if !luminance.contains(&q.cloud_threshold) || !luminance.contains(&q.shadow_threshold) {
            return invalid("brightness thresholds must be within [0, 255]".into());
        }
        if q.shadow_threshold >= q.cloud_threshold {
            return invalid(format!(
                "shadow_threshold ({}) must be below cloud_threshold ({})",
                q.shadow_threshold, q.cloud_threshold
            ));
        }
        if !(q.max_anomaly_fraction > 0.0 && q.max_anomaly_fraction <= 1.0) {
            return invalid(format!(
                "max_anomaly_fraction must be within (0, 1], got {}",
                q.max_anomaly_fraction
            ));
        }

        let i = &self.imagery;
        if !(1..=21).contains(&i.zoom) {
            return invalid(format!("zoom must be within 1..=21, got {}", i.zoom));
        }
        if !(256..=768).contains(&i.tile_px) {
            return invalid(format!("tile_px must be within 256..=768, got {}", i.tile_px));
        }
        if i.providers.is_empty() {
            return invalid("at least one imagery provider is required".into());
        }
        let mut seen = HashSet::new();
        for provider in &i.providers {
            if !seen.insert(provider.kind) {
                return invalid(format!("provider {} listed twice", provider.kind.name()));
            }
            if provider.timeout_secs == 0 {
                return invalid(format!("provider {} has a zero timeout", provider.kind.name()));
            }
            if provider.kind.requires_credential() && provider.resolve_api_key().is_none() {
                return Err(ConfigError::MissingCredential {
                    provider: provider.kind.name().to_string(),
                });
            }
        }

        if self.batch.max_parallel_sites == 0 {
            return invalid("max_parallel_sites must be at least 1".into());
        }

        Ok(())
    }
}
