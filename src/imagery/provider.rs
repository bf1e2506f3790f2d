/// Imagery providers
///
/// One uniform capability, `fetch(request) -> image`, implemented by the
/// three slippy-tile mosaics and Google Static Maps. Every call runs under
/// its own deadline shared by all of its HTTP requests.
use super::tile::is_placeholder;
use super::tiles::{self, TileCoord};
use crate::config::{ImageryConfig, ProviderConfig, ProviderKind};
use crate::error::{ConfigError, ProviderError};
use crate::site::FetchRequest;
use image::RgbImage;
use std::io::Read;
use std::time::{Duration, Instant};

/// Responses larger than this are not tiles
const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;

const ESRI_URL: &str =
    "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile";
const GOOGLE_STATIC_URL: &str = "https://maps.googleapis.com/maps/api/staticmap";
const BING_AERIAL_URL: &str = "https://ecn.t0.tiles.virtualearth.net/tiles";
const OSM_URL: &str = "https://tile.openstreetmap.org";

/// Lowest zoom Esri steps down to when the requested zoom has no coverage
pub const ESRI_MIN_ZOOM: u8 = 15;

/// An image as served, with the zoom it was actually taken at
#[derive(Debug, Clone)]
pub struct ProviderImage {
    pub image: RgbImage,
    pub zoom: u8,
}

impl ProviderImage {
    pub fn new(image: RgbImage, zoom: u8) -> Self {
        Self { image, zoom }
    }
}

/// Provider trait
///
/// Implementations are shared read-only across worker threads.
pub trait ImageryProvider: Send + Sync {
    /// Fetch the image for a request. The returned zoom may be lower than
    /// the requested one when the provider had to step down.
    fn fetch(&self, request: &FetchRequest) -> Result<ProviderImage, ProviderError>;

    /// Provider name (recorded as the imagery source)
    fn name(&self) -> &str;
}

/// Blocking HTTP client for image downloads
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    user_agent: String,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            user_agent: user_agent.to_string(),
            timeout,
        }
    }

    /// Start the deadline for one provider call
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// GET an image. `url` is reported in errors; `query` is not, since it
    /// may carry credentials.
    pub fn get_image(
        &self,
        url: &str,
        query: &[(&str, &str)],
        deadline: Instant,
    ) -> Result<RgbImage, ProviderError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProviderError::Timeout(self.timeout.as_secs()));
        }

        let mut request = self
            .agent
            .get(url)
            .set("User-Agent", &self.user_agent)
            .timeout(remaining);
        for (key, value) in query {
            request = request.query(key, value);
        }

        let response = match request.call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(429, _)) => return Err(ProviderError::RateLimited),
            Err(ureq::Error::Status(status, _)) => {
                return Err(ProviderError::Status {
                    url: url.to_string(),
                    status,
                })
            }
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(ProviderError::Timeout(self.timeout.as_secs()));
                }
                return Err(ProviderError::Network {
                    url: url.to_string(),
                    source: e.to_string().into(),
                });
            }
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| ProviderError::Network {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let image = image::load_from_memory(&bytes).map_err(ProviderError::Decode)?;
        Ok(image.to_rgb8())
    }
}

/// Call `attempt` from `start` down to `floor` and keep the first image that
/// is not a no-data placeholder. Rate limiting and timeouts end the descent.
pub fn descend_zoom<F>(start: u8, floor: u8, mut attempt: F) -> Result<ProviderImage, ProviderError>
where
    F: FnMut(u8) -> Result<RgbImage, ProviderError>,
{
    let mut last_error = ProviderError::NoTiles;
    for zoom in (floor.min(start)..=start).rev() {
        match attempt(zoom) {
            Ok(image) if !is_placeholder(&image) => return Ok(ProviderImage::new(image, zoom)),
            Ok(_) => {
                tracing::debug!(zoom, "No coverage, stepping down");
                last_error = ProviderError::InvalidTile(format!("no-data placeholder at zoom {}", zoom));
            }
            Err(e @ (ProviderError::RateLimited | ProviderError::Timeout(_))) => return Err(e),
            Err(e) => {
                tracing::debug!(zoom, "Zoom failed: {}", e);
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// 3×3 slippy-tile mosaic (Esri, Bing, OSM)
pub struct MosaicProvider {
    kind: ProviderKind,
    client: HttpClient,
}

impl MosaicProvider {
    pub fn new(kind: ProviderKind, client: HttpClient) -> Self {
        Self { kind, client }
    }

    fn max_zoom(&self) -> u8 {
        match self.kind {
            ProviderKind::EsriWorldImagery => 20,
            _ => 19,
        }
    }

    /// Lowest zoom tried. Only Esri steps down.
    fn min_zoom(&self, requested: u8) -> u8 {
        match self.kind {
            ProviderKind::EsriWorldImagery => ESRI_MIN_ZOOM,
            _ => requested,
        }
    }

    fn tile_url(&self, tile: TileCoord) -> String {
        match self.kind {
            ProviderKind::EsriWorldImagery => {
                format!("{}/{}/{}/{}", ESRI_URL, tile.z, tile.y, tile.x)
            }
            ProviderKind::BingAerial => {
                format!("{}/a{}.jpeg?g=1", BING_AERIAL_URL, tiles::quadkey(tile))
            }
            _ => format!("{}/{}/{}/{}.png", OSM_URL, tile.z, tile.x, tile.y),
        }
    }

    fn mosaic(
        &self,
        request: &FetchRequest,
        zoom: u8,
        deadline: Instant,
    ) -> Result<RgbImage, ProviderError> {
        let plan = tiles::plan_mosaic(request.site.lat, request.site.lon, zoom);

        let mut fetched = Vec::with_capacity(plan.tiles.len());
        let mut last_error = None;
        for (slot, tile) in &plan.tiles {
            match self.client.get_image(&self.tile_url(*tile), &[], deadline) {
                Ok(image) => fetched.push((*slot, image)),
                // Rate limiting and timeouts apply to the remaining tiles too
                Err(e @ (ProviderError::RateLimited | ProviderError::Timeout(_))) => return Err(e),
                Err(e) => {
                    tracing::debug!(provider = self.name(), "Tile {}/{}/{} failed: {}", tile.z, tile.x, tile.y, e);
                    last_error = Some(e);
                }
            }
        }

        if fetched.is_empty() {
            return Err(last_error.unwrap_or(ProviderError::NoTiles));
        }
        if fetched.len() < plan.tiles.len() {
            tracing::warn!(
                provider = self.name(),
                "Only {}/{} tiles downloaded",
                fetched.len(),
                plan.tiles.len()
            );
        }

        Ok(tiles::assemble(&plan, &fetched, request.tile_px))
    }
}

impl ImageryProvider for MosaicProvider {
    fn fetch(&self, request: &FetchRequest) -> Result<ProviderImage, ProviderError> {
        if request.zoom > self.max_zoom() {
            return Err(ProviderError::UnsupportedZoom {
                requested: request.zoom,
                max: self.max_zoom(),
            });
        }

        let deadline = self.client.deadline();
        let served = descend_zoom(request.zoom, self.min_zoom(request.zoom), |zoom| {
            self.mosaic(request, zoom, deadline)
        })?;
        if served.zoom < request.zoom {
            tracing::info!(
                provider = self.name(),
                "No coverage at zoom {}, using zoom {}",
                request.zoom,
                served.zoom
            );
        }
        Ok(served)
    }

    fn name(&self) -> &str {
        self.kind.name()
    }
}

/// Google Static Maps satellite imagery
pub struct GoogleStaticProvider {
    api_key: String,
    client: HttpClient,
}

impl GoogleStaticProvider {
    pub const MAX_ZOOM: u8 = 20;

    pub fn new(api_key: String, client: HttpClient) -> Self {
        Self { api_key, client }
    }
}

impl ImageryProvider for GoogleStaticProvider {
    fn fetch(&self, request: &FetchRequest) -> Result<ProviderImage, ProviderError> {
        if request.zoom > Self::MAX_ZOOM {
            return Err(ProviderError::UnsupportedZoom {
                requested: request.zoom,
                max: Self::MAX_ZOOM,
            });
        }

        // The Static Maps API caps size at 640 per side
        let edge = request.tile_px.min(640);
        let center = format!("{},{}", request.site.lat, request.site.lon);
        let zoom = request.zoom.to_string();
        let size = format!("{}x{}", edge, edge);
        let query = [
            ("center", center.as_str()),
            ("zoom", zoom.as_str()),
            ("size", size.as_str()),
            ("maptype", "satellite"),
            ("key", self.api_key.as_str()),
        ];
        let image = self
            .client
            .get_image(GOOGLE_STATIC_URL, &query, self.client.deadline())?;
        Ok(ProviderImage::new(image, request.zoom))
    }

    fn name(&self) -> &str {
        ProviderKind::GoogleStaticMaps.name()
    }
}

/// Build one provider from its configuration.
pub fn build_provider(
    provider: &ProviderConfig,
    imagery: &ImageryConfig,
) -> Result<Box<dyn ImageryProvider>, ConfigError> {
    let client = HttpClient::new(&imagery.user_agent, Duration::from_secs(provider.timeout_secs));
    match provider.kind {
        ProviderKind::GoogleStaticMaps => {
            let api_key = provider
                .resolve_api_key()
                .ok_or_else(|| ConfigError::MissingCredential {
                    provider: provider.kind.name().to_string(),
                })?;
            Ok(Box::new(GoogleStaticProvider::new(api_key, client)))
        }
        kind => Ok(Box::new(MosaicProvider::new(kind, client))),
    }
}
