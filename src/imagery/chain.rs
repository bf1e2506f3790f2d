/// Provider chain
///
/// Tries providers in priority order with the same request, never retrying a
/// provider, and stops at the first usable tile.
use super::provider::{build_provider, ImageryProvider};
use super::tile::{is_placeholder, ImageryTile};
use crate::config::ImageryConfig;
use crate::error::{ConfigError, ImageryError, ProviderError, ProviderFailure};
use crate::quantify::ground_sampling_distance;
use crate::site::{FetchRequest, RadiusTier};

pub struct ProviderChain {
    providers: Vec<Box<dyn ImageryProvider>>,
}

impl ProviderChain {
    /// Providers in priority order; index 0 is the primary tier.
    pub fn new(providers: Vec<Box<dyn ImageryProvider>>) -> Self {
        Self { providers }
    }

    pub fn from_config(config: &ImageryConfig) -> Result<Self, ConfigError> {
        let providers = config
            .providers
            .iter()
            .map(|p| build_provider(p, config))
            .collect::<Result<Vec<_>, _>>()?;
        let chain = Self::new(providers);
        tracing::info!("✓ Imagery providers: {}", chain.provider_names().join(" → "));
        Ok(chain)
    }

    /// Provider names in priority order
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// First usable tile, or `NoImageryAvailable` with every provider's failure.
    pub fn fetch(&self, request: &FetchRequest) -> Result<ImageryTile, ImageryError> {
        let mut failures = Vec::new();

        for (tier, provider) in self.providers.iter().enumerate() {
            tracing::debug!(
                provider = provider.name(),
                radius_sqft = request.radius.sqft,
                zoom = request.zoom,
                "Requesting imagery"
            );

            let result = provider.fetch(request).and_then(|served| {
                let image = &served.image;
                if image.width() == 0 || image.height() == 0 {
                    Err(ProviderError::InvalidTile("empty image".to_string()))
                } else if is_placeholder(image) {
                    Err(ProviderError::InvalidTile("no-data placeholder".to_string()))
                } else {
                    let gsd = scale_at(request, served.zoom)?;
                    Ok((served, gsd))
                }
            });

            match result {
                Ok((served, gsd)) => {
                    tracing::info!(
                        provider = provider.name(),
                        radius_sqft = request.radius.sqft,
                        "✓ Imagery {}x{} at zoom {}",
                        served.image.width(),
                        served.image.height(),
                        served.zoom
                    );
                    return Ok(ImageryTile {
                        image: served.image,
                        provider: provider.name().to_string(),
                        zoom: served.zoom,
                        gsd,
                        radius: request.radius,
                        fallback: tier > 0 || request.radius.tier == RadiusTier::Secondary,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        provider = provider.name(),
                        radius_sqft = request.radius.sqft,
                        "Provider failed: {}",
                        error
                    );
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        error,
                    });
                }
            }
        }

        Err(ImageryError::NoImageryAvailable {
            radius_sqft: request.radius.sqft,
            failures,
        })
    }
}

/// Meters per pixel of an image served at `zoom` for this request
fn scale_at(request: &FetchRequest, zoom: u8) -> Result<f64, ProviderError> {
    if zoom == request.zoom {
        return Ok(request.gsd);
    }
    ground_sampling_distance(request.site.lat, zoom)
        .map_err(|e| ProviderError::InvalidTile(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::ProviderImage;
    use crate::site::{BufferRadius, SampleId, Site};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behaviour {
        Fail,
        Placeholder,
        Succeed,
        SteppedDown(u8),
    }

    struct StubProvider {
        name: &'static str,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    impl ImageryProvider for StubProvider {
        fn fetch(&self, request: &FetchRequest) -> Result<ProviderImage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let textured = || RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 90]));
            match self.behaviour {
                Behaviour::Fail => Err(ProviderError::RateLimited),
                Behaviour::Placeholder => Ok(ProviderImage::new(
                    RgbImage::from_pixel(8, 8, Rgb([200, 200, 200])),
                    request.zoom,
                )),
                Behaviour::Succeed => Ok(ProviderImage::new(textured(), request.zoom)),
                Behaviour::SteppedDown(zoom) => Ok(ProviderImage::new(textured(), zoom)),
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn chain(behaviours: Vec<Behaviour>) -> (ProviderChain, Vec<Arc<AtomicUsize>>) {
        let names = ["first", "second", "third", "fourth"];
        let mut counters = Vec::new();
        let providers = behaviours
            .into_iter()
            .zip(names)
            .map(|(behaviour, name)| {
                let calls = Arc::new(AtomicUsize::new(0));
                counters.push(calls.clone());
                Box::new(StubProvider {
                    name,
                    behaviour,
                    calls,
                }) as Box<dyn ImageryProvider>
            })
            .collect();
        (ProviderChain::new(providers), counters)
    }

    fn site() -> Site {
        Site::new(SampleId::Int(1), 40.7128, -74.006)
    }

    fn request(site: &Site, tier: RadiusTier) -> FetchRequest<'_> {
        let sqft = if tier == RadiusTier::Primary { 1200 } else { 2400 };
        FetchRequest::new(site, BufferRadius::new(tier, sqft), 18, 640).unwrap()
    }

    #[test]
    fn test_primary_provider_wins() {
        let (chain, calls) = chain(vec![Behaviour::Succeed, Behaviour::Succeed]);
        let site = site();
        let tile = chain.fetch(&request(&site, RadiusTier::Primary)).unwrap();
        assert_eq!(tile.provider, "first");
        assert!(!tile.fallback);
        assert_eq!(calls[1].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_falls_through_to_fourth() {
        let (chain, calls) = chain(vec![
            Behaviour::Fail,
            Behaviour::Placeholder,
            Behaviour::Fail,
            Behaviour::Succeed,
        ]);
        let site = site();
        let tile = chain.fetch(&request(&site, RadiusTier::Primary)).unwrap();
        assert_eq!(tile.provider, "fourth");
        assert!(tile.fallback);
        assert_eq!(tile.zoom, 18);
        for counter in &calls {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_tile_reports_served_zoom() {
        let (chain, _) = chain(vec![Behaviour::SteppedDown(16)]);
        let site = site();
        let request = request(&site, RadiusTier::Primary);
        let tile = chain.fetch(&request).unwrap();

        assert_eq!(tile.zoom, 16);
        // Two zoom levels down, four times the meters per pixel
        assert!((tile.gsd / request.gsd - 4.0).abs() < 1e-9);
        assert_eq!(tile.gsd, ground_sampling_distance(site.lat, 16).unwrap());
    }

    #[test]
    fn test_provider_names_in_order() {
        let (chain, _) = chain(vec![Behaviour::Fail, Behaviour::Succeed]);
        assert_eq!(chain.provider_names(), vec!["first", "second"]);
    }

    #[test]
    fn test_secondary_radius_is_fallback() {
        let (chain, _) = chain(vec![Behaviour::Succeed]);
        let site = site();
        let tile = chain.fetch(&request(&site, RadiusTier::Secondary)).unwrap();
        assert_eq!(tile.provider, "first");
        assert!(tile.fallback);
        assert_eq!(tile.radius.sqft, 2400);
    }

    #[test]
    fn test_exhaustion_reports_each_failure() {
        let (chain, _) = chain(vec![Behaviour::Fail, Behaviour::Placeholder]);
        let site = site();
        match chain.fetch(&request(&site, RadiusTier::Primary)) {
            Err(ImageryError::NoImageryAvailable {
                radius_sqft,
                failures,
            }) => {
                assert_eq!(radius_sqft, 1200);
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].provider, "first");
                assert!(matches!(failures[1].error, ProviderError::InvalidTile(_)));
            }
            Ok(tile) => panic!("unexpected tile from {}", tile.provider),
        }
    }
}
