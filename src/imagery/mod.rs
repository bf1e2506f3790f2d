/// Imagery module
///
/// Acquires a georeferenced raster around a site from a fixed, ordered list
/// of providers.
///
/// ## Architecture
///
/// ```text
/// ProviderChain (first success wins, same request for every tier)
///   ├── esri_world_imagery  (MosaicProvider, XYZ tiles, steps down to z15)
///   ├── google_static_maps  (GoogleStaticProvider, API key)
///   ├── bing_aerial         (MosaicProvider, quadkeys)
///   └── osm_standard        (MosaicProvider, last resort)
/// ```

pub mod chain;
pub mod provider;
pub mod tile;
pub mod tiles;

pub use chain::ProviderChain;
pub use provider::{
    build_provider, GoogleStaticProvider, HttpClient, ImageryProvider, MosaicProvider, ProviderImage,
};
pub use tile::{is_placeholder, ImageryTile};
