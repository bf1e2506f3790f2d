use thiserror::Error;

/// Domain errors using thiserror for structured error handling.
///
/// `ConfigError`, `SiteListError` and `BatchError` are fatal; everything else is
/// recovered per site and encoded into that site's decision record.

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request to {url} failed")]
    Network {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Provider returned HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Provider call exceeded its {0}s timeout")]
    Timeout(u64),

    #[error("Failed to decode tile image")]
    Decode(#[source] image::ImageError),

    #[error("Invalid tile: {0}")]
    InvalidTile(String),

    #[error("Zoom {requested} not supported (max {max})")]
    UnsupportedZoom { requested: u8, max: u8 },

    #[error("No tiles could be downloaded")]
    NoTiles,
}

/// A single provider's failure, kept for the exhaustion report.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

#[derive(Error, Debug)]
pub enum ImageryError {
    #[error("No imagery available at {radius_sqft} sqft after {} provider attempt(s)", .failures.len())]
    NoImageryAvailable {
        radius_sqft: u32,
        failures: Vec<ProviderFailure>,
    },
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Failed to launch detection command {command}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Detection command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("Malformed detection output")]
    MalformedOutput(#[source] serde_json::Error),

    #[error("Failed to stage tile for detection")]
    StagingFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Latitude {0} is outside the Web Mercator range")]
    InvalidLatitude(f64),

    #[error("Longitude {0} is outside [-180, 180]")]
    InvalidLongitude(f64),

    #[error("Zoom level {0} is out of range")]
    InvalidZoom(u8),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}")]
    LoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to save configuration to {path}")]
    SaveFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing credential for provider {provider}")]
    MissingCredential { provider: String },

    #[error("Detection command not found: {0}")]
    DetectorNotFound(String),

    #[error("Failed to create config directory: {path}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SiteListError {
    #[error("Failed to read site list {path}")]
    ReadFailed {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Site list is missing required column: {0}")]
    MissingColumn(&'static str),

    #[error("Row {row}: invalid {field} value {value:?}")]
    InvalidValue {
        row: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to create output directory {path}")]
    OutputDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to write {path}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Result writer thread panicked")]
    WriterPanicked,
}

/// Type alias for application Results using anyhow for context chaining
pub type AppResult<T> = anyhow::Result<T>;
