/// Site orchestrator
///
/// Sequences one site through imagery acquisition, detection, quantification
/// and QC, and emits exactly one decision record.
///
/// ## State machine
///
/// ```text
/// Start ──▶ FetchPrimary ──ok──▶ Detect ──▶ Quantify ──▶ Qc ──▶ Done
///   │            │                 │  ▲
///   │          fail          empty │  │ ok
///   │            ▼           clean ▼  │
///   │        FetchSecondary ◀──────┘  │
///   │            │  └─────────────────┘
///   │          fail (no primary tile)
///   ▼            ▼
/// Failed ◀───────┘
/// ```
///
/// Only detections reaching into the buffer circle of the current radius
/// count. Escalation to the secondary radius happens at most once, and only
/// when the primary tile had no such detection and would pass QC unflagged.
use crate::config::{BufferConfig, Config};
use crate::detection::{Detection, DetectionAdapter, DetectionModel, Geometry, RepresentationKind};
use crate::error::ConfigError;
use crate::imagery::{ImageryTile, ProviderChain};
use crate::qc::{QcReason, QcResult, QcStatus, QualityController};
use crate::quantify::{self, QuantifiedArea};
use crate::record::{DecisionRecord, ImageMetadata};
use crate::site::{BufferRadius, FetchRequest, RadiusTier, Site};
use std::sync::Arc;

/// Where a site is in its lifecycle
#[derive(Debug)]
pub enum SiteState<'a> {
    /// Coordinates not yet validated
    Start,

    /// Fetching at the primary radius
    FetchPrimary(FetchRequest<'a>),

    /// Fetching at the secondary radius. `previous` holds the primary tile
    /// when this is an escalation rather than a retry after a failed fetch.
    FetchSecondary {
        request: FetchRequest<'a>,
        previous: Option<(ImageryTile, Vec<Detection>)>,
    },

    /// Running detection on a fetched tile
    Detect {
        request: FetchRequest<'a>,
        tile: ImageryTile,
    },

    /// Converting detections to area
    Quantify {
        tile: ImageryTile,
        detections: Vec<Detection>,
    },

    /// Classifying the tile the result was computed from
    Qc {
        tile: ImageryTile,
        detections: Vec<Detection>,
        areas: Vec<QuantifiedArea>,
    },

    /// Record assembled
    Done(Box<SiteOutcome>),

    /// No usable result; the record carries `reason`
    Failed {
        reason: QcReason,
        radius: BufferRadius,
    },
}

impl SiteState<'_> {
    pub fn description(&self) -> &'static str {
        match self {
            SiteState::Start => "Start",
            SiteState::FetchPrimary(_) => "FetchPrimary",
            SiteState::FetchSecondary { .. } => "FetchSecondary",
            SiteState::Detect { .. } => "Detect",
            SiteState::Quantify { .. } => "Quantify",
            SiteState::Qc { .. } => "Qc",
            SiteState::Done(_) => "Done",
            SiteState::Failed { .. } => "Failed",
        }
    }
}

/// Everything a site produced. Only `record` is persisted as data; the tile
/// and detections feed the overlay.
#[derive(Debug)]
pub struct SiteOutcome {
    pub record: DecisionRecord,
    pub tile: Option<ImageryTile>,
    pub detections: Vec<Detection>,
}

/// Radii and tile geometry shared by every site
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub primary: BufferRadius,
    pub secondary: BufferRadius,
    pub zoom: u8,
    pub tile_px: u32,
}

impl OrchestratorSettings {
    pub fn new(buffers: &BufferConfig, zoom: u8, tile_px: u32) -> Self {
        Self {
            primary: BufferRadius::new(RadiusTier::Primary, buffers.primary_sqft),
            secondary: BufferRadius::new(RadiusTier::Secondary, buffers.secondary_sqft),
            zoom,
            tile_px,
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self::new(&config.buffers, config.imagery.zoom, config.imagery.tile_px)
    }
}

/// Runs sites. Holds only read-only state, so one instance is shared by all
/// batch workers.
pub struct SiteOrchestrator {
    chain: ProviderChain,
    adapter: DetectionAdapter,
    qc: QualityController,
    settings: OrchestratorSettings,
}

impl SiteOrchestrator {
    pub fn new(
        chain: ProviderChain,
        adapter: DetectionAdapter,
        qc: QualityController,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            chain,
            adapter,
            qc,
            settings,
        }
    }

    /// Wire the full pipeline from configuration around a loaded model.
    pub fn from_config(config: &Config, model: Arc<dyn DetectionModel>) -> Result<Self, ConfigError> {
        let chain = ProviderChain::from_config(&config.imagery)?;
        let adapter = DetectionAdapter::new(model, (&config.detection).into());
        let qc = QualityController::new(config.qc.clone());
        Ok(Self::new(chain, adapter, qc, config.into()))
    }

    /// Process one site to completion. Never fails: every error path ends in
    /// a record.
    pub fn process(&self, site: &Site) -> SiteOutcome {
        let span = tracing::info_span!("site", id = %site.id);
        let _enter = span.enter();

        let mut state = SiteState::Start;
        loop {
            tracing::trace!(state = state.description(), "Site state");
            state = match state {
                SiteState::Start => self.start(site),
                SiteState::FetchPrimary(request) => match self.chain.fetch(&request) {
                    Ok(tile) => SiteState::Detect { request, tile },
                    Err(e) => {
                        tracing::warn!("{}, retrying at the secondary radius", e);
                        SiteState::FetchSecondary {
                            request: request.with_radius(self.settings.secondary),
                            previous: None,
                        }
                    }
                },
                SiteState::FetchSecondary { request, previous } => {
                    match (self.chain.fetch(&request), previous) {
                        (Ok(tile), _) => SiteState::Detect { request, tile },
                        (Err(e), Some((tile, detections))) => {
                            tracing::warn!("{}, keeping the primary result", e);
                            SiteState::Quantify { tile, detections }
                        }
                        (Err(e), None) => {
                            tracing::warn!("{}", e);
                            SiteState::Failed {
                                reason: QcReason::ImageryUnavailable,
                                radius: request.radius,
                            }
                        }
                    }
                }
                SiteState::Detect { request, tile } => self.detect(request, tile),
                SiteState::Quantify { tile, detections } => {
                    let areas = quantify::quantify(&detections, tile.gsd);
                    SiteState::Qc {
                        tile,
                        detections,
                        areas,
                    }
                }
                SiteState::Qc {
                    tile,
                    detections,
                    areas,
                } => {
                    let qc = self.qc.assess(&tile);
                    SiteState::Done(Box::new(self.finish(site, tile, detections, &areas, qc)))
                }
                SiteState::Done(outcome) => {
                    let r = &outcome.record;
                    tracing::info!(
                        has_solar = r.has_solar,
                        area_sqm = r.pv_area_sqm_est,
                        radius_sqft = r.buffer_radius_sqft,
                        qc = ?r.qc_status,
                        "✓ Site done"
                    );
                    return *outcome;
                }
                SiteState::Failed { reason, radius } => {
                    tracing::warn!(reason = ?reason, radius_sqft = radius.sqft, "Site failed");
                    return self.failed(site, reason, radius);
                }
            };
        }
    }

    fn start<'a>(&self, site: &'a Site) -> SiteState<'a> {
        let s = &self.settings;
        match FetchRequest::new(site, s.primary, s.zoom, s.tile_px) {
            Ok(request) => SiteState::FetchPrimary(request),
            Err(e) => {
                tracing::warn!("Rejected coordinates ({}, {}): {}", site.lat, site.lon, e);
                SiteState::Failed {
                    reason: QcReason::InvalidCoordinates,
                    radius: s.primary,
                }
            }
        }
    }

    fn detect<'a>(&self, request: FetchRequest<'a>, tile: ImageryTile) -> SiteState<'a> {
        let found = self.adapter.infer(&tile.image);
        let total = found.len();
        let (width, height) = tile.image.dimensions();
        let detections =
            quantify::within_buffer(found, width, height, tile.buffer_radius_px());
        tracing::debug!(
            radius_sqft = tile.radius.sqft,
            "{} detection(s) after filtering, {} inside the buffer",
            total,
            detections.len()
        );

        let escalate = detections.is_empty()
            && tile.radius.tier == RadiusTier::Primary
            && self.qc.assess_image(&tile.image, false).status != QcStatus::Flagged;

        if escalate {
            tracing::info!(
                from_sqft = tile.radius.sqft,
                to_sqft = self.settings.secondary.sqft,
                "No panels at primary radius, escalating"
            );
            SiteState::FetchSecondary {
                request: request.with_radius(self.settings.secondary),
                previous: Some((tile, detections)),
            }
        } else {
            SiteState::Quantify { tile, detections }
        }
    }

    fn finish(
        &self,
        site: &Site,
        tile: ImageryTile,
        detections: Vec<Detection>,
        areas: &[QuantifiedArea],
        qc: QcResult,
    ) -> SiteOutcome {
        // Detections are sorted, so the first is the best
        let confidence = detections.first().map(|d| d.confidence);
        let bbox_or_mask = if detections.is_empty() {
            self.adapter.representation()
        } else if detections
            .iter()
            .any(|d| matches!(d.geometry, Geometry::Mask { .. }))
        {
            RepresentationKind::Mask
        } else {
            RepresentationKind::Box
        };

        let record = DecisionRecord {
            sample_id: site.id.clone(),
            lat: site.lat,
            lon: site.lon,
            has_solar: !detections.is_empty(),
            confidence,
            pv_area_sqm_est: quantify::round_area(quantify::total_area(areas)),
            buffer_radius_sqft: tile.radius.sqft,
            qc_status: qc.status,
            qc_reasons: qc.reasons,
            bbox_or_mask,
            image_metadata: Some(ImageMetadata {
                source: tile.provider.clone(),
                zoom: tile.zoom,
                fallback: tile.fallback,
            }),
        };

        SiteOutcome {
            record,
            tile: Some(tile),
            detections,
        }
    }

    fn failed(&self, site: &Site, reason: QcReason, radius: BufferRadius) -> SiteOutcome {
        let qc = QcResult::unverifiable(reason);
        SiteOutcome {
            record: DecisionRecord {
                sample_id: site.id.clone(),
                lat: site.lat,
                lon: site.lon,
                has_solar: false,
                confidence: None,
                pv_area_sqm_est: 0.0,
                buffer_radius_sqft: radius.sqft,
                qc_status: qc.status,
                qc_reasons: qc.reasons,
                bbox_or_mask: self.adapter.representation(),
                image_metadata: None,
            },
            tile: None,
            detections: Vec::new(),
        }
    }
}
