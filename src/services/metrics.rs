use axum::http::StatusCode;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Process-local prometheus registry exposed on `/metrics`.
#[derive(Clone)]
pub struct MetricsService {
    registry: Registry,
    http_responses: IntCounterVec,
    request_duration: HistogramVec,
    listings_created: IntCounter,
    listings_deleted: IntCounter,
    favorites_toggled: IntCounterVec,
    sweeper_deleted: IntCounter,
    sweeper_files_removed: IntCounter,
    sweeper_failures: IntCounter,
    ai_requests: IntCounterVec,
}

impl MetricsService {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_responses = IntCounterVec::new(
            Opts::new("http_responses_total", "HTTP responses by method and status class"),
            &["method", "class"],
        )
        .map_err(internal)?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency"),
            &["method"],
        )
        .map_err(internal)?;
        let listings_created = IntCounter::new("listings_created_total", "Listings created")
            .map_err(internal)?;
        let listings_deleted = IntCounter::new("listings_deleted_total", "Listings deleted by users")
            .map_err(internal)?;
        let favorites_toggled = IntCounterVec::new(
            Opts::new("favorites_toggled_total", "Favorite toggles by resulting state"),
            &["state"],
        )
        .map_err(internal)?;
        let sweeper_deleted = IntCounter::new(
            "sweeper_listings_deleted_total",
            "Expired listings removed by the sweeper",
        )
        .map_err(internal)?;
        let sweeper_files_removed = IntCounter::new(
            "sweeper_files_removed_total",
            "Image files removed by the sweeper",
        )
        .map_err(internal)?;
        let sweeper_failures = IntCounter::new(
            "sweeper_failures_total",
            "Per-listing failures seen by the sweeper",
        )
        .map_err(internal)?;
        let ai_requests = IntCounterVec::new(
            Opts::new("ai_requests_total", "AI gateway calls by operation and outcome"),
            &["operation", "outcome"],
        )
        .map_err(internal)?;

        registry.register(Box::new(http_responses.clone())).map_err(internal)?;
        registry.register(Box::new(request_duration.clone())).map_err(internal)?;
        registry.register(Box::new(listings_created.clone())).map_err(internal)?;
        registry.register(Box::new(listings_deleted.clone())).map_err(internal)?;
        registry.register(Box::new(favorites_toggled.clone())).map_err(internal)?;
        registry.register(Box::new(sweeper_deleted.clone())).map_err(internal)?;
        registry.register(Box::new(sweeper_files_removed.clone())).map_err(internal)?;
        registry.register(Box::new(sweeper_failures.clone())).map_err(internal)?;
        registry.register(Box::new(ai_requests.clone())).map_err(internal)?;

        Ok(Self {
            registry,
            http_responses,
            request_duration,
            listings_created,
            listings_deleted,
            favorites_toggled,
            sweeper_deleted,
            sweeper_files_removed,
            sweeper_failures,
            ai_requests,
        })
    }

    pub fn record_response(&self, method: &str, status: StatusCode, elapsed: Duration) {
        let class = match status.as_u16() {
            100..=199 => "1xx",
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };
        self.http_responses.with_label_values(&[method, class]).inc();
        self.request_duration
            .with_label_values(&[method])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_listing_created(&self) {
        self.listings_created.inc();
    }

    pub fn record_listing_deleted(&self) {
        self.listings_deleted.inc();
    }

    pub fn record_favorite_toggle(&self, favorited: bool) {
        let state = if favorited { "added" } else { "removed" };
        self.favorites_toggled.with_label_values(&[state]).inc();
    }

    pub fn record_sweep(&self, deleted: u64, files_removed: u64, failures: u64) {
        self.sweeper_deleted.inc_by(deleted);
        self.sweeper_files_removed.inc_by(files_removed);
        self.sweeper_failures.inc_by(failures);
    }

    pub fn record_ai_request(&self, operation: &str, outcome: &str) {
        self.ai_requests.with_label_values(&[operation, outcome]).inc();
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(internal)?;
        String::from_utf8(buffer).map_err(|e| AppError::Internal(e.into()))
    }
}

fn internal(err: prometheus::Error) -> AppError {
    AppError::Internal(anyhow::Error::new(err))
}
