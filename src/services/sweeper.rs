//! Removal of expired listings.
//!
//! One pass runs inside a single transaction that holds the write lock from
//! the start. Each listing gets its own savepoint, so a listing whose rows
//! cannot be deleted is rolled back alone while the rest of the batch still
//! commits. Image files are removed only for listings whose rows were
//! committed, after the lock is released; a missing file is skipped, and a
//! file that cannot be removed is reported.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::Connection;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::{
    database::{queries::CarQueries, Database},
    errors::Result,
    services::{listings::image_keys, metrics::MetricsService},
    storage::Storage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStage {
    Files,
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub car_id: i64,
    pub stage: SweepStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: u64,
    pub files_removed: u64,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.deleted == 0 && self.files_removed == 0 && self.failures.is_empty()
    }
}

pub struct ExpirationSweeper {
    database: Database,
    storage: Arc<dyn Storage>,
    retention: Duration,
    metrics: Option<MetricsService>,
}

impl ExpirationSweeper {
    pub fn new(database: Database, storage: Arc<dyn Storage>, retention_days: i64) -> Self {
        Self {
            database,
            storage,
            retention: Duration::days(retention_days),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsService) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    pub async fn run(&self) -> Result<SweepReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweep_before(self.cutoff(now)).await
    }

    /// Deletes every listing created strictly before `cutoff`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut tx = self.database.begin_immediate().await?;

        let expired = CarQueries::list_created_before(&mut *tx, cutoff).await?;
        if expired.is_empty() {
            tracing::debug!("no expired listings");
            return Ok(report);
        }

        let mut released: Vec<(i64, Vec<String>)> = Vec::with_capacity(expired.len());
        for car in expired {
            let mut savepoint = (&mut *tx).begin().await?;

            let deleted = match image_keys(&mut savepoint, &car).await {
                Ok(keys) => CarQueries::delete_cascade(&mut savepoint, car.id)
                    .await
                    .map(|_| keys),
                Err(e) => Err(e),
            };

            match deleted {
                Ok(keys) => {
                    savepoint.commit().await?;
                    released.push((car.id, keys));
                }
                Err(e) => {
                    tracing::error!(car_id = car.id, "failed to delete expired listing: {}", e);
                    savepoint.rollback().await?;
                    report.failures.push(SweepFailure {
                        car_id: car.id,
                        stage: SweepStage::Record,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tx.commit().await?;
        report.deleted = released.len() as u64;

        for (car_id, keys) in released {
            for key in &keys {
                match self.storage.delete(key).await {
                    Ok(true) => report.files_removed += 1,
                    Ok(false) => tracing::debug!(car_id, %key, "image file already absent"),
                    Err(e) => {
                        tracing::warn!(car_id, %key, "failed to remove image file: {}", e);
                        report.failures.push(SweepFailure {
                            car_id,
                            stage: SweepStage::Files,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            deleted = report.deleted,
            files_removed = report.files_removed,
            failures = report.failures.len(),
            "expired listings swept"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(
                report.deleted,
                report.files_removed,
                report.failures.len() as u64,
            );
        }
        Ok(report)
    }

    /// Runs a pass every `period` until the runtime shuts down. The first
    /// pass starts immediately.
    pub fn spawn(self: Arc<Self>, period: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(e) = self.run().await {
                    tracing::error!("expiration sweep failed: {}", e);
                }
            }
        })
    }
}
