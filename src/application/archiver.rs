//! Archiver - Background service draining the hot store into the archive.
//!
//! Each cycle:
//! 1. Collects events older than the retention window from the hot store
//! 2. Writes them to the archive chunk by chunk
//! 3. Deletes a chunk from the hot store only after its archive write
//!    succeeded
//!
//! A failed cycle is logged and the next one runs on schedule. Archive
//! writes are idempotent, so a chunk stored but not yet deleted is simply
//! stored again next time.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 120s | Time between cycles |
//! | `retention` | 30min | Minimum event age before archiving |
//! | `chunk_size` | 200 | Events per archive write |
//! | `max_events_per_cycle` | 5000 | Upper bound on one cycle's work |

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::domain::foundation::{EventId, Timestamp};
use crate::domain::room_event::StorageEvent;
use crate::ports::{ArchiveError, EventArchive, EventFilter, HotEventStore, HotStoreError};

/// Configuration for the Archiver service.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub interval: Duration,
    pub retention: Duration,
    pub chunk_size: usize,
    pub max_events_per_cycle: usize,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            retention: Duration::from_secs(30 * 60),
            chunk_size: 200,
            max_events_per_cycle: 5000,
        }
    }
}

impl ArchiverConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveCycleReport {
    /// Eligible events found in the hot store.
    pub eligible: usize,
    /// Events newly written to the archive (duplicates excluded).
    pub stored: u64,
    /// Events removed from the hot store.
    pub deleted: u64,
}

/// Why a cycle stopped early.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveCycleError {
    #[error("Hot store: {0}")]
    HotStore(#[from] HotStoreError),

    #[error("Archive: {0}")]
    Archive(#[from] ArchiveError),
}

/// Background service that moves aged events out of the hot tier.
pub struct Archiver {
    hot_store: Arc<dyn HotEventStore>,
    archive: Arc<dyn EventArchive>,
    config: ArchiverConfig,
}

impl Archiver {
    pub fn new(
        hot_store: Arc<dyn HotEventStore>,
        archive: Arc<dyn EventArchive>,
        config: ArchiverConfig,
    ) -> Self {
        Self {
            hot_store,
            archive,
            config,
        }
    }

    /// Run cycles on the configured interval until shutdown is signalled.
    ///
    /// The first cycle runs one interval after start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            hot_store = self.hot_store.name(),
            "Archiver started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Archiver stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report.eligible > 0 => {
                            tracing::info!(
                                eligible = report.eligible,
                                stored = report.stored,
                                deleted = report.deleted,
                                "Archive cycle complete"
                            );
                        }
                        Ok(_) => tracing::debug!("Archive cycle found nothing to move"),
                        Err(e) => tracing::error!(error = %e, "Archive cycle failed"),
                    }
                }
            }
        }
    }

    /// Run exactly one cycle.
    pub async fn run_cycle(&self) -> Result<ArchiveCycleReport, ArchiveCycleError> {
        let cutoff = Timestamp::now().minus_secs(self.config.retention.as_secs());
        let eligible = self.collect_eligible(cutoff).await?;

        let mut report = ArchiveCycleReport {
            eligible: eligible.len(),
            ..Default::default()
        };

        for chunk in eligible.chunks(self.config.chunk_size.max(1)) {
            report.stored += self.archive.store(chunk).await?;

            let ids: Vec<EventId> = chunk.iter().map(|event| event.id).collect();
            report.deleted += self.hot_store.delete(&ids).await?;
        }

        Ok(report)
    }

    /// Collect first and delete afterwards, so deletions never shift the
    /// pages of a scan in progress.
    async fn collect_eligible(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<StorageEvent>, HotStoreError> {
        let max = self.config.max_events_per_cycle.max(1);
        let filter = EventFilter::all().created_before(cutoff);
        let mut chunks = self
            .hot_store
            .scan_matching(filter, self.config.chunk_size);

        let mut eligible = Vec::new();
        while let Some(chunk) = chunks.next().await {
            eligible.extend(chunk?);
            if eligible.len() >= max {
                eligible.truncate(max);
                break;
            }
        }
        Ok(eligible)
    }
}
