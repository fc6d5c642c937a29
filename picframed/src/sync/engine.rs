use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use super::paths::{PathError, local_path_for};
use super::remote::{RemoteDrive, RemoteError, RemoteImage};
use super::transfer::{TransferError, sweep_partials, write_atomically};
use crate::storage::{BudgetError, StorageBudget, SystemVolumeProbe, VolumeProbe};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[source] RemoteError),
    #[error("listing remote folder failed: {0}")]
    ListingFailed(#[source] RemoteError),
    #[error("download of {name} failed: {source}")]
    DownloadFailed {
        name: String,
        #[source]
        source: TransferError,
    },
    #[error("no room for {name} ({required_bytes} bytes) even after eviction")]
    CapacityExhausted { name: String, required_bytes: u64 },
    #[error("remote name {name:?} cannot be stored locally: {source}")]
    UnsafeName {
        name: String,
        #[source]
        source: PathError,
    },
    #[error("storage error: {0}")]
    Storage(#[from] BudgetError),
}

/// Counts for one pass. `files_synced` only counts files written by this pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub files_synced: usize,
    pub errors: usize,
    pub already_present: usize,
}

enum ItemResult {
    Downloaded(u64),
    AlreadyPresent,
}

#[derive(Clone, Copy)]
struct LastSync {
    finished: Instant,
    at: OffsetDateTime,
}

pub struct SyncEngine<R, P = SystemVolumeProbe> {
    remote: R,
    budget: StorageBudget<P>,
    folder_id: String,
    pass_lock: tokio::sync::Mutex<()>,
    last_sync: Mutex<Option<LastSync>>,
}

impl<R: RemoteDrive, P: VolumeProbe> SyncEngine<R, P> {
    pub fn new(remote: R, budget: StorageBudget<P>, folder_id: impl Into<String>) -> Self {
        Self {
            remote,
            budget,
            folder_id: folder_id.into(),
            pass_lock: tokio::sync::Mutex::new(()),
            last_sync: Mutex::new(None),
        }
    }

    pub fn budget(&self) -> &StorageBudget<P> {
        &self.budget
    }

    /// Runs a pass, waiting for one already in progress to finish first.
    pub async fn run_sync(&self) -> SyncOutcome {
        let _guard = self.pass_lock.lock().await;
        self.run_pass().await
    }

    /// Runs a pass unless one is already in progress, in which case `None` is returned.
    pub async fn try_run_sync(&self) -> Option<SyncOutcome> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("sync already in progress, skipping");
            return None;
        };
        Some(self.run_pass().await)
    }

    pub fn time_since_last_sync(&self) -> Option<Duration> {
        self.last_sync().map(|last| last.finished.elapsed())
    }

    pub fn last_sync_at(&self) -> Option<OffsetDateTime> {
        self.last_sync().map(|last| last.at)
    }

    fn last_sync(&self) -> Option<LastSync> {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_completion(&self) {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastSync {
            finished: Instant::now(),
            at: OffsetDateTime::now_utc(),
        });
    }

    async fn run_pass(&self) -> SyncOutcome {
        info!(folder = %self.folder_id, "sync started");
        let outcome = self.transfer_images().await;
        self.record_completion();
        info!(
            files_synced = outcome.files_synced,
            already_present = outcome.already_present,
            errors = outcome.errors,
            "sync finished"
        );
        outcome
    }

    async fn transfer_images(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        let images_dir = self.budget.images_dir();

        match sweep_partials(images_dir).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "removed stale partial downloads"),
            Err(err) => warn!(
                dir = %images_dir.display(),
                error = %err,
                "could not sweep partial downloads"
            ),
        }

        if let Err(err) = self.remote.authenticate().await {
            let err = SyncError::AuthenticationFailed(err);
            error!(error = %err, "sync aborted");
            return outcome;
        }
        let images = match self.remote.list_images(&self.folder_id).await {
            Ok(images) => images,
            Err(err) => {
                let err = SyncError::ListingFailed(err);
                error!(error = %err, "sync aborted");
                return outcome;
            }
        };
        if images.is_empty() {
            info!(folder = %self.folder_id, "remote folder has no images");
            return outcome;
        }

        for image in &images {
            if !self.budget.extensions().matches_name(&image.name) {
                debug!(file = %image.name, "skipping unsupported file type");
                continue;
            }
            match self.sync_image(images_dir, image).await {
                Ok(ItemResult::Downloaded(bytes)) => {
                    outcome.files_synced += 1;
                    info!(file = %image.name, bytes, "downloaded image");
                }
                Ok(ItemResult::AlreadyPresent) => {
                    outcome.already_present += 1;
                    debug!(file = %image.name, "image already present");
                }
                Err(err) => {
                    outcome.errors += 1;
                    warn!(file = %image.name, error = %err, "failed to sync image");
                }
            }
            if !self.below_ceiling() {
                warn!("storage ceiling reached, ending sync early");
                break;
            }
        }
        outcome
    }

    async fn sync_image(
        &self,
        images_dir: &Path,
        image: &RemoteImage,
    ) -> Result<ItemResult, SyncError> {
        let target =
            local_path_for(images_dir, &image.name).map_err(|source| SyncError::UnsafeName {
                name: image.name.clone(),
                source,
            })?;
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(ItemResult::AlreadyPresent);
        }

        self.make_room(image)?;

        let download_failed = |source: TransferError| SyncError::DownloadFailed {
            name: image.name.clone(),
            source,
        };
        let body = self
            .remote
            .open_download(&image.id)
            .await
            .map_err(|err| download_failed(err.into()))?;
        let written = write_atomically(body, &target)
            .await
            .map_err(download_failed)?;
        Ok(ItemResult::Downloaded(written))
    }

    fn make_room(&self, image: &RemoteImage) -> Result<(), SyncError> {
        if self.budget.has_capacity(image.size_bytes)? {
            return Ok(());
        }
        let target_percent = self.budget.default_target_percent();
        let evicted = self.budget.evict_oldest(target_percent)?;
        info!(evicted, target_percent, "evicted images to make room");
        if self.budget.has_capacity(image.size_bytes)? {
            Ok(())
        } else {
            Err(SyncError::CapacityExhausted {
                name: image.name.clone(),
                required_bytes: image.size_bytes,
            })
        }
    }

    fn below_ceiling(&self) -> bool {
        match self.budget.has_capacity(0) {
            Ok(below) => below,
            Err(err) => {
                warn!(error = %err, "could not measure storage");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
