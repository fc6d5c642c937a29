use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::sys::statvfs::statvfs;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::media::ExtensionSet;

pub const DEFAULT_CEILING_PERCENT: f64 = 50.0;
pub const DEFAULT_EVICTION_MARGIN_PERCENT: f64 = 10.0;

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Raw capacity figures for the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUsage {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageState {
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub used_percent: f64,
}

impl From<VolumeUsage> for StorageState {
    fn from(usage: VolumeUsage) -> Self {
        let used_percent = if usage.total_bytes == 0 {
            100.0
        } else {
            // Same as 100 - free/total*100, but exact for whole percents.
            let used_bytes = usage.total_bytes.saturating_sub(usage.free_bytes);
            used_bytes as f64 * 100.0 / usage.total_bytes as f64
        };
        Self {
            free_bytes: usage.free_bytes,
            total_bytes: usage.total_bytes,
            used_percent,
        }
    }
}

pub trait VolumeProbe: Send + Sync {
    fn usage(&self, path: &Path) -> io::Result<VolumeUsage>;

    /// Deletes one image chosen for eviction.
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Asks the kernel about the filesystem holding the path itself, so tmpfs and bind mounts
/// report their own figures. Free space is what an unprivileged writer can use.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemVolumeProbe;

impl VolumeProbe for SystemVolumeProbe {
    fn usage(&self, path: &Path) -> io::Result<VolumeUsage> {
        let stat = statvfs(path).map_err(io::Error::from)?;
        let fragment = stat.fragment_size() as u64;
        Ok(VolumeUsage {
            free_bytes: (stat.blocks_available() as u64).saturating_mul(fragment),
            total_bytes: (stat.blocks() as u64).saturating_mul(fragment),
        })
    }
}

pub struct StorageBudget<P = SystemVolumeProbe> {
    probe: P,
    images_dir: PathBuf,
    extensions: ExtensionSet,
    ceiling_percent: f64,
    eviction_margin_percent: f64,
}

impl StorageBudget<SystemVolumeProbe> {
    pub fn new(images_dir: PathBuf, extensions: ExtensionSet, ceiling_percent: f64) -> Self {
        Self::with_probe(SystemVolumeProbe, images_dir, extensions, ceiling_percent)
    }
}

impl<P: VolumeProbe> StorageBudget<P> {
    pub fn with_probe(
        probe: P,
        images_dir: PathBuf,
        extensions: ExtensionSet,
        ceiling_percent: f64,
    ) -> Self {
        Self {
            probe,
            images_dir,
            extensions,
            ceiling_percent,
            eviction_margin_percent: DEFAULT_EVICTION_MARGIN_PERCENT,
        }
    }

    pub fn with_eviction_margin(mut self, margin_percent: f64) -> Self {
        self.eviction_margin_percent = margin_percent.max(0.0);
        self
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    pub fn ceiling_percent(&self) -> f64 {
        self.ceiling_percent
    }

    /// Level eviction aims for, leaving headroom so one new download does not re-trigger it.
    pub fn default_target_percent(&self) -> f64 {
        (self.ceiling_percent - self.eviction_margin_percent).max(0.0)
    }

    pub fn state(&self) -> Result<StorageState, BudgetError> {
        self.state_at(&self.images_dir)
    }

    pub fn state_at(&self, path: &Path) -> Result<StorageState, BudgetError> {
        self.probe
            .usage(path)
            .map(StorageState::from)
            .map_err(|source| BudgetError::StorageUnavailable {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn has_capacity(&self, required_bytes: u64) -> Result<bool, BudgetError> {
        self.has_capacity_at(required_bytes, &self.images_dir)
    }

    /// Point-in-time admission check. Nothing is reserved, so callers re-check before each write.
    pub fn has_capacity_at(&self, required_bytes: u64, path: &Path) -> Result<bool, BudgetError> {
        let state = self.state_at(path)?;
        if state.used_percent >= self.ceiling_percent {
            warn!(
                used_percent = state.used_percent,
                ceiling_percent = self.ceiling_percent,
                "storage limit reached"
            );
            return Ok(false);
        }
        if required_bytes > 0 && required_bytes > state.free_bytes {
            warn!(
                required_bytes,
                free_bytes = state.free_bytes,
                "not enough free space for write"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Deletes images oldest-first until usage is at or below `target_percent`.
    ///
    /// Files that cannot be removed are logged and skipped. Returns how many files were removed.
    pub fn evict_oldest(&self, target_percent: f64) -> Result<usize, BudgetError> {
        let mut used_percent = self.state()?.used_percent;
        if used_percent <= target_percent {
            return Ok(0);
        }

        let mut skipped = HashSet::new();
        let mut removed = 0usize;
        while used_percent > target_percent {
            let Some(candidate) = self.oldest_candidate(&skipped)? else {
                debug!("no eviction candidates left");
                break;
            };
            match self.probe.remove_file(&candidate.path) {
                Ok(()) => {
                    removed += 1;
                    info!(
                        file = %candidate.path.display(),
                        size_bytes = candidate.size_bytes,
                        "removed old image"
                    );
                    used_percent = self.state()?.used_percent;
                }
                Err(err) => {
                    warn!(file = %candidate.path.display(), error = %err, "failed to remove image");
                    skipped.insert(candidate.path);
                }
            }
        }

        info!(
            removed,
            used_percent,
            target_percent,
            "eviction completed"
        );
        Ok(removed)
    }

    fn oldest_candidate(
        &self,
        skipped: &HashSet<PathBuf>,
    ) -> Result<Option<EvictionCandidate>, BudgetError> {
        let entries =
            std::fs::read_dir(&self.images_dir).map_err(|source| BudgetError::StorageUnavailable {
                path: self.images_dir.clone(),
                source,
            })?;

        let mut oldest: Option<EvictionCandidate> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if skipped.contains(&path) || !self.extensions.matches_path(&path) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let candidate = EvictionCandidate {
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
                size_bytes: metadata.len(),
                path,
            };
            let older = match &oldest {
                None => true,
                Some(current) => {
                    (candidate.modified, &candidate.path) < (current.modified, &current.path)
                }
            };
            if older {
                oldest = Some(candidate);
            }
        }
        Ok(oldest)
    }
}

struct EvictionCandidate {
    path: PathBuf,
    modified: SystemTime,
    size_bytes: u64,
}
