use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::media::{ExtensionSet, verify_image};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read image directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid image {path}: {source}")]
    InvalidImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImageEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

struct CatalogState {
    entries: Vec<LocalImageEntry>,
    // None exactly when `entries` is empty.
    cursor: Option<usize>,
    rng: StdRng,
}

/// Ordered view of the verified images in one directory, with a navigation cursor.
///
/// `refresh` builds the new sequence without holding the lock and swaps it in at once, so
/// navigation from other threads sees either the old or the new sequence.
pub struct ImageCatalog {
    dir: PathBuf,
    extensions: ExtensionSet,
    state: Mutex<CatalogState>,
}

impl ImageCatalog {
    pub fn new(dir: PathBuf, extensions: ExtensionSet) -> Self {
        Self::with_rng(dir, extensions, StdRng::from_entropy())
    }

    pub fn with_rng(dir: PathBuf, extensions: ExtensionSet, rng: StdRng) -> Self {
        Self {
            dir,
            extensions,
            state: Mutex::new(CatalogState {
                entries: Vec::new(),
                cursor: None,
                rng,
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescans the directory. On a read failure the previous sequence stays in place.
    pub fn refresh(&self) -> Result<usize, CatalogError> {
        let entries = self.scan()?;
        let count = entries.len();
        {
            let mut state = self.lock();
            state.cursor = match state.cursor {
                _ if count == 0 => None,
                Some(index) if index < count => Some(index),
                _ => Some(0),
            };
            state.entries = entries;
        }
        if count == 0 {
            warn!(dir = %self.dir.display(), "no images found");
        } else {
            info!(dir = %self.dir.display(), count, "image catalog refreshed");
        }
        Ok(count)
    }

    pub fn count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn entries(&self) -> Vec<LocalImageEntry> {
        self.lock().entries.clone()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.lock().cursor
    }

    pub fn current(&self) -> Option<LocalImageEntry> {
        let mut state = self.lock();
        let index = heal_cursor(&mut state)?;
        state.entries.get(index).cloned()
    }

    pub fn advance(&self) -> Option<LocalImageEntry> {
        self.step(|index, len| (index + 1) % len)
    }

    pub fn retreat(&self) -> Option<LocalImageEntry> {
        self.step(|index, len| (index + len - 1) % len)
    }

    pub fn random_jump(&self) -> Option<LocalImageEntry> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let len = state.entries.len();
        if len == 0 {
            return None;
        }
        let index = state.rng.gen_range(0..len);
        state.cursor = Some(index);
        state.entries.get(index).cloned()
    }

    fn step(&self, next: impl FnOnce(usize, usize) -> usize) -> Option<LocalImageEntry> {
        let mut state = self.lock();
        let index = heal_cursor(&mut state)?;
        let index = next(index, state.entries.len());
        state.cursor = Some(index);
        state.entries.get(index).cloned()
    }

    fn scan(&self) -> Result<Vec<LocalImageEntry>, CatalogError> {
        let read_dir = std::fs::read_dir(&self.dir).map_err(|source| CatalogError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            if !self.extensions.matches_path(&path) {
                continue;
            }
            // The file may have been evicted since the directory was listed.
            let Ok(metadata) = entry.metadata() else {
                debug!(file = %path.display(), "image vanished during scan");
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            if let Err(source) = verify_image(&path) {
                let err = CatalogError::InvalidImage { path, source };
                warn!(error = %err, "skipping invalid image");
                continue;
            }
            entries.push(LocalImageEntry {
                path,
                size_bytes: metadata.len(),
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);
        Ok(entries)
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn heal_cursor(state: &mut CatalogState) -> Option<usize> {
    let len = state.entries.len();
    if len == 0 {
        return None;
    }
    match state.cursor {
        Some(index) if index < len => Some(index),
        _ => {
            state.cursor = Some(0);
            Some(0)
        }
    }
}
