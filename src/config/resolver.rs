// src/config/resolver.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::errors::Result;
use crate::util::lock;

/// Caches the validated config and rereads it after [`ConfigResolver::invalidate`].
///
/// Invalidation bumps a generation counter; the next `resolve()` sees a stale
/// cache entry and reloads. This is what a worker self-restart triggers.
#[derive(Debug)]
pub struct ConfigResolver {
    path: PathBuf,
    generation: AtomicU64,
    cached: Mutex<Option<(u64, Arc<ConfigFile>)>>,
}

impl ConfigResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generation: AtomicU64::new(0),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark the cached config stale.
    pub fn invalidate(&self) {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation = next, path = %self.path.display(), "config invalidated");
    }

    /// Current config, reloading from disk if the cache is stale or empty.
    pub fn resolve(&self) -> Result<Arc<ConfigFile>> {
        let generation = self.generation();
        let mut cached = lock(&self.cached);
        if let Some((cached_gen, cfg)) = cached.as_ref() {
            if *cached_gen == generation {
                return Ok(Arc::clone(cfg));
            }
        }

        debug!(generation, path = %self.path.display(), "loading config");
        let cfg = Arc::new(load_and_validate(&self.path)?);
        *cached = Some((generation, Arc::clone(&cfg)));
        Ok(cfg)
    }
}
