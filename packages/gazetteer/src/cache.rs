//! Process-scoped gazetteer cache.
//!
//! Reference data does not change during a run, so the cache loads it
//! once and hands out shared handles. Callers own the cache and pass it
//! to whatever needs the gazetteer.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crm_geocode_matcher_models::config::GazetteerConfig;
use crm_geocode_normalize::Normalizer;

use crate::{Gazetteer, GazetteerError};

#[derive(Debug)]
struct Loaded {
    gazetteer: Arc<Gazetteer>,
    modified: [Option<SystemTime>; 2],
}

/// Lazily loaded, explicitly invalidated gazetteer.
#[derive(Debug)]
pub struct GazetteerCache {
    config: GazetteerConfig,
    normalizer: Normalizer,
    loaded: Mutex<Option<Loaded>>,
}

impl GazetteerCache {
    /// Creates an empty cache. Nothing is read until [`Self::get`].
    #[must_use]
    pub const fn new(config: GazetteerConfig, normalizer: Normalizer) -> Self {
        Self {
            config,
            normalizer,
            loaded: Mutex::new(None),
        }
    }

    /// Returns the cached gazetteer, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns the load error if the reference files cannot be loaded.
    /// A failed load is not cached.
    pub fn get(&self) -> Result<Arc<Gazetteer>, GazetteerError> {
        let mut guard = self.lock();
        if let Some(loaded) = guard.as_ref() {
            return Ok(Arc::clone(&loaded.gazetteer));
        }
        let loaded = self.load()?;
        let gazetteer = Arc::clone(&loaded.gazetteer);
        *guard = Some(loaded);
        drop(guard);
        Ok(gazetteer)
    }

    /// Drops the cached gazetteer so the next [`Self::get`] reloads it.
    pub fn invalidate(&self) {
        if self.lock().take().is_some() {
            log::info!("Gazetteer cache invalidated");
        }
    }

    /// Reloads if either reference file's modification time differs from
    /// the one seen at load. Returns `true` if a reload happened.
    ///
    /// # Errors
    ///
    /// Returns the load error if a reload was needed and failed; the
    /// previous gazetteer is discarded in that case.
    pub fn reload_if_changed(&self) -> Result<bool, GazetteerError> {
        let mut guard = self.lock();
        let changed = guard
            .as_ref()
            .is_some_and(|loaded| loaded.modified != self.modification_times());
        if !changed {
            return Ok(false);
        }

        log::info!("Reference files changed, reloading gazetteer");
        *guard = None;
        *guard = Some(self.load()?);
        drop(guard);
        Ok(true)
    }

    /// Returns `true` if a gazetteer is currently cached.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    fn load(&self) -> Result<Loaded, GazetteerError> {
        let modified = self.modification_times();
        let gazetteer = Gazetteer::load(&self.config, &self.normalizer)?;
        Ok(Loaded {
            gazetteer: Arc::new(gazetteer),
            modified,
        })
    }

    fn modification_times(&self) -> [Option<SystemTime>; 2] {
        [
            modified_at(Path::new(&self.config.municipalities_path)),
            modified_at(Path::new(&self.config.coordinates_path)),
        ]
    }

    fn lock(&self) -> MutexGuard<'_, Option<Loaded>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
