//! image::cache
//!
//! Import, export and prune on top of the blob store and a runtime.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use super::reference::normalize_all;
use super::runtime::ContainerRuntime;
use super::store::{ImageDescriptor, ImageStore};
use super::ImageError;

/// Most exports running at once.
const MAX_EXPORT_WORKERS: usize = 4;

/// What export does with an image the runtime does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissStrategy {
    /// Pull it from its registry, then cache it.
    Pull,
    /// Leave it out.
    Skip,
}

/// Input to every cache operation.
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    pub images: Vec<String>,
    pub miss_strategy: MissStrategy,
}

impl ImageCacheConfig {
    pub fn new(images: Vec<String>, miss_strategy: MissStrategy) -> Self {
        Self {
            images,
            miss_strategy,
        }
    }
}

/// The images a cluster of `version` runs on.
pub fn default_openshift_images(version: &str) -> Vec<String> {
    [
        "openshift/origin-control-plane",
        "openshift/origin-docker-registry",
        "openshift/origin-haproxy-router",
    ]
    .iter()
    .map(|name| format!("{}:{}", name, version))
    .collect()
}

/// Image cache bound to a cache root and a container runtime.
#[derive(Clone)]
pub struct ImageCache {
    store: ImageStore,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageCache {
    /// Blobs live under `<cache_root>/images`.
    pub fn new(cache_root: &Path, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            store: ImageStore::new(cache_root.join("images")),
            runtime,
        }
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Load cached images into the runtime.
    ///
    /// Images the runtime already has, or that are not cached, are left
    /// alone. Returns the names actually loaded.
    pub fn import_images(&self, config: &ImageCacheConfig) -> Result<Vec<String>, ImageError> {
        let names = normalize_all(&config.images)?;
        let present = self.runtime.images()?;
        let mut imported = Vec::new();

        for name in names {
            if present.contains(&name) {
                debug!(image = %name, "already in runtime");
                continue;
            }
            let _lock = self.store.entry_lock(&name)?;
            let Some(descriptor) = self.store.lookup(&name)? else {
                debug!(image = %name, "not cached, skipping import");
                continue;
            };
            let mut archive = self.store.open_blob(&descriptor.blob_digest)?;
            self.runtime.load(&mut archive)?;
            info!(image = %name, "imported");
            imported.push(name);
        }
        Ok(imported)
    }

    /// Save images from the runtime into the cache.
    ///
    /// Already-cached images are skipped. Up to four exports run at once;
    /// a failed export does not stop the others. Returns the names written.
    pub fn export_images(&self, config: &ImageCacheConfig) -> Result<Vec<String>, ImageError> {
        let names = normalize_all(&config.images)?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let present = self.runtime.images()?;

        let workers = MAX_EXPORT_WORKERS.min(names.len());
        let queue = Mutex::new(names.into_iter().collect::<VecDeque<_>>());
        let exported = Mutex::new(Vec::new());
        let failures = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                    let Some(name) = next else { break };
                    match self.export_one(&name, &present, config.miss_strategy) {
                        Ok(Some(_)) => {
                            if let Ok(mut done) = exported.lock() {
                                done.push(name);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(image = %name, error = %e, "export failed");
                            if let Ok(mut failed) = failures.lock() {
                                failed.push(format!("{}: {}", name, e));
                            }
                        }
                    }
                });
            }
        });

        let mut failures = failures.into_inner().unwrap_or_default();
        if !failures.is_empty() {
            failures.sort();
            return Err(ImageError::Export(failures));
        }
        let mut exported = exported.into_inner().unwrap_or_default();
        exported.sort();
        Ok(exported)
    }

    fn export_one(
        &self,
        name: &str,
        present: &BTreeSet<String>,
        strategy: MissStrategy,
    ) -> Result<Option<ImageDescriptor>, ImageError> {
        let _lock = self.store.entry_lock(name)?;
        if self.store.lookup(name)?.is_some() {
            debug!(image = %name, "already cached");
            return Ok(None);
        }
        if !present.contains(name) {
            match strategy {
                MissStrategy::Skip => {
                    debug!(image = %name, "not in runtime, skipping");
                    return Ok(None);
                }
                MissStrategy::Pull => {
                    info!(image = %name, "pulling");
                    self.runtime.pull(name)?;
                }
            }
        }

        let mut staged = self.store.stage()?;
        self.runtime.save(name, &mut staged)?;
        let (digest, size) = self.store.commit_blob(staged)?;
        let descriptor = self.store.commit_image(name, &digest, size)?;
        info!(image = %name, %digest, size, "exported");
        Ok(Some(descriptor))
    }

    /// Delete entries from the cache. Returns the names that were cached.
    pub fn prune_images(&self, config: &ImageCacheConfig) -> Result<Vec<String>, ImageError> {
        self.store.prune(&normalize_all(&config.images)?)
    }

    /// Every cached `name:tag`.
    pub fn cached_images(&self) -> Result<BTreeSet<String>, ImageError> {
        self.store.list()
    }

    /// The cached subset of `config.images`, normalized.
    pub fn cached_subset(&self, config: &ImageCacheConfig) -> Result<BTreeSet<String>, ImageError> {
        let names = normalize_all(&config.images)?;
        let mut cached = BTreeSet::new();
        for name in names {
            if self.store.lookup(&name)?.is_some() {
                cached.insert(name);
            }
        }
        Ok(cached)
    }

    /// True if every image in `config.images` is cached.
    pub fn are_images_cached(&self, config: &ImageCacheConfig) -> Result<bool, ImageError> {
        let names = normalize_all(&config.images)?;
        for name in &names {
            if self.store.lookup(name)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
