//! image
//!
//! Moves container images between the host filesystem and the container
//! runtime inside the VM, without relying on the runtime for storage.
//!
//! # Architecture
//!
//! - [`reference`] normalizes image references (`alpine` → `alpine:latest`)
//! - [`store`] is the content-addressed blob store with an OCI-style index
//! - [`runtime`] is the seam to the in-VM container runtime
//! - [`cache`] composes the three into import, export and prune
//!
//! # Invariants
//!
//! - Every operation normalizes its inputs first; one bad reference fails
//!   the whole operation and every bad input is reported
//! - At most one import or export per `name:tag` runs at a time
//! - Readers never see a half-written entry
//!
//! # Example
//!
//! ```ignore
//! use minicluster::image::{ImageCache, ImageCacheConfig, MissStrategy};
//!
//! let cache = ImageCache::new(&paths.image_cache_root(), runtime);
//! let imported = cache.import_images(&ImageCacheConfig::new(images, MissStrategy::Skip))?;
//! ```

pub mod cache;
pub mod reference;
pub mod runtime;
pub mod store;

pub use cache::{default_openshift_images, ImageCache, ImageCacheConfig, MissStrategy};
pub use reference::{normalize, normalize_all, ImageRef};
pub use runtime::{ContainerRuntime, DockerCli, MemoryRuntime, RuntimeError};
pub use store::{ImageDescriptor, ImageStore};

use std::path::PathBuf;

use thiserror::Error;

use crate::core::ops::LockError;

/// Errors from image cache operations.
#[derive(Debug, Error)]
pub enum ImageError {
    /// One or more references did not parse. Lists every bad input.
    #[error("{}", .0.join("\n"))]
    InvalidImageName(Vec<String>),

    #[error("image cache I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt image index '{path}': {message}")]
    Index { path: PathBuf, message: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("image cache lock: {0}")]
    Lock(#[from] LockError),

    /// Some exports failed; the others completed.
    #[error("failed to export images:\n{}", .0.join("\n"))]
    Export(Vec<String>),
}
