//! image::store
//!
//! Content-addressed on-disk image store.
//!
//! Storage layout:
//! ```text
//! <cache>/images/
//! ├── <d[0..2]>/<d[2..]>/blob   # image archives and manifests, by sha256
//! ├── index.json                # OCI-style index, one entry per name:tag
//! ├── index.json.lock
//! ├── locks/<sha256(name)>.lock # per-image entry locks
//! └── tmp/                      # staging area
//! ```
//!
//! Blob paths depend only on the digest, never on the image name. New
//! content is staged under `tmp/` while it is hashed and only renamed into
//! place once complete, so a reader never sees a partial blob. The index is
//! rewritten atomically under its own lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::ImageError;
use crate::core::config::persist::write_atomic;
use crate::core::ops::{lock_path_for, FileLock};

/// Annotation carrying the `name:tag` of an index entry.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";
const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";
const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const ARCHIVE_MEDIA_TYPE: &str = "application/vnd.docker.image.archive.v1.tar";

/// A content descriptor as used in OCI indexes and manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    fn ref_name(&self) -> Option<&str> {
        self.annotations.get(REF_NAME_ANNOTATION).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Index {
    schema_version: u32,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            schema_version: 2,
            manifests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    schema_version: u32,
    media_type: String,
    layers: Vec<Descriptor>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// A cached image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub name: String,
    pub tag: String,
    pub blob_digest: String,
    pub manifest_digest: String,
    pub size: u64,
}

impl ImageDescriptor {
    /// `name:tag`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Split a normalized `name:tag` at the tag separator.
fn split_reference(reference: &str) -> (&str, &str) {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    match without_digest.rfind(':') {
        Some(i) if !without_digest[i..].contains('/') => {
            (&without_digest[..i], &without_digest[i + 1..])
        }
        _ => (without_digest, "latest"),
    }
}

/// A blob being written to the staging area.
///
/// Dropping it without [`ImageStore::commit_blob`] removes the temp file.
pub struct StagedBlob {
    path: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    size: u64,
}

impl Write for StagedBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "staged blob already closed"))?;
        let written = file.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.path);
    }
}

/// On-disk image store rooted at `<cache>/images`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ImageError + '_ {
        move |source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Path of a blob: `<root>/<d[0..2]>/<d[2..]>/blob`.
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        let (head, tail) = hex.split_at(hex.len().min(2));
        self.root.join(head).join(tail).join("blob")
    }

    /// Lock guarding imports and exports of one `name:tag`.
    pub fn entry_lock(&self, reference: &str) -> Result<FileLock, ImageError> {
        let id = hex::encode(Sha256::digest(reference.as_bytes()));
        let path = self.root.join("locks").join(format!("{}.lock", id));
        Ok(FileLock::acquire(&path)?)
    }

    /// Start writing a new blob.
    pub fn stage(&self) -> Result<StagedBlob, ImageError> {
        let dir = self.root.join("tmp");
        fs::create_dir_all(&dir).map_err(Self::io_err(&dir))?;
        let path = dir.join(uuid::Uuid::new_v4().to_string());
        let file = File::create(&path).map_err(Self::io_err(&path))?;
        Ok(StagedBlob {
            path,
            file: Some(file),
            hasher: Sha256::new(),
            size: 0,
        })
    }

    /// Move a fully written blob into place. Returns `(digest, size)`.
    pub fn commit_blob(&self, mut staged: StagedBlob) -> Result<(String, u64), ImageError> {
        let file = staged.file.take().ok_or_else(|| ImageError::Io {
            path: staged.path.clone(),
            source: io::Error::new(io::ErrorKind::Other, "staged blob already closed"),
        })?;
        file.sync_all().map_err(Self::io_err(&staged.path))?;
        drop(file);

        let digest = format!(
            "sha256:{}",
            hex::encode(std::mem::take(&mut staged.hasher).finalize())
        );
        let target = self.blob_path(&digest);
        if target.exists() {
            debug!(%digest, "blob already present");
            return Ok((digest, staged.size));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(Self::io_err(parent))?;
        }
        fs::rename(&staged.path, &target).map_err(Self::io_err(&target))?;
        debug!(%digest, size = staged.size, "stored blob");
        Ok((digest, staged.size))
    }

    /// Store an in-memory blob.
    pub fn put_blob(&self, bytes: &[u8]) -> Result<(String, u64), ImageError> {
        let mut staged = self.stage()?;
        staged
            .write_all(bytes)
            .map_err(Self::io_err(&staged.path.clone()))?;
        self.commit_blob(staged)
    }

    /// Open a blob for reading.
    pub fn open_blob(&self, digest: &str) -> Result<File, ImageError> {
        let path = self.blob_path(digest);
        File::open(&path).map_err(Self::io_err(&path))
    }

    fn read_index(&self) -> Result<Index, ImageError> {
        let path = self.index_path();
        match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Index::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| ImageError::Index {
                path,
                message: e.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Index::default()),
            Err(source) => Err(ImageError::Io { path, source }),
        }
    }

    fn write_index(&self, index: &Index) -> Result<(), ImageError> {
        let path = self.index_path();
        let mut bytes = serde_json::to_vec_pretty(index).map_err(|e| ImageError::Index {
            path: path.clone(),
            message: e.to_string(),
        })?;
        bytes.push(b'\n');
        fs::create_dir_all(&self.root).map_err(Self::io_err(&self.root))?;
        write_atomic(&path, &bytes).map_err(Self::io_err(&path))
    }

    /// Locked read-modify-write of the index.
    fn update_index<T>(&self, change: impl FnOnce(&mut Index) -> T) -> Result<T, ImageError> {
        fs::create_dir_all(&self.root).map_err(Self::io_err(&self.root))?;
        let _lock = FileLock::acquire(&lock_path_for(&self.index_path()))?;
        let mut index = self.read_index()?;
        let result = change(&mut index);
        self.write_index(&index)?;
        Ok(result)
    }

    /// Record `reference` as the image whose archive is `archive`.
    pub fn commit_image(
        &self,
        reference: &str,
        archive_digest: &str,
        archive_size: u64,
    ) -> Result<ImageDescriptor, ImageError> {
        let mut annotations = BTreeMap::new();
        annotations.insert(REF_NAME_ANNOTATION.to_string(), reference.to_string());
        annotations.insert(CREATED_ANNOTATION.to_string(), chrono::Utc::now().to_rfc3339());

        let manifest = Manifest {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            layers: vec![Descriptor {
                media_type: ARCHIVE_MEDIA_TYPE.to_string(),
                digest: archive_digest.to_string(),
                size: archive_size,
                annotations: BTreeMap::new(),
            }],
            annotations: annotations.clone(),
        };
        let encoded = serde_json::to_vec_pretty(&manifest).map_err(|e| ImageError::Index {
            path: self.index_path(),
            message: e.to_string(),
        })?;
        let (manifest_digest, manifest_size) = self.put_blob(&encoded)?;

        let entry = Descriptor {
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            digest: manifest_digest.clone(),
            size: manifest_size,
            annotations: [(REF_NAME_ANNOTATION.to_string(), reference.to_string())]
                .into_iter()
                .collect(),
        };
        let replaced = self.update_index(|index| {
            let previous = index
                .manifests
                .iter()
                .position(|d| d.ref_name() == Some(reference))
                .map(|i| index.manifests.remove(i));
            index.manifests.push(entry);
            index
                .manifests
                .sort_by(|a, b| a.ref_name().cmp(&b.ref_name()));
            previous
        })?;
        if let Some(previous) = replaced {
            self.collect_garbage(&previous)?;
        }

        let (name, tag) = split_reference(reference);
        Ok(ImageDescriptor {
            name: name.to_string(),
            tag: tag.to_string(),
            blob_digest: archive_digest.to_string(),
            manifest_digest,
            size: archive_size,
        })
    }

    fn read_manifest(&self, digest: &str) -> Result<Manifest, ImageError> {
        let path = self.blob_path(digest);
        let bytes = fs::read(&path).map_err(Self::io_err(&path))?;
        serde_json::from_slice(&bytes).map_err(|e| ImageError::Index {
            path,
            message: e.to_string(),
        })
    }

    /// The cached image for a normalized `name:tag`.
    pub fn lookup(&self, reference: &str) -> Result<Option<ImageDescriptor>, ImageError> {
        let index = self.read_index()?;
        let Some(entry) = index
            .manifests
            .iter()
            .find(|d| d.ref_name() == Some(reference))
        else {
            return Ok(None);
        };
        if !self.blob_path(&entry.digest).exists() {
            return Ok(None);
        }
        let manifest = self.read_manifest(&entry.digest)?;
        let Some(archive) = manifest.layers.first() else {
            return Ok(None);
        };
        if !self.blob_path(&archive.digest).exists() {
            return Ok(None);
        }
        let (name, tag) = split_reference(reference);
        Ok(Some(ImageDescriptor {
            name: name.to_string(),
            tag: tag.to_string(),
            blob_digest: archive.digest.clone(),
            manifest_digest: entry.digest.clone(),
            size: archive.size,
        }))
    }

    /// Every `name:tag` in the index.
    pub fn list(&self) -> Result<BTreeSet<String>, ImageError> {
        Ok(self
            .read_index()?
            .manifests
            .iter()
            .filter_map(|d| d.ref_name().map(str::to_string))
            .collect())
    }

    /// Drop `reference` from the index and delete blobs nothing else uses.
    ///
    /// Returns false if it was not cached.
    pub fn remove(&self, reference: &str) -> Result<bool, ImageError> {
        let removed = self.update_index(|index| {
            index
                .manifests
                .iter()
                .position(|d| d.ref_name() == Some(reference))
                .map(|i| index.manifests.remove(i))
        })?;
        match removed {
            Some(entry) => {
                self.collect_garbage(&entry)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove each normalized reference under its entry lock.
    ///
    /// Returns the ones that were cached.
    pub fn prune(&self, references: &[String]) -> Result<Vec<String>, ImageError> {
        let mut removed = Vec::new();
        for reference in references {
            let _lock = self.entry_lock(reference)?;
            if self.remove(reference)? {
                removed.push(reference.clone());
            }
        }
        Ok(removed)
    }

    /// Delete the blobs of a dropped index entry unless still referenced.
    fn collect_garbage(&self, dropped: &Descriptor) -> Result<(), ImageError> {
        let index = self.read_index()?;
        let mut live = BTreeSet::new();
        for entry in &index.manifests {
            live.insert(entry.digest.clone());
            if let Ok(manifest) = self.read_manifest(&entry.digest) {
                live.extend(manifest.layers.into_iter().map(|l| l.digest));
            }
        }

        let mut candidates = vec![dropped.digest.clone()];
        if let Ok(manifest) = self.read_manifest(&dropped.digest) {
            candidates.extend(manifest.layers.into_iter().map(|l| l.digest));
        }
        for digest in candidates.into_iter().filter(|d| !live.contains(d)) {
            let path = self.blob_path(&digest);
            if let Some(dir) = path.parent() {
                match fs::remove_dir_all(dir) {
                    Ok(()) => debug!(%digest, "removed blob"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(ImageError::Io {
                            path: dir.to_path_buf(),
                            source,
                        })
                    }
                }
            }
        }
        Ok(())
    }
}
