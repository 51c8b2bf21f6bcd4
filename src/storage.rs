//! Content-addressed blob store
//!
//! Blobs are keyed by the SHA-256 of their bytes and shared by every
//! checkpoint of every session that references the same content.
//!
//! ```text
//! storage_root/
//! ├── metadata.json          # Storage metadata and configuration
//! ├── objects/               # Blobs, sharded by the first 2 hash chars
//! │   └── <prefix>/<suffix>
//! ├── refs/                  # Reference count per hash
//! │   └── <hash>
//! ├── sessions/              # Checkpoint and branch records (see records.rs)
//! └── tmp/                   # Restore staging area
//! ```
//!
//! Reference counts live in a `DashMap`. Every increment and decrement runs
//! under that hash's entry guard and is persisted before the guard is
//! released, so a blob cannot be deleted while a concurrent `put` from
//! another session is re-referencing it.

use crate::collections::{ConcurrentMap, GxBuildHasher};
use crate::compression::{CompressionEngine, CompressionStats};
use crate::error::{Result, RewindError};
use crate::types::{RewindConfig, StorageMetadata};
use crate::utils::{atomic_write, hash_data, remove_dir_if_empty};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// On-disk layout version
pub const FORMAT_VERSION: u32 = 1;

/// Content-addressed storage with per-hash reference counts
pub struct Storage {
    root: PathBuf,
    compression: CompressionEngine,
    ref_counts: Arc<ConcurrentMap<String, u64>>,
    metadata: Arc<RwLock<StorageMetadata>>,
    verify_reads: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("root", &self.root)
            .field("referenced_hashes", &self.ref_counts.len())
            .field("verify_reads", &self.verify_reads)
            .finish()
    }
}

impl Storage {
    /// Create a new storage root
    ///
    /// Fails with [`RewindError::StorageAlreadyExists`] if `root` already
    /// holds a storage.
    pub fn init(root: PathBuf, config: RewindConfig) -> Result<Self> {
        if root.join("metadata.json").exists() {
            return Err(RewindError::StorageAlreadyExists(root));
        }

        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("refs"))?;
        fs::create_dir_all(root.join("sessions"))?;
        fs::create_dir_all(root.join("tmp"))?;

        let metadata = StorageMetadata {
            format_version: FORMAT_VERSION,
            rewind_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            config,
        };
        atomic_write(
            &root.join("metadata.json"),
            serde_json::to_string_pretty(&metadata)?.as_bytes(),
        )?;

        info!("Initialized storage at {:?}", root);
        Ok(Self::assemble(root, metadata, DashMap::with_hasher(GxBuildHasher::default())))
    }

    /// Open an existing storage root
    ///
    /// Reference counts are reloaded exactly as persisted.
    pub fn open(root: PathBuf) -> Result<Self> {
        let metadata_path = root.join("metadata.json");
        if !metadata_path.exists() {
            return Err(RewindError::StorageNotInitialized(root));
        }

        let mut metadata: StorageMetadata =
            serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;
        if metadata.format_version > FORMAT_VERSION {
            return Err(RewindError::InvalidConfiguration(format!(
                "Storage format {} is newer than supported format {}",
                metadata.format_version, FORMAT_VERSION
            )));
        }
        metadata.last_accessed = Utc::now();

        let ref_counts = DashMap::with_hasher(GxBuildHasher::default());
        let refs_dir = root.join("refs");
        fs::create_dir_all(&refs_dir)?;
        fs::create_dir_all(root.join("tmp"))?;
        for entry in fs::read_dir(&refs_dir)? {
            let entry = entry?;
            let hash = entry.file_name().to_string_lossy().to_string();
            if !is_valid_hash(&hash) {
                // Leftover temp files from interrupted writes
                continue;
            }
            let raw = fs::read_to_string(entry.path())?;
            match raw.trim().parse::<u64>() {
                Ok(count) if count > 0 => {
                    ref_counts.insert(hash, count);
                }
                Ok(_) => {}
                Err(_) => {
                    return Err(RewindError::corrupt(format!(
                        "Unreadable reference count for {}",
                        hash
                    )))
                }
            }
        }

        info!("Opened storage at {:?} ({} referenced blobs)", root, ref_counts.len());
        Ok(Self::assemble(root, metadata, ref_counts))
    }

    fn assemble(
        root: PathBuf,
        metadata: StorageMetadata,
        ref_counts: ConcurrentMap<String, u64>,
    ) -> Self {
        Self {
            compression: CompressionEngine::new(metadata.config.compression_strategy.clone()),
            verify_reads: metadata.config.verify_blobs,
            root,
            ref_counts: Arc::new(ref_counts),
            metadata: Arc::new(RwLock::new(metadata)),
        }
    }

    /// Store `content` and take one reference to it
    ///
    /// Storing bytes that are already present only increments the count.
    pub fn put(&self, content: &[u8]) -> Result<String> {
        let hash = hash_data(content);
        match self.ref_counts.entry(hash.clone()) {
            Entry::Occupied(mut entry) => {
                let count = *entry.get() + 1;
                self.persist_ref_count(&hash, count)?;
                *entry.get_mut() = count;
                trace!("Blob {} already stored, ref count {}", &hash[..8], count);
            }
            Entry::Vacant(entry) => {
                let object_path = self.object_path(&hash);
                atomic_write(&object_path, &self.compression.compress(content))?;
                if let Err(e) = self.persist_ref_count(&hash, 1) {
                    let _ = fs::remove_file(&object_path);
                    return Err(e);
                }
                entry.insert(1);
                trace!("Stored blob {} ({} bytes)", &hash[..8], content.len());
            }
        }
        Ok(hash)
    }

    /// Load the bytes of a blob
    ///
    /// When read verification is enabled the bytes are re-hashed and a
    /// mismatch is reported as [`RewindError::CorruptStore`].
    pub fn get(&self, hash: &str) -> Result<Vec<u8>> {
        if !is_valid_hash(hash) {
            return Err(RewindError::blob_not_found(hash));
        }
        let object_path = self.object_path(hash);
        let raw = match fs::read(&object_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RewindError::blob_not_found(hash));
            }
            Err(e) => return Err(e.into()),
        };
        let content = self.compression.decompress(&raw)?;

        if self.verify_reads {
            let actual = hash_data(&content);
            if actual != hash {
                return Err(RewindError::corrupt(format!(
                    "Blob {} does not match its hash (found {})",
                    hash, actual
                )));
            }
        }
        trace!("Loaded blob {} ({} bytes)", &hash[..8], content.len());
        Ok(content)
    }

    /// Load a blob a checkpoint refers to
    ///
    /// A missing or unreadable blob here means the store lost data, so every
    /// failure short of I/O becomes [`RewindError::CorruptStore`].
    pub fn get_referenced(&self, hash: &str) -> Result<Vec<u8>> {
        self.get(hash).map_err(|e| match e {
            RewindError::NotFound { .. } => {
                RewindError::corrupt(format!("Referenced blob {} is missing", hash))
            }
            RewindError::Decompression(msg) => {
                RewindError::corrupt(format!("Referenced blob {} is unreadable: {}", hash, msg))
            }
            other => other,
        })
    }

    /// Take one more reference to an existing blob
    pub fn ref_blob(&self, hash: &str) -> Result<u64> {
        match self.ref_counts.entry(hash.to_string()) {
            Entry::Occupied(mut entry) => {
                let count = *entry.get() + 1;
                self.persist_ref_count(hash, count)?;
                *entry.get_mut() = count;
                Ok(count)
            }
            Entry::Vacant(_) => Err(RewindError::blob_not_found(hash)),
        }
    }

    /// Drop one reference, deleting the blob when none remain
    ///
    /// Returns the remaining count.
    pub fn unref(&self, hash: &str) -> Result<u64> {
        match self.ref_counts.entry(hash.to_string()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get().saturating_sub(1);
                if count == 0 {
                    self.delete_object(hash)?;
                    self.persist_ref_count(hash, 0)?;
                    entry.remove();
                    debug!("Deleted blob {}", &hash[..8.min(hash.len())]);
                } else {
                    self.persist_ref_count(hash, count)?;
                    *entry.get_mut() = count;
                }
                Ok(count)
            }
            Entry::Vacant(_) => Err(RewindError::blob_not_found(hash)),
        }
    }

    /// Release references taken during a failed operation
    ///
    /// Errors are logged rather than returned; the caller is already
    /// propagating the original failure.
    pub fn release_all<'a>(&self, hashes: impl IntoIterator<Item = &'a String>) {
        for hash in hashes {
            if let Err(e) = self.unref(hash) {
                warn!("Failed to release blob {}: {}", hash, e);
            }
        }
    }

    /// Current reference count (0 when unknown)
    pub fn ref_count(&self, hash: &str) -> u64 {
        self.ref_counts.get(hash).map(|c| *c).unwrap_or(0)
    }

    /// All hashes with a positive reference count
    pub fn referenced_hashes(&self) -> Vec<(String, u64)> {
        self.ref_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Whether a blob file exists on disk
    pub fn contains(&self, hash: &str) -> bool {
        is_valid_hash(hash) && self.object_path(hash).exists()
    }

    fn persist_ref_count(&self, hash: &str, count: u64) -> Result<()> {
        let ref_path = self.root.join("refs").join(hash);
        if count == 0 {
            match fs::remove_file(&ref_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        } else {
            atomic_write(&ref_path, count.to_string().as_bytes())
        }
    }

    /// Remove a blob file and its shard directory if it became empty
    pub(crate) fn delete_object(&self, hash: &str) -> Result<u64> {
        let object_path = self.object_path(hash);
        let size = match fs::metadata(&object_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&object_path)?;
        if let Some(shard) = object_path.parent() {
            remove_dir_if_empty(shard)?;
        }
        Ok(size)
    }

    /// Delete a blob file only if nothing references it
    ///
    /// The count entry stays locked while the file is removed, so a
    /// concurrent `put` of the same content waits and then rewrites it.
    pub(crate) fn remove_unreferenced(&self, hash: &str) -> Result<Option<u64>> {
        match self.ref_counts.entry(hash.to_string()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(_guard) => self.delete_object(hash).map(Some),
        }
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let (prefix, suffix) = hash.split_at(2);
        self.root.join("objects").join(prefix).join(suffix)
    }

    /// Every blob file on disk as `(hash, stored size)`
    pub fn list_all_objects(&self) -> Result<Vec<(String, u64)>> {
        let objects_dir = self.root.join("objects");
        let mut objects = Vec::new();
        if !objects_dir.exists() {
            return Ok(objects);
        }

        for entry in WalkDir::new(&objects_dir).min_depth(2).max_depth(2) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let shard = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let hash = format!("{}{}", shard, entry.file_name().to_string_lossy());
            if is_valid_hash(&hash) {
                objects.push((hash, entry.metadata()?.len()));
            }
        }
        Ok(objects)
    }

    /// Blob files with no reference count
    pub fn unreferenced_objects(&self) -> Result<Vec<(String, u64)>> {
        Ok(self
            .list_all_objects()?
            .into_iter()
            .filter(|(hash, _)| !self.ref_counts.contains_key(hash))
            .collect())
    }

    /// Compression counters since this storage was opened
    pub fn compression_stats(&self) -> CompressionStats {
        self.compression.stats()
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding session records
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Directory restore stages blobs into
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Storage metadata
    pub fn metadata(&self) -> &RwLock<StorageMetadata> {
        &self.metadata
    }
}

/// 64 lowercase hex characters
pub(crate) fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
