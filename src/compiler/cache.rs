//! Content-addressed artifact cache.
//!
//! Keys are blake3 hashes over everything that influences the generated
//! machine code. The in-memory side is a bounded LRU; the optional on-disk
//! side stores `jit-<hash>.so` files that a later process can load directly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::codegen::KERNEL_ABI_VERSION;
use super::toolchain::Toolchain;
use crate::types::Signature;

/// Hash of (kernel ABI, signature, source, toolchain, flags).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactKey([u8; 32]);

impl ArtifactKey {
    pub fn compute(signature: &Signature, source: &str, toolchain: &Toolchain) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&KERNEL_ABI_VERSION.to_le_bytes());
        hasher.update(signature.ret().c_name().as_bytes());
        hasher.update(b"\0");
        for param in signature.params() {
            hasher.update(param.ty.c_name().as_bytes());
            hasher.update(b" ");
            hasher.update(param.name.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(source.as_bytes());
        hasher.update(b"\0");
        hasher.update(toolchain.program().as_os_str().as_encoded_bytes());
        for flag in toolchain.flags() {
            hasher.update(b"\0");
            hasher.update(flag.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// First 16 hex digits, used in file names.
    pub fn short_hex(&self) -> String {
        self.to_string()[..16].to_string()
    }

    /// Artifact path inside a persistent cache directory.
    pub fn artifact_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{ARTIFACT_PREFIX}{}.{}", self.short_hex(), std::env::consts::DLL_EXTENSION))
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

pub(crate) const ARTIFACT_PREFIX: &str = "jit-";

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses served from the on-disk cache without invoking the toolchain
    pub disk_hits: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Bounded least-recently-used map from artifact keys to loaded artifacts.
pub struct ArtifactCache<V> {
    entries: Mutex<IndexMap<ArtifactKey, V>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    disk_hits: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> ArtifactCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &ArtifactKey) -> Option<V> {
        let found = self.touch(key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Like [`get`](Self::get) but leaves the hit/miss counters alone.
    pub(crate) fn touch(&self, key: &ArtifactKey) -> Option<V> {
        let mut entries = self.entries.lock();
        let index = entries.get_index_of(key)?;
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get_index(last).map(|(_, v)| v.clone())
    }

    /// Insert `value`, evicting the least recently used entry when full.
    pub fn insert(&self, key: ArtifactKey, value: V) -> Option<(ArtifactKey, V)> {
        let mut entries = self.entries.lock();
        if let Some(index) = entries.get_index_of(&key) {
            let last = entries.len() - 1;
            entries.move_index(index, last);
            entries.insert(key, value);
            return None;
        }

        let evicted = if entries.len() >= self.capacity {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            entries.shift_remove_index(0)
        } else {
            None
        };
        entries.insert(key, value);
        evicted
    }

    pub fn remove(&self, key: &ArtifactKey) -> Option<V> {
        self.entries.lock().shift_remove(key)
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
