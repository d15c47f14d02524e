//! Minimal host resource.
//!
//! A [`Resource`] owns a byte buffer plus the state the adapters hang off it:
//! type tags set by identification, a queue of byte-range patches, a typed
//! attribute store and an optional unpacked [`FilesystemTree`].
//!
//! Bytes are only ever changed through [`Resource::queue_patch`] followed by
//! [`Resource::save`], which applies every queued patch or none of them.

mod attributes;

pub use attributes::{AttributeError, AttributeStore};

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::fs_tree::FilesystemTree;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique resource identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Names the type a resource has been identified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceTag(&'static str);

impl ResourceTag {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Half-open byte range `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Patch errors
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Patch range {start}..{end} is invalid for resource {resource} of length {length}")]
    OutOfBounds {
        resource: ResourceId,
        start: u64,
        end: u64,
        length: u64,
    },

    #[error("Patch range {start}..{end} overlaps a pending patch on resource {resource}")]
    Overlap {
        resource: ResourceId,
        start: u64,
        end: u64,
    },
}

#[derive(Debug)]
struct Patch {
    range: Range,
    data: Vec<u8>,
}

/// A byte-addressable resource with tags, patches and attributes.
pub struct Resource {
    id: ResourceId,
    data: RwLock<Vec<u8>>,
    tags: RwLock<BTreeSet<ResourceTag>>,
    pending: Mutex<Vec<Patch>>,
    tree: RwLock<Option<FilesystemTree>>,
    attributes: AttributeStore,
}

impl Resource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            id: ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            data: RwLock::new(data),
            tags: RwLock::new(BTreeSet::new()),
            pending: Mutex::new(Vec::new()),
            tree: RwLock::new(None),
            attributes: AttributeStore::default(),
        }
    }

    /// Create a root resource from the contents of a file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .map_err(Error::io(format!("Failed to read {}", path.display())))?;
        Ok(Self::new(data))
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Current committed bytes.
    pub async fn get_data(&self) -> Vec<u8> {
        self.data.read().await.clone()
    }

    pub async fn get_data_length(&self) -> u64 {
        self.data.read().await.len() as u64
    }

    pub async fn add_tag(&self, tag: ResourceTag) {
        if self.tags.write().await.insert(tag) {
            debug!("Tagged resource {} as {}", self.id, tag);
        }
    }

    pub async fn has_tag(&self, tag: ResourceTag) -> bool {
        self.tags.read().await.contains(&tag)
    }

    pub async fn tags(&self) -> Vec<ResourceTag> {
        self.tags.read().await.iter().copied().collect()
    }

    /// Queue a replacement of `range` with `data`.
    ///
    /// Ranges refer to the committed bytes and must not overlap other queued
    /// patches. Nothing changes until [`Resource::save`].
    pub async fn queue_patch(&self, range: Range, data: Vec<u8>) -> Result<(), PatchError> {
        let mut pending = self.pending.lock().await;
        let length = self.get_data_length().await;

        if range.start > range.end || range.end > length {
            return Err(PatchError::OutOfBounds {
                resource: self.id,
                start: range.start,
                end: range.end,
                length,
            });
        }

        if pending.iter().any(|p| p.range.overlaps(&range)) {
            return Err(PatchError::Overlap {
                resource: self.id,
                start: range.start,
                end: range.end,
            });
        }

        debug!(
            "Queued patch {}..{} ({} bytes) on resource {}",
            range.start,
            range.end,
            data.len(),
            self.id
        );
        pending.push(Patch { range, data });
        Ok(())
    }

    pub async fn pending_patches(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Apply all queued patches in one step.
    pub async fn save(&self) -> Result<(), PatchError> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write().await;
        let length = data.len() as u64;
        if let Some(bad) = pending.iter().find(|p| p.range.end > length) {
            return Err(PatchError::OutOfBounds {
                resource: self.id,
                start: bad.range.start,
                end: bad.range.end,
                length,
            });
        }

        // Apply from the back so earlier offsets stay valid.
        let mut patches = std::mem::take(&mut *pending);
        patches.sort_by_key(|p| std::cmp::Reverse(p.range.start));

        let mut patched = data.clone();
        for patch in patches {
            let start = patch.range.start as usize;
            let end = patch.range.end as usize;
            patched.splice(start..end, patch.data);
        }

        debug!(
            "Saved resource {}: {} -> {} bytes",
            self.id,
            length,
            patched.len()
        );
        *data = patched;
        Ok(())
    }

    /// Attach an unpacked tree, replacing any previous one.
    pub async fn set_tree(&self, tree: FilesystemTree) {
        *self.tree.write().await = Some(tree);
    }

    pub async fn has_tree(&self) -> bool {
        self.tree.read().await.is_some()
    }

    pub async fn tree(&self) -> Option<FilesystemTree> {
        self.tree.read().await.clone()
    }

    pub async fn take_tree(&self) -> Option<FilesystemTree> {
        self.tree.write().await.take()
    }

    /// Edit the attached tree in place. Returns `None` if there is no tree.
    pub async fn with_tree_mut<R>(&self, f: impl FnOnce(&mut FilesystemTree) -> R) -> Option<R> {
        self.tree.write().await.as_mut().map(f)
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource").field("id", &self.id).finish_non_exhaustive()
    }
}
