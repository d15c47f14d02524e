//! 7z filesystem unpacker and packer.
//!
//! Unpacking writes the resource bytes to a scratch file, extracts it with
//! the 7z binary into a scratch directory, and attaches the resulting
//! [`FilesystemTree`] to the resource. Packing flushes the attached tree to a
//! scratch directory, archives it, and replaces the resource's entire byte
//! range with the new archive.
//!
//! Scratch files and directories are `tempfile` guards, so they are removed on
//! every exit path, including errors and a dropped future.

use std::sync::Once;

use tracing::info;

use crate::archive::sevenzip::Archiver;
use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::fs_tree::FilesystemTree;
use crate::identify::{self, IdentifierRegistry};
use crate::resource::{Range, Resource, ResourceTag};

/// Filesystem stored in a 7z archive.
pub const P7Z_FILESYSTEM: ResourceTag = ResourceTag::new("P7zFilesystem");

/// MIME type reported for 7z archives.
pub const P7Z_MIME: &str = "application/x-7z-compressed";

/// Prefix of the magic description of 7z archives.
pub const P7Z_DESCRIPTION_PREFIX: &str = "7-zip archive";

/// Register the 7z recognizers with the process-wide registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn register_identifiers() {
    static REGISTERED: Once = Once::new();
    REGISTERED.call_once(|| register_identifiers_in(identify::global()));
}

/// Register the 7z recognizers with `registry`.
pub fn register_identifiers_in(registry: &IdentifierRegistry) {
    registry.register_mime(P7Z_FILESYSTEM, P7Z_MIME);
    registry.register_description(P7Z_FILESYSTEM, |description| {
        description.starts_with(P7Z_DESCRIPTION_PREFIX)
    });
}

async fn ensure_targeted(resource: &Resource) -> Result<()> {
    if resource.has_tag(P7Z_FILESYSTEM).await {
        Ok(())
    } else {
        Err(Error::NotTargeted {
            resource: resource.id(),
            expected: P7Z_FILESYSTEM,
        })
    }
}

/// Unpack (decompress) a 7z file.
#[derive(Debug, Clone)]
pub struct P7zUnpacker {
    archiver: Archiver,
    config: AdapterConfig,
}

impl P7zUnpacker {
    pub fn new(archiver: Archiver, config: AdapterConfig) -> Self {
        Self { archiver, config }
    }

    /// Locate the 7z binary from `config` and build an unpacker.
    pub fn from_config(config: AdapterConfig) -> Result<Self> {
        Ok(Self::new(Archiver::locate(&config)?, config))
    }

    pub fn targets() -> &'static [ResourceTag] {
        &[P7Z_FILESYSTEM]
    }

    pub async fn unpack(&self, resource: &Resource) -> Result<()> {
        ensure_targeted(resource).await?;

        let data = resource.get_data().await;
        let archive_file = self
            .config
            .tempfile(".7z")
            .map_err(Error::io("Failed to create temp file for archive"))?;
        tokio::fs::write(archive_file.path(), &data)
            .await
            .map_err(Error::io(format!(
                "Failed to write archive to {}",
                archive_file.path().display()
            )))?;

        let flush_dir = self
            .config
            .tempdir()
            .map_err(Error::io("Failed to create temp directory"))?;

        self.archiver
            .extract(archive_file.path(), flush_dir.path())
            .await?;

        let root = flush_dir.path().to_path_buf();
        let tree = tokio::task::spawn_blocking(move || FilesystemTree::from_disk(&root)).await??;

        info!(
            "Unpacked resource {}: {} bytes -> {} entries",
            resource.id(),
            data.len(),
            tree.entries().len()
        );
        resource.set_tree(tree).await;
        Ok(())
    }
}

/// Pack files into a compressed 7z archive.
#[derive(Debug, Clone)]
pub struct P7zPacker {
    archiver: Archiver,
    config: AdapterConfig,
}

impl P7zPacker {
    pub fn new(archiver: Archiver, config: AdapterConfig) -> Self {
        Self { archiver, config }
    }

    /// Locate the 7z binary from `config` and build a packer.
    pub fn from_config(config: AdapterConfig) -> Result<Self> {
        Ok(Self::new(Archiver::locate(&config)?, config))
    }

    pub fn targets() -> &'static [ResourceTag] {
        &[P7Z_FILESYSTEM]
    }

    pub async fn pack(&self, resource: &Resource) -> Result<()> {
        ensure_targeted(resource).await?;

        let tree = resource
            .tree()
            .await
            .ok_or(Error::MissingTree(resource.id()))?;

        let flush_dir = self
            .config
            .tempdir()
            .map_err(Error::io("Failed to create temp directory"))?;
        let root = flush_dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || tree.flush_to_disk(&root)).await??;

        // Separate directory so the archive is not packed into itself
        let output_dir = self
            .config
            .tempdir()
            .map_err(Error::io("Failed to create temp directory"))?;
        let archive_path = output_dir.path().join("packed.7z");

        self.archiver.add(&archive_path, flush_dir.path()).await?;

        let new_data = tokio::fs::read(&archive_path)
            .await
            .map_err(Error::io(format!(
                "Failed to read packed archive {}",
                archive_path.display()
            )))?;

        // Passing in the full range replaces the original data with the new data
        let length = resource.get_data_length().await;
        resource.queue_patch(Range::new(0, length), new_data).await?;
        resource.save().await?;

        info!(
            "Packed resource {}: {} -> {} bytes",
            resource.id(),
            length,
            resource.get_data_length().await
        );
        Ok(())
    }
}
