//! Materializing a [`FilesystemTree`] to and from a directory on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{FileNode, FilesystemTree, Folder, Node, SpecialFile, SpecialFileKind, TreeError};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TreeError + '_ {
    move |source| TreeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FilesystemTree {
    /// Build a tree from the contents of `dir`.
    ///
    /// Symlinks are recorded as links, never followed. `dir` itself becomes
    /// the root and is not part of the tree.
    pub fn from_disk(dir: &Path) -> Result<Self, TreeError> {
        let mut tree = FilesystemTree::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| TreeError::Walk {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let relative = path
                .strip_prefix(dir)
                .map_err(|_| TreeError::InvalidPath(path.to_path_buf()))?;
            let metadata = entry.metadata().map_err(|source| TreeError::Walk {
                path: path.to_path_buf(),
                source,
            })?;
            let file_type = entry.file_type();
            let mode = permission_bits(&metadata);

            let node = if file_type.is_dir() {
                Node::Folder(Folder {
                    children: Default::default(),
                    mode,
                })
            } else if file_type.is_file() {
                let data = fs::read(path).map_err(io_error(path))?;
                Node::File(FileNode { data, mode })
            } else if file_type.is_symlink() {
                let target = fs::read_link(path).map_err(io_error(path))?;
                Node::Special(SpecialFile {
                    kind: SpecialFileKind::Symlink { target },
                    mode: None,
                })
            } else {
                match special_kind(&file_type, &metadata) {
                    Some(kind) => Node::Special(SpecialFile { kind, mode }),
                    None => {
                        warn!("Skipping unrecognized entry {}", path.display());
                        continue;
                    }
                }
            };

            tree.insert_node(relative, node)?;
        }

        debug!(
            "Loaded {} entries ({} files) from {}",
            tree.entries().len(),
            tree.file_count(),
            dir.display()
        );
        Ok(tree)
    }

    /// Recreate the tree inside `dir`, which is created if missing.
    ///
    /// Device nodes need privileges most processes lack; those are skipped
    /// with a warning. Folder permissions are applied last so a read-only
    /// folder does not block writing its children.
    pub fn flush_to_disk(&self, dir: &Path) -> Result<(), TreeError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let mut folder_modes: Vec<(PathBuf, u32)> = Vec::new();

        for (relative, node) in self.entries() {
            let path = dir.join(&relative);
            match node {
                Node::Folder(folder) => {
                    fs::create_dir_all(&path).map_err(io_error(&path))?;
                    if let Some(mode) = folder.mode {
                        folder_modes.push((path, mode));
                    }
                }
                Node::File(file) => {
                    fs::write(&path, &file.data).map_err(io_error(&path))?;
                    if let Some(mode) = file.mode {
                        set_permission_bits(&path, mode)?;
                    }
                }
                Node::Special(special) => write_special(&path, special)?,
            }
        }

        for (path, mode) in folder_modes.into_iter().rev() {
            set_permission_bits(&path, mode)?;
        }

        debug!("Flushed {} entries to {}", self.entries().len(), dir.display());
        Ok(())
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn set_permission_bits(path: &Path, mode: u32) -> Result<(), TreeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_error(path))
}

#[cfg(not(unix))]
fn set_permission_bits(_path: &Path, _mode: u32) -> Result<(), TreeError> {
    Ok(())
}

#[cfg(unix)]
fn special_kind(file_type: &fs::FileType, metadata: &fs::Metadata) -> Option<SpecialFileKind> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    if file_type.is_fifo() {
        Some(SpecialFileKind::Fifo)
    } else if file_type.is_socket() {
        Some(SpecialFileKind::Socket)
    } else if file_type.is_char_device() {
        Some(SpecialFileKind::CharDevice {
            rdev: metadata.rdev(),
        })
    } else if file_type.is_block_device() {
        Some(SpecialFileKind::BlockDevice {
            rdev: metadata.rdev(),
        })
    } else {
        None
    }
}

#[cfg(not(unix))]
fn special_kind(_file_type: &fs::FileType, _metadata: &fs::Metadata) -> Option<SpecialFileKind> {
    None
}

#[cfg(unix)]
fn write_special(path: &Path, special: &SpecialFile) -> Result<(), TreeError> {
    let mode = special.mode.unwrap_or(0o644);

    let result = match &special.kind {
        SpecialFileKind::Symlink { target } => std::os::unix::fs::symlink(target, path),
        SpecialFileKind::Fifo => mknod(path, libc::S_IFIFO, mode, 0),
        SpecialFileKind::Socket => mknod(path, libc::S_IFSOCK, mode, 0),
        SpecialFileKind::CharDevice { rdev } => mknod(path, libc::S_IFCHR, mode, *rdev),
        SpecialFileKind::BlockDevice { rdev } => mknod(path, libc::S_IFBLK, mode, *rdev),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(
                "Skipping {} {}: {}",
                special.kind.name(),
                path.display(),
                e
            );
            Ok(())
        }
        Err(e) => Err(TreeError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(not(unix))]
fn write_special(path: &Path, _special: &SpecialFile) -> Result<(), TreeError> {
    Err(TreeError::Unsupported(path.to_path_buf()))
}

#[cfg(unix)]
fn mknod(path: &Path, kind: libc::mode_t, mode: u32, rdev: u64) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mknod(c_path.as_ptr(), kind | (mode as libc::mode_t), rdev as libc::dev_t) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
