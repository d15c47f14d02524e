//! In-memory filesystem tree.
//!
//! Mirrors a directory extracted from (or about to be written into) an
//! archive. The tree holds folders, regular files with their full contents,
//! and special entries (symlinks, fifos, sockets, device nodes) tagged with
//! their kind.
//!
//! Child names are stored as [`OsString`] so names survive exactly as the
//! filesystem exposed them, including non-UTF-8 bytes. Permission bits are
//! recorded when available but are best-effort: [`FilesystemTree::structurally_eq`]
//! ignores them.

mod disk;

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};

/// Tree errors
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Invalid tree path '{}'", .0.display())]
    InvalidPath(PathBuf),

    #[error("'{}' is not a folder", .0.display())]
    NotAFolder(PathBuf),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk '{}': {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Special file '{}' is not supported on this platform", .0.display())]
    Unsupported(PathBuf),
}

/// Kind of a non-regular, non-directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialFileKind {
    Symlink { target: PathBuf },
    Fifo,
    Socket,
    CharDevice { rdev: u64 },
    BlockDevice { rdev: u64 },
}

impl SpecialFileKind {
    pub fn name(&self) -> &'static str {
        match self {
            SpecialFileKind::Symlink { .. } => "symlink",
            SpecialFileKind::Fifo => "fifo",
            SpecialFileKind::Socket => "socket",
            SpecialFileKind::CharDevice { .. } => "character device",
            SpecialFileKind::BlockDevice { .. } => "block device",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Folder {
    pub children: BTreeMap<OsString, Node>,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub data: Vec<u8>,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialFile {
    pub kind: SpecialFileKind,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Folder(Folder),
    File(FileNode),
    Special(SpecialFile),
}

impl Node {
    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Node::Folder(folder) => Some(folder),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_special(&self) -> Option<&SpecialFile> {
        match self {
            Node::Special(special) => Some(special),
            _ => None,
        }
    }

    fn structurally_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Folder(a), Node::Folder(b)) => folders_structurally_eq(a, b),
            (Node::File(a), Node::File(b)) => a.data == b.data,
            (Node::Special(a), Node::Special(b)) => a.kind == b.kind,
            _ => false,
        }
    }
}

fn folders_structurally_eq(a: &Folder, b: &Folder) -> bool {
    a.children.len() == b.children.len()
        && a.children.iter().all(|(name, node)| {
            b.children
                .get(name)
                .is_some_and(|other| node.structurally_eq(other))
        })
}

/// Split a relative tree path into its names.
fn path_names(path: &Path) -> Result<Vec<&OsStr>, TreeError> {
    let mut names = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => names.push(name),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TreeError::InvalidPath(path.to_path_buf()));
            }
        }
    }

    if names.is_empty() {
        return Err(TreeError::InvalidPath(path.to_path_buf()));
    }
    Ok(names)
}

/// A rooted tree of folders, files and special entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemTree {
    root: Folder,
}

impl FilesystemTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Folder {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Folder that will hold `names.last()`, creating missing folders.
    fn parent_folder_mut(&mut self, names: &[&OsStr]) -> Result<&mut Folder, TreeError> {
        let mut folder = &mut self.root;
        let mut walked = PathBuf::new();

        for name in &names[..names.len() - 1] {
            walked.push(name);
            let node = folder
                .children
                .entry(name.to_os_string())
                .or_insert_with(|| Node::Folder(Folder::default()));
            folder = match node {
                Node::Folder(child) => child,
                _ => return Err(TreeError::NotAFolder(walked)),
            };
        }

        Ok(folder)
    }

    /// Insert `node` at `path`, replacing whatever was there.
    pub fn insert_node(&mut self, path: impl AsRef<Path>, node: Node) -> Result<(), TreeError> {
        let path = path.as_ref();
        let names = path_names(path)?;
        let parent = self.parent_folder_mut(&names)?;
        parent.children.insert(names[names.len() - 1].to_os_string(), node);
        Ok(())
    }

    pub fn insert_file(&mut self, path: impl AsRef<Path>, data: Vec<u8>) -> Result<(), TreeError> {
        self.insert_node(path, Node::File(FileNode { data, mode: None }))
    }

    /// Create a folder (and its parents). Existing folders are left as is.
    pub fn insert_folder(&mut self, path: impl AsRef<Path>) -> Result<(), TreeError> {
        let path = path.as_ref();
        let names = path_names(path)?;
        let parent = self.parent_folder_mut(&names)?;
        let node = parent
            .children
            .entry(names[names.len() - 1].to_os_string())
            .or_insert_with(|| Node::Folder(Folder::default()));

        match node {
            Node::Folder(_) => Ok(()),
            _ => Err(TreeError::NotAFolder(path.to_path_buf())),
        }
    }

    pub fn insert_special(
        &mut self,
        path: impl AsRef<Path>,
        kind: SpecialFileKind,
    ) -> Result<(), TreeError> {
        self.insert_node(path, Node::Special(SpecialFile { kind, mode: None }))
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&Node> {
        let names = path_names(path.as_ref()).ok()?;
        let (last, parents) = names.split_last()?;

        let mut folder = &self.root;
        for name in parents {
            folder = folder.children.get(*name)?.as_folder()?;
        }
        folder.children.get(*last)
    }

    pub fn remove(&mut self, path: impl AsRef<Path>) -> Option<Node> {
        let names = path_names(path.as_ref()).ok()?;
        let (last, parents) = names.split_last()?;

        let mut folder = &mut self.root;
        for name in parents {
            folder = match folder.children.get_mut(*name)? {
                Node::Folder(child) => child,
                _ => return None,
            };
        }
        folder.children.remove(*last)
    }

    /// Every entry with its path relative to the root, parents before children.
    pub fn entries(&self) -> Vec<(PathBuf, &Node)> {
        fn walk<'a>(folder: &'a Folder, prefix: &Path, out: &mut Vec<(PathBuf, &'a Node)>) {
            for (name, node) in &folder.children {
                let path = prefix.join(name);
                out.push((path.clone(), node));
                if let Node::Folder(child) = node {
                    walk(child, &path, out);
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.root, Path::new(""), &mut out);
        out
    }

    pub fn file_count(&self) -> usize {
        self.entries()
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .count()
    }

    /// Compare names, hierarchy, file contents and special kinds, ignoring
    /// permission bits.
    pub fn structurally_eq(&self, other: &FilesystemTree) -> bool {
        folders_structurally_eq(&self.root, &other.root)
    }
}
