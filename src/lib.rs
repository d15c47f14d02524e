//! p7zfs - 7z filesystem adapters
//!
//! Unpacks 7z archive resources into in-memory filesystem trees and packs
//! them back with the external 7z binary. Also carries the analysis
//! attribute used to cache engine projects per resource.

pub mod analysis;
pub mod archive;
pub mod config;
pub mod error;
pub mod fs_tree;
pub mod identify;
pub mod magic;
pub mod resource;

pub use error::{Error, Result};
