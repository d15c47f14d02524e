//! Archive handling.
//!
//! `sevenzip` drives the external 7z binary; `p7zip` builds the unpack and
//! pack adapters for 7z-tagged resources on top of it.

pub mod p7zip;
pub mod sevenzip;

pub use p7zip::{register_identifiers, P7zPacker, P7zUnpacker, P7Z_FILESYSTEM};
pub use sevenzip::{ArchiveEntry, Archiver, Flavor};
