//! Magic-byte sniffing.
//!
//! Produces a MIME type and a libmagic-style description from the first bytes
//! of a buffer. Only formats that commonly wrap firmware and binaries are
//! recognized; anything else yields `None`.

use serde::Serialize;

/// What a buffer looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub mime: &'static str,
    pub description: String,
}

impl Signature {
    fn new(mime: &'static str, description: impl Into<String>) -> Self {
        Self {
            mime,
            description: description.into(),
        }
    }
}

/// 7z: 7z\xBC\xAF\x27\x1C
const SEVEN_Z_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Detect the format of `data` by its magic bytes.
pub fn sniff(data: &[u8]) -> Option<Signature> {
    if data.starts_with(&SEVEN_Z_MAGIC) {
        let description = match (data.get(6), data.get(7)) {
            (Some(major), Some(minor)) => {
                format!("7-zip archive data, version {}.{}", major, minor)
            }
            _ => "7-zip archive data".to_string(),
        };
        return Some(Signature::new("application/x-7z-compressed", description));
    }

    // ZIP: PK\x03\x04 or PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    if data.len() >= 4
        && data[0..2] == [0x50, 0x4B]
        && matches!((data[2], data[3]), (3, 4) | (5, 6) | (7, 8))
    {
        return Some(Signature::new("application/zip", "Zip archive data"));
    }

    if data.starts_with(&[0x1F, 0x8B]) {
        return Some(Signature::new("application/gzip", "gzip compressed data"));
    }

    if data.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
        return Some(Signature::new("application/x-xz", "XZ compressed data"));
    }

    if data.starts_with(b"BZh") {
        return Some(Signature::new("application/x-bzip2", "bzip2 compressed data"));
    }

    if data.starts_with(&[0x7F, b'E', b'L', b'F']) {
        let class = match data.get(4) {
            Some(1) => "32-bit",
            Some(2) => "64-bit",
            _ => "invalid class",
        };
        let order = match data.get(5) {
            Some(1) => "LSB",
            Some(2) => "MSB",
            _ => "invalid byte order",
        };
        return Some(Signature::new(
            "application/x-executable",
            format!("ELF {} {}", class, order),
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_7z() {
        let signature = sniff(b"7z\xbc\xaf\x27\x1c\x00\x04rest of header").unwrap();
        assert_eq!(signature.mime, "application/x-7z-compressed");
        assert_eq!(signature.description, "7-zip archive data, version 0.4");

        let truncated = sniff(b"7z\xbc\xaf\x27\x1c").unwrap();
        assert_eq!(truncated.description, "7-zip archive data");
    }

    #[test]
    fn test_sniff_other_formats() {
        assert_eq!(sniff(b"PK\x03\x04....").unwrap().mime, "application/zip");
        assert_eq!(sniff(b"\x1f\x8b\x08\x00").unwrap().mime, "application/gzip");
        assert_eq!(
            sniff(b"\x7fELF\x02\x01\x01\x00").unwrap().description,
            "ELF 64-bit LSB"
        );
    }

    #[test]
    fn test_sniff_unknown() {
        assert!(sniff(b"").is_none());
        assert!(sniff(b"PKzz").is_none());
        assert!(sniff(b"plain text").is_none());
        // 7z magic must be complete
        assert!(sniff(b"7z\xbc\xaf").is_none());
    }
}
