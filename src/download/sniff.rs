//! Image extension detection from Content-Type and magic bytes.
//!
//! Sources lie about image formats often enough that the saved extension is
//! derived from the response itself: Content-Type first, then the leading
//! byte signature, then a `.bin` fallback.

/// Picks a file extension for a downloaded body.
///
/// Order: Content-Type header, magic bytes, `.bin`.
#[must_use]
pub fn detect_ext(content_type: Option<&str>, body: &[u8]) -> &'static str {
    if let Some(ct) = content_type {
        if let Some(ext) = ext_from_content_type(ct) {
            return ext;
        }
    }

    if body.is_empty() {
        return ".bin";
    }

    ext_from_magic(body).unwrap_or(".bin")
}

/// Maps a Content-Type header to a canonical image extension.
#[must_use]
pub fn ext_from_content_type(content_type: &str) -> Option<&'static str> {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("jpeg") {
        Some(".jpg")
    } else if ct.contains("png") {
        Some(".png")
    } else if ct.contains("webp") {
        Some(".webp")
    } else if ct.contains("gif") {
        Some(".gif")
    } else if ct.contains("avif") {
        Some(".avif")
    } else {
        None
    }
}

/// Identifies an image format from its leading byte signature.
#[must_use]
pub fn ext_from_magic(body: &[u8]) -> Option<&'static str> {
    if body.len() >= 3 && body[0] == 0xFF && body[1] == 0xD8 && body[2] == 0xFF {
        return Some(".jpg");
    }
    if body.len() >= 4 && body[0] == 0x89 && body[1] == 0x50 && body[2] == 0x4E && body[3] == 0x47 {
        return Some(".png");
    }
    if body.len() >= 12 && &body[0..4] == b"RIFF" && &body[8..12] == b"WEBP" {
        return Some(".webp");
    }
    if body.len() >= 4 && &body[0..4] == b"GIF8" {
        return Some(".gif");
    }
    // AVIF: "ftypavif" appears inside the first box header.
    if body.len() >= 16
        && body[..16]
            .windows(b"ftypavif".len())
            .any(|window| window == b"ftypavif")
    {
        return Some(".avif");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_wins_over_magic() {
        // PNG magic but jpeg content type: header governs.
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(detect_ext(Some("image/jpeg"), &png), ".jpg");
    }

    #[test]
    fn test_content_type_variants() {
        assert_eq!(ext_from_content_type("image/jpeg; charset=binary"), Some(".jpg"));
        assert_eq!(ext_from_content_type("IMAGE/PNG"), Some(".png"));
        assert_eq!(ext_from_content_type("image/webp"), Some(".webp"));
        assert_eq!(ext_from_content_type("image/gif"), Some(".gif"));
        assert_eq!(ext_from_content_type("image/avif"), Some(".avif"));
        assert_eq!(ext_from_content_type("text/html"), None);
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(ext_from_magic(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(".jpg"));
        assert_eq!(ext_from_magic(&[0x89, 0x50, 0x4E, 0x47]), Some(".png"));

        let mut webp = Vec::new();
        webp.extend_from_slice(b"RIFF");
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert_eq!(ext_from_magic(&webp), Some(".webp"));

        assert_eq!(ext_from_magic(b"GIF89a"), Some(".gif"));

        let avif = b"\x00\x00\x00\x20ftypavif\x00\x00\x00\x00";
        assert_eq!(ext_from_magic(avif), Some(".avif"));

        assert_eq!(ext_from_magic(b"plain text"), None);
    }

    #[test]
    fn test_unknown_falls_back_to_bin() {
        assert_eq!(detect_ext(Some("application/octet-stream"), b"noise"), ".bin");
        assert_eq!(detect_ext(None, b"noise"), ".bin");
        assert_eq!(detect_ext(None, &[]), ".bin");
    }

    #[test]
    fn test_magic_used_when_content_type_absent() {
        assert_eq!(detect_ext(None, &[0xFF, 0xD8, 0xFF]), ".jpg");
        assert_eq!(detect_ext(None, b"GIF87a"), ".gif");
    }
}
