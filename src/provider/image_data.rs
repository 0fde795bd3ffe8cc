//! Image payload utilities: base64 decoding and format sniffing

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{AppError, Result};

/// Decode a base64 payload, tolerating the data-URL form
/// (`data:image/png;base64,...`)
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let data = if encoded.contains(',') {
        encoded.split(',').last().unwrap_or(encoded)
    } else {
        encoded
    };

    STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::ProviderBadRequest(format!("Invalid base64 image data: {}", e)))
}

/// Detect image format from binary data using magic bytes
pub fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }

    // GIF: GIF87a or GIF89a
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("gif");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("webp");
    }

    None
}

/// Content type for sniffed binary data, defaulting to PNG
pub fn content_type_for(data: &[u8]) -> &'static str {
    match detect_image_format(data) {
        Some("jpg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// File extension for a MIME content type
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type.to_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_decode_plain_base64() {
        let encoded = STANDARD.encode(b"Hello, World!");
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_decode_data_url() {
        let decoded = decode_base64("data:image/png;base64,SGVsbG8sIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_base64("not valid base64!!!").is_err());
    }

    #[test]
    fn test_detect_formats() {
        assert_eq!(detect_image_format(&PNG_HEADER), Some("png"));
        assert_eq!(
            detect_image_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46]),
            Some("jpg")
        );
        assert_eq!(detect_image_format(b"GIF89a\x00\x00"), Some("gif"));
        assert_eq!(detect_image_format(b"RIFF\x00\x00\x00\x00WEBP"), Some("webp"));
        assert_eq!(detect_image_format(b"short"), None);
    }

    #[test]
    fn test_content_type_and_extension_round_trip() {
        assert_eq!(content_type_for(&PNG_HEADER), "image/png");
        assert_eq!(extension_for_content_type("image/png"), "png");
        assert_eq!(extension_for_content_type("image/jpeg"), "jpg");
        assert_eq!(extension_for_content_type("application/octet-stream"), "png");
    }
}
