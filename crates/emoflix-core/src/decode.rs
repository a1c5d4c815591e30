//! Image payload decoding — data-URI stripping, base64, and image formats.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Return the base64 body of a payload, dropping a `data:<mime>;base64,` prefix if present.
pub fn strip_data_uri(payload: &str) -> &str {
    let payload = payload.trim();
    if payload.starts_with("data:") {
        match payload.split_once(',') {
            Some((_, body)) => body,
            None => "",
        }
    } else {
        payload
    }
}

/// Decode a base64 (optionally data-URI wrapped) payload into raw bytes.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let body = strip_data_uri(payload);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    // Some clients wrap long base64 lines.
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode encoded image bytes (JPEG, PNG, ...), sniffing the format from content.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Decode a base64 image payload all the way to pixels.
pub fn decode_payload(payload: &str) -> Result<DynamicImage, DecodeError> {
    let bytes = decode_base64(payload)?;
    decode_image_bytes(&bytes)
}

/// Encode raw image bytes as a `data:` URI, the form browsers send.
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 3, Rgb([200, 100, 50]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn test_strip_data_uri_with_prefix() {
        assert_eq!(strip_data_uri("data:image/jpeg;base64,QUJD"), "QUJD");
    }

    #[test]
    fn test_strip_data_uri_raw_base64() {
        assert_eq!(strip_data_uri("  QUJD\n"), "QUJD");
    }

    #[test]
    fn test_strip_data_uri_without_comma() {
        assert_eq!(strip_data_uri("data:image/png;base64"), "");
    }

    #[test]
    fn test_decode_base64_ignores_line_breaks() {
        assert_eq!(decode_base64("QU\nJD").unwrap(), b"ABC");
    }

    #[test]
    fn test_decode_base64_empty() {
        assert!(matches!(decode_base64(""), Err(DecodeError::Empty)));
        assert!(matches!(decode_base64("data:image/png;base64,"), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_base64_invalid() {
        assert!(matches!(decode_base64("not base64!!"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn test_decode_payload_roundtrip_png() {
        let uri = to_data_uri("image/png", &png_bytes());
        let img = decode_payload(&uri).unwrap();
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 3);
        assert_eq!(img.to_rgb8().get_pixel(0, 0), &Rgb([200, 100, 50]));
    }

    #[test]
    fn test_decode_payload_not_an_image() {
        let uri = to_data_uri("image/png", b"definitely not a png");
        assert!(matches!(decode_payload(&uri), Err(DecodeError::Image(_))));
    }
}
