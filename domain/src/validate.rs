//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use crate::{CoreError, ImageUpload, NewLink};

/// Default upper bound for cover images (5 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const MAX_URL_LEN: usize = 2048;

/// Accepted cover image types. Scriptable formats such as SVG are refused.
pub const RASTER_IMAGE_TYPES: [&str; 5] =
    ["image/png", "image/jpeg", "image/gif", "image/webp", "image/avif"];

/// Validate a submitted URL. Intentionally light: ensure it is present, uses
/// an http/https scheme and has a reasonable length.
pub fn validate_url(field: &str, s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{field} is required")));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(CoreError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(CoreError::Validation(format!("{field} is too long")));
    }
    // Stored URLs end up in a Location header
    if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(CoreError::Validation(format!(
            "{field} must not contain spaces or control characters"
        )));
    }
    Ok(())
}

/// Validate a cover image against the size limit and content type.
pub fn validate_image(image: &ImageUpload, max_bytes: usize) -> Result<(), CoreError> {
    if image.bytes.is_empty() {
        return Err(CoreError::Validation("image is empty".into()));
    }
    if image.bytes.len() > max_bytes {
        return Err(CoreError::Validation(format!(
            "image exceeds {max_bytes} bytes"
        )));
    }
    if let Some(ct) = image.content_type.as_deref() {
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if !RASTER_IMAGE_TYPES.contains(&essence.as_str()) {
            return Err(CoreError::Validation(format!(
                "image has unsupported content type {ct}"
            )));
        }
    }
    Ok(())
}

/// Validate all creation inputs. Returns the image so callers don't unwrap it
/// a second time.
pub fn validate_new_link(input: &NewLink, max_image_bytes: usize) -> Result<&ImageUpload, CoreError> {
    validate_url("content url", &input.content_url)?;
    validate_url("ads url", &input.ads_url)?;
    let image = input
        .image
        .as_ref()
        .ok_or_else(|| CoreError::Validation("image is required".into()))?;
    validate_image(image, max_image_bytes)?;
    Ok(image)
}

/// Reduce a user-supplied file name to a safe blob-key component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.chars().take(128).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> ImageUpload {
        ImageUpload {
            file_name: "cover.png".into(),
            content_type: Some("image/png".into()),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }
    }

    #[test]
    fn url_validation_basic() {
        assert!(validate_url("u", "https://example.com").is_ok());
        assert!(validate_url("u", "http://example.com").is_ok());
        assert!(validate_url("u", "").is_err());
        assert!(validate_url("u", "   ").is_err());
        assert!(validate_url("u", "ftp://example.com").is_err());
        let long = format!("https://e.com/{}", "a".repeat(2048));
        assert!(validate_url("u", &long).is_err());
    }

    #[test]
    fn url_with_control_or_space_rejected() {
        for bad in [
            "https://c.example/a\x01b",
            "https://ads.example/x\x7fy",
            "https://c.example/a\nb",
            "https://c.example/a b",
        ] {
            assert!(matches!(validate_url("u", bad), Err(CoreError::Validation(_))), "{bad:?}");
        }
        // surrounding whitespace is trimmed, not rejected
        assert!(validate_url("u", "  https://c.example/ok  ").is_ok());
    }

    #[test]
    fn image_validation() {
        assert!(validate_image(&png(), DEFAULT_MAX_IMAGE_BYTES).is_ok());

        let mut empty = png();
        empty.bytes.clear();
        assert!(validate_image(&empty, DEFAULT_MAX_IMAGE_BYTES).is_err());

        assert!(validate_image(&png(), 2).is_err());

        let mut text = png();
        text.content_type = Some("text/plain".into());
        assert!(validate_image(&text, DEFAULT_MAX_IMAGE_BYTES).is_err());

        let mut untyped = png();
        untyped.content_type = None;
        assert!(validate_image(&untyped, DEFAULT_MAX_IMAGE_BYTES).is_ok());
    }

    #[test]
    fn only_raster_image_types_accepted() {
        for ok in ["image/png", "image/jpeg", "IMAGE/GIF", "image/webp", "image/avif; q=1"] {
            let mut img = png();
            img.content_type = Some(ok.into());
            assert!(validate_image(&img, DEFAULT_MAX_IMAGE_BYTES).is_ok(), "{ok}");
        }
        for bad in ["image/svg+xml", "image/x-icon", "text/html"] {
            let mut img = png();
            img.file_name = "cover.svg".into();
            img.content_type = Some(bad.into());
            assert!(
                matches!(validate_image(&img, DEFAULT_MAX_IMAGE_BYTES), Err(CoreError::Validation(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn new_link_requires_every_input() {
        let full = NewLink {
            content_url: "https://c.example".into(),
            ads_url: "https://a.example".into(),
            image: Some(png()),
        };
        assert!(validate_new_link(&full, DEFAULT_MAX_IMAGE_BYTES).is_ok());

        let no_image = NewLink { image: None, ..full.clone() };
        assert!(matches!(
            validate_new_link(&no_image, DEFAULT_MAX_IMAGE_BYTES),
            Err(CoreError::Validation(_))
        ));

        let no_ads = NewLink { ads_url: String::new(), ..full };
        assert!(matches!(
            validate_new_link(&no_ads, DEFAULT_MAX_IMAGE_BYTES),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("cover.png"), "cover.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\pics\\my pic.jpg"), "my_pic.jpg");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name(""), "image");
    }
}
