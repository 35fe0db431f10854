use crate::config::ModerationConfig;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Upload rejected before any record was created or external call made.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Outcome of the pre-flight checks on an upload.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    /// Lowercased file extension from the allow-list.
    pub extension: String,
    /// Decoded image width in pixels.
    pub width: u32,
    /// Decoded image height in pixels.
    pub height: u32,
}

/// Validates file size against the configured maximum.
pub fn validate_file_size(size: usize, max_size: usize) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::new("EMPTY_FILE", "File is empty"));
    }
    if size > max_size {
        return Err(ValidationError::new(
            "FILE_TOO_LARGE",
            format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        ));
    }
    Ok(())
}

/// Checks the filename for emptiness, hidden-file prefixes and an allow-listed
/// extension. Returns the lowercased extension.
pub fn validate_filename(filename: &str, allowed: &[String]) -> Result<String, ValidationError> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.is_empty() {
        return Err(ValidationError::new(
            "INVALID_FILENAME",
            "Filename cannot be empty",
        ));
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    if name.starts_with('.') {
        return Err(ValidationError::new(
            "HIDDEN_FILE",
            "Hidden files (starting with '.') are not allowed",
        ));
    }

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if ext.is_empty() {
        return Err(ValidationError::new(
            "MISSING_EXTENSION",
            "File has no extension",
        ));
    }

    if !allowed.contains(&ext) {
        return Err(ValidationError::new(
            "DISALLOWED_EXTENSION",
            format!(
                "Extension '.{}' is not allowed (allowed: {})",
                ext,
                allowed.join(", ")
            ),
        ));
    }

    Ok(ext)
}

/// Verifies the magic bytes describe an image matching the claimed extension
/// family. A mismatch between a benign extension and executable or unknown
/// content is rejected outright.
pub fn verify_image_bytes(bytes: &[u8], extension: &str) -> Result<(), ValidationError> {
    let kind = infer::get(bytes).ok_or_else(|| {
        ValidationError::new("UNKNOWN_FILE_TYPE", "Could not determine file type")
    })?;

    if !kind.mime_type().starts_with("image/") {
        return Err(ValidationError::new(
            "NOT_AN_IMAGE",
            format!("Detected type '{}' is not an image", kind.mime_type()),
        ));
    }

    // jpg/jpeg are the only aliased pair in the allow-list.
    let detected = kind.extension();
    let matches = detected == extension
        || (detected == "jpg" && extension == "jpeg")
        || (detected == "jpeg" && extension == "jpg");
    if !matches {
        return Err(ValidationError::new(
            "EXTENSION_MISMATCH",
            format!(
                "File content is '{}' but extension claims '{}'",
                detected, extension
            ),
        ));
    }

    Ok(())
}

/// Probes image dimensions from the header without a full decode.
pub fn validate_dimensions(
    bytes: &[u8],
    max_width: u32,
    max_height: u32,
) -> Result<(u32, u32), ValidationError> {
    let reader = image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ValidationError::new("UNREADABLE_IMAGE", format!("Cannot read image: {}", e)))?;

    let (width, height) = reader.into_dimensions().map_err(|e| {
        ValidationError::new("UNDECODABLE_IMAGE", format!("Cannot decode image: {}", e))
    })?;

    if width > max_width || height > max_height {
        return Err(ValidationError::new(
            "IMAGE_TOO_LARGE",
            format!(
                "Image {}x{} exceeds maximum {}x{} pixels",
                width, height, max_width, max_height
            ),
        ));
    }

    Ok((width, height))
}

/// Full pre-flight pipeline for uploaded images. Runs before any staging or
/// provider call so a malformed upload never leaves a trace.
pub fn validate_upload(
    filename: &str,
    bytes: &[u8],
    config: &ModerationConfig,
) -> Result<ValidatedUpload, ValidationError> {
    validate_file_size(bytes.len(), config.max_file_size)?;
    let extension = validate_filename(filename, &config.allowed_extensions)?;
    verify_image_bytes(bytes, &extension)?;
    let (width, height) =
        validate_dimensions(bytes, config.max_pixel_width, config.max_pixel_height)?;

    Ok(ValidatedUpload {
        extension,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn test_config() -> ModerationConfig {
        ModerationConfig::default()
    }

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(1024, 2048).is_ok());
        assert!(validate_file_size(2048, 2048).is_ok());
        assert!(validate_file_size(2049, 2048).is_err());
        assert!(validate_file_size(0, 2048).is_err());
    }

    #[test]
    fn test_validate_filename() {
        let allowed: Vec<String> = vec!["jpg".into(), "jpeg".into(), "png".into()];
        assert_eq!(validate_filename("photo.JPG", &allowed).unwrap(), "jpg");
        assert_eq!(
            validate_filename("../../../etc/photo.png", &allowed).unwrap(),
            "png"
        );
        assert!(validate_filename("script.php", &allowed).is_err());
        assert!(validate_filename(".htaccess", &allowed).is_err());
        assert!(validate_filename("noextension", &allowed).is_err());
        assert!(validate_filename("", &allowed).is_err());
    }

    #[test]
    fn test_verify_image_bytes() {
        let png = png_bytes(4, 4);
        assert!(verify_image_bytes(&png, "png").is_ok());
        assert!(verify_image_bytes(&png, "jpg").is_err());

        // ELF header disguised as an image
        let elf = [0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01, 0x01, 0x00];
        assert!(verify_image_bytes(&elf, "png").is_err());
    }

    #[test]
    fn test_validate_dimensions() {
        let png = png_bytes(32, 16);
        assert_eq!(validate_dimensions(&png, 100, 100).unwrap(), (32, 16));
        assert!(validate_dimensions(&png, 16, 100).is_err());
        assert!(validate_dimensions(b"not an image", 100, 100).is_err());
    }

    #[test]
    fn test_validate_upload_pipeline() {
        let config = test_config();
        let png = png_bytes(8, 8);

        let validated = validate_upload("portrait.png", &png, &config).unwrap();
        assert_eq!(validated.extension, "png");
        assert_eq!((validated.width, validated.height), (8, 8));

        assert!(validate_upload("portrait.bmp", &png, &config).is_err());
        assert!(validate_upload("portrait.png", b"", &config).is_err());
    }
}
