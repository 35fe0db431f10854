use std::io::Cursor;
use std::path::Path;

/// Gaussian-blurs an encoded image, re-encoding in the format the filename
/// extension names (PNG when the extension is unknown).
pub fn blur(bytes: &[u8], filename: &str, sigma: f32) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let format = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(image::ImageFormat::from_extension)
        .unwrap_or(image::ImageFormat::Png);

    let mut out = Vec::new();
    img.blur(sigma).write_to(&mut Cursor::new(&mut out), format)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_produces_decodable_image() {
        let mut img = image::RgbImage::new(16, 16);
        img.put_pixel(8, 8, image::Rgb([255, 0, 0]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let blurred = blur(&png, "photo.png", 4.0).unwrap();
        assert_ne!(blurred, png);
        let decoded = image::load_from_memory(&blurred).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_blur_rejects_garbage() {
        assert!(blur(b"not an image", "photo.png", 4.0).is_err());
    }
}
