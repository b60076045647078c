use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};

/// Decode uploaded bytes into the canonical RGB8 pixel buffer used for
/// fingerprinting and model input. Oversized images are scaled down so the
/// longest side fits `max_dim`.
pub fn prepare(bytes: &[u8], max_dim: u32) -> Result<RgbImage> {
    let decoded = image::load_from_memory(bytes).context("failed to decode image")?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let longest = width.max(height);
    if longest <= max_dim {
        return Ok(rgb);
    }
    let ratio = max_dim as f64 / longest as f64;
    let new_width = ((width as f64 * ratio) as u32).max(1);
    let new_height = ((height as f64 * ratio) as u32).max(1);
    Ok(image::imageops::resize(
        &rgb,
        new_width,
        new_height,
        FilterType::Lanczos3,
    ))
}

/// Encode an RGB buffer back to PNG for transport to the inference endpoint.
pub fn to_png_bytes(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image.clone())
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .context("failed to encode image as png")?;
    Ok(bytes)
}


#[cfg(test)]
mod tests {
    use super::test_support::{png_bytes, test_image};
    use super::*;

    #[test]
    fn decodes_png_to_rgb() {
        let bytes = png_bytes(&test_image(8, 4, [10, 20, 30]));
        let prepared = prepare(&bytes, 1024).unwrap();
        assert_eq!(prepared.dimensions(), (8, 4));
        assert_eq!(prepared.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn oversized_image_is_bounded() {
        let bytes = png_bytes(&test_image(64, 16, [0, 0, 0]));
        let prepared = prepare(&bytes, 32).unwrap();
        assert_eq!(prepared.dimensions(), (32, 8));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(prepare(b"not an image", 1024).is_err());
    }
}
