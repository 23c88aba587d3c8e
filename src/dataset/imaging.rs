//! Image decoding and tensor layout

use std::path::Path;

use image::{imageops::FilterType, ImageReader, RgbImage};

use crate::utils::error::{Result, XrayError};

/// Decode an image, convert to RGB and resize to `size x size`
///
/// Grayscale radiographs are replicated across the three channels.
pub fn load_rgb(path: &Path, size: usize) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .map_err(|e| XrayError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| XrayError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| XrayError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    let size = size as u32;
    let img = if img.width() == size && img.height() == size {
        img
    } else {
        img.resize_exact(size, size, FilterType::Nearest)
    };
    Ok(img.to_rgb8())
}

/// Flatten to CHW order with values scaled to `[0, 1]`
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};
    use tempfile::tempdir;

    #[test]
    fn test_load_resizes_and_converts_gray() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xray.png");
        GrayImage::from_pixel(50, 40, Luma([128])).save(&path).unwrap();

        let img = load_rgb(&path, 32).unwrap();
        assert_eq!(img.dimensions(), (32, 32));
        assert_eq!(*img.get_pixel(5, 5), Rgb([128, 128, 128]));
    }

    #[test]
    fn test_to_chw_layout_and_range() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));

        let data = to_chw(&img);
        assert_eq!(data.len(), 12);
        // red plane
        assert_eq!(&data[0..4], &[1.0, 0.0, 1.0, 1.0]);
        // green plane
        assert_eq!(&data[4..8], &[0.0, 1.0, 0.0, 0.0]);
        assert!((data[8] - 0.2).abs() < 1e-6);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_unreadable_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let err = load_rgb(&path, 32).unwrap_err();
        assert!(matches!(err, XrayError::ImageLoad(p, _) if p == path));
    }
}
