//! Training-split augmentation for feature caching
//!
//! Shear, zoom and horizontal flip, composed into one inverse affine map
//! and sampled with edge replication. Validation and test images are
//! never augmented.

use image::{Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::AugmentationConfig;

/// Image augmenter applying a random shear/zoom/flip per call
#[derive(Clone, Debug)]
pub struct Augmenter {
    shear_range: f32,
    zoom_range: f32,
    horizontal_flip: bool,
}

/// One sampled transform
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineParams {
    pub shear: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            shear: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
        }
    }
}

impl Augmenter {
    pub fn new(config: &AugmentationConfig) -> Self {
        Self {
            shear_range: config.shear_range,
            zoom_range: config.zoom_range,
            horizontal_flip: config.horizontal_flip,
        }
    }

    /// Draw transform parameters
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> AffineParams {
        let shear = if self.shear_range > 0.0 {
            rng.gen_range(-self.shear_range..=self.shear_range)
        } else {
            0.0
        };
        let (zoom_x, zoom_y) = if self.zoom_range > 0.0 {
            let range = (1.0 - self.zoom_range)..=(1.0 + self.zoom_range);
            (rng.gen_range(range.clone()), rng.gen_range(range))
        } else {
            (1.0, 1.0)
        };
        let flip = self.horizontal_flip && rng.gen_bool(0.5);

        AffineParams {
            shear,
            zoom_x,
            zoom_y,
            flip,
        }
    }

    /// Apply a random transform; output has the input's dimensions
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let params = self.sample(rng);
        apply_affine(img, params)
    }
}

/// Warp `img` by `params` around its center
pub fn apply_affine(img: &RgbImage, params: AffineParams) -> RgbImage {
    let (width, height) = img.dimensions();
    if params == AffineParams::identity() || width == 0 || height == 0 {
        return img.clone();
    }

    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    RgbImage::from_fn(width, height, |x, y| {
        let mut u = x as f32 - cx;
        let v = y as f32 - cy;
        if params.flip {
            u = -u;
        }
        let src_x = (u + params.shear * v) / params.zoom_x + cx;
        let src_y = v / params.zoom_y + cy;
        sample_clamped(img, src_x, src_y)
    })
}

fn sample_clamped(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let xi = x.round().clamp(0.0, (width - 1) as f32) as u32;
    let yi = y.round().clamp(0.0, (height - 1) as f32) as u32;
    *img.get_pixel(xi, yi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 0]))
    }

    #[test]
    fn test_identity_is_noop() {
        let img = gradient(8, 6);
        assert_eq!(apply_affine(&img, AffineParams::identity()), img);
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let img = gradient(8, 4);
        let flipped = apply_affine(
            &img,
            AffineParams {
                flip: true,
                ..AffineParams::identity()
            },
        );
        assert_eq!(flipped.get_pixel(0, 2), img.get_pixel(7, 2));
        assert_eq!(flipped.get_pixel(7, 1), img.get_pixel(0, 1));
    }

    #[test]
    fn test_augment_preserves_dimensions_and_is_seeded() {
        let img = gradient(16, 12);
        let augmenter = Augmenter::new(&AugmentationConfig::default());

        let mut rng_a = ChaCha8Rng::seed_from_u64(7);
        let mut rng_b = ChaCha8Rng::seed_from_u64(7);
        let a = augmenter.augment(&img, &mut rng_a);
        let b = augmenter.augment(&img, &mut rng_b);

        assert_eq!(a.dimensions(), (16, 12));
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_respects_ranges() {
        let augmenter = Augmenter::new(&AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            let p = augmenter.sample(&mut rng);
            assert!(p.shear.abs() <= 0.2);
            assert!((0.8..=1.2).contains(&p.zoom_x));
            assert!((0.8..=1.2).contains(&p.zoom_y));
        }
    }

    #[test]
    fn test_uniform_image_stays_uniform() {
        let img = RgbImage::from_pixel(10, 10, Rgb([40, 80, 120]));
        let augmenter = Augmenter::new(&AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = augmenter.augment(&img, &mut rng);
        assert!(out.pixels().all(|p| *p == Rgb([40, 80, 120])));
    }
}
