//! Particle sprite images.
//!
//! A [`ParticleImage`] is decoded on the host, flipped so row 0 is the bottom
//! of the picture (texture coordinates have their origin at the bottom-left
//! of the quad), and expanded into a full mip chain ready for upload.
//!
//! # Supported Formats
//!
//! - PNG (recommended)
//! - JPEG

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::TextureError;

/// Filter mode for sprite sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Trilinear filtering across the mip chain (default).
    #[default]
    Linear,
    /// Sharp nearest-neighbour filtering. Good for pixel art.
    Nearest,
}

/// One level of the mip chain, tightly packed RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A decoded sprite with its mip chain.
#[derive(Debug, Clone)]
pub struct ParticleImage {
    levels: Vec<MipLevel>,
    pub filter: FilterMode,
}

impl ParticleImage {
    /// Decode an image file.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let sprite = ParticleImage::load("assets/smoke.png")?;
    /// assert!(sprite.levels().len() >= 1);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let img = image::open(path.as_ref())?.into_rgba8();
        Self::from_image(img)
    }

    /// Build from an RGBA8 image that is still top-row-first.
    pub fn from_image(img: RgbaImage) -> Result<Self, TextureError> {
        if img.width() == 0 || img.height() == 0 {
            return Err(TextureError::EmptyImage);
        }
        let base = imageops::flip_vertical(&img);
        Ok(Self {
            levels: mip_chain(base),
            filter: FilterMode::Linear,
        })
    }

    /// A single opaque white texel, used when no sprite is loaded.
    pub fn solid_white() -> Self {
        Self {
            levels: vec![MipLevel {
                width: 1,
                height: 1,
                rgba: vec![255; 4],
            }],
            filter: FilterMode::Nearest,
        }
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn width(&self) -> u32 {
        self.levels[0].width
    }

    pub fn height(&self) -> u32 {
        self.levels[0].height
    }

    /// Mip levels, largest first. Never empty.
    pub fn levels(&self) -> &[MipLevel] {
        &self.levels
    }
}

/// Halve until 1x1, each level filtered from the previous one.
fn mip_chain(base: RgbaImage) -> Vec<MipLevel> {
    let mut levels = Vec::new();
    let mut current = base;
    loop {
        let (w, h) = current.dimensions();
        let next = (w > 1 || h > 1)
            .then(|| imageops::resize(&current, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle));
        levels.push(MipLevel {
            width: w,
            height: h,
            rgba: current.into_raw(),
        });
        match next {
            Some(img) => current = img,
            None => break,
        }
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn two_row_image() -> RgbaImage {
        // Top row red, bottom row blue.
        RgbaImage::from_fn(4, 2, |_, y| {
            if y == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn rows_are_flipped() {
        let sprite = ParticleImage::from_image(two_row_image()).unwrap();
        let base = &sprite.levels()[0];
        assert_eq!(&base.rgba[..4], &[0, 0, 255, 255]);
        assert_eq!(&base.rgba[16..20], &[255, 0, 0, 255]);
    }

    #[test]
    fn mip_chain_reaches_one_by_one() {
        let sprite = ParticleImage::from_image(RgbaImage::new(8, 2)).unwrap();
        let sizes: Vec<_> = sprite.levels().iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        for level in sprite.levels() {
            assert_eq!(level.rgba.len(), (level.width * level.height * 4) as usize);
        }
    }

    #[test]
    fn filter_override_keeps_pixels() {
        let sprite = ParticleImage::from_image(two_row_image()).unwrap();
        assert_eq!(sprite.filter, FilterMode::Linear);
        let levels = sprite.levels().len();

        let pixelated = sprite.with_filter(FilterMode::Nearest);
        assert_eq!(pixelated.filter, FilterMode::Nearest);
        assert_eq!(pixelated.levels().len(), levels);
        assert_eq!(&pixelated.levels()[0].rgba[..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(matches!(
            ParticleImage::from_image(RgbaImage::new(0, 3)),
            Err(TextureError::EmptyImage)
        ));
    }

    #[test]
    fn load_reads_png_from_disk() {
        let path = std::env::temp_dir().join(format!("ember-sprite-{}.png", std::process::id()));
        two_row_image().save(&path).unwrap();
        let sprite = ParticleImage::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!((sprite.width(), sprite.height()), (4, 2));
        assert_eq!(sprite.levels().len(), 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ParticleImage::load("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, TextureError::ImageLoad(_)));
    }
}
