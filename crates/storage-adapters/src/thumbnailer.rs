//! JPEG thumbnails via `image`.

use std::path::Path;

use anyhow::Context;
use domains::ThumbnailRenderer;
use image::{GenericImageView, ImageFormat, ImageReader};

pub struct ImageThumbnailer {
    /// Longest edge of the produced thumbnail, in pixels.
    max_dimension: u32,
}

impl ImageThumbnailer {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl ThumbnailRenderer for ImageThumbnailer {
    fn render(&self, source: &Path, dest: &Path) -> anyhow::Result<()> {
        // 1. Decode, trusting the file contents over the extension
        let img = ImageReader::open(source)
            .with_context(|| format!("opening {}", source.display()))?
            .with_guessed_format()?
            .decode()
            .with_context(|| format!("decoding {}", source.display()))?;

        // 2. Downscale only; small images keep their size
        let max = self.max_dimension;
        let thumb = if img.width() > max || img.height() > max {
            img.thumbnail(max, max)
        } else {
            img
        };

        // 3. JPEG has no alpha channel, so flatten to RGB before encoding
        let tmp = dest.with_extension("tmp");
        thumb
            .to_rgb8()
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .with_context(|| format!("encoding {}", tmp.display()))?;
        std::fs::rename(&tmp, dest).with_context(|| format!("renaming into {}", dest.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn downscales_preserving_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("wide.png");
        RgbImage::from_pixel(64, 32, Rgb([200, 10, 10])).save(&source).unwrap();
        let dest = dir.path().join("wide.png.thumb.jpg");

        ImageThumbnailer::new(16).render(&source, &dest).unwrap();
        assert_eq!(image::image_dimensions(&dest).unwrap(), (16, 8));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tiny.png");
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])).save(&source).unwrap();
        let dest = dir.path().join("tiny.png.thumb.jpg");

        ImageThumbnailer::new(16).render(&source, &dest).unwrap();
        assert_eq!(image::image_dimensions(&dest).unwrap(), (4, 4));
    }

    #[test]
    fn undecodable_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("fake.png");
        std::fs::write(&source, b"definitely not a png").unwrap();
        let dest = dir.path().join("fake.png.thumb.jpg");

        assert!(ImageThumbnailer::new(16).render(&source, &dest).is_err());
        assert!(!dest.exists());
    }
}
