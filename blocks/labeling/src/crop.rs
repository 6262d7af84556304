use image::{DynamicImage, ImageOutputFormat};
use labelme_atoms::labels::CropRegion;
use std::io::Cursor;

use crate::error::LabelingResult;

pub const JPEG_QUALITY: u8 = 90;
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

pub fn decode(bytes: &[u8]) -> LabelingResult<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Intersects `region` with a `width` x `height` image. `None` when nothing is left.
pub fn clamp_region(region: &CropRegion, width: u32, height: u32) -> Option<CropRegion> {
    if region.x >= width || region.y >= height {
        return None;
    }
    let clamped = CropRegion::new(
        region.x,
        region.y,
        region.width.min(width - region.x),
        region.height.min(height - region.y),
    );
    (!clamped.is_empty()).then_some(clamped)
}

/// Cuts `region` out of `source` and encodes it as JPEG. The region must already be clamped.
pub fn render_crop(source: &DynamicImage, region: &CropRegion) -> LabelingResult<Vec<u8>> {
    let cropped = source
        .crop_imm(region.x, region.y, region.width, region.height)
        .to_rgb8();

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(cropped).write_to(&mut buffer, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn regions_are_clamped_to_bounds() {
        assert_eq!(
            clamp_region(&CropRegion::new(80, 90, 50, 50), 100, 100),
            Some(CropRegion::new(80, 90, 20, 10))
        );
        assert_eq!(clamp_region(&CropRegion::new(100, 0, 5, 5), 100, 100), None);
        assert_eq!(clamp_region(&CropRegion::new(0, 0, 0, 5), 100, 100), None);
    }

    #[test]
    fn crop_is_encoded_as_jpeg_of_region_size() {
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 80, Rgb([200, 10, 10])));
        let bytes = render_crop(&source, &CropRegion::new(10, 20, 50, 40)).unwrap();

        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (50, 40));
    }
}
