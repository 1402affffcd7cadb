//! Conversions between `image` buffers, packed grayscale frames and the
//! H×W×C `ndarray` rasters the warper consumes.

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use ndarray::{Array3, ArrayView3};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("buffer holds {actual} bytes, expected {expected} for {width}x{height}x{channels}")]
    BufferSize {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
        channels: usize,
    },
    #[error("unsupported channel count {0} (expected 1-4)")]
    UnsupportedChannels(usize),
    #[error("raster shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// View a packed grayscale frame (`width * height` bytes) as an H×W×1 raster.
pub fn gray_frame(frame: &[u8], width: u32, height: u32) -> Result<ArrayView3<'_, u8>, RasterError> {
    let (w, h) = (width as usize, height as usize);
    if frame.len() != w * h {
        return Err(RasterError::BufferSize {
            expected: w * h,
            actual: frame.len(),
            width,
            height,
            channels: 1,
        });
    }
    Ok(ArrayView3::from_shape((h, w, 1), frame)?)
}

/// Copy an image into an H×W×C raster. Wider sample types are narrowed to
/// 8 bits with their channel layout kept: luma, luma+alpha, RGB or RGBA.
pub fn from_dynamic(image: &DynamicImage) -> Result<Array3<u8>, RasterError> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let (channels, data) = match image {
        DynamicImage::ImageLuma8(b) => (1, b.as_raw().clone()),
        DynamicImage::ImageLumaA8(b) => (2, b.as_raw().clone()),
        DynamicImage::ImageRgb8(b) => (3, b.as_raw().clone()),
        DynamicImage::ImageRgba8(b) => (4, b.as_raw().clone()),
        other => match (other.color().has_color(), other.color().has_alpha()) {
            (false, false) => (1, other.to_luma8().into_raw()),
            (false, true) => (2, other.to_luma_alpha8().into_raw()),
            (true, false) => (3, other.to_rgb8().into_raw()),
            (true, true) => (4, other.to_rgba8().into_raw()),
        },
    };
    Ok(Array3::from_shape_vec((height, width, channels), data)?)
}

/// Pack an H×W×C raster back into an `image` buffer.
pub fn to_dynamic(raster: &Array3<u8>) -> Result<DynamicImage, RasterError> {
    let (h, w, channels) = raster.dim();
    let (width, height) = (w as u32, h as u32);
    let data: Vec<u8> = raster.iter().copied().collect();
    let size_error = |actual: usize| RasterError::BufferSize {
        expected: w * h * channels,
        actual,
        width,
        height,
        channels,
    };
    let len = data.len();

    let image = match channels {
        1 => GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(width, height, data).map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
        n => return Err(RasterError::UnsupportedChannels(n)),
    };
    image.ok_or_else(|| size_error(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, LumaA, Rgb};

    #[test]
    fn test_gray_frame_view() {
        let frame: Vec<u8> = (0..12).collect();
        let view = gray_frame(&frame, 4, 3).unwrap();
        assert_eq!(view.dim(), (3, 4, 1));
        assert_eq!(view[[2, 1, 0]], 9);
    }

    #[test]
    fn test_gray_frame_length_mismatch() {
        let frame = vec![0u8; 10];
        assert!(matches!(
            gray_frame(&frame, 4, 3),
            Err(RasterError::BufferSize { expected: 12, actual: 10, .. })
        ));
    }

    #[test]
    fn test_rgb_layout() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([10, 20, 30]));
        let raster = from_dynamic(&DynamicImage::ImageRgb8(img)).unwrap();
        assert_eq!(raster.dim(), (2, 3, 3));
        assert_eq!(raster[[1, 2, 0]], 10);
        assert_eq!(raster[[1, 2, 2]], 30);

        let back = to_dynamic(&raster).unwrap();
        assert_eq!(back.to_rgb8().get_pixel(2, 1), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_wide_gray_keeps_channel_count() {
        let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(2, 2, Luma([u16::MAX]));
        let raster = from_dynamic(&DynamicImage::ImageLuma16(img)).unwrap();
        assert_eq!(raster.dim(), (2, 2, 1));
        assert!(raster.iter().all(|&v| v == 255));
        assert!(matches!(to_dynamic(&raster).unwrap(), DynamicImage::ImageLuma8(_)));

        let img = image::ImageBuffer::<LumaA<u16>, Vec<u16>>::from_pixel(2, 3, LumaA([0, u16::MAX]));
        let raster = from_dynamic(&DynamicImage::ImageLumaA16(img)).unwrap();
        assert_eq!(raster.dim(), (3, 2, 2));
        assert_eq!(raster[[2, 1, 0]], 0);
        assert_eq!(raster[[2, 1, 1]], 255);
    }

    #[test]
    fn test_wide_rgb_narrowed() {
        let img = image::Rgb32FImage::from_pixel(1, 1, Rgb([1.0, 0.0, 0.5]));
        let raster = from_dynamic(&DynamicImage::ImageRgb32F(img)).unwrap();
        assert_eq!(raster.dim(), (1, 1, 3));
        assert_eq!(raster[[0, 0, 0]], 255);
        assert_eq!(raster[[0, 0, 1]], 0);
    }

    #[test]
    fn test_unsupported_channels() {
        let raster = Array3::<u8>::zeros((2, 2, 5));
        assert!(matches!(to_dynamic(&raster), Err(RasterError::UnsupportedChannels(5))));
    }
}
