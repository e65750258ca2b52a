//! Frame decoding and tensor preparation.
//!
//! Frames are decoded to RGB8 whatever their source color type, resized with
//! `resize_exact` semantics using the Catmull-Rom filter, scaled to `[0, 1]`
//! and wrapped in a batch dimension of one.

use crate::error::DecodeError;
use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use ndarray::Array4;
use serde::Deserialize;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, height, width, 3]`, the Keras/TensorFlow convention.
    #[default]
    Nhwc,
    /// `[1, 3, height, width]`, the PyTorch convention.
    Nchw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub layout: TensorLayout,
}

impl InputShape {
    pub fn new(width: u32, height: u32, layout: TensorLayout) -> Self {
        Self {
            width,
            height,
            layout,
        }
    }

    pub fn dims(&self) -> [usize; 4] {
        let width = self.width as usize;
        let height = self.height as usize;
        match self.layout {
            TensorLayout::Nhwc => [1, height, width, 3],
            TensorLayout::Nchw => [1, 3, height, width],
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image_reader = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let decoded = image_reader.decode()?;

    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroDimension { width, height });
    }

    Ok(decoded.to_rgb8())
}

pub fn prepare(image: &RgbImage, shape: &InputShape) -> Array4<f32> {
    let resized;
    let image = if image.dimensions() == (shape.width, shape.height) {
        image
    } else {
        resized = imageops::resize(image, shape.width, shape.height, FilterType::CatmullRom);
        &resized
    };

    let mut input = Array4::<f32>::zeros(shape.dims());
    for (x, y, pixel) in image.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        for (channel, value) in pixel.0.iter().enumerate() {
            let value = f32::from(*value) / 255.;
            match shape.layout {
                TensorLayout::Nhwc => input[[0, y, x, channel]] = value,
                TensorLayout::Nchw => input[[0, channel, y, x]] = value,
            }
        }
    }

    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};

    fn encode(img: impl Into<DynamicImage>, format: ImageFormat) -> Vec<u8> {
        let mut image_data: Vec<u8> = Vec::new();
        img.into()
            .write_to(&mut Cursor::new(&mut image_data), format)
            .unwrap();
        image_data
    }

    #[test]
    fn test_decode_and_prepare_nhwc() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 60, Rgb([255, 0, 0]));
        let decoded = decode(&encode(img, ImageFormat::Png)).unwrap();
        assert_eq!(decoded.dimensions(), (100, 60));

        let shape = InputShape::new(224, 224, TensorLayout::Nhwc);
        let input = prepare(&decoded, &shape);

        assert_eq!(input.shape(), &[1, 224, 224, 3]);
        assert!((input[[0, 10, 10, 0]] - 1.0).abs() < 1e-2);
        assert!(input[[0, 10, 10, 1]].abs() < 1e-2);
    }

    #[test]
    fn test_prepare_nchw() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(32, 32, Rgb([0, 0, 255]));
        let decoded = decode(&encode(img, ImageFormat::Png)).unwrap();

        let shape = InputShape::new(16, 24, TensorLayout::Nchw);
        let input = prepare(&decoded, &shape);

        assert_eq!(input.shape(), &[1, 3, 24, 16]);
        assert!((input[[0, 2, 5, 5]] - 1.0).abs() < 1e-2);
        assert!(input[[0, 0, 5, 5]].abs() < 1e-2);
    }

    #[test]
    fn test_prepared_values_stay_in_unit_range() {
        let img = ImageBuffer::from_fn(37, 53, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x ^ y) % 256) as u8])
        });
        let decoded = decode(&encode(img, ImageFormat::Png)).unwrap();
        let input = prepare(&decoded, &InputShape::new(224, 224, TensorLayout::Nhwc));

        assert!(input.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_grayscale_expands_to_three_channels() {
        let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_pixel(20, 20, Luma([128]));
        let decoded = decode(&encode(img, ImageFormat::Png)).unwrap();
        let input = prepare(&decoded, &InputShape::new(8, 8, TensorLayout::Nhwc));

        assert_eq!(input.shape(), &[1, 8, 8, 3]);
        let expected = 128.0 / 255.0;
        for channel in 0..3 {
            assert!((input[[0, 4, 4, channel]] - expected).abs() < 1e-2);
        }
    }

    #[test]
    fn test_decode_jpeg() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(64, 48, Rgb([10, 200, 30]));
        let decoded = decode(&encode(img, ImageFormat::Jpeg)).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(matches!(decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_garbage() {
        let result = decode(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    #[test]
    fn test_decode_truncated_png() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(50, 50, Rgb([1, 2, 3]));
        let data = encode(img, ImageFormat::Png);
        assert!(decode(&data[..data.len() / 2]).is_err());
    }
}
