use crate::config::{ThumbnailConfig, ThumbnailFormat};
use crate::image::ImageLoader;
use crate::Result;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// 缩略图编解码：图像 <-> 可直接存入文档数据库的base64文本
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailCodec {
    config: ThumbnailConfig,
}

impl ThumbnailCodec {
    pub fn new(config: ThumbnailConfig) -> Self {
        Self { config }
    }

    pub fn encode(&self, image: &DynamicImage) -> Result<String> {
        let bytes = self.encode_bytes(image)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn encode_bytes(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        let image = self.shrink(image);
        let mut buffer = Vec::new();

        match self.config.format {
            ThumbnailFormat::Jpeg { quality } => {
                // JPEG不支持alpha通道
                let rgb = image.to_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
                encoder.encode_image(&rgb)?;
            }
            ThumbnailFormat::Png => {
                image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
            }
        }

        Ok(buffer)
    }

    pub fn decode(&self, encoded: &str) -> Result<DynamicImage> {
        let bytes = ImageLoader::decode_base64(encoded)?;
        Ok(image::load_from_memory(&bytes)?)
    }

    fn shrink(&self, image: &DynamicImage) -> DynamicImage {
        match self.config.max_side {
            Some(max_side) if image.width().max(image.height()) > max_side => {
                image.thumbnail(max_side, max_side)
            }
            _ => image.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x ^ y) % 256) as u8])
        }))
    }

    #[test]
    fn test_png_round_trip_is_pixel_exact() {
        let codec = ThumbnailCodec::new(ThumbnailConfig {
            format: ThumbnailFormat::Png,
            max_side: None,
        });
        let image = gradient(37, 21);

        let encoded = codec.encode(&image).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert_eq!(decoded.dimensions(), (37, 21));
        assert_eq!(decoded.to_rgb8(), image.to_rgb8());
    }

    #[test]
    fn test_jpeg_round_trip_keeps_dimensions() {
        let codec = ThumbnailCodec::default();
        let image = gradient(64, 48);

        let encoded = codec.encode(&image).unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));

        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_default_codec_keeps_large_dimensions() {
        let codec = ThumbnailCodec::default();
        let decoded = codec.decode(&codec.encode(&gradient(1024, 768)).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (1024, 768));
    }

    #[test]
    fn test_jpeg_accepts_alpha_input() {
        let codec = ThumbnailCodec::default();
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 4])));
        let decoded = codec.decode(&codec.encode(&image).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (10, 10));
    }

    #[test]
    fn test_large_images_are_shrunk() {
        let codec = ThumbnailCodec::new(ThumbnailConfig {
            format: ThumbnailFormat::Png,
            max_side: Some(100),
        });
        let decoded = codec.decode(&codec.encode(&gradient(400, 200)).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }
}
