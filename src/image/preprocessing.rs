use crate::utils::error::DetectError;
use crate::Result;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array3;

/// ImageNet 均值/标准差，与训练时保持一致
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeConfig {
    /// 目标边长（正方形）
    pub size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            size: 256,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// 单次预测的输入：解码后的图像及其归一化张量
pub struct ClassificationInput {
    pub image: DynamicImage,
    /// (C, H, W)
    pub tensor: Array3<f32>,
}

/// 张量数值统计，用于排查预处理或模型问题
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl TensorStats {
    /// 空张量返回 None
    pub fn of(tensor: &Array3<f32>) -> Option<Self> {
        if tensor.is_empty() {
            return None;
        }

        let (min, max, sum) = tensor.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v as f64),
        );

        Some(Self {
            min,
            max,
            mean: (sum / tensor.len() as f64) as f32,
        })
    }
}

/// 把任意尺寸的图像转换成模型输入张量
#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    config: NormalizeConfig,
}

impl ImageNormalizer {
    pub fn new(config: NormalizeConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(DetectError::Config("Normalization size must be positive".to_string()));
        }
        if config.std.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
            return Err(DetectError::Config(format!(
                "Normalization std must be positive, got {:?}",
                config.std
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    pub fn tensor_shape(&self) -> (usize, usize, usize) {
        let size = self.config.size as usize;
        (3, size, size)
    }

    pub fn prepare(&self, image: DynamicImage) -> ClassificationInput {
        let tensor = self.normalize(&image);
        ClassificationInput { image, tensor }
    }

    /// RGB化 -> 双线性缩放 -> [0,1] -> 按通道标准化，输出CHW
    pub fn normalize(&self, image: &DynamicImage) -> Array3<f32> {
        // 先统一成RGB8，去掉alpha和调色板
        let rgb = image.to_rgb8();
        let resized = self.resize(&rgb);
        self.to_chw(&resized)
    }

    fn resize(&self, rgb: &RgbImage) -> RgbImage {
        let size = self.config.size;
        if rgb.dimensions() == (size, size) {
            return rgb.clone();
        }
        image::imageops::resize(rgb, size, size, FilterType::Triangle)
    }

    fn to_chw(&self, rgb: &RgbImage) -> Array3<f32> {
        let (width, height) = rgb.dimensions();
        let NormalizeConfig { mean, std, .. } = self.config;

        let mut tensor = Array3::<f32>::zeros((3, height as usize, width as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                tensor[[c, y as usize, x as usize]] = (value - mean[c]) / std[c];
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, LumaA, Rgb, Rgba, RgbaImage};

    #[test]
    fn test_output_shape_is_fixed() {
        let normalizer = ImageNormalizer::default();
        let sizes = [(1, 1), (17, 300), (640, 480), (256, 256), (1000, 3)];

        for (w, h) in sizes {
            let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 20, 30])));
            let tensor = normalizer.normalize(&image);
            assert_eq!(tensor.dim(), (3, 256, 256), "input {}x{}", w, h);
        }
    }

    #[test]
    fn test_channel_normalization_constants() {
        let normalizer = ImageNormalizer::default();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(256, 256, Rgb([255, 0, 128])));
        let tensor = normalizer.normalize(&image);

        let r = (1.0 - 0.485) / 0.229;
        let g = (0.0 - 0.456) / 0.224;
        let b = (128.0 / 255.0 - 0.406) / 0.225;
        assert!((tensor[[0, 10, 10]] - r).abs() < 1e-5);
        assert!((tensor[[1, 100, 200]] - g).abs() < 1e-5);
        assert!((tensor[[2, 255, 0]] - b).abs() < 1e-5);
    }

    #[test]
    fn test_alpha_is_dropped() {
        let normalizer = ImageNormalizer::default();
        let opaque = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([200, 100, 50])));
        let transparent =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 0])));

        assert_eq!(normalizer.normalize(&opaque), normalizer.normalize(&transparent));
    }

    #[test]
    fn test_grayscale_expanded_to_three_channels() {
        let normalizer = ImageNormalizer::default();
        let gray = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(30, 40, LumaA([90, 255])));
        let tensor = normalizer.normalize(&gray);

        assert_eq!(tensor.dim(), (3, 256, 256));
        let raw = 90.0 / 255.0;
        for c in 0..3 {
            let expected = (raw - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((tensor[[c, 0, 0]] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_resize_is_deterministic() {
        let normalizer = ImageNormalizer::new(NormalizeConfig {
            size: 32,
            ..NormalizeConfig::default()
        })
        .unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(123, 77, |x, y| {
            Rgb([(x * 2) as u8, (y * 3) as u8, ((x + y) % 256) as u8])
        }));

        let a = normalizer.normalize(&image);
        let b = normalizer.normalize(&image);
        assert_eq!(a.dim(), (3, 32, 32));
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ImageNormalizer::new(NormalizeConfig {
            size: 0,
            ..NormalizeConfig::default()
        })
        .is_err());
        assert!(ImageNormalizer::new(NormalizeConfig {
            std: [0.2, 0.0, 0.2],
            ..NormalizeConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_tensor_stats() {
        let mut tensor = Array3::<f32>::zeros((3, 2, 2));
        tensor[[0, 0, 0]] = -1.5;
        tensor[[2, 1, 1]] = 4.5;

        let stats = TensorStats::of(&tensor).unwrap();
        assert_eq!(stats.min, -1.5);
        assert_eq!(stats.max, 4.5);
        assert!((stats.mean - 0.25).abs() < 1e-6);

        assert!(TensorStats::of(&Array3::<f32>::zeros((3, 0, 0))).is_none());
    }

    #[test]
    fn test_prepare_keeps_source_image() {
        let normalizer = ImageNormalizer::default();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 9, Rgb([1, 2, 3])));
        let input = normalizer.prepare(image);
        assert_eq!(input.image.width(), 12);
        assert_eq!(input.tensor.dim(), (3, 256, 256));
    }
}
