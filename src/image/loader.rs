use crate::utils::error::DetectError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::path::Path;

/// 默认上传大小上限 50MB
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

pub struct ImageLoader;

impl ImageLoader {
    /// 从base64字符串加载图像
    pub fn from_base64(base64_data: &str, max_bytes: usize) -> Result<DynamicImage> {
        let image_bytes = Self::decode_base64(base64_data)?;
        Self::from_bytes(&image_bytes, max_bytes)
    }

    /// 解码base64文本，兼容数据URL前缀 (data:image/xxx;base64,)
    pub fn decode_base64(base64_data: &str) -> Result<Vec<u8>> {
        let trimmed = base64_data.trim();
        let base64_clean = if trimmed.starts_with("data:") {
            trimmed.split_once(',').map(|(_, data)| data).unwrap_or(trimmed)
        } else {
            trimmed
        };

        // 兼容按行折断的base64
        let compact: String = base64_clean.chars().filter(|c| !c.is_ascii_whitespace()).collect();

        Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
    }

    /// 从字节加载图像
    pub fn from_bytes(bytes: &[u8], max_bytes: usize) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(DetectError::InvalidInput("Empty image data".to_string()));
        }

        if bytes.len() > max_bytes {
            return Err(DetectError::FileTooLarge(bytes.len(), max_bytes));
        }

        if let Some(format) = Self::detect_format(bytes) {
            if !Self::is_supported_format(format) {
                return Err(DetectError::UnsupportedFormat(format!("{:?}", format)));
            }
        }

        let image = image::load_from_memory(bytes)?;
        Self::validate_dimensions(&image)?;

        Ok(image)
    }

    /// 从文件路径加载图像
    pub fn from_path(path: &Path) -> Result<DynamicImage> {
        let image = image::open(path)?;
        Self::validate_dimensions(&image)?;
        Ok(image)
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 验证图像格式是否支持
    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::Bmp
                | ImageFormat::Tiff
                | ImageFormat::WebP
        )
    }

    /// 验证图像尺寸
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width == 0 || height == 0 {
            return Err(DetectError::InvalidInput(format!(
                "Image has no pixels: {}x{}",
                width, height
            )));
        }

        if width > 16384 || height > 16384 {
            return Err(DetectError::InvalidInput(format!(
                "Image too large: {}x{}, maximum 16384x16384",
                width, height
            )));
        }

        Ok(())
    }
}
