pub mod loader;
pub mod preprocessing;
pub mod thumbnail;

pub use loader::ImageLoader;
pub use preprocessing::{ClassificationInput, ImageNormalizer, NormalizeConfig, TensorStats};
pub use thumbnail::ThumbnailCodec;
