pub mod config;
pub mod detection;
pub mod image;
pub mod models;
pub mod store;
pub mod utils;
pub mod web;

// 重新导出主要类型
pub use config::Config;
pub use detection::{DetectionRecord, PredictionOutcome};
pub use utils::error::{DetectError, ErrorKind};

pub type Result<T> = std::result::Result<T, DetectError>;
