use crate::models::ClassList;
use crate::utils::error::DetectError;
use crate::Result;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 模型文件路径
    pub model_path: PathBuf,

    /// 类别标签文件（为空时使用内置的15类）
    pub labels_path: Option<PathBuf>,

    /// 开发模式
    pub dev_mode: bool,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,

    /// 历史记录存储配置
    pub store_config: StoreConfig,

    /// 缩略图编码配置
    pub thumbnail_config: ThumbnailConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 优化级别
    pub optimization_level: i32,

    /// 启用图优化
    pub enable_optimization: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// 进程内存储，重启后丢失
    Memory,
    /// 远程实时数据库（REST接口）
    Realtime {
        base_url: String,
        auth_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// 远程请求超时（秒）
    pub request_timeout: u64,
}

impl StoreConfig {
    /// 记录是否能在进程退出后保留
    pub fn is_persistent(&self) -> bool {
        !matches!(self.backend, StoreBackend::Memory)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            request_timeout: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailFormat {
    Jpeg { quality: u8 },
    Png,
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailConfig {
    pub format: ThumbnailFormat,

    /// 最长边上限，超过时先等比缩小；默认保留原始尺寸
    pub max_side: Option<u32>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            format: ThumbnailFormat::Jpeg { quality: 70 },
            max_side: None,
        }
    }
}

impl Config {
    pub fn new(
        bind_addr: String,
        model_path: String,
        labels_path: Option<String>,
        dev_mode: bool,
    ) -> Result<Self> {
        if model_path.trim().is_empty() {
            return Err(DetectError::Config("Model path cannot be empty".to_string()));
        }

        let cpu_cores = num_cpus::get();

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1), // 使用75%的CPU核心
            optimization_level: 3,
            enable_optimization: true,
        };

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            max_request_size: 50 * 1024 * 1024, // 50MB
        };

        Ok(Self {
            bind_addr,
            model_path: PathBuf::from(model_path),
            labels_path: labels_path.map(PathBuf::from),
            dev_mode,
            onnx_config,
            server_config,
            store_config: StoreConfig::default(),
            thumbnail_config: ThumbnailConfig::default(),
        })
    }

    pub fn with_store(mut self, store_config: StoreConfig) -> Self {
        self.store_config = store_config;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_config: ThumbnailConfig) -> Self {
        self.thumbnail_config = thumbnail_config;
        self
    }

    /// 加载类别表：优先使用标签文件，否则使用内置列表
    pub fn class_list(&self) -> Result<ClassList> {
        match &self.labels_path {
            Some(path) => ClassList::from_file(path),
            None => Ok(ClassList::eye_conditions()),
        }
    }
}
