use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Model output has {actual} scores but {expected} classes are configured")]
    ClassMismatch { expected: usize, actual: usize },

    #[error("History store error: {0}")]
    Persistence(String),

    #[error("History store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// 错误分类，用于日志与前端展示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 用户可修正的输入错误（如无法解码的图像）
    Input,
    /// 模型资源缺失或损坏，本次会话无法预测
    Resource,
    /// 单次推理失败，可换图重试
    Inference,
    /// 模型输出与类别表不一致（构建/配置缺陷）
    Mismatch,
    /// 历史存储读写失败
    Persistence,
    Internal,
}

impl DetectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectError::ImageDecode(_)
            | DetectError::InvalidInput(_)
            | DetectError::FileTooLarge(_, _)
            | DetectError::UnsupportedFormat(_)
            | DetectError::Base64(_) => ErrorKind::Input,
            DetectError::ModelLoad(_) | DetectError::ModelUnavailable(_) => ErrorKind::Resource,
            DetectError::Inference(_) | DetectError::Ort(_) => ErrorKind::Inference,
            DetectError::ClassMismatch { .. } => ErrorKind::Mismatch,
            DetectError::Persistence(_) | DetectError::Http(_) => ErrorKind::Persistence,
            DetectError::Config(_)
            | DetectError::Io(_)
            | DetectError::Json(_)
            | DetectError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 是否可以由用户换一张图片重试
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Input | ErrorKind::Inference)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DetectError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DetectError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DetectError::Base64(_) => StatusCode::BAD_REQUEST,
            DetectError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            DetectError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DetectError::ModelLoad(_) | DetectError::ModelUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DetectError::Persistence(_) | DetectError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DetectError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            DetectError::InvalidInput(_) => "INVALID_INPUT",
            DetectError::FileTooLarge(_, _) => "FILE_TOO_LARGE",
            DetectError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            DetectError::Base64(_) => "BASE64_DECODE_ERROR",
            DetectError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            DetectError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            DetectError::Inference(_) => "INFERENCE_ERROR",
            DetectError::Ort(_) => "ORT_ERROR",
            DetectError::ClassMismatch { .. } => "CLASS_MISMATCH",
            DetectError::Persistence(_) => "PERSISTENCE_ERROR",
            DetectError::Http(_) => "STORE_HTTP_ERROR",
            DetectError::Config(_) => "CONFIG_ERROR",
            DetectError::Io(_) => "IO_ERROR",
            DetectError::Json(_) => "JSON_ERROR",
            DetectError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "success": false,
            "error": {
                "code": self.error_code(),
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });

        tracing::error!("Request failed: {} ({}, kind={:?})", self, status, self.kind());

        (status, axum::Json(error_response)).into_response()
    }
}
