use crate::{
    detection::{HistoryView, PredictionOutcome, PredictionStatus, RecordStatus},
    models::ClassScore,
    store::UserId,
    utils::error::DetectError,
    web::{
        extractors::{OptionalUserId, RequestId, UserIdHeader, ValidatedJson},
        AppState,
    },
    Result,
};
use axum::{
    extract::{Multipart, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 返回的候选类别数量
const TOP_CLASSES: usize = 5;

/// JSON请求体（base64模式）
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// Base64编码的图像数据
    pub image: String,

    /// 是否写入历史记录（需要同时提供用户ID）
    #[serde(default = "default_record")]
    pub record: bool,
}

fn default_record() -> bool {
    true
}

/// 预测响应
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub label: String,
    /// 置信度 (0.0 - 1.0)
    pub confidence: f32,
    pub confidence_percent: f32,
    pub class_index: usize,
    pub top_classes: Vec<ClassScore>,
    pub record: RecordStatus,
    pub processing_time: f32,
}

impl From<PredictionOutcome> for PredictResponse {
    fn from(outcome: PredictionOutcome) -> Self {
        let PredictionOutcome {
            prediction,
            record,
            processing_time,
        } = outcome;

        Self {
            top_classes: prediction.top_k(TOP_CLASSES),
            confidence_percent: prediction.confidence_percent(),
            label: prediction.label,
            confidence: prediction.confidence,
            class_index: prediction.class_index,
            record,
            processing_time,
        }
    }
}

/// JSON响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: String,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }

    pub fn error(code: String, message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError { code, message }),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// JSON base64上传处理器
pub async fn predict_json_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    OptionalUserId(user): OptionalUserId,
    ValidatedJson(request): ValidatedJson<PredictRequest>,
) -> Result<Json<ApiResponse<PredictResponse>>> {
    tracing::info!(
        "Processing JSON predict request: request_id={}, user={:?}, record={}",
        request_id,
        user.as_ref().map(UserId::as_str),
        request.record
    );

    let record_user = user.as_ref().filter(|_| request.record);
    let status_tx = progress_monitor(&state, &request_id);

    let outcome = state
        .pipeline
        .process_base64(record_user, &request.image, status_tx)
        .await?;

    tracing::info!(
        "JSON predict completed: request_id={}, label={}, time={:.3}s",
        request_id,
        outcome.prediction.label,
        outcome.processing_time
    );

    Ok(Json(ApiResponse::success(outcome.into(), request_id)))
}

/// Multipart文件上传处理器
pub async fn predict_upload_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    OptionalUserId(user): OptionalUserId,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<PredictResponse>>> {
    tracing::info!("Processing multipart predict request: request_id={}", request_id);

    let mut image_data: Option<Vec<u8>> = None;
    let mut record = true;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        DetectError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "file" => {
                // 验证内容类型
                if let Some(content_type) = field.content_type() {
                    if !content_type.starts_with("image/") {
                        return Err(DetectError::UnsupportedFormat(content_type.to_string()));
                    }
                }

                let data = field.bytes().await.map_err(|e| {
                    DetectError::InvalidInput(format!("Failed to read file data: {}", e))
                })?;

                if data.is_empty() {
                    return Err(DetectError::InvalidInput("Empty file".to_string()));
                }

                tracing::debug!("Received file: {} bytes", data.len());
                image_data = Some(data.to_vec());
            }
            "record" => {
                let value = field.text().await.map_err(|e| {
                    DetectError::InvalidInput(format!("Failed to read record field: {}", e))
                })?;
                record = parse_record_flag(&value)?;
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    let image_data = image_data
        .ok_or_else(|| DetectError::InvalidInput("No image file provided".to_string()))?;

    let record_user = user.as_ref().filter(|_| record);
    let status_tx = progress_monitor(&state, &request_id);

    let outcome = state
        .pipeline
        .process_bytes(record_user, image_data, status_tx)
        .await?;

    tracing::info!(
        "Upload predict completed: request_id={}, label={}, time={:.3}s",
        request_id,
        outcome.prediction.label,
        outcome.processing_time
    );

    Ok(Json(ApiResponse::success(outcome.into(), request_id)))
}

/// 历史记录处理器，最新的记录在前
pub async fn history_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    UserIdHeader(user): UserIdHeader,
) -> Result<Json<ApiResponse<HistoryView>>> {
    let view = state.history.load(&user).await?;

    tracing::info!(
        "History loaded: request_id={}, user={}, entries={}",
        request_id,
        user,
        view.records().len()
    );

    Ok(Json(ApiResponse::success(view, request_id)))
}

fn parse_record_flag(value: &str) -> Result<bool> {
    value.trim().parse().map_err(|_| {
        DetectError::InvalidInput(format!(
            "Invalid record flag '{}', expected true or false",
            value.trim()
        ))
    })
}

/// 开发模式下把阶段推送打到调试日志
fn progress_monitor(
    state: &AppState,
    request_id: &str,
) -> Option<mpsc::UnboundedSender<PredictionStatus>> {
    if !state.dev_mode() {
        return None;
    }

    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<PredictionStatus>();
    let request_id = request_id.to_string();

    tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            tracing::debug!(
                "Predict progress [{}]: {:?} - {:.1}% - {}",
                request_id,
                status.stage,
                status.progress * 100.0,
                status.message
            );
        }
    });

    Some(status_tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_flag() {
        assert!(parse_record_flag("true").unwrap());
        assert!(!parse_record_flag(" false\n").unwrap());

        for bad in ["", "yes", "1"] {
            let err = parse_record_flag(bad).unwrap_err();
            assert!(matches!(err, DetectError::InvalidInput(_)));
        }
    }
}
