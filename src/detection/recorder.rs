use crate::detection::types::{DetectionRecord, HistoryEntry, TIMESTAMP_FORMAT};
use crate::image::ThumbnailCodec;
use crate::models::Prediction;
use crate::store::{HistoryStore, UserId};
use crate::utils::error::DetectError;
use crate::Result;
use chrono::{DateTime, Local};
use image::DynamicImage;
use std::sync::Arc;

/// 检测结果记录器：编码缩略图并追加到用户历史
#[derive(Clone)]
pub struct DetectionRecorder {
    store: Arc<dyn HistoryStore>,
    codec: ThumbnailCodec,
}

impl DetectionRecorder {
    pub fn new(store: Arc<dyn HistoryStore>, codec: ThumbnailCodec) -> Self {
        Self { store, codec }
    }

    pub async fn record(
        &self,
        user: &UserId,
        prediction: &Prediction,
        image: DynamicImage,
    ) -> Result<DetectionRecord> {
        self.record_at(user, prediction, image, Local::now()).await
    }

    pub async fn record_at(
        &self,
        user: &UserId,
        prediction: &Prediction,
        image: DynamicImage,
        at: DateTime<Local>,
    ) -> Result<DetectionRecord> {
        if !(0.0..=1.0).contains(&prediction.confidence) {
            return Err(DetectError::Internal(format!(
                "Confidence out of range: {}",
                prediction.confidence
            )));
        }

        // 编码属于CPU密集操作，放到阻塞线程池
        let codec = self.codec;
        let thumbnail = tokio::task::spawn_blocking(move || codec.encode(&image))
            .await
            .map_err(|e| DetectError::Internal(format!("Thumbnail encoding task failed: {}", e)))??;

        let entry = HistoryEntry {
            label: prediction.label.clone(),
            confidence: prediction.confidence_percent(),
            thumbnail,
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        };

        let id = self
            .store
            .append(user, serde_json::to_value(&entry)?)
            .await?;

        tracing::info!(
            "Detection saved: user={}, id={}, label={}, confidence={:.2}%",
            user,
            id,
            entry.label,
            entry.confidence
        );

        Ok(entry.into_record(id))
    }
}
