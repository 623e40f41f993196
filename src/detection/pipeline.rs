use crate::detection::recorder::DetectionRecorder;
use crate::detection::types::{PredictionOutcome, PredictionStage, PredictionStatus, RecordStatus};
use crate::image::{loader::DEFAULT_MAX_BYTES, ClassificationInput, ImageLoader, ImageNormalizer};
use crate::models::{InferenceWorker, Prediction, ScorePostprocessor};
use crate::store::UserId;
use crate::utils::error::DetectError;
use crate::Result;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

type StatusSender = Option<mpsc::UnboundedSender<PredictionStatus>>;

/// 待处理图像，解码放在归一化阶段的阻塞线程里
enum ImageSource {
    Base64(String),
    Bytes(Vec<u8>),
    Decoded(DynamicImage),
}

impl ImageSource {
    fn load(self, max_bytes: usize) -> Result<DynamicImage> {
        match self {
            ImageSource::Base64(data) => ImageLoader::from_base64(&data, max_bytes),
            ImageSource::Bytes(bytes) => ImageLoader::from_bytes(&bytes, max_bytes),
            ImageSource::Decoded(image) => Ok(image),
        }
    }
}

/// 检测流水线：归一化 -> 推理 -> 后处理 -> 记录
pub struct PredictionPipeline {
    normalizer: ImageNormalizer,
    worker: Arc<InferenceWorker>,
    postprocessor: ScorePostprocessor,
    recorder: Option<DetectionRecorder>,
    max_bytes: usize,
}

impl PredictionPipeline {
    pub fn new(
        normalizer: ImageNormalizer,
        worker: Arc<InferenceWorker>,
        postprocessor: ScorePostprocessor,
    ) -> Self {
        Self {
            normalizer,
            worker,
            postprocessor,
            recorder: None,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_recorder(mut self, recorder: DetectionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// 处理base64图像
    pub async fn process_base64(
        &self,
        user: Option<&UserId>,
        base64_data: &str,
        status_tx: StatusSender,
    ) -> Result<PredictionOutcome> {
        let source = ImageSource::Base64(base64_data.to_string());
        self.run(user, source, status_tx).await
    }

    /// 处理上传的原始字节
    pub async fn process_bytes(
        &self,
        user: Option<&UserId>,
        bytes: Vec<u8>,
        status_tx: StatusSender,
    ) -> Result<PredictionOutcome> {
        self.run(user, ImageSource::Bytes(bytes), status_tx).await
    }

    /// 处理已解码的图像
    pub async fn process_image(
        &self,
        user: Option<&UserId>,
        image: DynamicImage,
        status_tx: StatusSender,
    ) -> Result<PredictionOutcome> {
        self.run(user, ImageSource::Decoded(image), status_tx).await
    }

    /// 核心处理流程
    async fn run(
        &self,
        user: Option<&UserId>,
        source: ImageSource,
        status_tx: StatusSender,
    ) -> Result<PredictionOutcome> {
        let start_time = Instant::now();
        let mut stage = PredictionStage::Idle.select_image()?;
        emit(&status_tx, stage, "Image selected");

        // 解码 + 归一化
        stage = stage.next();
        emit(&status_tx, stage, "Normalizing image");
        let normalizer = self.normalizer.clone();
        let max_bytes = self.max_bytes;
        let prepared = tokio::task::spawn_blocking(move || {
            source.load(max_bytes).map(|image| normalizer.prepare(image))
        })
        .await
        .map_err(|e| DetectError::Internal(format!("Normalization task failed: {}", e)))
        .and_then(|r| r);
        let ClassificationInput { image, tensor } = fail_on(&status_tx, stage, prepared)?;

        // 推理
        stage = stage.next();
        emit(&status_tx, stage, "Running classifier");
        let inference_start = Instant::now();
        let scores = fail_on(&status_tx, stage, self.worker.infer(tensor).await)?;
        let inference_time = inference_start.elapsed();

        // 后处理
        stage = stage.next();
        emit(&status_tx, stage, "Ranking class scores");
        let prediction = fail_on(&status_tx, stage, self.postprocessor.process(&scores))?;

        // 记录（失败不影响结果展示）
        stage = stage.next();
        let record = match (user, &self.recorder) {
            (Some(user), Some(recorder)) => {
                emit(&status_tx, stage, "Saving detection to history");
                Self::save(recorder, user, &prediction, image).await
            }
            _ => RecordStatus::Skipped,
        };
        stage = match record {
            RecordStatus::Failed { .. } => stage.fail(),
            _ => stage.next(),
        };

        let total_time = start_time.elapsed();
        emit(
            &status_tx,
            stage,
            format!("Detected: {}", prediction.label),
        );

        tracing::info!(
            "Prediction completed: label={}, confidence={:.4}, inference={:.3}s, total={:.3}s",
            prediction.label,
            prediction.confidence,
            inference_time.as_secs_f32(),
            total_time.as_secs_f32()
        );

        Ok(PredictionOutcome {
            prediction,
            record,
            processing_time: total_time.as_secs_f32(),
        })
    }

    async fn save(
        recorder: &DetectionRecorder,
        user: &UserId,
        prediction: &Prediction,
        image: DynamicImage,
    ) -> RecordStatus {
        match recorder.record(user, prediction, image).await {
            Ok(record) => RecordStatus::Saved {
                id: record.id,
                timestamp: record.timestamp,
            },
            Err(e) => {
                tracing::error!(
                    "Failed to save detection history for user {}: {} (kind={:?})",
                    user,
                    e,
                    e.kind()
                );
                RecordStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn emit(status_tx: &StatusSender, stage: PredictionStage, message: impl Into<String>) {
    if let Some(tx) = status_tx {
        let _ = tx.send(PredictionStatus::new(stage, message));
    }
}

fn fail_on<T>(status_tx: &StatusSender, stage: PredictionStage, result: Result<T>) -> Result<T> {
    if let Err(ref e) = result {
        tracing::warn!("Prediction failed during {:?}: {} (kind={:?})", stage, e, e.kind());
        emit(status_tx, stage.fail(), e.to_string());
    }
    result
}
