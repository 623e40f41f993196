#![allow(dead_code)]

use base64::Engine;
use eddc::detection::{DetectionRecorder, PredictionPipeline};
use eddc::image::{ImageNormalizer, ThumbnailCodec};
use eddc::models::{ClassList, InferenceWorker, ScoreModel, ScorePostprocessor};
use eddc::store::HistoryStore;
use eddc::{DetectError, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::Array3;
use std::io::Cursor;
use std::sync::Arc;

/// 固定输出的模型
pub struct FixedModel {
    pub scores: Vec<f32>,
}

impl ScoreModel for FixedModel {
    fn forward(&mut self, input: &Array3<f32>) -> Result<Vec<f32>> {
        assert_eq!(input.dim(), (3, 256, 256));
        Ok(self.scores.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// [5, 1, 0, ...] 共15个分数
pub fn dominant_first() -> Vec<f32> {
    let mut scores = vec![0.0; 15];
    scores[0] = 5.0;
    scores[1] = 1.0;
    scores
}

pub async fn ready_worker(scores: Vec<f32>) -> Arc<InferenceWorker> {
    let (worker, loaded) = InferenceWorker::spawn(
        move || Ok(Box::new(FixedModel { scores }) as Box<dyn ScoreModel>),
        15,
    )
    .unwrap();
    loaded.await.unwrap().unwrap();
    Arc::new(worker)
}

pub async fn failed_worker() -> Arc<InferenceWorker> {
    let (worker, loaded) = InferenceWorker::spawn(
        || Err(DetectError::ModelLoad("model file missing".to_string())),
        15,
    )
    .unwrap();
    assert!(loaded.await.unwrap().is_err());
    Arc::new(worker)
}

pub fn pipeline(worker: Arc<InferenceWorker>, store: Arc<dyn HistoryStore>) -> PredictionPipeline {
    PredictionPipeline::new(
        ImageNormalizer::default(),
        worker,
        ScorePostprocessor::new(ClassList::eye_conditions()),
    )
    .with_recorder(DetectionRecorder::new(store, ThumbnailCodec::default()))
}

pub fn sample_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 3) as u8, (y * 5) as u8, 90])
    }))
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Vec::new();
    sample_image(width, height)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

pub fn png_base64(width: u32, height: u32) -> String {
    base64::engine::general_purpose::STANDARD.encode(png_bytes(width, height))
}
