use crate::models::{
    Classifier, ClassList, InferenceWorker, ModelInfo, ModelState, ScoreModel, ScorePostprocessor,
};
use crate::utils::error::DetectError;
use crate::{Config, Result};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;

/// 全局模型管理器单例
pub struct ModelManager {
    worker: Arc<InferenceWorker>,
    classes: ClassList,
    config: Config,
}

static MODEL_MANAGER: OnceCell<Arc<ModelManager>> = OnceCell::new();

impl ModelManager {
    /// 初始化全局模型管理器（每个进程只加载一次模型）
    pub async fn init(config: Config) -> Result<Arc<ModelManager>> {
        if MODEL_MANAGER.get().is_some() {
            return Err(DetectError::Internal(
                "Model manager already initialized".to_string(),
            ));
        }

        tracing::info!("Initializing model manager...");

        let manager = Arc::new(Self::load(config).await?);

        MODEL_MANAGER
            .set(Arc::clone(&manager))
            .map_err(|_| DetectError::Internal("Failed to initialize model manager".to_string()))?;

        tracing::info!("Model manager initialized successfully");
        Ok(manager)
    }

    /// 不注册全局实例，直接按配置加载
    pub async fn load(config: Config) -> Result<Self> {
        let classes = config.class_list()?;
        let model_path = config.model_path.clone();
        let onnx_config = config.onnx_config.clone();

        let (worker, loaded) = InferenceWorker::spawn(
            move || {
                Classifier::load(&model_path, &onnx_config).map(|c| Box::new(c) as Box<dyn ScoreModel>)
            },
            classes.len(),
        )?;

        let info = loaded.await.map_err(|_| {
            DetectError::Internal("Inference worker exited before reporting load".to_string())
        })??;

        tracing::info!(
            "Model '{}' ready with {} classes (probe output length: {:?})",
            info.name,
            classes.len(),
            info.output_len
        );

        Ok(Self::from_worker(Arc::new(worker), classes, config))
    }

    pub fn from_worker(worker: Arc<InferenceWorker>, classes: ClassList, config: Config) -> Self {
        Self {
            worker,
            classes,
            config,
        }
    }

    /// 获取全局模型管理器实例
    pub fn instance() -> Result<Arc<ModelManager>> {
        MODEL_MANAGER
            .get()
            .cloned()
            .ok_or_else(|| DetectError::Internal("Model manager not initialized".to_string()))
    }

    pub fn worker(&self) -> Arc<InferenceWorker> {
        Arc::clone(&self.worker)
    }

    pub fn classes(&self) -> &ClassList {
        &self.classes
    }

    pub fn postprocessor(&self) -> ScorePostprocessor {
        ScorePostprocessor::new(self.classes.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 模型健康检查
    pub fn health_check(&self) -> Result<()> {
        match self.worker.state() {
            ModelState::Ready(_) => Ok(()),
            ModelState::Loading => Err(DetectError::ModelUnavailable(
                "Model is still loading".to_string(),
            )),
            ModelState::Failed(reason) => Err(DetectError::ModelUnavailable(reason)),
        }
    }

    /// 获取模型统计信息
    pub fn get_stats(&self) -> ModelStats {
        let model = match self.worker.state() {
            ModelState::Ready(info) => Some(info),
            _ => None,
        };

        ModelStats {
            ready: model.is_some(),
            model,
            class_count: self.classes.len(),
            classes: self.classes.iter().map(str::to_string).collect(),
            intra_threads: self.config.onnx_config.intra_threads,
            optimization_level: self.config.onnx_config.optimization_level,
        }
    }
}

/// 模型统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
    pub class_count: usize,
    pub classes: Vec<String>,
    pub intra_threads: usize,
    pub optimization_level: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_model_fails_with_resource_error() {
        let config = Config::new(
            "127.0.0.1:0".to_string(),
            "/nonexistent/model.onnx".to_string(),
            None,
            false,
        )
        .unwrap();

        let err = ModelManager::load(config).await.err().unwrap();
        assert!(matches!(err, DetectError::ModelLoad(_)));
        assert_eq!(err.kind(), crate::ErrorKind::Resource);
    }
}
