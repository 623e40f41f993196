use crate::config::OnnxConfig;
use crate::utils::error::DetectError;
use crate::Result;
use ndarray::{Array3, Axis};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::path::Path;

/// 可在推理线程上执行前向计算的模型
pub trait ScoreModel: Send {
    /// 输入张量形状 (C, H, W)
    fn input_shape(&self) -> (usize, usize, usize) {
        (3, 256, 256)
    }

    /// 单次前向计算，返回每个类别的原始分数
    fn forward(&mut self, input: &Array3<f32>) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// 基于ONNX Runtime的图像分类模型
pub struct Classifier {
    session: Session,
    name: String,
    input_name: String,
    output_name: String, // 动态发现的输出名称
    input_size: (usize, usize, usize),
}

impl Classifier {
    pub fn load(model_path: &Path, onnx_config: &OnnxConfig) -> Result<Self> {
        if !model_path.exists() {
            return Err(DetectError::ModelLoad(format!(
                "Classification model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading classification model from: {}", model_path.display());

        let level = if onnx_config.enable_optimization {
            match onnx_config.optimization_level {
                i32::MIN..=0 => GraphOptimizationLevel::Disable,
                1 => GraphOptimizationLevel::Level1,
                2 => GraphOptimizationLevel::Level2,
                _ => GraphOptimizationLevel::Level3,
            }
        } else {
            GraphOptimizationLevel::Disable
        };

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(level))
            .and_then(|b| b.with_intra_threads(onnx_config.intra_threads))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                DetectError::ModelLoad(format!(
                    "Failed to load model {}: {}",
                    model_path.display(),
                    e
                ))
            })?;

        let input_name = match session.inputs.first() {
            Some(input) => input.name.clone(),
            None => {
                return Err(DetectError::ModelLoad(
                    "Classification model has no inputs".to_string(),
                ))
            }
        };

        // 动态发现输出名称
        let output_name = match session.outputs.first() {
            Some(output) => output.name.clone(),
            None => {
                return Err(DetectError::ModelLoad(
                    "Classification model has no outputs".to_string(),
                ))
            }
        };

        tracing::info!(
            "Classification model ready: input='{}', output='{}'",
            input_name,
            output_name
        );
        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Classification output[{}]: '{}'", i, output.name);
        }

        let name = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "classifier".to_string());

        Ok(Self {
            session,
            name,
            input_name,
            output_name,
            input_size: (3, 256, 256),
        })
    }
}

impl ScoreModel for Classifier {
    fn input_shape(&self) -> (usize, usize, usize) {
        self.input_size
    }

    fn forward(&mut self, input: &Array3<f32>) -> Result<Vec<f32>> {
        if input.dim() != self.input_size {
            return Err(DetectError::Inference(format!(
                "Expected input shape {:?}, got {:?}",
                self.input_size,
                input.dim()
            )));
        }

        // 添加batch维度 (1, C, H, W)
        let batch = input.clone().insert_axis(Axis(0));
        let tensor = Tensor::from_array(batch)?;

        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => tensor])?;

        let scores = match outputs.get(self.output_name.as_str()) {
            Some(output) => output.try_extract_array::<f32>()?.iter().copied().collect(),
            None => {
                let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                return Err(DetectError::Inference(format!(
                    "Classification output '{}' not found. Available outputs: {:?}",
                    self.output_name, available
                )));
            }
        };

        Ok(scores)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
