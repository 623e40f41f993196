use crate::models::Prediction;
use crate::utils::error::DetectError;
use crate::Result;
use serde::{Deserialize, Serialize};

/// 记录时间格式，字典序即时间序
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 缺少时间字段时的占位文本
pub const UNKNOWN_TIMESTAMP: &str = "Unknown date";

/// 一次检测的持久化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// 存储分配的键
    pub id: String,
    /// 预测类别
    pub label: String,
    /// 置信度百分比 (0 - 100)
    pub confidence: f32,
    /// base64编码的缩略图
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub timestamp: String,
}

/// 写入存储的字段布局（与既有数据保持兼容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "disease")]
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "image")]
    pub thumbnail: String,
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn into_record(self, id: String) -> DetectionRecord {
        DetectionRecord {
            id,
            label: self.label,
            confidence: self.confidence,
            thumbnail: Some(self.thumbnail),
            timestamp: self.timestamp,
        }
    }
}

/// 单次预测请求的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStage {
    Idle,
    ImageSelected,
    Normalizing,
    Inferring,
    Postprocessing,
    Recording,
    Displayed,
    Error,
}

impl PredictionStage {
    /// 选择（或重新选择）图像；处理中的请求不能换图
    pub fn select_image(self) -> Result<Self> {
        match self {
            PredictionStage::Idle
            | PredictionStage::ImageSelected
            | PredictionStage::Displayed
            | PredictionStage::Error => Ok(PredictionStage::ImageSelected),
            in_flight => Err(DetectError::InvalidInput(format!(
                "Cannot select a new image while {:?}",
                in_flight
            ))),
        }
    }

    /// 当前阶段成功后的下一阶段
    pub fn next(self) -> Self {
        match self {
            PredictionStage::ImageSelected => PredictionStage::Normalizing,
            PredictionStage::Normalizing => PredictionStage::Inferring,
            PredictionStage::Inferring => PredictionStage::Postprocessing,
            PredictionStage::Postprocessing => PredictionStage::Recording,
            PredictionStage::Recording => PredictionStage::Displayed,
            other => other,
        }
    }

    /// 当前阶段失败后的去向。记录失败不影响已得到的分类结果。
    pub fn fail(self) -> Self {
        match self {
            PredictionStage::Normalizing
            | PredictionStage::Inferring
            | PredictionStage::Postprocessing => PredictionStage::Error,
            PredictionStage::Recording => PredictionStage::Displayed,
            other => other,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PredictionStage::Displayed | PredictionStage::Error)
    }

    /// 进度（0.0 - 1.0），用于状态推送
    pub fn progress(self) -> f32 {
        match self {
            PredictionStage::Idle => 0.0,
            PredictionStage::ImageSelected => 0.1,
            PredictionStage::Normalizing => 0.2,
            PredictionStage::Inferring => 0.4,
            PredictionStage::Postprocessing => 0.7,
            PredictionStage::Recording => 0.85,
            PredictionStage::Displayed | PredictionStage::Error => 1.0,
        }
    }
}

/// 处理状态推送
#[derive(Debug, Clone, Serialize)]
pub struct PredictionStatus {
    pub stage: PredictionStage,
    pub progress: f32,
    pub message: String,
}

impl PredictionStatus {
    pub fn new(stage: PredictionStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: stage.progress(),
            message: message.into(),
        }
    }
}

/// 记录保存结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    Saved { id: String, timestamp: String },
    Failed { reason: String },
    Skipped,
}

/// 一次预测的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct PredictionOutcome {
    pub prediction: Prediction,
    pub record: RecordStatus,
    /// 处理耗时（秒）
    pub processing_time: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut stage = PredictionStage::Idle.select_image().unwrap();
        let mut visited = vec![stage];
        while !stage.is_terminal() {
            stage = stage.next();
            visited.push(stage);
        }

        assert_eq!(
            visited,
            vec![
                PredictionStage::ImageSelected,
                PredictionStage::Normalizing,
                PredictionStage::Inferring,
                PredictionStage::Postprocessing,
                PredictionStage::Recording,
                PredictionStage::Displayed,
            ]
        );
    }

    #[test]
    fn test_failures_before_recording_go_to_error_and_allow_retry() {
        for stage in [
            PredictionStage::Normalizing,
            PredictionStage::Inferring,
            PredictionStage::Postprocessing,
        ] {
            let failed = stage.fail();
            assert_eq!(failed, PredictionStage::Error);
            assert_eq!(failed.select_image().unwrap(), PredictionStage::ImageSelected);
        }
    }

    #[test]
    fn test_recording_failure_still_displays() {
        assert_eq!(PredictionStage::Recording.fail(), PredictionStage::Displayed);
    }

    #[test]
    fn test_cannot_reselect_while_in_flight() {
        assert!(PredictionStage::Inferring.select_image().is_err());
        assert!(PredictionStage::Recording.select_image().is_err());
        assert!(PredictionStage::Displayed.select_image().is_ok());
    }

    #[test]
    fn test_history_entry_wire_names() {
        let entry = HistoryEntry {
            label: "Cataract".to_string(),
            confidence: 93.5,
            thumbnail: "AAAA".to_string(),
            timestamp: "2024-06-01 12:00:00".to_string(),
        };
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["disease"], "Cataract");
        assert_eq!(value["image"], "AAAA");
        assert_eq!(value["timestamp"], "2024-06-01 12:00:00");
        assert!(value.get("label").is_none());
    }
}
