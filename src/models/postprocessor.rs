use crate::models::ClassList;
use crate::utils::error::DetectError;
use crate::Result;
use serde::{Deserialize, Serialize};

/// 单个类别的概率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub probability: f32,
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 预测类别在类别表中的索引
    pub class_index: usize,
    /// 预测类别名称
    pub label: String,
    /// 置信度 (0.0 - 1.0)
    pub confidence: f32,
    /// 所有类别的概率（按类别表顺序）
    pub scores: Vec<ClassScore>,
}

impl Prediction {
    /// 百分比形式的置信度 (0 - 100)
    pub fn confidence_percent(&self) -> f32 {
        self.confidence * 100.0
    }

    pub fn probabilities(&self) -> Vec<f32> {
        self.scores.iter().map(|s| s.probability).collect()
    }

    /// 按概率降序返回前k个类别（概率相同时保持类别表顺序）
    pub fn top_k(&self, k: usize) -> Vec<ClassScore> {
        let mut ranked = self.scores.clone();
        ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        ranked.truncate(k);
        ranked
    }
}

/// 数值稳定的softmax：先减去最大值再取指数
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = scores.iter().map(|&s| ((s - max) as f64).exp()).collect();
    let sum: f64 = exps.iter().sum();

    exps.into_iter().map(|e| (e / sum) as f32).collect()
}

/// 返回最大值的索引，相同时取第一个
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// 分数后处理器：softmax + 取最大概率类别
#[derive(Debug, Clone)]
pub struct ScorePostprocessor {
    classes: ClassList,
}

impl ScorePostprocessor {
    pub fn new(classes: ClassList) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &ClassList {
        &self.classes
    }

    pub fn process(&self, raw_scores: &[f32]) -> Result<Prediction> {
        if raw_scores.len() != self.classes.len() {
            return Err(DetectError::ClassMismatch {
                expected: self.classes.len(),
                actual: raw_scores.len(),
            });
        }

        if let Some(i) = raw_scores.iter().position(|s| !s.is_finite()) {
            return Err(DetectError::Inference(format!(
                "Model produced a non-finite score at index {}",
                i
            )));
        }

        let probabilities = softmax(raw_scores);
        let class_index = argmax(&probabilities)
            .ok_or_else(|| DetectError::Internal("Empty probability vector".to_string()))?;

        let scores: Vec<ClassScore> = self
            .classes
            .iter()
            .zip(&probabilities)
            .map(|(label, &probability)| ClassScore {
                label: label.to_string(),
                probability,
            })
            .collect();

        for (class_score, raw) in scores.iter().zip(raw_scores) {
            tracing::debug!(
                "Class {}: raw={:.4}, probability={:.4}",
                class_score.label,
                raw,
                class_score.probability
            );
        }

        let label = scores[class_index].label.clone();
        let confidence = probabilities[class_index];

        tracing::debug!(
            "Postprocessed scores: label={}, confidence={:.4}",
            label,
            confidence
        );

        Ok(Prediction {
            class_index,
            label,
            confidence,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dominant_first() -> Vec<f32> {
        let mut scores = vec![0.0; 15];
        scores[0] = 5.0;
        scores[1] = 1.0;
        scores
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let inputs: [&[f32]; 4] = [
            &[0.0, 0.0, 0.0],
            &[1.0, 2.0, 3.0, 4.0],
            &[-50.0, 10.0, 0.5],
            &[1000.0, 999.0, -1000.0],
        ];

        for scores in inputs {
            let probs = softmax(scores);
            let sum: f32 = probs.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sum={} for {:?}", sum, scores);
            assert!(probs.iter().all(|p| p.is_finite() && *p >= 0.0));
        }
    }

    #[test]
    fn test_softmax_shift_invariant() {
        let scores = [0.3, -1.2, 2.5, 0.0, 4.1];
        let shifted: Vec<f32> = scores.iter().map(|s| s + 37.5).collect();

        let a = softmax(&scores);
        let b = softmax(&shifted);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_argmax_first_index_wins_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4, 0.1]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_dominant_first_score_selected() {
        let post = ScorePostprocessor::new(ClassList::eye_conditions());
        let prediction = post.process(&dominant_first()).unwrap();

        assert_eq!(prediction.class_index, 0);
        assert_eq!(prediction.label, "Blepharitis");
        assert!(prediction.confidence > 0.9);
        assert_eq!(prediction.scores.len(), 15);
    }

    #[test]
    fn test_strictly_dominant_entry_always_selected() {
        let post = ScorePostprocessor::new(ClassList::eye_conditions());
        for dominant in 0..15 {
            let mut scores: Vec<f32> = (0..15).map(|i| (i as f32) * 0.01).collect();
            scores[dominant] = 3.0;
            let prediction = post.process(&scores).unwrap();
            assert_eq!(prediction.class_index, dominant);
            assert_eq!(Some(prediction.label.as_str()), post.classes().get(dominant));
        }
    }

    #[test]
    fn test_confidence_is_max_probability() {
        let post = ScorePostprocessor::new(ClassList::eye_conditions());
        let scores: Vec<f32> = (0..15).map(|i| ((i * 7) % 5) as f32 - 1.5).collect();
        let prediction = post.process(&scores).unwrap();

        let max = prediction
            .probabilities()
            .into_iter()
            .fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(prediction.confidence, max);
        assert!((prediction.confidence_percent() - max * 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_length_mismatch_is_class_mismatch() {
        let post = ScorePostprocessor::new(ClassList::eye_conditions());
        let err = post.process(&[1.0; 10]).unwrap_err();
        assert!(matches!(
            err,
            DetectError::ClassMismatch { expected: 15, actual: 10 }
        ));
    }

    #[test]
    fn test_non_finite_scores_rejected() {
        let post = ScorePostprocessor::new(ClassList::new(["a", "b"]).unwrap());
        let err = post.process(&[f32::NAN, 1.0]).unwrap_err();
        assert!(matches!(err, DetectError::Inference(_)));
    }

    #[test]
    fn test_top_k_ranking() {
        let post = ScorePostprocessor::new(ClassList::new(["a", "b", "c"]).unwrap());
        let prediction = post.process(&[1.0, 3.0, 2.0]).unwrap();
        let top = prediction.top_k(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].label, "b");
        assert_eq!(top[1].label, "c");
    }
}
