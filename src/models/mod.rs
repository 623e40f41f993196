pub mod classifier;
pub mod labels;
pub mod manager;
pub mod postprocessor;
pub mod worker;

pub use classifier::{Classifier, ScoreModel};
pub use labels::ClassList;
pub use manager::{ModelManager, ModelStats};
pub use postprocessor::{argmax, softmax, ClassScore, Prediction, ScorePostprocessor};
pub use worker::{InferenceWorker, ModelInfo, ModelState};
