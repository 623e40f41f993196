pub mod history;
pub mod pipeline;
pub mod recorder;
pub mod types;

pub use history::{HistoryReader, HistoryView};
pub use pipeline::PredictionPipeline;
pub use recorder::DetectionRecorder;
pub use types::{
    DetectionRecord, HistoryEntry, PredictionOutcome, PredictionStage, PredictionStatus,
    RecordStatus,
};
