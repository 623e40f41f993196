use crate::image::TensorStats;
use crate::models::ScoreModel;
use crate::utils::error::DetectError;
use crate::Result;
use ndarray::Array3;
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

/// 加载完成后的模型信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub input_shape: (usize, usize, usize),
    /// 探测推理得到的输出长度（探测失败时为空）
    pub output_len: Option<usize>,
}

/// 推理线程上的模型状态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ModelState {
    Loading,
    Ready(ModelInfo),
    Failed(String),
}

enum Job {
    Predict {
        input: Array3<f32>,
        reply: oneshot::Sender<Result<Vec<f32>>>,
    },
}

/// 专用推理线程：加载一次模型，按提交顺序逐个执行前向计算
pub struct InferenceWorker {
    tx: mpsc::UnboundedSender<Job>,
    state: Arc<RwLock<ModelState>>,
    thread: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    /// 启动推理线程并在其上加载模型。
    ///
    /// 返回的接收端在加载结束时恰好收到一次结果。
    pub fn spawn<F>(
        loader: F,
        expected_classes: usize,
    ) -> Result<(Self, oneshot::Receiver<Result<ModelInfo>>)>
    where
        F: FnOnce() -> Result<Box<dyn ScoreModel>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (loaded_tx, loaded_rx) = oneshot::channel();
        let state = Arc::new(RwLock::new(ModelState::Loading));

        let worker_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || run(loader, expected_classes, rx, loaded_tx, worker_state))
            .map_err(|e| DetectError::Internal(format!("Failed to spawn inference worker: {}", e)))?;

        Ok((
            Self {
                tx,
                state,
                thread: Some(thread),
            },
            loaded_rx,
        ))
    }

    /// 提交一次推理，结果通过返回的一次性通道送回
    pub fn submit(&self, input: Array3<f32>) -> Result<oneshot::Receiver<Result<Vec<f32>>>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Job::Predict { input, reply }).map_err(|_| {
            DetectError::ModelUnavailable("Inference worker has stopped".to_string())
        })?;
        Ok(rx)
    }

    pub async fn infer(&self, input: Array3<f32>) -> Result<Vec<f32>> {
        let rx = self.submit(input)?;
        rx.await.map_err(|_| {
            DetectError::Internal("Inference worker dropped the request".to_string())
        })?
    }

    pub fn state(&self) -> ModelState {
        self.state.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), ModelState::Ready(_))
    }

    /// 关闭通道并等待线程退出（阻塞调用）
    pub fn shutdown(mut self) {
        let thread = self.thread.take();
        drop(self);
        if let Some(handle) = thread {
            if handle.join().is_err() {
                tracing::error!("Inference worker panicked during shutdown");
            }
        }
    }
}

fn run<F>(
    loader: F,
    expected_classes: usize,
    mut rx: mpsc::UnboundedReceiver<Job>,
    loaded_tx: oneshot::Sender<Result<ModelInfo>>,
    state: Arc<RwLock<ModelState>>,
) where
    F: FnOnce() -> Result<Box<dyn ScoreModel>>,
{
    let mut model = match loader() {
        Ok(mut model) => {
            let info = probe(model.as_mut(), expected_classes);
            tracing::info!("Model '{}' loaded on inference worker", info.name);
            *state.write() = ModelState::Ready(info.clone());
            let _ = loaded_tx.send(Ok(info));
            Some(model)
        }
        Err(e) => {
            tracing::error!("Model loading failed, predictions disabled: {}", e);
            *state.write() = ModelState::Failed(e.to_string());
            let _ = loaded_tx.send(Err(e));
            None
        }
    };

    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Predict { input, reply } => {
                let result = match model.as_mut() {
                    Some(model) => forward_guarded(model.as_mut(), &input),
                    None => Err(DetectError::ModelUnavailable(unavailable_reason(&state))),
                };
                // 调用方可能已放弃结果
                let _ = reply.send(result);
            }
        }
    }

    tracing::debug!("Inference worker channel closed, exiting");
}

fn forward_guarded(model: &mut dyn ScoreModel, input: &Array3<f32>) -> Result<Vec<f32>> {
    if let Some(stats) = TensorStats::of(input) {
        tracing::debug!(
            "Input tensor {:?}: min={:.4}, max={:.4}, mean={:.4}",
            input.dim(),
            stats.min,
            stats.max,
            stats.mean
        );
    }

    let result = match panic::catch_unwind(AssertUnwindSafe(|| model.forward(input))) {
        Ok(result) => result,
        Err(_) => Err(DetectError::Inference(format!(
            "Model '{}' panicked during forward pass",
            model.name()
        ))),
    };

    if let Ok(scores) = &result {
        tracing::debug!("Raw output ({} scores): {:?}", scores.len(), scores);
    }
    result
}

/// 用全零输入做一次探测推理，核对输出长度与类别数
fn probe(model: &mut dyn ScoreModel, expected_classes: usize) -> ModelInfo {
    let input_shape = model.input_shape();
    let output_len = match forward_guarded(model, &Array3::zeros(input_shape)) {
        Ok(scores) => {
            if scores.len() != expected_classes {
                tracing::warn!(
                    "Model output length mismatch: expected {}, got {}",
                    expected_classes,
                    scores.len()
                );
            }
            Some(scores.len())
        }
        Err(e) => {
            tracing::warn!("Model probe inference failed: {}", e);
            None
        }
    };

    ModelInfo {
        name: model.name().to_string(),
        input_shape,
        output_len,
    }
}

fn unavailable_reason(state: &RwLock<ModelState>) -> String {
    match &*state.read() {
        ModelState::Failed(reason) => reason.clone(),
        _ => "Model is not loaded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: Arc<AtomicUsize>,
        classes: usize,
    }

    impl ScoreModel for CountingModel {
        fn input_shape(&self) -> (usize, usize, usize) {
            (3, 4, 4)
        }

        fn forward(&mut self, input: &Array3<f32>) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut scores = vec![0.0; self.classes];
            scores[n % self.classes] = input.sum() + 1.0;
            Ok(scores)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct PanickyModel;

    impl ScoreModel for PanickyModel {
        fn forward(&mut self, input: &Array3<f32>) -> Result<Vec<f32>> {
            if input.sum() > 0.0 {
                panic!("bad input");
            }
            Ok(vec![0.0, 1.0])
        }

        fn name(&self) -> &str {
            "panicky"
        }
    }

    #[tokio::test]
    async fn test_loads_once_and_processes_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loads = Arc::new(AtomicUsize::new(0));

        let model_calls = Arc::clone(&calls);
        let model_loads = Arc::clone(&loads);
        let (worker, loaded) = InferenceWorker::spawn(
            move || {
                model_loads.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(CountingModel { calls: model_calls, classes: 3 }) as Box<dyn ScoreModel>)
            },
            3,
        )
        .unwrap();

        let info = loaded.await.unwrap().unwrap();
        assert_eq!(info.output_len, Some(3));
        assert!(worker.is_ready());

        // 探测推理占用第0次调用
        let first = worker.submit(Array3::zeros((3, 4, 4))).unwrap();
        let second = worker.submit(Array3::zeros((3, 4, 4))).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(second.await.unwrap().unwrap(), vec![0.0, 0.0, 1.0]);

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_load_disables_predictions() {
        let (worker, loaded) = InferenceWorker::spawn(
            || Err(DetectError::ModelLoad("model.onnx missing".to_string())),
            15,
        )
        .unwrap();

        let err = loaded.await.unwrap().unwrap_err();
        assert!(matches!(err, DetectError::ModelLoad(_)));
        assert!(matches!(worker.state(), ModelState::Failed(_)));

        let err = worker.infer(Array3::zeros((3, 256, 256))).await.unwrap_err();
        assert!(matches!(err, DetectError::ModelUnavailable(ref r) if r.contains("model.onnx missing")));
    }

    #[tokio::test]
    async fn test_panic_is_recoverable_inference_error() {
        let (worker, loaded) =
            InferenceWorker::spawn(|| Ok(Box::new(PanickyModel) as Box<dyn ScoreModel>), 2)
                .unwrap();
        loaded.await.unwrap().unwrap();

        let err = worker.infer(Array3::ones((3, 256, 256))).await.unwrap_err();
        assert!(matches!(err, DetectError::Inference(_)));

        // 线程仍然可用
        let scores = worker.infer(Array3::zeros((3, 256, 256))).await.unwrap();
        assert_eq!(scores, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_stall_worker() {
        let (worker, loaded) = InferenceWorker::spawn(
            || Ok(Box::new(CountingModel { calls: Arc::new(AtomicUsize::new(0)), classes: 2 }) as Box<dyn ScoreModel>),
            2,
        )
        .unwrap();
        loaded.await.unwrap().unwrap();

        drop(worker.submit(Array3::zeros((3, 4, 4))).unwrap());
        let scores = worker.infer(Array3::zeros((3, 4, 4))).await.unwrap();
        assert_eq!(scores.len(), 2);

        tokio::task::spawn_blocking(move || worker.shutdown()).await.unwrap();
    }
}
