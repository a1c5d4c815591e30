use emoflix_core::{AggregateDecision, AnalysisError, EmotionModel, Pipeline, SingleDecision};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests queued while the engine is busy; further senders wait.
const QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("analysis panicked: {0}")]
    Panicked(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: String,
        reply: oneshot::Sender<Result<SingleDecision, EngineError>>,
    },
    DetectMulti {
        /// `None` marks an entry that arrived as something other than a string.
        images: Vec<Option<String>>,
        reply: oneshot::Sender<Result<AggregateDecision, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Classify one image and apply single-frame fusion.
    pub async fn detect(&self, image: String) -> Result<SingleDecision, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Classify a burst of images and apply multi-frame fusion.
    pub async fn detect_multi(&self, images: Vec<Option<String>>) -> Result<AggregateDecision, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::DetectMulti { images, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The pipeline (and the ONNX sessions inside it) lives on that thread for
/// the rest of the process; requests are served one at a time. The thread
/// exits once every [`EngineHandle`] has been dropped.
pub fn spawn_engine<M>(mut pipeline: Pipeline<M>) -> Result<EngineHandle, EngineError>
where
    M: EmotionModel + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("emoflix-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let result = guarded(|| pipeline.detect_single(&image));
                        let _ = reply.send(result);
                    }
                    EngineRequest::DetectMulti { images, reply } => {
                        tracing::debug!(frames = images.len(), "multi-frame request");
                        let result = guarded(|| pipeline.detect_frames(images.iter().map(|i| i.as_deref())));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Run one request, turning a panic inside the models into an error reply so
/// the engine thread keeps serving.
fn guarded<T>(f: impl FnOnce() -> Result<T, AnalysisError>) -> Result<T, EngineError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(EngineError::from),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "analysis panicked; engine continues");
            Err(EngineError::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
