use axum::body::Body;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::debug;

use bones_model::ProgressMessage;

use crate::error::OrchestratorError;

const PROGRESS_BUFFER: usize = 64;

/// Sending half of a progress stream.
///
/// A caller that went away is not an error: events are dropped and the work goes on.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressMessage>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::Receiver<ProgressMessage>) {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        (Self { tx }, rx)
    }

    pub async fn message(&self, text: impl Into<String>) {
        self.send(ProgressMessage::message(text)).await;
    }

    pub async fn error(&self, err: &OrchestratorError) {
        self.send(ProgressMessage::error(err.status(), err.to_string())).await;
    }

    pub async fn send(&self, msg: ProgressMessage) {
        if self.tx.send(msg).await.is_err() {
            debug!("progress receiver gone, dropping event");
        }
    }
}

/// Newline-delimited JSON body fed by a progress channel.
pub fn stream_body(rx: mpsc::Receiver<ProgressMessage>) -> Body {
    Body::from_stream(ReceiverStream::new(rx).map(|msg| msg.to_line()))
}
