//! Outbound channel: the long-lived response the orchestrator writes frames to.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use vectorsmith_generation::StreamEvent;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The caller went away or the channel was closed locally.
    #[error("outbound channel closed")]
    Closed,

    /// Buffer saturated on a non-blocking write.
    #[error("outbound channel full")]
    Full,
}

/// Incremental, ordered frame writer with a close notification.
///
/// `send` suspends while the buffer is saturated and resumes once the reader
/// drains it; frames are never dropped or reordered. `close` may be called any
/// number of times.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send(&self, event: StreamEvent) -> Result<(), ChannelError>;

    /// Non-blocking write, usable from `Drop`.
    fn try_send(&self, event: StreamEvent) -> Result<(), ChannelError>;

    /// Push buffered bytes to the wire where the transport supports it.
    async fn flush(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn is_closed(&self) -> bool;

    /// Resolves once the caller has gone away or the channel was closed.
    async fn closed(&self);

    fn close(&self);
}

/// Channel backed by a bounded tokio mpsc queue. The receiving half is turned
/// into the HTTP event stream by the host.
#[derive(Debug)]
pub struct SseChannel {
    tx: Mutex<Option<mpsc::Sender<StreamEvent>>>,
}

/// Bounded channel pair; `capacity` is the backpressure bound in frames.
pub fn channel(capacity: usize) -> (SseChannel, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        SseChannel {
            tx: Mutex::new(Some(tx)),
        },
        rx,
    )
}

impl SseChannel {
    fn sender(&self) -> Option<mpsc::Sender<StreamEvent>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl OutboundChannel for SseChannel {
    async fn send(&self, event: StreamEvent) -> Result<(), ChannelError> {
        let tx = self.sender().ok_or(ChannelError::Closed)?;
        tx.send(event).await.map_err(|_| ChannelError::Closed)
    }

    fn try_send(&self, event: StreamEvent) -> Result<(), ChannelError> {
        let tx = self.sender().ok_or(ChannelError::Closed)?;
        tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    fn is_closed(&self) -> bool {
        self.sender().is_none_or(|tx| tx.is_closed())
    }

    async fn closed(&self) {
        if let Some(tx) = self.sender() {
            tx.closed().await;
        }
    }

    fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}
