use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::messages::WorkerRequest;

/// A request that could not be handed to the worker. The request is returned
/// so the caller can recover anything it moved into it.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("worker request channel is full")]
    Full(WorkerRequest),

    #[error("worker request channel is closed")]
    Closed(WorkerRequest),
}

impl SendError {
    pub fn into_request(self) -> WorkerRequest {
        match self {
            SendError::Full(request) | SendError::Closed(request) => request,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SendError::Closed(_))
    }
}

/// Outbound half of the computation channel. Implementations must never block.
pub trait RequestSink {
    fn send(&mut self, request: WorkerRequest) -> Result<(), SendError>;
}

impl RequestSink for mpsc::Sender<WorkerRequest> {
    fn send(&mut self, request: WorkerRequest) -> Result<(), SendError> {
        self.try_send(request).map_err(|e| match e {
            TrySendError::Full(request) => SendError::Full(request),
            TrySendError::Closed(request) => SendError::Closed(request),
        })
    }
}

/// Records every request; useful when driving a scheduler by hand.
impl RequestSink for Vec<WorkerRequest> {
    fn send(&mut self, request: WorkerRequest) -> Result<(), SendError> {
        self.push(request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_bounces_when_full() {
        let (mut tx, mut rx) = mpsc::channel::<WorkerRequest>(1);
        assert!(RequestSink::send(&mut tx, WorkerRequest::Shutdown).is_ok());

        let bounced = RequestSink::send(&mut tx, WorkerRequest::Shutdown).unwrap_err();
        assert!(!bounced.is_closed());
        assert!(matches!(bounced.into_request(), WorkerRequest::Shutdown));

        assert!(matches!(rx.recv().await, Some(WorkerRequest::Shutdown)));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (mut tx, rx) = mpsc::channel::<WorkerRequest>(4);
        drop(rx);
        let err = RequestSink::send(&mut tx, WorkerRequest::Shutdown).unwrap_err();
        assert!(err.is_closed());
    }
}
