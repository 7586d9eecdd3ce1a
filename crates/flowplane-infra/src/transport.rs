//! Channel-based executor transport.
//!
//! Each paired executor holds the receiving end of an unbounded channel,
//! typically bridged to its websocket session by the API layer. Dispatch is
//! fire-and-forget: results come back out of band through the dispatcher's
//! resolve path.

use dashmap::DashMap;
use tokio::sync::mpsc;

use flowplane_core::engine::{DispatchRequest, ExecutorTransport, TransportError};

/// Routes dispatch requests to connected executor sessions.
#[derive(Default)]
pub struct ChannelTransport {
    sessions: DashMap<String, mpsc::UnboundedSender<DispatchRequest>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for an executor and return its request stream.
    /// Reconnecting replaces the previous session.
    pub fn connect(&self, executor_id: &str) -> mpsc::UnboundedReceiver<DispatchRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(executor_id.to_string(), tx);
        rx
    }

    pub fn disconnect(&self, executor_id: &str) {
        self.sessions.remove(executor_id);
    }
}

impl ExecutorTransport for ChannelTransport {
    async fn send(
        &self,
        executor_id: &str,
        request: DispatchRequest,
    ) -> Result<(), TransportError> {
        let Some(session) = self.sessions.get(executor_id) else {
            return Err(TransportError {
                executor_id: executor_id.to_string(),
                message: "executor not connected".to_string(),
            });
        };
        session.send(request).map_err(|_| TransportError {
            executor_id: executor_id.to_string(),
            message: "executor session closed".to_string(),
        })
    }
}
