//! Outbound event delivery.

use tokio::sync::mpsc;

use murmur_core::error::{MurmurError, Result};
use murmur_core::protocol::ServerEvent;

use crate::task::TaskHandle;

/// Ordered event channel to the connected client.
///
/// The transport drains the receiving half. Delivery order is call order.
#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ClientSink {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: ServerEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| MurmurError::Transport("client channel closed".into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A task's view of the client sink.
///
/// Every send checks the owning task's state under the same lock that
/// [`TaskHandle::cancel`] takes, so once `cancel()` has returned nothing from
/// this task reaches the client.
#[derive(Debug, Clone)]
pub struct TaskEmitter {
    task: TaskHandle,
    sink: ClientSink,
}

impl TaskEmitter {
    pub(crate) fn new(task: TaskHandle, sink: ClientSink) -> Self {
        Self { task, sink }
    }

    /// Send an event, or fail with [`MurmurError::Cancelled`] if the task was
    /// superseded.
    pub fn emit(&self, event: ServerEvent) -> Result<()> {
        self.task.while_live(|| self.sink.send(event))
    }

    pub fn task(&self) -> &TaskHandle {
        &self.task
    }
}

#[cfg(test)]
mod tests {
    use murmur_core::types::Stage;

    use super::*;

    #[test]
    fn test_send_after_receiver_dropped_is_transport_error() {
        let (sink, rx) = ClientSink::channel();
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        let err = sink.send(ServerEvent::Inactive {}).unwrap_err();
        assert!(matches!(err, MurmurError::Transport(_)));
    }

    #[test]
    fn test_emitter_is_silenced_by_cancel() {
        let (sink, mut rx) = ClientSink::channel();
        let task = TaskHandle::new(1, Stage::Query);
        let emitter = task.emitter(sink);

        emitter.emit(ServerEvent::Inactive {}).unwrap();
        task.cancel();
        let err = emitter.emit(ServerEvent::Inactive {}).unwrap_err();
        assert!(err.is_cancelled());

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Inactive {});
        assert!(rx.try_recv().is_err());
    }
}
