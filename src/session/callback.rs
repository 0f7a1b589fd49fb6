use crate::av::{BufferFlag, BufferInfo, Format};
use crate::error::{AvcsError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Origin of an error reported through [`CodecCallback::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    Internal,
    /// The engine failed; the code is engine specific.
    Engine,
    ServiceDied,
}

impl ErrorType {
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorType::Internal => 0,
            ErrorType::Engine => 1,
            ErrorType::ServiceDied => 2,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ErrorType::Engine,
            2 => ErrorType::ServiceDied,
            _ => ErrorType::Internal,
        }
    }
}

/// Receiver of session events. Calls for one session never overlap and
/// arrive in the order the events were produced.
#[async_trait]
pub trait CodecCallback: Send + Sync {
    async fn on_error(&self, error_type: ErrorType, code: i32);
    async fn on_output_format_changed(&self, format: Format);
    async fn on_input_buffer_available(&self, index: u32);
    async fn on_output_buffer_available(&self, index: u32, info: BufferInfo, flag: BufferFlag);
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Error { error_type: ErrorType, code: i32 },
    OutputFormatChanged(Format),
    InputBufferAvailable(u32),
    OutputBufferAvailable { index: u32, info: BufferInfo, flag: BufferFlag },
}

impl CallbackEvent {
    async fn deliver(self, callback: &dyn CodecCallback) {
        match self {
            CallbackEvent::Error { error_type, code } => callback.on_error(error_type, code).await,
            CallbackEvent::OutputFormatChanged(format) => callback.on_output_format_changed(format).await,
            CallbackEvent::InputBufferAvailable(index) => callback.on_input_buffer_available(index).await,
            CallbackEvent::OutputBufferAvailable { index, info, flag } => {
                callback.on_output_buffer_available(index, info, flag).await
            }
        }
    }
}

/// Queue between a session and its callback, drained by one task.
///
/// Posting never blocks, so a session may post while holding its own lock.
/// At most one availability event per buffer slot is outstanding at a time.
#[derive(Debug)]
pub struct CallbackChannel {
    tx: mpsc::UnboundedSender<CallbackEvent>,
}

impl CallbackChannel {
    /// Spawns the delivery task on the current runtime.
    pub fn spawn(callback: Arc<dyn CodecCallback>) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| AvcsError::InvalidState(format!("callback delivery needs a runtime: {}", e)))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<CallbackEvent>();
        handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                event.deliver(callback.as_ref()).await;
            }
            log::debug!("callback channel closed");
        });
        Ok(Self { tx })
    }

    pub fn post(&self, event: CallbackEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("callback receiver gone, event dropped");
        }
    }
}
