//! Callback path from a server-side session back to its client.
//!
//! The client hands the service a [`CodecListenerStub`] living in the client
//! process; the service wraps the received reference in a
//! [`CodecListenerProxy`] and installs it as the session's [`CodecCallback`].

use super::binder::{CallContext, IpcProcess, IpcStub, RemoteObject};
use super::parcel::MessageParcel;
use crate::av::{BufferFlag, BufferInfo, Format};
use crate::error::{AvcsError, ErrorCode, Result};
use crate::session::{CodecCallback, ErrorType};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const LISTENER_DESCRIPTOR: &str = "avcs.ICodecListener";

const ON_ERROR: u32 = 1;
const ON_OUTPUT_FORMAT_CHANGED: u32 = 2;
const ON_INPUT_BUFFER_AVAILABLE: u32 = 3;
const ON_OUTPUT_BUFFER_AVAILABLE: u32 = 4;

/// Client-facing codec events.
///
/// Invoked from the listener dispatch or, for `ServiceDied`, from the death
/// notification. Implementations should return quickly.
pub trait AvCodecCallback: Send + Sync {
    fn on_error(&self, error_type: ErrorType, code: i32);
    fn on_output_format_changed(&self, format: &Format);
    fn on_input_buffer_available(&self, index: u32);
    fn on_output_buffer_available(&self, index: u32, info: BufferInfo, flag: BufferFlag);
}

/// Where client events land, plus the one-shot death latch.
#[derive(Default)]
pub struct CallbackSlot {
    callback: RwLock<Option<Arc<dyn AvCodecCallback>>>,
    died: AtomicBool,
}

impl CallbackSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, callback: Arc<dyn AvCodecCallback>) {
        *self.callback.write() = Some(callback);
    }

    pub fn is_dead(&self) -> bool {
        self.died.load(Ordering::Acquire)
    }

    fn current(&self) -> Option<Arc<dyn AvCodecCallback>> {
        if self.is_dead() {
            return None;
        }
        self.callback.read().clone()
    }

    /// Latches death and reports it to the callback. Returns false when the
    /// death had already been reported.
    pub fn notify_service_died(&self) -> bool {
        if self.died.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback.on_error(ErrorType::ServiceDied, ErrorCode::ServiceDied.as_i32());
        }
        true
    }
}

/// Client-side receiver of session events.
pub struct CodecListenerStub {
    slot: Arc<CallbackSlot>,
}

impl CodecListenerStub {
    pub fn new(slot: Arc<CallbackSlot>) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl IpcStub for CodecListenerStub {
    fn descriptor(&self) -> &'static str {
        LISTENER_DESCRIPTOR
    }

    async fn on_remote_request(
        &self,
        _ctx: CallContext,
        code: u32,
        data: &mut MessageParcel,
        _reply: &mut MessageParcel,
    ) -> Result<()> {
        data.check_interface_token(LISTENER_DESCRIPTOR)?;
        let callback = match self.slot.current() {
            Some(callback) => callback,
            None => return Ok(()),
        };
        match code {
            ON_ERROR => {
                let error_type = ErrorType::from_i32(data.read_i32()?);
                callback.on_error(error_type, data.read_i32()?);
            }
            ON_OUTPUT_FORMAT_CHANGED => callback.on_output_format_changed(&data.read_format()?),
            ON_INPUT_BUFFER_AVAILABLE => callback.on_input_buffer_available(data.read_u32()?),
            ON_OUTPUT_BUFFER_AVAILABLE => {
                let index = data.read_u32()?;
                let info = data.read_buffer_info()?;
                let flag = data.read_flag()?;
                callback.on_output_buffer_available(index, info, flag);
            }
            other => {
                return Err(AvcsError::InvalidOperation(format!("unknown listener request {}", other)));
            }
        }
        Ok(())
    }
}

/// Server-side stand-in for a client listener.
pub struct CodecListenerProxy {
    remote: Arc<dyn RemoteObject>,
    service: IpcProcess,
}

impl CodecListenerProxy {
    pub fn new(remote: Arc<dyn RemoteObject>, service: IpcProcess) -> Self {
        Self { remote, service }
    }

    async fn send(&self, code: u32, mut data: MessageParcel) {
        // A dead service delivers nothing; a dead client has nobody to deliver to.
        if !self.service.is_alive() || !self.remote.is_alive() {
            log::debug!("listener: event {} dropped, peer gone", code);
            return;
        }
        let mut reply = MessageParcel::new();
        if let Err(e) = self
            .remote
            .send_request(self.service.pid(), code, &mut data, &mut reply)
            .await
        {
            log::debug!("listener: event {} not delivered: {}", code, e);
        }
    }

    fn request() -> MessageParcel {
        let mut data = MessageParcel::new();
        data.write_interface_token(LISTENER_DESCRIPTOR);
        data
    }
}

#[async_trait]
impl CodecCallback for CodecListenerProxy {
    async fn on_error(&self, error_type: ErrorType, code: i32) {
        let mut data = Self::request();
        data.write_i32(error_type.as_i32());
        data.write_i32(code);
        self.send(ON_ERROR, data).await;
    }

    async fn on_output_format_changed(&self, format: Format) {
        let mut data = Self::request();
        data.write_format(&format);
        self.send(ON_OUTPUT_FORMAT_CHANGED, data).await;
    }

    async fn on_input_buffer_available(&self, index: u32) {
        let mut data = Self::request();
        data.write_u32(index);
        self.send(ON_INPUT_BUFFER_AVAILABLE, data).await;
    }

    async fn on_output_buffer_available(&self, index: u32, info: BufferInfo, flag: BufferFlag) {
        let mut data = Self::request();
        data.write_u32(index);
        data.write_buffer_info(&info);
        data.write_flag(flag);
        self.send(ON_OUTPUT_BUFFER_AVAILABLE, data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::binder::LocalBinder;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl AvCodecCallback for Log {
        fn on_error(&self, error_type: ErrorType, code: i32) {
            self.0.lock().push(format!("error {:?} {}", error_type, code));
        }

        fn on_output_format_changed(&self, format: &Format) {
            self.0.lock().push(format!("format {}", format.len()));
        }

        fn on_input_buffer_available(&self, index: u32) {
            self.0.lock().push(format!("input {}", index));
        }

        fn on_output_buffer_available(&self, index: u32, info: BufferInfo, flag: BufferFlag) {
            self.0.lock().push(format!("output {} {} {}", index, info.size, flag.bits()));
        }
    }

    fn wire() -> (Arc<Log>, Arc<CallbackSlot>, CodecListenerProxy, IpcProcess, IpcProcess) {
        let client = IpcProcess::spawn("client");
        let service = IpcProcess::spawn("service");
        let log = Arc::new(Log::default());
        let slot = CallbackSlot::new();
        slot.set(log.clone());
        let binder = LocalBinder::new(&client, Arc::new(CodecListenerStub::new(slot.clone())));
        let proxy = CodecListenerProxy::new(binder, service.clone());
        (log, slot, proxy, client, service)
    }

    #[tokio::test]
    async fn test_events_cross_in_order() {
        let (log, _slot, proxy, _client, _service) = wire();
        proxy.on_input_buffer_available(3).await;
        proxy
            .on_output_buffer_available(1, BufferInfo::new(0, 12, 0), BufferFlag::EOS)
            .await;
        proxy.on_error(ErrorType::Engine, -1001).await;
        assert_eq!(
            *log.0.lock(),
            vec![
                "input 3".to_string(),
                "output 1 12 1".to_string(),
                "error Engine -1001".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_service_died_reported_once_then_silence() {
        let (log, slot, proxy, _client, _service) = wire();
        assert!(slot.notify_service_died());
        assert!(!slot.notify_service_died());
        proxy.on_input_buffer_available(0).await;
        assert_eq!(*log.0.lock(), vec![format!("error ServiceDied {}", ErrorCode::ServiceDied.as_i32())]);
    }

    #[tokio::test]
    async fn test_dead_peers_drop_events() {
        let (log, _slot, proxy, client, service) = wire();
        client.kill();
        proxy.on_input_buffer_available(0).await;
        service.kill();
        proxy.on_input_buffer_available(1).await;
        assert!(log.0.lock().is_empty());
    }
}
