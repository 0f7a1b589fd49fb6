//! Client half of the codec interface.

use super::binder::{DeathRecipient, IpcProcess, LocalBinder, Pid, RemoteObject};
use super::cache::{CacheStats, ClientBufferCache};
use super::codec_stub::{request, CODEC_DESCRIPTOR};
use super::listener::{AvCodecCallback, CallbackSlot, CodecListenerStub};
use super::parcel::MessageParcel;
use crate::av::{BufferFlag, BufferInfo, CodecKind, Format, Surface};
use crate::error::{AvcsError, Result};
use crate::memory::SharedMemory;
use crate::session::Direction;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct ProxyShared {
    slot: Arc<CallbackSlot>,
    cache: Mutex<ClientBufferCache>,
    listener: Mutex<Option<Arc<LocalBinder>>>,
}

impl ProxyShared {
    fn on_service_died(&self, pid: Pid) {
        self.cache.lock().clear();
        self.listener.lock().take();
        if self.slot.notify_service_died() {
            log::error!("codec proxy: service {} died", pid);
        }
    }
}

struct CodecDeathRecipient {
    shared: Weak<ProxyShared>,
}

impl DeathRecipient for CodecDeathRecipient {
    fn on_remote_died(&self, pid: Pid) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_service_died(pid);
        }
    }
}

/// Handle to a codec session living in the service.
///
/// Once the service dies every call fails with `ServiceDied` without
/// reaching the transport.
pub struct CodecProxy {
    remote: Arc<dyn RemoteObject>,
    process: IpcProcess,
    shared: Arc<ProxyShared>,
    recipient: Arc<dyn DeathRecipient>,
}

impl CodecProxy {
    /// Wraps `remote` for calls from `process` and watches the service for death.
    pub fn new(remote: Arc<dyn RemoteObject>, process: &IpcProcess) -> Result<Self> {
        if remote.descriptor() != CODEC_DESCRIPTOR {
            return Err(AvcsError::InvalidOperation(format!(
                "{} is not a codec service",
                remote.descriptor()
            )));
        }
        let shared = Arc::new(ProxyShared {
            slot: CallbackSlot::new(),
            cache: Mutex::new(ClientBufferCache::new()),
            listener: Mutex::new(None),
        });
        let recipient: Arc<dyn DeathRecipient> = Arc::new(CodecDeathRecipient {
            shared: Arc::downgrade(&shared),
        });
        remote.add_death_recipient(recipient.clone())?;
        Ok(Self {
            remote,
            process: process.clone(),
            shared,
            recipient,
        })
    }

    pub fn as_remote(&self) -> &Arc<dyn RemoteObject> {
        &self.remote
    }

    pub fn is_service_alive(&self) -> bool {
        !self.shared.slot.is_dead() && self.remote.is_alive()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.lock().stats()
    }

    fn request() -> MessageParcel {
        let mut data = MessageParcel::new();
        data.write_interface_token(CODEC_DESCRIPTOR);
        data
    }

    async fn transact(&self, code: u32, mut data: MessageParcel) -> Result<MessageParcel> {
        if self.shared.slot.is_dead() {
            return Err(AvcsError::ServiceDied);
        }
        let mut reply = MessageParcel::new();
        self.remote
            .send_request(self.process.pid(), code, &mut data, &mut reply)
            .await?;
        Ok(reply)
    }

    async fn call(&self, code: u32, data: MessageParcel) -> Result<MessageParcel> {
        let mut reply = self.transact(code, data).await?;
        reply.read_result()?;
        Ok(reply)
    }

    fn clear_cache(&self) {
        self.shared.cache.lock().clear();
    }

    pub async fn init(&self, kind: CodecKind, is_mime: bool, name: &str) -> Result<()> {
        let mut data = Self::request();
        data.write_u32(kind.as_u32());
        data.write_bool(is_mime);
        data.write_string(name);
        self.call(request::INIT, data).await.map(drop)
    }

    pub async fn configure(&self, format: &Format) -> Result<()> {
        self.clear_cache();
        let mut data = Self::request();
        data.write_format(format);
        self.call(request::CONFIGURE, data).await.map(drop)
    }

    pub async fn set_parameter(&self, format: &Format) -> Result<()> {
        let mut data = Self::request();
        data.write_format(format);
        self.call(request::SET_PARAMETER, data).await.map(drop)
    }

    pub async fn start(&self) -> Result<()> {
        self.call(request::START, Self::request()).await.map(drop)
    }

    pub async fn stop(&self) -> Result<()> {
        self.call(request::STOP, Self::request()).await.map(drop)
    }

    pub async fn flush(&self) -> Result<()> {
        self.call(request::FLUSH, Self::request()).await.map(drop)
    }

    pub async fn reset(&self) -> Result<()> {
        self.clear_cache();
        self.call(request::RESET, Self::request()).await.map(drop)
    }

    pub async fn release(&self) -> Result<()> {
        self.clear_cache();
        self.call(request::RELEASE, Self::request()).await.map(drop)
    }

    pub async fn notify_eos(&self) -> Result<()> {
        self.call(request::NOTIFY_EOS, Self::request()).await.map(drop)
    }

    /// Registers `callback` and hands the service a listener to reach it.
    pub async fn set_callback(&self, callback: Arc<dyn AvCodecCallback>) -> Result<()> {
        self.shared.slot.set(callback);
        let listener = {
            let mut listener = self.shared.listener.lock();
            listener
                .get_or_insert_with(|| {
                    LocalBinder::new(
                        &self.process,
                        Arc::new(CodecListenerStub::new(self.shared.slot.clone())),
                    )
                })
                .clone()
        };
        let mut data = Self::request();
        data.write_remote(listener);
        self.call(request::SET_LISTENER, data).await.map(drop)
    }

    async fn fetch(&self, code: u32, direction: Direction, index: u32) -> Result<SharedMemory> {
        let mut data = Self::request();
        data.write_u32(index);
        let mut reply = self.transact(code, data).await?;
        self.shared.cache.lock().read_reply(direction, index, &mut reply)
    }

    pub async fn get_input_buffer(&self, index: u32) -> Result<SharedMemory> {
        self.fetch(request::GET_INPUT_BUFFER, Direction::Input, index).await
    }

    pub async fn get_output_buffer(&self, index: u32) -> Result<SharedMemory> {
        self.fetch(request::GET_OUTPUT_BUFFER, Direction::Output, index).await
    }

    pub async fn queue_input_buffer(&self, index: u32, info: BufferInfo, flag: BufferFlag) -> Result<()> {
        let mut data = Self::request();
        data.write_u32(index);
        data.write_buffer_info(&info);
        data.write_flag(flag);
        self.call(request::QUEUE_INPUT_BUFFER, data).await.map(drop)
    }

    pub async fn release_output_buffer(&self, index: u32, render: bool) -> Result<()> {
        let mut data = Self::request();
        data.write_u32(index);
        data.write_bool(render);
        self.call(request::RELEASE_OUTPUT_BUFFER, data).await.map(drop)
    }

    /// Zero polls, negative waits forever; nothing ready gives `TryAgain`.
    pub async fn dequeue_input_buffer(&self, timeout_us: i64) -> Result<u32> {
        let mut data = Self::request();
        data.write_i64(timeout_us);
        let mut reply = self.call(request::DEQUEUE_INPUT_BUFFER, data).await?;
        reply.read_u32()
    }

    pub async fn dequeue_output_buffer(&self, timeout_us: i64) -> Result<(u32, BufferInfo, BufferFlag)> {
        let mut data = Self::request();
        data.write_i64(timeout_us);
        let mut reply = self.call(request::DEQUEUE_OUTPUT_BUFFER, data).await?;
        Ok((reply.read_u32()?, reply.read_buffer_info()?, reply.read_flag()?))
    }

    pub async fn output_format(&self) -> Result<Format> {
        let mut reply = self.call(request::GET_OUTPUT_FORMAT, Self::request()).await?;
        reply.read_format()
    }

    pub async fn input_format(&self) -> Result<Format> {
        let mut reply = self.call(request::GET_INPUT_FORMAT, Self::request()).await?;
        reply.read_format()
    }

    pub async fn create_input_surface(&self) -> Result<Surface> {
        let mut reply = self.call(request::CREATE_INPUT_SURFACE, Self::request()).await?;
        reply.read_surface()
    }

    pub async fn set_output_surface(&self, surface: &Surface) -> Result<()> {
        let mut data = Self::request();
        data.write_surface(surface);
        self.call(request::SET_OUTPUT_SURFACE, data).await.map(drop)
    }

    /// Destroys the server-side stub; repeating it is harmless.
    pub async fn destroy_stub(&self) -> Result<()> {
        self.clear_cache();
        self.call(request::DESTROY_STUB, Self::request()).await.map(drop)
    }
}

impl Drop for CodecProxy {
    fn drop(&mut self) {
        self.remote.remove_death_recipient(&self.recipient);
    }
}
