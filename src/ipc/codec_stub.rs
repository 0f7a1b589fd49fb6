//! Server half of the codec interface.

use super::binder::{CallContext, IpcProcess, IpcStub};
use super::cache::ServerBufferCache;
use super::listener::CodecListenerProxy;
use super::parcel::MessageParcel;
use super::watchdog::{Watchdog, WatchdogScope};
use crate::av::CodecKind;
use crate::error::{AvcsError, Result};
use crate::service::manager::{ManagedStub, StubLink, StubType};
use crate::session::{CodecSession, Direction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

pub const CODEC_DESCRIPTOR: &str = "avcs.ICodecService";

/// Request codes of the codec interface.
pub mod request {
    pub const SET_LISTENER: u32 = 1;
    pub const INIT: u32 = 2;
    pub const CONFIGURE: u32 = 3;
    pub const START: u32 = 4;
    pub const STOP: u32 = 5;
    pub const FLUSH: u32 = 6;
    pub const RESET: u32 = 7;
    pub const RELEASE: u32 = 8;
    pub const NOTIFY_EOS: u32 = 9;
    pub const SET_PARAMETER: u32 = 10;
    pub const CREATE_INPUT_SURFACE: u32 = 11;
    pub const SET_OUTPUT_SURFACE: u32 = 12;
    pub const GET_INPUT_BUFFER: u32 = 13;
    pub const QUEUE_INPUT_BUFFER: u32 = 14;
    pub const GET_OUTPUT_BUFFER: u32 = 15;
    pub const RELEASE_OUTPUT_BUFFER: u32 = 16;
    pub const DEQUEUE_INPUT_BUFFER: u32 = 17;
    pub const DEQUEUE_OUTPUT_BUFFER: u32 = 18;
    pub const GET_OUTPUT_FORMAT: u32 = 19;
    pub const GET_INPUT_FORMAT: u32 = 20;
    pub const DESTROY_STUB: u32 = 21;

    pub fn name(code: u32) -> &'static str {
        match code {
            SET_LISTENER => "set_listener",
            INIT => "init",
            CONFIGURE => "configure",
            START => "start",
            STOP => "stop",
            FLUSH => "flush",
            RESET => "reset",
            RELEASE => "release",
            NOTIFY_EOS => "notify_eos",
            SET_PARAMETER => "set_parameter",
            CREATE_INPUT_SURFACE => "create_input_surface",
            SET_OUTPUT_SURFACE => "set_output_surface",
            GET_INPUT_BUFFER => "get_input_buffer",
            QUEUE_INPUT_BUFFER => "queue_input_buffer",
            GET_OUTPUT_BUFFER => "get_output_buffer",
            RELEASE_OUTPUT_BUFFER => "release_output_buffer",
            DEQUEUE_INPUT_BUFFER => "dequeue_input_buffer",
            DEQUEUE_OUTPUT_BUFFER => "dequeue_output_buffer",
            GET_OUTPUT_FORMAT => "get_output_format",
            GET_INPUT_FORMAT => "get_input_format",
            DESTROY_STUB => "destroy_stub",
            _ => "unknown",
        }
    }
}

/// Owns one [`CodecSession`] on behalf of a remote client.
pub struct CodecServiceStub {
    session: CodecSession,
    cache: Mutex<ServerBufferCache>,
    watchdog: Watchdog,
    link: StubLink,
    service: IpcProcess,
}

impl CodecServiceStub {
    pub fn new(session: CodecSession, watchdog: Watchdog, link: StubLink, service: IpcProcess) -> Self {
        Self {
            session,
            cache: Mutex::new(ServerBufferCache::new()),
            watchdog,
            link,
            service,
        }
    }

    pub fn session(&self) -> &CodecSession {
        &self.session
    }

    fn fetch_reply(&self, direction: Direction, data: &mut MessageParcel, reply: &mut MessageParcel) -> Result<()> {
        let index = data.read_u32()?;
        let fetched = match direction {
            Direction::Input => self.session.get_input_buffer(index),
            Direction::Output => self.session.get_output_buffer(index),
        };
        self.cache.lock().write_reply(direction, index, &fetched, reply);
        Ok(())
    }

    async fn dispatch(&self, code: u32, data: &mut MessageParcel, reply: &mut MessageParcel) -> Result<()> {
        use request::*;
        match code {
            SET_LISTENER => {
                let listener = data.read_remote()?;
                let proxy = CodecListenerProxy::new(listener, self.service.clone());
                reply.write_result(&self.session.set_callback(Arc::new(proxy)));
            }
            INIT => {
                let raw = data.read_u32()?;
                let kind = CodecKind::from_u32(raw)
                    .ok_or_else(|| AvcsError::InvalidVal(format!("unknown codec kind {}", raw)))?;
                let is_mime = data.read_bool()?;
                let name = data.read_string()?;
                reply.write_result(&self.session.init(kind, is_mime, &name));
            }
            CONFIGURE => {
                let format = data.read_format()?;
                self.cache.lock().clear();
                reply.write_result(&self.session.configure(&format));
            }
            SET_PARAMETER => {
                let format = data.read_format()?;
                reply.write_result(&self.session.set_parameter(&format));
            }
            START => reply.write_result(&self.session.start()),
            STOP => reply.write_result(&self.session.stop()),
            FLUSH => reply.write_result(&self.session.flush()),
            RESET => {
                self.cache.lock().clear();
                reply.write_result(&self.session.reset());
            }
            RELEASE => {
                self.cache.lock().clear();
                reply.write_result(&self.session.release());
            }
            NOTIFY_EOS => reply.write_result(&self.session.notify_eos()),
            CREATE_INPUT_SURFACE => {
                let result = self.session.create_input_surface();
                reply.write_result(&result);
                if let Ok(surface) = &result {
                    reply.write_surface(surface);
                }
            }
            SET_OUTPUT_SURFACE => {
                let surface = data.read_surface()?;
                reply.write_result(&self.session.set_output_surface(surface));
            }
            GET_INPUT_BUFFER => self.fetch_reply(Direction::Input, data, reply)?,
            GET_OUTPUT_BUFFER => self.fetch_reply(Direction::Output, data, reply)?,
            QUEUE_INPUT_BUFFER => {
                let index = data.read_u32()?;
                let info = data.read_buffer_info()?;
                let flag = data.read_flag()?;
                reply.write_result(&self.session.queue_input_buffer(index, info, flag));
            }
            RELEASE_OUTPUT_BUFFER => {
                let index = data.read_u32()?;
                let render = data.read_bool()?;
                reply.write_result(&self.session.release_output_buffer(index, render));
            }
            DEQUEUE_INPUT_BUFFER => {
                let timeout_us = data.read_i64()?;
                let result = self.session.dequeue_input_buffer(timeout_us).await;
                reply.write_result(&result);
                if let Ok(index) = result {
                    reply.write_u32(index);
                }
            }
            DEQUEUE_OUTPUT_BUFFER => {
                let timeout_us = data.read_i64()?;
                let result = self.session.dequeue_output_buffer(timeout_us).await;
                reply.write_result(&result);
                if let Ok((index, info, flag)) = result {
                    reply.write_u32(index);
                    reply.write_buffer_info(&info);
                    reply.write_flag(flag);
                }
            }
            GET_OUTPUT_FORMAT | GET_INPUT_FORMAT => {
                let result = if code == GET_OUTPUT_FORMAT {
                    self.session.output_format()
                } else {
                    self.session.input_format()
                };
                reply.write_result(&result);
                if let Ok(format) = &result {
                    reply.write_format(format);
                }
            }
            DESTROY_STUB => reply.write_result(&self.link.destroy().await),
            other => {
                return Err(AvcsError::InvalidOperation(format!("unknown codec request {}", other)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IpcStub for CodecServiceStub {
    fn descriptor(&self) -> &'static str {
        CODEC_DESCRIPTOR
    }

    async fn on_remote_request(
        &self,
        ctx: CallContext,
        code: u32,
        data: &mut MessageParcel,
        reply: &mut MessageParcel,
    ) -> Result<()> {
        data.check_interface_token(CODEC_DESCRIPTOR)?;
        let name = request::name(code);
        log::debug!("codec stub {}: {} from pid {}", self.link.handle(), name, ctx.calling_pid);
        match code {
            // Dequeue waits for as long as the caller asked to.
            request::DEQUEUE_INPUT_BUFFER | request::DEQUEUE_OUTPUT_BUFFER => self.dispatch(code, data, reply).await,
            _ => {
                self.watchdog
                    .guard(WatchdogScope::Client, name, self.dispatch(code, data, reply))
                    .await
            }
        }
    }
}

#[async_trait]
impl ManagedStub for CodecServiceStub {
    fn stub_type(&self) -> StubType {
        StubType::Codec
    }

    async fn teardown(&self) {
        self.cache.lock().clear();
        if let Err(e) = self.session.release() {
            log::warn!("codec stub {}: release failed: {}", self.link.handle(), e);
        }
    }
}
