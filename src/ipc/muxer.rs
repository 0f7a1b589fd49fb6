//! Muxer interface: stub and proxy.

use super::binder::{CallContext, IpcProcess, IpcStub, RemoteObject};
use super::parcel::MessageParcel;
use super::watchdog::{Watchdog, WatchdogScope};
use crate::av::{BufferFlag, BufferInfo, Format};
use crate::error::{AvcsError, Result};
use crate::format::{MuxerSession, OutputFormat};
use crate::memory::SharedMemory;
use crate::service::manager::{ManagedStub, StubLink, StubType};
use async_trait::async_trait;
use std::sync::Arc;

pub const MUXER_DESCRIPTOR: &str = "avcs.IMuxerService";

const INIT: u32 = 1;
const SET_ROTATION: u32 = 2;
const ADD_TRACK: u32 = 3;
const START: u32 = 4;
const WRITE_SAMPLE: u32 = 5;
const STOP: u32 = 6;
const RELEASE: u32 = 7;
const DESTROY_STUB: u32 = 8;

pub struct MuxerServiceStub {
    session: MuxerSession,
    watchdog: Watchdog,
    link: StubLink,
}

impl MuxerServiceStub {
    pub fn new(session: MuxerSession, watchdog: Watchdog, link: StubLink) -> Self {
        Self {
            session,
            watchdog,
            link,
        }
    }

    async fn dispatch(&self, code: u32, data: &mut MessageParcel, reply: &mut MessageParcel) -> Result<()> {
        match code {
            INIT => {
                let uri = data.read_string()?;
                let raw = data.read_u32()?;
                let output_format = OutputFormat::from_u32(raw).ok_or_else(|| AvcsError::Unsupported {
                    code: crate::ErrorCode::UnsupportFileType,
                    msg: format!("unknown output format {}", raw),
                })?;
                reply.write_result(&self.session.init(&uri, output_format).await);
            }
            SET_ROTATION => {
                let rotation = data.read_i32()?;
                reply.write_result(&self.session.set_rotation(rotation).await);
            }
            ADD_TRACK => {
                let format = data.read_format()?;
                let result = self.session.add_track(&format).await;
                reply.write_result(&result);
                if let Ok(track) = result {
                    reply.write_u32(track);
                }
            }
            START => reply.write_result(&self.session.start().await),
            WRITE_SAMPLE => {
                let track = data.read_u32()?;
                let memory = data.read_memory()?;
                let info = data.read_buffer_info()?;
                let flag = data.read_flag()?;
                reply.write_result(&self.session.write_sample(track, &memory, info, flag).await);
            }
            STOP => reply.write_result(&self.session.stop().await),
            RELEASE => reply.write_result(&self.session.release().await),
            DESTROY_STUB => reply.write_result(&self.link.destroy().await),
            other => {
                return Err(AvcsError::InvalidOperation(format!("unknown muxer request {}", other)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IpcStub for MuxerServiceStub {
    fn descriptor(&self) -> &'static str {
        MUXER_DESCRIPTOR
    }

    async fn on_remote_request(
        &self,
        ctx: CallContext,
        code: u32,
        data: &mut MessageParcel,
        reply: &mut MessageParcel,
    ) -> Result<()> {
        data.check_interface_token(MUXER_DESCRIPTOR)?;
        log::debug!("muxer stub {}: request {} from pid {}", self.link.handle(), code, ctx.calling_pid);
        self.watchdog
            .guard(WatchdogScope::Client, "muxer", self.dispatch(code, data, reply))
            .await
    }
}

#[async_trait]
impl ManagedStub for MuxerServiceStub {
    fn stub_type(&self) -> StubType {
        StubType::Muxer
    }

    async fn teardown(&self) {
        if let Err(e) = self.session.release().await {
            log::warn!("muxer stub {}: release failed: {}", self.link.handle(), e);
        }
    }
}

/// Handle to a muxer session living in the service.
pub struct MuxerProxy {
    remote: Arc<dyn RemoteObject>,
    process: IpcProcess,
}

impl MuxerProxy {
    pub fn new(remote: Arc<dyn RemoteObject>, process: &IpcProcess) -> Result<Self> {
        if remote.descriptor() != MUXER_DESCRIPTOR {
            return Err(AvcsError::InvalidOperation(format!(
                "{} is not a muxer service",
                remote.descriptor()
            )));
        }
        Ok(Self {
            remote,
            process: process.clone(),
        })
    }

    fn request() -> MessageParcel {
        let mut data = MessageParcel::new();
        data.write_interface_token(MUXER_DESCRIPTOR);
        data
    }

    async fn call(&self, code: u32, mut data: MessageParcel) -> Result<MessageParcel> {
        let mut reply = MessageParcel::new();
        self.remote
            .send_request(self.process.pid(), code, &mut data, &mut reply)
            .await?;
        reply.read_result()?;
        Ok(reply)
    }

    pub async fn init(&self, uri: &str, output_format: OutputFormat) -> Result<()> {
        let mut data = Self::request();
        data.write_string(uri);
        data.write_u32(output_format.as_u32());
        self.call(INIT, data).await.map(drop)
    }

    pub async fn set_rotation(&self, rotation: i32) -> Result<()> {
        let mut data = Self::request();
        data.write_i32(rotation);
        self.call(SET_ROTATION, data).await.map(drop)
    }

    /// Adds a track and returns its index.
    pub async fn add_track(&self, format: &Format) -> Result<u32> {
        let mut data = Self::request();
        data.write_format(format);
        self.call(ADD_TRACK, data).await?.read_u32()
    }

    pub async fn start(&self) -> Result<()> {
        self.call(START, Self::request()).await.map(drop)
    }

    pub async fn write_sample(
        &self,
        track: u32,
        memory: &SharedMemory,
        info: BufferInfo,
        flag: BufferFlag,
    ) -> Result<()> {
        let mut data = Self::request();
        data.write_u32(track);
        data.write_memory(memory);
        data.write_buffer_info(&info);
        data.write_flag(flag);
        self.call(WRITE_SAMPLE, data).await.map(drop)
    }

    pub async fn stop(&self) -> Result<()> {
        self.call(STOP, Self::request()).await.map(drop)
    }

    pub async fn release(&self) -> Result<()> {
        self.call(RELEASE, Self::request()).await.map(drop)
    }

    pub async fn destroy_stub(&self) -> Result<()> {
        self.call(DESTROY_STUB, Self::request()).await.map(drop)
    }
}
