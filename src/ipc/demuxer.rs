//! Demuxer interface: stub and proxy.

use super::binder::{CallContext, IpcProcess, IpcStub, RemoteObject};
use super::parcel::MessageParcel;
use super::watchdog::{Watchdog, WatchdogScope};
use crate::av::{BufferFlag, BufferInfo, Format};
use crate::error::{AvcsError, Result};
use crate::format::{DemuxerSession, SeekMode};
use crate::memory::SharedMemory;
use crate::service::manager::{ManagedStub, StubLink, StubType};
use async_trait::async_trait;
use std::sync::Arc;

pub const DEMUXER_DESCRIPTOR: &str = "avcs.IDemuxerService";

const INIT: u32 = 1;
const GET_SOURCE_FORMAT: u32 = 2;
const GET_TRACK_FORMAT: u32 = 3;
const SELECT_TRACK: u32 = 4;
const UNSELECT_TRACK: u32 = 5;
const READ_SAMPLE: u32 = 6;
const SEEK_TO_TIME: u32 = 7;
const RELEASE: u32 = 8;
const DESTROY_STUB: u32 = 9;

pub struct DemuxerServiceStub {
    session: DemuxerSession,
    watchdog: Watchdog,
    link: StubLink,
}

impl DemuxerServiceStub {
    pub fn new(session: DemuxerSession, watchdog: Watchdog, link: StubLink) -> Self {
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
                reply.write_result(&self.session.init(&uri).await);
            }
            GET_SOURCE_FORMAT => {
                let result = self.session.source_format().await;
                reply.write_result(&result);
                if let Ok(format) = &result {
                    reply.write_format(format);
                }
            }
            GET_TRACK_FORMAT => {
                let track = data.read_u32()?;
                let result = self.session.track_format(track).await;
                reply.write_result(&result);
                if let Ok(format) = &result {
                    reply.write_format(format);
                }
            }
            SELECT_TRACK => {
                let track = data.read_u32()?;
                reply.write_result(&self.session.select_track(track).await);
            }
            UNSELECT_TRACK => {
                let track = data.read_u32()?;
                reply.write_result(&self.session.unselect_track(track).await);
            }
            READ_SAMPLE => {
                let track = data.read_u32()?;
                let memory = data.read_memory()?;
                let result = self.session.read_sample(track, &memory).await;
                reply.write_result(&result);
                if let Ok((info, flag)) = result {
                    reply.write_buffer_info(&info);
                    reply.write_flag(flag);
                }
            }
            SEEK_TO_TIME => {
                let time_ms = data.read_i64()?;
                let raw = data.read_u32()?;
                let mode = SeekMode::from_u32(raw)
                    .ok_or_else(|| AvcsError::InvalidVal(format!("unknown seek mode {}", raw)))?;
                reply.write_result(&self.session.seek_to_time(time_ms, mode).await);
            }
            RELEASE => reply.write_result(&self.session.release().await),
            DESTROY_STUB => reply.write_result(&self.link.destroy().await),
            other => {
                return Err(AvcsError::InvalidOperation(format!("unknown demuxer request {}", other)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IpcStub for DemuxerServiceStub {
    fn descriptor(&self) -> &'static str {
        DEMUXER_DESCRIPTOR
    }

    async fn on_remote_request(
        &self,
        ctx: CallContext,
        code: u32,
        data: &mut MessageParcel,
        reply: &mut MessageParcel,
    ) -> Result<()> {
        data.check_interface_token(DEMUXER_DESCRIPTOR)?;
        log::debug!("demuxer stub {}: request {} from pid {}", self.link.handle(), code, ctx.calling_pid);
        self.watchdog
            .guard(WatchdogScope::Client, "demuxer", self.dispatch(code, data, reply))
            .await
    }
}

#[async_trait]
impl ManagedStub for DemuxerServiceStub {
    fn stub_type(&self) -> StubType {
        StubType::Demuxer
    }

    async fn teardown(&self) {
        if let Err(e) = self.session.release().await {
            log::warn!("demuxer stub {}: release failed: {}", self.link.handle(), e);
        }
    }
}

/// Handle to a demuxer session living in the service.
pub struct DemuxerProxy {
    remote: Arc<dyn RemoteObject>,
    process: IpcProcess,
}

impl DemuxerProxy {
    pub fn new(remote: Arc<dyn RemoteObject>, process: &IpcProcess) -> Result<Self> {
        if remote.descriptor() != DEMUXER_DESCRIPTOR {
            return Err(AvcsError::InvalidOperation(format!(
                "{} is not a demuxer service",
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
        data.write_interface_token(DEMUXER_DESCRIPTOR);
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

    pub async fn init(&self, uri: &str) -> Result<()> {
        let mut data = Self::request();
        data.write_string(uri);
        self.call(INIT, data).await.map(drop)
    }

    pub async fn source_format(&self) -> Result<Format> {
        self.call(GET_SOURCE_FORMAT, Self::request()).await?.read_format()
    }

    pub async fn track_format(&self, track: u32) -> Result<Format> {
        let mut data = Self::request();
        data.write_u32(track);
        self.call(GET_TRACK_FORMAT, data).await?.read_format()
    }

    pub async fn select_track(&self, track: u32) -> Result<()> {
        let mut data = Self::request();
        data.write_u32(track);
        self.call(SELECT_TRACK, data).await.map(drop)
    }

    pub async fn unselect_track(&self, track: u32) -> Result<()> {
        let mut data = Self::request();
        data.write_u32(track);
        self.call(UNSELECT_TRACK, data).await.map(drop)
    }

    /// Reads the next sample of `track` into `memory`.
    pub async fn read_sample(&self, track: u32, memory: &SharedMemory) -> Result<(BufferInfo, BufferFlag)> {
        let mut data = Self::request();
        data.write_u32(track);
        data.write_memory(memory);
        let mut reply = self.call(READ_SAMPLE, data).await?;
        Ok((reply.read_buffer_info()?, reply.read_flag()?))
    }

    pub async fn seek_to_time(&self, time_ms: i64, mode: SeekMode) -> Result<()> {
        let mut data = Self::request();
        data.write_i64(time_ms);
        data.write_u32(mode.as_u32());
        self.call(SEEK_TO_TIME, data).await.map(drop)
    }

    pub async fn release(&self) -> Result<()> {
        self.call(RELEASE, Self::request()).await.map(drop)
    }

    pub async fn destroy_stub(&self) -> Result<()> {
        self.call(DESTROY_STUB, Self::request()).await.map(drop)
    }
}
