//! # Client Entry
//!
//! A [`MediaClient`] is a client process's connection to the service. It
//! asks the service for a stub of the right type and wraps the returned
//! remote object in the matching proxy:
//!
//! ```rust,no_run
//! use avcs::av::{keys, CodecKind, Format};
//! use avcs::client::MediaClient;
//! use avcs::config::ServiceConfig;
//! use avcs::ipc::IpcProcess;
//! use avcs::service::ServiceContext;
//!
//! #[tokio::main]
//! async fn main() -> avcs::Result<()> {
//!     let service = ServiceContext::start(ServiceConfig::load())?;
//!     let process = IpcProcess::spawn("player");
//!     let client = MediaClient::connect(&process, service.service_object())?;
//!
//!     let decoder = client.create_codec_by_name("mp3-decoder", CodecKind::Decoder).await?;
//!     let mut format = Format::new();
//!     format.put_int_value(keys::CHANNEL_COUNT, 2);
//!     format.put_int_value(keys::SAMPLE_RATE, 44100);
//!     decoder.configure(&format).await?;
//!     decoder.start().await?;
//!     Ok(())
//! }
//! ```

use crate::av::CodecKind;
use crate::error::{AvcsError, Result};
use crate::format::OutputFormat;
use crate::ipc::binder::{CallContext, IpcProcess, IpcStub, LocalBinder, RemoteObject};
use crate::ipc::parcel::MessageParcel;
use crate::ipc::service::{GET_SUBSYSTEM, SERVICE_DESCRIPTOR};
use crate::ipc::{CodecProxy, DemuxerProxy, MuxerProxy};
use crate::service::StubType;
use async_trait::async_trait;
use std::sync::Arc;

pub use crate::ipc::listener::AvCodecCallback;

const TOKEN_DESCRIPTOR: &str = "avcs.IClientToken";

/// Identifies the client process to the service, which watches it for death.
struct ClientToken;

#[async_trait]
impl IpcStub for ClientToken {
    fn descriptor(&self) -> &'static str {
        TOKEN_DESCRIPTOR
    }

    async fn on_remote_request(
        &self,
        _ctx: CallContext,
        code: u32,
        _data: &mut MessageParcel,
        _reply: &mut MessageParcel,
    ) -> Result<()> {
        Err(AvcsError::InvalidOperation(format!("client token takes no request {}", code)))
    }
}

pub struct MediaClient {
    process: IpcProcess,
    service: Arc<dyn RemoteObject>,
    token: Arc<dyn RemoteObject>,
}

impl MediaClient {
    /// Connects `process` to the service behind `service`.
    pub fn connect(process: &IpcProcess, service: Arc<dyn RemoteObject>) -> Result<Self> {
        if service.descriptor() != SERVICE_DESCRIPTOR {
            return Err(AvcsError::InvalidOperation(format!(
                "{} is not the codec service",
                service.descriptor()
            )));
        }
        if !service.is_alive() {
            return Err(AvcsError::ServiceDied);
        }
        let token: Arc<dyn RemoteObject> = LocalBinder::new(process, Arc::new(ClientToken));
        log::debug!("client {}: connected to service {}", process.pid(), service.owner_pid());
        Ok(Self {
            process: process.clone(),
            service,
            token,
        })
    }

    pub fn process(&self) -> &IpcProcess {
        &self.process
    }

    async fn get_subsystem(&self, stub_type: StubType) -> Result<Arc<dyn RemoteObject>> {
        let mut data = MessageParcel::new();
        data.write_interface_token(SERVICE_DESCRIPTOR);
        data.write_u32(stub_type.as_u32());
        data.write_remote(self.token.clone());
        let mut reply = MessageParcel::new();
        self.service
            .send_request(self.process.pid(), GET_SUBSYSTEM, &mut data, &mut reply)
            .await?;
        reply.read_result()?;
        reply.read_remote()
    }

    async fn create_codec(&self, kind: CodecKind, is_mime: bool, name: &str) -> Result<CodecProxy> {
        let remote = self.get_subsystem(StubType::Codec).await?;
        let codec = CodecProxy::new(remote, &self.process)?;
        if let Err(e) = codec.init(kind, is_mime, name).await {
            log::warn!("client {}: cannot create codec {}: {}", self.process.pid(), name, e);
            if let Err(destroy) = codec.destroy_stub().await {
                log::debug!("client {}: destroy after failed init: {}", self.process.pid(), destroy);
            }
            return Err(e);
        }
        Ok(codec)
    }

    /// Creates a codec by registered name, e.g. `mp3-decoder`.
    pub async fn create_codec_by_name(&self, name: &str, kind: CodecKind) -> Result<CodecProxy> {
        self.create_codec(kind, false, name).await
    }

    /// Creates the first codec of `kind` that handles `mime`.
    pub async fn create_codec_by_mime(&self, mime: &str, kind: CodecKind) -> Result<CodecProxy> {
        self.create_codec(kind, true, mime).await
    }

    /// Opens a demuxer on the media at `uri`.
    pub async fn create_demuxer(&self, uri: &str) -> Result<DemuxerProxy> {
        let remote = self.get_subsystem(StubType::Demuxer).await?;
        let demuxer = DemuxerProxy::new(remote, &self.process)?;
        if let Err(e) = demuxer.init(uri).await {
            log::warn!("client {}: cannot open demuxer on {}: {}", self.process.pid(), uri, e);
            if let Err(destroy) = demuxer.destroy_stub().await {
                log::debug!("client {}: destroy after failed init: {}", self.process.pid(), destroy);
            }
            return Err(e);
        }
        Ok(demuxer)
    }

    /// Opens a muxer writing `output_format` to `uri`.
    pub async fn create_muxer(&self, uri: &str, output_format: OutputFormat) -> Result<MuxerProxy> {
        let remote = self.get_subsystem(StubType::Muxer).await?;
        let muxer = MuxerProxy::new(remote, &self.process)?;
        if let Err(e) = muxer.init(uri, output_format).await {
            log::warn!("client {}: cannot open muxer on {}: {}", self.process.pid(), uri, e);
            if let Err(destroy) = muxer.destroy_stub().await {
                log::debug!("client {}: destroy after failed init: {}", self.process.pid(), destroy);
            }
            return Err(e);
        }
        Ok(muxer)
    }
}
