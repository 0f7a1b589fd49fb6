//! Entry interface of the service: hands out codec, demuxer and muxer stubs.

use super::binder::{CallContext, DeathRecipient, IpcProcess, IpcStub, LocalBinder, Pid, RemoteObject};
use super::codec_stub::CodecServiceStub;
use super::demuxer::DemuxerServiceStub;
use super::muxer::MuxerServiceStub;
use super::parcel::MessageParcel;
use super::watchdog::{Watchdog, WatchdogScope};
use crate::codec::CodecRegistry;
use crate::error::{AvcsError, Result};
use crate::format::{DemuxerSession, MediaStore, MuxerSession};
use crate::service::manager::{SessionManager, StubType};
use crate::session::CodecSession;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

pub const SERVICE_DESCRIPTOR: &str = "avcs.IAVCodecService";

pub const GET_SUBSYSTEM: u32 = 1;

type MonitorSet = Mutex<HashSet<Pid>>;

struct ClientDeathRecipient {
    manager: Weak<SessionManager>,
    monitored: Weak<MonitorSet>,
}

impl DeathRecipient for ClientDeathRecipient {
    fn on_remote_died(&self, pid: Pid) {
        if let Some(monitored) = self.monitored.upgrade() {
            monitored.lock().remove(&pid);
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.on_client_died(pid);
        }
    }
}

pub struct AvCodecServiceStub {
    process: IpcProcess,
    manager: Arc<SessionManager>,
    registry: Arc<CodecRegistry>,
    store: Arc<MediaStore>,
    watchdog: Watchdog,
    max_buffer_size: usize,
    monitored: Arc<MonitorSet>,
}

impl AvCodecServiceStub {
    pub fn new(
        process: IpcProcess,
        manager: Arc<SessionManager>,
        registry: Arc<CodecRegistry>,
        store: Arc<MediaStore>,
        watchdog: Watchdog,
        max_buffer_size: usize,
    ) -> Self {
        Self {
            process,
            manager,
            registry,
            store,
            watchdog,
            max_buffer_size,
            monitored: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Watches `token` so the stubs of its process are reclaimed on death.
    fn monitor(&self, pid: Pid, token: &Arc<dyn RemoteObject>) -> Result<()> {
        let mut monitored = self.monitored.lock();
        if monitored.contains(&pid) {
            return Ok(());
        }
        token.add_death_recipient(Arc::new(ClientDeathRecipient {
            manager: Arc::downgrade(&self.manager),
            monitored: Arc::downgrade(&self.monitored),
        }))?;
        monitored.insert(pid);
        log::debug!("service: watching client {}", pid);
        Ok(())
    }

    /// Client processes currently watched for death.
    pub fn monitored_clients(&self) -> usize {
        self.monitored.lock().len()
    }

    fn create_stub(&self, stub_type: StubType, pid: Pid) -> Result<Arc<dyn RemoteObject>> {
        let link = self.manager.link();
        let remote: Arc<dyn RemoteObject> = match stub_type {
            StubType::Codec => {
                let session = CodecSession::new(self.registry.clone(), self.max_buffer_size);
                let stub = Arc::new(CodecServiceStub::new(
                    session,
                    self.watchdog.clone(),
                    link.clone(),
                    self.process.clone(),
                ));
                let remote: Arc<dyn RemoteObject> = LocalBinder::new(&self.process, stub.clone());
                self.manager.register(&link, pid, stub, remote.clone())?;
                remote
            }
            StubType::Demuxer => {
                let session = DemuxerSession::new(self.store.clone());
                let stub = Arc::new(DemuxerServiceStub::new(session, self.watchdog.clone(), link.clone()));
                let remote: Arc<dyn RemoteObject> = LocalBinder::new(&self.process, stub.clone());
                self.manager.register(&link, pid, stub, remote.clone())?;
                remote
            }
            StubType::Muxer => {
                let session = MuxerSession::new(self.store.clone());
                let stub = Arc::new(MuxerServiceStub::new(session, self.watchdog.clone(), link.clone()));
                let remote: Arc<dyn RemoteObject> = LocalBinder::new(&self.process, stub.clone());
                self.manager.register(&link, pid, stub, remote.clone())?;
                remote
            }
        };
        Ok(remote)
    }

    async fn get_subsystem(&self, ctx: CallContext, data: &mut MessageParcel, reply: &mut MessageParcel) -> Result<()> {
        let raw = data.read_u32()?;
        let token = data.read_remote()?;
        let created = match StubType::from_u32(raw) {
            Some(stub_type) => self
                .monitor(ctx.calling_pid, &token)
                .and_then(|_| self.create_stub(stub_type, ctx.calling_pid)),
            None => Err(AvcsError::InvalidVal(format!("unknown stub type {}", raw))),
        };
        reply.write_result(&created);
        if let Ok(remote) = created {
            reply.write_remote(remote);
        }
        Ok(())
    }
}

#[async_trait]
impl IpcStub for AvCodecServiceStub {
    fn descriptor(&self) -> &'static str {
        SERVICE_DESCRIPTOR
    }

    async fn on_remote_request(
        &self,
        ctx: CallContext,
        code: u32,
        data: &mut MessageParcel,
        reply: &mut MessageParcel,
    ) -> Result<()> {
        data.check_interface_token(SERVICE_DESCRIPTOR)?;
        match code {
            GET_SUBSYSTEM => {
                self.watchdog
                    .guard(WatchdogScope::Service, "get_subsystem", self.get_subsystem(ctx, data, reply))
                    .await
            }
            other => Err(AvcsError::InvalidOperation(format!("unknown service request {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::CodecKind;
    use crate::client::MediaClient;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dead_client_leaves_monitor_set() {
        let process = IpcProcess::spawn("service");
        let manager = SessionManager::new(4, tokio::runtime::Handle::current());
        let stub = Arc::new(AvCodecServiceStub::new(
            process.clone(),
            manager.clone(),
            Arc::new(CodecRegistry::with_builtin()),
            Arc::new(MediaStore::new()),
            Watchdog::new(Duration::from_secs(10), Duration::from_secs(30)),
            1 << 20,
        ));
        let remote: Arc<dyn RemoteObject> = LocalBinder::new(&process, stub.clone());

        let first = IpcProcess::spawn("first");
        let second = IpcProcess::spawn("second");
        let first_client = MediaClient::connect(&first, remote.clone()).unwrap();
        let second_client = MediaClient::connect(&second, remote).unwrap();
        for client in [&first_client, &first_client, &second_client] {
            client
                .create_codec_by_name("mp3-decoder", CodecKind::Decoder)
                .await
                .unwrap();
        }
        assert_eq!(stub.monitored_clients(), 2);

        first.kill();
        assert_eq!(stub.monitored_clients(), 1);
        second.kill();
        assert_eq!(stub.monitored_clients(), 0);
    }
}
