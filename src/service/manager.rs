//! # Session Manager
//!
//! Registry of every server-side stub, keyed by stub type and handle, with
//! the pid of the client that owns it. Creation beyond the per-type bound is
//! refused with `NoMemory`. When a client dies its stubs are detached at
//! once and torn down on a separate task, so the death notification itself
//! never waits on an engine.

use crate::error::{AvcsError, Result};
use crate::ipc::binder::{Pid, RemoteObject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

pub type StubHandle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StubType {
    Codec,
    Demuxer,
    Muxer,
}

impl StubType {
    pub fn as_u32(self) -> u32 {
        match self {
            StubType::Codec => 0,
            StubType::Demuxer => 1,
            StubType::Muxer => 2,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(StubType::Codec),
            1 => Some(StubType::Demuxer),
            2 => Some(StubType::Muxer),
            _ => None,
        }
    }
}

impl fmt::Display for StubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StubType::Codec => "codec",
            StubType::Demuxer => "demuxer",
            StubType::Muxer => "muxer",
        };
        f.write_str(name)
    }
}

/// Server object the manager can tear down.
#[async_trait]
pub trait ManagedStub: Send + Sync {
    fn stub_type(&self) -> StubType;

    /// Releases whatever session the stub owns. Must tolerate repeated calls.
    async fn teardown(&self);
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub handle: StubHandle,
    pub stub_type: StubType,
    pub pid: Pid,
    pub created_at: DateTime<Utc>,
}

struct StubEntry {
    pid: Pid,
    stub: Arc<dyn ManagedStub>,
    remote: Arc<dyn RemoteObject>,
    created_at: DateTime<Utc>,
}

pub struct SessionManager {
    max_per_type: usize,
    next_handle: AtomicU64,
    registry: Mutex<HashMap<StubType, HashMap<StubHandle, StubEntry>>>,
    runtime: Handle,
}

impl SessionManager {
    /// Creates a manager whose background teardown runs on `runtime`.
    pub fn new(max_per_type: usize, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            max_per_type,
            next_handle: AtomicU64::new(1),
            registry: Mutex::new(HashMap::new()),
            runtime,
        })
    }

    pub fn max_per_type(&self) -> usize {
        self.max_per_type
    }

    /// Reserves a handle for a stub about to be built.
    pub fn link(self: &Arc<Self>) -> StubLink {
        StubLink {
            manager: Arc::downgrade(self),
            handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Adds a stub owned by `pid` under a handle obtained from [`link`](Self::link).
    pub fn register(
        &self,
        link: &StubLink,
        pid: Pid,
        stub: Arc<dyn ManagedStub>,
        remote: Arc<dyn RemoteObject>,
    ) -> Result<()> {
        let stub_type = stub.stub_type();
        let mut registry = self.registry.lock();
        let stubs = registry.entry(stub_type).or_default();
        if stubs.len() >= self.max_per_type {
            log::warn!(
                "manager: {} limit of {} reached, refusing pid {}",
                stub_type,
                self.max_per_type,
                pid
            );
            return Err(AvcsError::NoMemory(format!(
                "{} sessions exhausted ({} live)",
                stub_type,
                stubs.len()
            )));
        }
        stubs.insert(
            link.handle,
            StubEntry {
                pid,
                stub,
                remote,
                created_at: Utc::now(),
            },
        );
        log::info!("manager: {} stub {} created for pid {}", stub_type, link.handle, pid);
        Ok(())
    }

    /// Removes and tears down one stub. Unknown handles are ignored.
    pub async fn destroy_stub(&self, handle: StubHandle) -> Result<()> {
        let entry = {
            let mut registry = self.registry.lock();
            registry.values_mut().find_map(|stubs| stubs.remove(&handle))
        };
        match entry {
            Some(entry) => {
                log::info!("manager: destroying {} stub {}", entry.stub.stub_type(), handle);
                entry.stub.teardown().await;
            }
            None => log::debug!("manager: stub {} already destroyed", handle),
        }
        Ok(())
    }

    /// Detaches every stub owned by `pid` and tears them down in the
    /// background. Returns the number detached.
    pub fn on_client_died(&self, pid: Pid) -> usize {
        let detached: Vec<(StubHandle, StubEntry)> = {
            let mut registry = self.registry.lock();
            let mut detached = Vec::new();
            for stubs in registry.values_mut() {
                let owned: Vec<StubHandle> = stubs
                    .iter()
                    .filter(|(_, entry)| entry.pid == pid)
                    .map(|(handle, _)| *handle)
                    .collect();
                for handle in owned {
                    if let Some(entry) = stubs.remove(&handle) {
                        detached.push((handle, entry));
                    }
                }
            }
            detached
        };
        let count = detached.len();
        log::error!("manager: client {} died, reclaiming {} stubs", pid, count);
        if count > 0 {
            self.runtime.spawn(teardown_all(detached));
        }
        count
    }

    /// Destroys every registered stub.
    pub async fn destroy_all(&self) {
        let detached: Vec<(StubHandle, StubEntry)> = {
            let mut registry = self.registry.lock();
            registry.values_mut().flat_map(|stubs| stubs.drain()).collect()
        };
        teardown_all(detached).await;
    }

    pub fn count(&self, stub_type: StubType) -> usize {
        self.registry.lock().get(&stub_type).map_or(0, HashMap::len)
    }

    pub fn remote(&self, handle: StubHandle) -> Option<Arc<dyn RemoteObject>> {
        let registry = self.registry.lock();
        registry
            .values()
            .find_map(|stubs| stubs.get(&handle))
            .map(|entry| entry.remote.clone())
    }

    /// Live entries, oldest first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let registry = self.registry.lock();
        let mut sessions: Vec<SessionInfo> = registry
            .iter()
            .flat_map(|(stub_type, stubs)| {
                stubs.iter().map(move |(handle, entry)| SessionInfo {
                    handle: *handle,
                    stub_type: *stub_type,
                    pid: entry.pid,
                    created_at: entry.created_at,
                })
            })
            .collect();
        sessions.sort_by_key(|info| (info.created_at, info.handle));
        sessions
    }
}

async fn teardown_all(entries: Vec<(StubHandle, StubEntry)>) {
    let teardowns = entries.into_iter().map(|(handle, entry)| async move {
        entry.stub.teardown().await;
        log::debug!("manager: stub {} of pid {} torn down", handle, entry.pid);
    });
    futures::future::join_all(teardowns).await;
}

/// A stub's way back to the manager that registered it.
#[derive(Clone)]
pub struct StubLink {
    manager: Weak<SessionManager>,
    handle: StubHandle,
}

impl StubLink {
    pub fn handle(&self) -> StubHandle {
        self.handle
    }

    /// Removes the stub from the manager; a second call does nothing.
    pub async fn destroy(&self) -> Result<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.destroy_stub(self.handle).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for StubLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubLink").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::binder::{CallContext, IpcProcess, IpcStub, LocalBinder};
    use crate::ipc::parcel::MessageParcel;
    use crate::ErrorCode;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FakeStub {
        stub_type: StubType,
        teardowns: AtomicUsize,
    }

    impl FakeStub {
        fn new(stub_type: StubType) -> Arc<Self> {
            Arc::new(Self {
                stub_type,
                teardowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ManagedStub for FakeStub {
        fn stub_type(&self) -> StubType {
            self.stub_type
        }

        async fn teardown(&self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl IpcStub for FakeStub {
        fn descriptor(&self) -> &'static str {
            "test.IFake"
        }

        async fn on_remote_request(
            &self,
            _ctx: CallContext,
            _code: u32,
            _data: &mut MessageParcel,
            _reply: &mut MessageParcel,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn add(
        manager: &Arc<SessionManager>,
        process: &IpcProcess,
        pid: Pid,
        stub_type: StubType,
    ) -> (Result<()>, StubLink, Arc<FakeStub>) {
        let stub = FakeStub::new(stub_type);
        let link = manager.link();
        let remote = LocalBinder::new(process, stub.clone());
        let result = manager.register(&link, pid, stub.clone(), remote);
        (result, link, stub)
    }

    #[tokio::test]
    async fn test_limit_is_per_type() {
        let manager = SessionManager::new(2, Handle::current());
        let service = IpcProcess::spawn("service");
        for _ in 0..2 {
            add(&manager, &service, 7, StubType::Codec).0.unwrap();
        }
        let (refused, _, _) = add(&manager, &service, 7, StubType::Codec);
        assert_eq!(refused.unwrap_err().code(), ErrorCode::NoMemory);
        assert_eq!(manager.count(StubType::Codec), 2);

        add(&manager, &service, 7, StubType::Muxer).0.unwrap();
        assert_eq!(manager.sessions().len(), 3);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let manager = SessionManager::new(4, Handle::current());
        let service = IpcProcess::spawn("service");
        let (_, link, stub) = add(&manager, &service, 7, StubType::Demuxer);
        assert!(manager.remote(link.handle()).is_some());

        link.destroy().await.unwrap();
        link.destroy().await.unwrap();
        assert_eq!(stub.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(manager.count(StubType::Demuxer), 0);
        assert!(manager.remote(link.handle()).is_none());
    }

    #[tokio::test]
    async fn test_client_death_reclaims_only_its_stubs() {
        let manager = SessionManager::new(4, Handle::current());
        let service = IpcProcess::spawn("service");
        let (_, _, first) = add(&manager, &service, 10, StubType::Codec);
        let (_, _, second) = add(&manager, &service, 10, StubType::Muxer);
        let (_, _, other) = add(&manager, &service, 11, StubType::Codec);

        assert_eq!(manager.on_client_died(10), 2);
        let sessions = manager.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].pid, 11);

        for _ in 0..100 {
            if first.teardowns.load(Ordering::SeqCst) == 1 && second.teardowns.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(first.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(second.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(other.teardowns.load(Ordering::SeqCst), 0);
        assert_eq!(manager.on_client_died(10), 0);
    }

    #[test]
    fn test_stub_type_wire() {
        for stub_type in [StubType::Codec, StubType::Demuxer, StubType::Muxer] {
            assert_eq!(StubType::from_u32(stub_type.as_u32()), Some(stub_type));
        }
        assert_eq!(StubType::from_u32(9), None);
        assert_eq!(StubType::Muxer.to_string(), "muxer");
    }
}
