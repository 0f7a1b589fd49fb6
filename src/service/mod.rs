//! Service-process startup and shutdown.

pub mod manager;

pub use manager::{ManagedStub, SessionInfo, SessionManager, StubHandle, StubLink, StubType};

use crate::codec::CodecRegistry;
use crate::config::ServiceConfig;
use crate::error::{AvcsError, Result};
use crate::format::MediaStore;
use crate::ipc::{AvCodecServiceStub, IpcProcess, LocalBinder, RecoveryHook, RemoteObject, Watchdog};
use std::sync::Arc;

/// Everything one service process owns. Built by [`start`](Self::start)
/// and passed around explicitly.
pub struct ServiceContext {
    config: ServiceConfig,
    process: IpcProcess,
    registry: Arc<CodecRegistry>,
    store: Arc<MediaStore>,
    manager: Arc<SessionManager>,
    watchdog: Watchdog,
    binder: Arc<LocalBinder>,
}

impl ServiceContext {
    /// Starts a service process. Must be called from within a tokio runtime,
    /// which then also runs background teardown.
    pub fn start(config: ServiceConfig) -> Result<Self> {
        Self::start_with_store(config, Arc::new(MediaStore::new()))
    }

    /// Like [`start`](Self::start), serving media from `store`.
    pub fn start_with_store(config: ServiceConfig, store: Arc<MediaStore>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AvcsError::InvalidState(format!("service needs a runtime: {}", e)))?;
        let process = IpcProcess::spawn("avcodec_service");
        let registry = Arc::new(CodecRegistry::with_builtin());
        let manager = SessionManager::new(config.max_sessions_per_type, runtime);

        let mut watchdog = Watchdog::from_config(&config);
        if config.watchdog_recovery {
            let target = process.clone();
            let hook: RecoveryHook = Arc::new(move |name: &str| {
                log::error!("service: {} wedged, restarting process {}", name, target.pid());
                target.kill();
            });
            watchdog = watchdog.with_recovery(hook);
        }

        let stub = AvCodecServiceStub::new(
            process.clone(),
            manager.clone(),
            registry.clone(),
            store.clone(),
            watchdog.clone(),
            config.max_buffer_size,
        );
        let binder = LocalBinder::new(&process, Arc::new(stub));
        log::info!(
            "service: started as pid {} ({} sessions per type)",
            process.pid(),
            config.max_sessions_per_type
        );
        Ok(Self {
            config,
            process,
            registry,
            store,
            manager,
            watchdog,
            binder,
        })
    }

    /// The object clients connect to.
    pub fn service_object(&self) -> Arc<dyn RemoteObject> {
        self.binder.clone()
    }

    pub fn process(&self) -> &IpcProcess {
        &self.process
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MediaStore> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Releases every session. The process stays up.
    pub async fn shutdown(&self) {
        log::info!("service: shutting down {} sessions", self.manager.sessions().len());
        self.manager.destroy_all().await;
    }

    /// Kills the service process as a crash would.
    pub fn simulate_crash(&self) {
        self.process.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use std::time::Duration;

    #[test]
    fn test_start_needs_runtime() {
        let err = ServiceContext::start(ServiceConfig::default()).err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn test_start_and_crash() {
        let config = ServiceConfig::default().with_service_timeout(Duration::from_secs(1));
        let context = ServiceContext::start(config).unwrap();
        assert_eq!(context.watchdog().timeout(crate::ipc::WatchdogScope::Service), Duration::from_secs(1));
        assert!(context.service_object().is_alive());
        assert!(context.registry().find_by_name("mp3-decoder").is_some());

        context.simulate_crash();
        assert!(!context.service_object().is_alive());
        assert!(!context.process().is_alive());
    }
}
