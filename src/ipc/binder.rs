//! Processes, remote objects and request dispatch.
//!
//! An [`IpcProcess`] stands in for an OS process: objects are owned by one,
//! and killing it fails every request it is serving, rejects new ones and
//! fires the death recipients registered against its objects.

use super::parcel::MessageParcel;
use crate::error::{AvcsError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub type Pid = u32;

static NEXT_PID: AtomicU32 = AtomicU32::new(1000);

/// Notified once when the process owning a remote object dies.
pub trait DeathRecipient: Send + Sync {
    fn on_remote_died(&self, pid: Pid);
}

struct ProcessInner {
    pid: Pid,
    name: String,
    alive: AtomicBool,
    death_tx: watch::Sender<bool>,
    recipients: Mutex<Vec<Arc<dyn DeathRecipient>>>,
}

#[derive(Clone)]
pub struct IpcProcess {
    inner: Arc<ProcessInner>,
}

impl IpcProcess {
    pub fn spawn(name: &str) -> Self {
        let (death_tx, _) = watch::channel(false);
        let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        log::debug!("process {} ({}) started", pid, name);
        Self {
            inner: Arc::new(ProcessInner {
                pid,
                name: name.to_string(),
                alive: AtomicBool::new(true),
                death_tx,
                recipients: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn pid(&self) -> Pid {
        self.inner.pid
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Terminates the process. Only the first call has any effect.
    pub fn kill(&self) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        log::error!("process {} ({}) died", self.inner.pid, self.inner.name);
        self.inner.death_tx.send_replace(true);
        let recipients = std::mem::take(&mut *self.inner.recipients.lock());
        for recipient in recipients {
            recipient.on_remote_died(self.inner.pid);
        }
    }

    fn add_death_recipient(&self, recipient: Arc<dyn DeathRecipient>) -> Result<()> {
        let mut recipients = self.inner.recipients.lock();
        // Checked under the lock so a concurrent kill cannot miss the recipient.
        if !self.is_alive() {
            return Err(AvcsError::ServiceDied);
        }
        recipients.push(recipient);
        Ok(())
    }

    fn remove_death_recipient(&self, recipient: &Arc<dyn DeathRecipient>) -> bool {
        let mut recipients = self.inner.recipients.lock();
        let before = recipients.len();
        recipients.retain(|r| !Arc::ptr_eq(r, recipient));
        recipients.len() != before
    }

    /// Death recipients still waiting on this process.
    pub fn recipient_count(&self) -> usize {
        self.inner.recipients.lock().len()
    }

    /// Resolves once the process has died.
    async fn died(&self) {
        let mut rx = self.inner.death_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl fmt::Debug for IpcProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcProcess")
            .field("pid", &self.inner.pid)
            .field("name", &self.inner.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Identity of the process a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub calling_pid: Pid,
}

/// Server half of an interface: decodes requests and writes replies.
#[async_trait]
pub trait IpcStub: Send + Sync {
    fn descriptor(&self) -> &'static str;

    async fn on_remote_request(
        &self,
        ctx: CallContext,
        code: u32,
        data: &mut MessageParcel,
        reply: &mut MessageParcel,
    ) -> Result<()>;
}

/// Handle to an object that may live in another process.
#[async_trait]
pub trait RemoteObject: Send + Sync {
    fn descriptor(&self) -> &'static str;

    fn owner_pid(&self) -> Pid;

    fn is_alive(&self) -> bool;

    /// Registers `recipient` for the death of the owning process. Fails with
    /// `ServiceDied` when it is already dead.
    fn add_death_recipient(&self, recipient: Arc<dyn DeathRecipient>) -> Result<()>;

    /// Unregisters a recipient added earlier. Returns whether it was found.
    fn remove_death_recipient(&self, recipient: &Arc<dyn DeathRecipient>) -> bool;

    /// Sends one request and waits for the reply.
    async fn send_request(
        &self,
        caller: Pid,
        code: u32,
        data: &mut MessageParcel,
        reply: &mut MessageParcel,
    ) -> Result<()>;
}

/// Remote object served by a stub inside an [`IpcProcess`].
pub struct LocalBinder {
    owner: IpcProcess,
    stub: Arc<dyn IpcStub>,
}

impl LocalBinder {
    pub fn new(owner: &IpcProcess, stub: Arc<dyn IpcStub>) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.clone(),
            stub,
        })
    }

    pub fn stub(&self) -> &Arc<dyn IpcStub> {
        &self.stub
    }
}

#[async_trait]
impl RemoteObject for LocalBinder {
    fn descriptor(&self) -> &'static str {
        self.stub.descriptor()
    }

    fn owner_pid(&self) -> Pid {
        self.owner.pid()
    }

    fn is_alive(&self) -> bool {
        self.owner.is_alive()
    }

    fn add_death_recipient(&self, recipient: Arc<dyn DeathRecipient>) -> Result<()> {
        self.owner.add_death_recipient(recipient)
    }

    fn remove_death_recipient(&self, recipient: &Arc<dyn DeathRecipient>) -> bool {
        self.owner.remove_death_recipient(recipient)
    }

    async fn send_request(
        &self,
        caller: Pid,
        code: u32,
        data: &mut MessageParcel,
        reply: &mut MessageParcel,
    ) -> Result<()> {
        if !self.owner.is_alive() {
            return Err(AvcsError::ServiceDied);
        }
        data.rewind();
        let ctx = CallContext { calling_pid: caller };
        let result = tokio::select! {
            result = self.stub.on_remote_request(ctx, code, data, reply) => result,
            _ = self.owner.died() => Err(AvcsError::ServiceDied),
        };
        reply.rewind();
        result
    }
}
