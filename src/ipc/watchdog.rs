use crate::config::ServiceConfig;
use crate::error::{AvcsError, Result};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Invoked with the name of the call that wedged a service-scope guard.
pub type RecoveryHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogScope {
    /// Calls the service makes on its own behalf.
    Service,
    /// Calls a client is waiting on.
    Client,
}

struct WatchdogInner {
    service_timeout: Duration,
    client_timeout: Duration,
    recovery: Option<RecoveryHook>,
    trips: AtomicU64,
}

/// Bounds the duration of dispatched calls so a wedged engine fails with
/// `Timeout` instead of hanging its caller.
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<WatchdogInner>,
}

impl Watchdog {
    pub fn new(service_timeout: Duration, client_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(WatchdogInner {
                service_timeout,
                client_timeout,
                recovery: None,
                trips: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.service_call_timeout, config.client_call_timeout)
    }

    /// Installs the hook run when a service-scope call trips.
    pub fn with_recovery(self, hook: RecoveryHook) -> Self {
        Self {
            inner: Arc::new(WatchdogInner {
                service_timeout: self.inner.service_timeout,
                client_timeout: self.inner.client_timeout,
                recovery: Some(hook),
                trips: AtomicU64::new(self.trips()),
            }),
        }
    }

    pub fn timeout(&self, scope: WatchdogScope) -> Duration {
        match scope {
            WatchdogScope::Service => self.inner.service_timeout,
            WatchdogScope::Client => self.inner.client_timeout,
        }
    }

    /// Runs `fut` under the bound for `scope`.
    ///
    /// An alarm task fires independently of `fut`, so a call that blocks its
    /// thread still trips once the limit passes. A call that returns after the
    /// limit is reported as `Timeout` even if it produced a value.
    pub async fn guard<F, T>(&self, scope: WatchdogScope, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.timeout(scope);
        let fired = Arc::new(AtomicBool::new(false));
        let alarm = {
            let watchdog = self.clone();
            let fired = fired.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                watchdog.trip(&fired, scope, &name, limit);
            })
        };
        let started = Instant::now();
        let outcome = tokio::time::timeout(limit, fut).await;
        alarm.abort();
        let overran = started.elapsed() > limit;
        match outcome {
            Ok(result) if !overran && !fired.load(Ordering::Acquire) => result,
            _ => {
                self.trip(&fired, scope, name, limit);
                Err(AvcsError::Timeout(format!("{} exceeded {:?}", name, limit)))
            }
        }
    }

    /// Records one trip per guarded call, whichever side notices first.
    fn trip(&self, fired: &AtomicBool, scope: WatchdogScope, name: &str, limit: Duration) {
        if fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.trips.fetch_add(1, Ordering::Relaxed);
        log::error!("watchdog: {} exceeded {:?} ({:?} scope)", name, limit, scope);
        if scope == WatchdogScope::Service {
            if let Some(recovery) = &self.inner.recovery {
                recovery(name);
            }
        }
    }

    /// Number of calls that have timed out so far.
    pub fn trips(&self) -> u64 {
        self.inner.trips.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("service_timeout", &self.inner.service_timeout)
            .field("client_timeout", &self.inner.client_timeout)
            .field("recovery", &self.inner.recovery.is_some())
            .field("trips", &self.trips())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let watchdog = Watchdog::new(Duration::from_secs(10), Duration::from_secs(30));
        let value = watchdog
            .guard(WatchdogScope::Client, "fast", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(watchdog.trips(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wedged_service_call_trips_recovery() {
        let recovered = Arc::new(Mutex::new(Vec::new()));
        let hook: RecoveryHook = {
            let recovered = recovered.clone();
            Arc::new(move |name: &str| recovered.lock().push(name.to_string()))
        };
        let watchdog = Watchdog::new(Duration::from_secs(10), Duration::from_secs(30)).with_recovery(hook);

        let err = watchdog
            .guard(WatchdogScope::Service, "get_subsystem", async {
                std::future::pending::<Result<()>>().await
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(watchdog.trips(), 1);
        assert_eq!(*recovered.lock(), vec!["get_subsystem".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_scope_never_recovers() {
        let recovered = Arc::new(Mutex::new(0));
        let hook: RecoveryHook = {
            let recovered = recovered.clone();
            Arc::new(move |_: &str| *recovered.lock() += 1)
        };
        let watchdog = Watchdog::new(Duration::from_secs(1), Duration::from_secs(2)).with_recovery(hook);

        let started = tokio::time::Instant::now();
        let result: Result<()> = watchdog
            .guard(WatchdogScope::Client, "configure", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(60));
        assert_eq!(*recovered.lock(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_call_trips_while_still_running() {
        let recovered = Arc::new(Mutex::new(Vec::new()));
        let hook: RecoveryHook = {
            let recovered = recovered.clone();
            Arc::new(move |name: &str| recovered.lock().push(name.to_string()))
        };
        let watchdog = Watchdog::new(Duration::from_millis(50), Duration::from_secs(30)).with_recovery(hook);

        let seen_while_blocked = Arc::new(Mutex::new(0usize));
        let err = {
            let recovered = recovered.clone();
            let seen = seen_while_blocked.clone();
            watchdog
                .guard(WatchdogScope::Service, "get_subsystem", async move {
                    std::thread::sleep(Duration::from_millis(300));
                    *seen.lock() = recovered.lock().len();
                    Ok(1)
                })
                .await
                .unwrap_err()
        };
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(watchdog.trips(), 1);
        assert_eq!(*seen_while_blocked.lock(), 1);
        assert_eq!(*recovered.lock(), vec!["get_subsystem".to_string()]);
    }

    #[tokio::test]
    async fn test_blocking_overrun_counts_as_trip() {
        let watchdog = Watchdog::new(Duration::from_secs(10), Duration::from_millis(50));
        let result = watchdog
            .guard(WatchdogScope::Client, "queue_input_buffer", async {
                std::thread::sleep(Duration::from_millis(300));
                Ok(1)
            })
            .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::Timeout);
        assert_eq!(watchdog.trips(), 1);

        let value = watchdog
            .guard(WatchdogScope::Client, "start", async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(watchdog.trips(), 1);
    }
}
