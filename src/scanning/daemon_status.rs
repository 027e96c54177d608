//! Cached daemon status and the helper thread that keeps it fresh
//!
//! The status is used for UI display and for two sync decisions: waiting
//! while the daemon is behind us, and spotting when we have caught up with the
//! network. It is never needed for correctness of the processed state.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::cancellation::{AtomicCancellationToken, CancellationToken};
use super::daemon::{DaemonInfo, DaemonProxy, NodeFee};
use crate::errors::{SyncError, SyncResult};

#[derive(Debug, Default)]
struct StatusInner {
    info: DaemonInfo,
    fee: NodeFee,
    online: bool,
    last_refresh: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct DaemonStatus {
    inner: Mutex<StatusInner>,
}

impl DaemonStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the daemon and update the cached values.
    ///
    /// Failure marks the daemon offline but keeps the last known heights.
    pub fn refresh(&self, daemon: &dyn DaemonProxy) -> bool {
        let info = daemon.get_daemon_info();
        let fee = daemon.get_fee_info();

        let mut inner = self.inner.lock();
        inner.last_refresh = Some(Instant::now());
        match info {
            Ok(info) => {
                inner.info = info;
                inner.online = true;
            }
            Err(e) => {
                debug!(error = %e, "Failed to refresh daemon info");
                inner.online = false;
            }
        }
        if let Ok(fee) = fee {
            inner.fee = fee;
        }
        inner.online
    }

    /// Refresh only if the cache is older than `max_age`
    pub fn refresh_if_stale(&self, daemon: &dyn DaemonProxy, max_age: Duration) {
        let stale = self
            .inner
            .lock()
            .last_refresh
            .map_or(true, |at| at.elapsed() >= max_age);
        if stale {
            self.refresh(daemon);
        }
    }

    pub fn info(&self) -> DaemonInfo {
        self.inner.lock().info
    }

    pub fn local_height(&self) -> u64 {
        self.inner.lock().info.local_height
    }

    pub fn network_height(&self) -> u64 {
        self.inner.lock().info.network_height
    }

    pub fn node_fee(&self) -> NodeFee {
        self.inner.lock().fee.clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock().online
    }
}

/// Background thread refreshing a [`DaemonStatus`] at a fixed interval
#[derive(Debug)]
pub struct DaemonStatusPoller {
    stop: AtomicCancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DaemonStatusPoller {
    pub fn spawn(
        daemon: Arc<dyn DaemonProxy>,
        status: Arc<DaemonStatus>,
        interval: Duration,
    ) -> SyncResult<Self> {
        let stop = AtomicCancellationToken::new();
        let token = stop.clone();

        let handle = std::thread::Builder::new()
            .name("daemon-status".to_string())
            .spawn(move || {
                debug!("Daemon status poller started");
                loop {
                    if !status.refresh(daemon.as_ref()) {
                        warn!("Daemon is not responding");
                    }
                    if !token.sleep_unless_cancelled(interval) {
                        break;
                    }
                }
                debug!("Daemon status poller stopped");
            })
            .map_err(|e| SyncError::ThreadSpawn {
                stage: "daemon-status",
                message: e.to_string(),
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Daemon status poller panicked");
            }
        }
    }
}

impl Drop for DaemonStatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
