//! Two-stage wallet synchronisation engine
//!
//! The download stage asks the daemon for blocks following our newest known
//! hash and pushes them onto a bounded [`BlockQueue`]. The process stage pops
//! them, scans them for our outputs and key images and applies the result to
//! the wallet state. Each stage runs on its own thread and keeps its own
//! [`SyncStatus`]: the download cursor runs ahead, while the process cursor
//! always matches the wallet state and is what gets persisted.
//!
//! Forks are spotted by the download stage, which rewinds its cursor and
//! queues a [`SyncItem::Rewind`] ahead of the replacement blocks. The process
//! stage owns the wallet state, so it is the one that undoes the abandoned
//! transactions. Every other change to the wallet state found by the
//! download stage travels the same way, so only the process stage writes to
//! [`SubWallets`].
//!
//! Daemon failures are logged and retried with capped exponential backoff.
//! A gap in block heights is fatal: the run stops and the error is kept for
//! [`WalletSynchronizer::take_fatal_error`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::block_queue::BlockQueue;
use super::block_scanner::{scan_block, ScanKeys};
use super::cancellation::{AtomicCancellationToken, CancellationToken};
use super::daemon::DaemonProxy;
use super::daemon_status::DaemonStatus;
use super::sync_status::SyncStatus;
use crate::config::SyncConfig;
use crate::data_structures::{Hash, WalletBlock};
use crate::errors::{DaemonError, SyncError, SyncResult};
use crate::events::{EventEmitter, WalletEvent};
use crate::wallet::{SubWallets, SubWalletsState};

/// Unit of work passed from the download stage to the process stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncItem {
    Block(WalletBlock),
    /// Everything at or above `fork_height` was orphaned
    Rewind { fork_height: u64 },
    /// The timestamp start resolved to this height
    SyncStartConverted { height: u64 },
    /// Our sends the daemon no longer knows about
    Cancelled(HashSet<Hash>),
}

/// Height of the first orphaned block, if `first` does not extend `cursor`.
///
/// Either the daemon resumed from an older hash than our newest, or the
/// block's parent is not the hash we hold at the height below it.
pub fn detect_fork(cursor: &SyncStatus, first: &WalletBlock) -> Option<u64> {
    let current = cursor.height();
    if current == 0 {
        return None;
    }

    let orphaned_parent = first.block_height.checked_sub(1).filter(|&parent_height| {
        matches!(
            (first.previous_block_hash, cursor.hash_at(parent_height)),
            (Some(parent), Some(ours)) if parent != ours
        )
    });
    if orphaned_parent.is_some() {
        return orphaned_parent;
    }

    (first.block_height <= current).then_some(first.block_height)
}

/// What one pass of the download stage achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadOutcome {
    Queued(usize),
    /// Our tip was orphaned; ask again from the rewound cursor
    Rewound,
    /// Nothing new
    Synced,
    /// The daemon is still catching up to our height
    DaemonBehind,
    Stopped,
}

struct Inner {
    daemon: RwLock<Arc<dyn DaemonProxy>>,
    sub_wallets: Arc<SubWallets>,
    status: Arc<DaemonStatus>,
    emitter: Mutex<EventEmitter>,
    config: SyncConfig,
    queue: BlockQueue<SyncItem>,
    download_cursor: Mutex<SyncStatus>,
    /// Locked while applying a block, so it always agrees with the wallet state
    process_cursor: Mutex<SyncStatus>,
    /// `(height, timestamp)` to start from when no checkpoint is recognised
    start: Mutex<(u64, u64)>,
    stop: AtomicCancellationToken,
    synced_emitted: AtomicBool,
    fatal: Mutex<Option<SyncError>>,
}

impl Inner {
    fn daemon(&self) -> Arc<dyn DaemonProxy> {
        Arc::clone(&self.daemon.read())
    }

    fn fresh_cursor(&self) -> SyncStatus {
        SyncStatus::with_limits(
            self.config.recent_hashes_capacity,
            self.config.checkpoint_interval,
        )
    }

    /// Stop both stages from inside one of them
    fn halt(&self, error: SyncError) {
        error!(error = %error, "Stopping synchronisation");
        *self.fatal.lock() = Some(error);
        self.stop.cancel();
        self.queue.stop();
    }

    fn sleep(&self, duration: Duration) -> bool {
        self.stop.sleep_unless_cancelled(duration)
    }

    fn emit_synced_once(&self, height: u64) {
        let network_height = self.status.network_height();
        if network_height == 0 || height < network_height {
            return;
        }
        if !self.synced_emitted.swap(true, Ordering::SeqCst) {
            info!(height, network_height, "Wallet synced");
            self.emitter.lock().emit(WalletEvent::Synced { height });
        }
    }

    // Download stage

    fn download_loop(&self) {
        debug!("Block downloader started");
        let initial = self.config.retry_backoff_initial();
        let mut backoff = initial;

        while !self.stop.is_cancelled() {
            match self.download_step() {
                Ok(DownloadOutcome::Queued(count)) => {
                    debug!(count, "Queued blocks");
                    backoff = initial;
                }
                Ok(DownloadOutcome::Rewound) => backoff = initial,
                Ok(DownloadOutcome::Synced) => {
                    backoff = initial;
                    if self.queue.is_empty() {
                        self.emit_synced_once(self.process_cursor.lock().height());
                    }
                    if let Err(e) = self.check_locked_transactions() {
                        warn!(error = %e, "Failed to check status of sent transactions");
                    }
                    if !self.sleep(self.config.synced_sleep()) {
                        break;
                    }
                }
                Ok(DownloadOutcome::DaemonBehind) => {
                    if !self.sleep(self.config.synced_sleep()) {
                        break;
                    }
                }
                Ok(DownloadOutcome::Stopped) => break,
                Err(e) if e.is_fatal() => {
                    self.halt(e);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "Failed to download blocks");
                    if !self.sleep(backoff) {
                        break;
                    }
                    backoff = (backoff * 2).min(self.config.retry_backoff_max());
                }
            }
        }
        debug!("Block downloader stopped");
    }

    fn download_step(&self) -> SyncResult<DownloadOutcome> {
        let daemon = self.daemon();
        self.status
            .refresh_if_stale(daemon.as_ref(), self.config.daemon_poll_interval());

        let (checkpoints, wallet_height) = {
            let cursor = self.download_cursor.lock();
            (cursor.checkpoints_for_query(), cursor.height())
        };

        // An unsynced daemon would hand us blocks from the start height again
        let local_height = self.status.local_height();
        if self.status.is_online() && local_height < wallet_height {
            debug!(local_height, wallet_height, "Daemon is behind the wallet, waiting");
            return Ok(DownloadOutcome::DaemonBehind);
        }

        let (start_height, start_timestamp) = *self.start.lock();
        let blocks = daemon.get_wallet_sync_data(&checkpoints, start_height, start_timestamp)?;

        let Some(first) = blocks.first() else {
            return Ok(DownloadOutcome::Synced);
        };

        if checkpoints.is_empty() && start_timestamp == 0 && first.block_height != start_height {
            return Err(DaemonError::malformed(&format!(
                "Expected first block at height {start_height}, got {}",
                first.block_height
            ))
            .into());
        }

        if start_timestamp != 0 {
            info!(
                timestamp = start_timestamp,
                height = first.block_height,
                "Converted sync start timestamp to height"
            );
            *self.start.lock() = (first.block_height, 0);
            let converted = SyncItem::SyncStartConverted {
                height: first.block_height,
            };
            if !self.queue.push(converted) {
                return Ok(DownloadOutcome::Stopped);
            }
        }

        {
            let mut cursor = self.download_cursor.lock();
            if let Some(fork_height) = detect_fork(&cursor, first) {
                warn!(
                    fork_height,
                    wallet_height = cursor.height(),
                    "Chain fork detected"
                );
                cursor.rewind_to(fork_height.saturating_sub(1));
                drop(cursor);
                if !self.queue.push(SyncItem::Rewind { fork_height }) {
                    return Ok(DownloadOutcome::Stopped);
                }
                if fork_height < first.block_height {
                    return Ok(DownloadOutcome::Rewound);
                }
            }
        }

        let mut queued = 0;
        for block in blocks {
            self.download_cursor
                .lock()
                .record_block(block.block_hash, block.block_height)?;
            if !self.queue.push(SyncItem::Block(block)) {
                return Ok(DownloadOutcome::Stopped);
            }
            queued += 1;
        }

        Ok(DownloadOutcome::Queued(queued))
    }

    /// Ask the process stage to drop our sends the daemon has forgotten,
    /// freeing their inputs
    fn check_locked_transactions(&self) -> SyncResult<()> {
        if self.sub_wallets.is_view_wallet() {
            return Ok(());
        }

        let hashes = self.sub_wallets.locked_transaction_hashes()?;
        if hashes.is_empty() {
            return Ok(());
        }

        let status = self.daemon().get_transactions_status(&hashes)?;
        if !status.unknown.is_empty() {
            info!(
                count = status.unknown.len(),
                "Sent transactions were cancelled, returning their inputs"
            );
            self.queue.push(SyncItem::Cancelled(status.unknown));
        }
        Ok(())
    }

    // Process stage

    fn process_loop(&self) {
        debug!("Block processor started");
        while let Some(item) = self.queue.pop() {
            if self.stop.is_cancelled() {
                break;
            }

            let result = match item {
                SyncItem::Rewind { fork_height } => {
                    self.rewind(fork_height);
                    Ok(())
                }
                SyncItem::Block(block) => self.process_block(&block),
                SyncItem::SyncStartConverted { height } => {
                    let _cursor = self.process_cursor.lock();
                    self.sub_wallets.convert_sync_timestamp_to_height(height);
                    Ok(())
                }
                SyncItem::Cancelled(hashes) => {
                    if let Err(e) = self.sub_wallets.remove_cancelled_transactions(&hashes) {
                        warn!(error = %e, "Failed to remove cancelled transactions");
                    }
                    Ok(())
                }
            };

            if let Err(e) = result {
                self.halt(e);
                break;
            }
        }
        debug!("Block processor stopped");
    }

    fn rewind(&self, fork_height: u64) {
        let mut cursor = self.process_cursor.lock();
        self.sub_wallets.invalidate_transactions(fork_height);
        cursor.rewind_to(fork_height.saturating_sub(1));
    }

    fn process_block(&self, block: &WalletBlock) -> SyncResult<()> {
        let keys = ScanKeys::new(
            self.sub_wallets.private_view_key(),
            self.sub_wallets.public_spend_keys(),
        );
        let scanned = scan_block(block, &keys, self.config.process_coinbase_transactions);

        let recorded = {
            let mut cursor = self.process_cursor.lock();

            // A fork the download stage missed
            if cursor.height() != 0 && cursor.height() >= block.block_height {
                warn!(
                    height = block.block_height,
                    wallet_height = cursor.height(),
                    "Received block at or below processed height, rewinding"
                );
                self.sub_wallets.invalidate_transactions(block.block_height);
                cursor.rewind_to(block.block_height.saturating_sub(1));
            }

            let recorded = match self.sub_wallets.apply_scanned_transactions(scanned) {
                Ok(recorded) => recorded,
                Err(e) => {
                    error!(height = block.block_height, error = %e, "Failed to apply block to wallet");
                    Vec::new()
                }
            };
            cursor.record_block(block.block_hash, block.block_height)?;
            recorded
        };

        let emitter = self.emitter.lock().clone();
        for transaction in recorded {
            emitter.emit(WalletEvent::Transaction(transaction));
        }
        self.emit_synced_once(block.block_height);
        Ok(())
    }
}

/// Owns the download and process threads for one wallet
pub struct WalletSynchronizer {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WalletSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSynchronizer")
            .field("height", &self.current_scan_height())
            .field("queued", &self.inner.queue.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl WalletSynchronizer {
    /// `sync_status` is the persisted cursor matching `sub_wallets`
    pub fn new(
        daemon: Arc<dyn DaemonProxy>,
        sub_wallets: Arc<SubWallets>,
        sync_status: SyncStatus,
        status: Arc<DaemonStatus>,
        emitter: EventEmitter,
        config: SyncConfig,
    ) -> Self {
        let start = sub_wallets.min_initial_sync_start();
        let inner = Inner {
            daemon: RwLock::new(daemon),
            sub_wallets,
            status,
            emitter: Mutex::new(emitter),
            queue: BlockQueue::new(config.queue_capacity),
            download_cursor: Mutex::new(sync_status.clone()),
            process_cursor: Mutex::new(sync_status),
            start: Mutex::new(start),
            stop: AtomicCancellationToken::new(),
            synced_emitted: AtomicBool::new(false),
            fatal: Mutex::new(None),
            config,
        };

        Self {
            inner: Arc::new(inner),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the download and process threads
    pub fn start(&self) -> SyncResult<()> {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            if !self.inner.stop.is_cancelled() {
                return Err(SyncError::AlreadyRunning);
            }
            // Left over from a run that halted itself
            Self::join_all(&mut handles);
        }

        let inner = &self.inner;
        inner.stop.reset();
        inner.queue.clear();
        inner.queue.start();
        *inner.download_cursor.lock() = inner.process_cursor.lock().clone();
        *inner.start.lock() = inner.sub_wallets.min_initial_sync_start();

        info!(height = self.current_scan_height(), "Starting wallet synchronisation");

        for (name, stage) in [
            ("block-downloader", Inner::download_loop as fn(&Inner)),
            ("block-processor", Inner::process_loop as fn(&Inner)),
        ] {
            let worker = Arc::clone(inner);
            let spawned = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || stage(&worker));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    inner.stop.cancel();
                    inner.queue.stop();
                    Self::join_all(&mut handles);
                    return Err(SyncError::ThreadSpawn {
                        stage: name,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn join_all(handles: &mut Vec<JoinHandle<()>>) {
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                warn!("Synchronisation thread panicked");
            }
        }
    }

    /// Stop both stages and wait for them to exit.
    ///
    /// Blocks still queued are discarded; the process cursor only covers
    /// what was applied, so they are downloaded again on the next start.
    pub fn stop(&self) {
        let mut handles = self.handles.lock();
        if handles.is_empty() {
            return;
        }

        self.inner.stop.cancel();
        self.inner.queue.stop();
        Self::join_all(&mut handles);
        self.inner.queue.clear();
        info!(height = self.current_scan_height(), "Stopped wallet synchronisation");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty() && !self.inner.stop.is_cancelled()
    }

    /// Rescan from `scan_height`, restarting the threads if they were running
    pub fn reset(&self, scan_height: u64) -> SyncResult<()> {
        let was_running = self.is_running();
        self.stop();

        let inner = &self.inner;
        {
            let mut cursor = inner.process_cursor.lock();
            inner.sub_wallets.reset(scan_height);
            *cursor = inner.fresh_cursor();
        }
        *inner.download_cursor.lock() = inner.fresh_cursor();
        *inner.start.lock() = inner.sub_wallets.min_initial_sync_start();
        inner.synced_emitted.store(false, Ordering::SeqCst);
        info!(scan_height, "Reset wallet synchronisation");

        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Point the engine at another daemon, restarting if it was running
    pub fn swap_daemon(&self, daemon: Arc<dyn DaemonProxy>) -> SyncResult<()> {
        let was_running = self.is_running();
        self.stop();
        *self.inner.daemon.write() = daemon;
        self.inner.status.refresh(self.inner.daemon().as_ref());
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    pub fn set_emitter(&self, emitter: EventEmitter) {
        *self.inner.emitter.lock() = emitter;
    }

    pub fn daemon(&self) -> Arc<dyn DaemonProxy> {
        self.inner.daemon()
    }

    /// Height of the last block applied to the wallet
    pub fn current_scan_height(&self) -> u64 {
        self.inner.process_cursor.lock().height()
    }

    /// Height of the last block handed to the process stage
    pub fn downloaded_height(&self) -> u64 {
        self.inner.download_cursor.lock().height()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.process_cursor.lock().clone()
    }

    /// Cursor and wallet state taken under the same lock, for saving
    pub fn consistent_snapshot(&self) -> (SyncStatus, SubWalletsState) {
        let cursor = self.inner.process_cursor.lock();
        (cursor.clone(), self.inner.sub_wallets.snapshot())
    }

    /// The error that stopped the last run, if any
    pub fn take_fatal_error(&self) -> Option<SyncError> {
        self.inner.fatal.lock().take()
    }
}

impl Drop for WalletSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}
