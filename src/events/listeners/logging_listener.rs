//! Listener that logs wallet events through `tracing`

use tracing::info;

use crate::events::listener::{EventListener, ListenerResult};
use crate::events::types::WalletEvent;

#[derive(Debug, Default)]
pub struct LoggingListener {
    /// Log transaction events only, skipping sync notifications
    transactions_only: bool,
}

impl LoggingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transactions_only() -> Self {
        Self {
            transactions_only: true,
        }
    }
}

impl EventListener for LoggingListener {
    fn handle_event(&mut self, event: &WalletEvent) -> ListenerResult {
        match event {
            WalletEvent::Synced { height } => info!(height, "Wallet synced"),
            WalletEvent::Transaction(tx) => info!(
                hash = %tx.hash,
                height = tx.block_height,
                amount = tx.total_amount(),
                fee = tx.fee,
                coinbase = tx.is_coinbase,
                "Transaction detected"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }

    fn wants_event(&self, event: &WalletEvent) -> bool {
        !self.transactions_only || matches!(event, WalletEvent::Transaction(_))
    }
}
