//! Notifications the engine emits toward the UI layer

use serde::{Deserialize, Serialize};

use crate::data_structures::Transaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WalletEvent {
    /// Processed height first reached the network height
    Synced { height: u64 },
    /// A transaction affecting the wallet was confirmed in a block
    Transaction(Transaction),
}

impl WalletEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::Synced { .. } => "Synced",
            WalletEvent::Transaction(_) => "Transaction",
        }
    }

    /// Short human-readable description
    pub fn summary(&self) -> String {
        match self {
            WalletEvent::Synced { height } => format!("Wallet synced at height {height}"),
            WalletEvent::Transaction(tx) => format!(
                "Transaction {} at height {}: {:+}",
                tx.hash,
                tx.block_height,
                tx.total_amount()
            ),
        }
    }
}
