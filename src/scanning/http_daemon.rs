//! HTTP implementation of [`DaemonProxy`]
//!
//! Talks to a CryptoNote-style daemon's JSON endpoints with a blocking
//! `reqwest` client. Every call is bounded by the client timeout; failures map
//! to [`DaemonError`] so the engine can log and retry them.
//!
//! ```rust,no_run
//! use lightweight_wallet_sync::scanning::{DaemonProxy, HttpDaemon};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let daemon = HttpDaemon::new("http://127.0.0.1:11898")?;
//! let info = daemon.get_daemon_info()?;
//! println!("Daemon at height {}", info.local_height);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::daemon::{DaemonInfo, DaemonProxy, NodeFee, TransactionsStatus};
use crate::data_structures::{Hash, WalletBlock};
use crate::errors::{DaemonError, DaemonResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Daemon hashrate is derived from difficulty over the block target
const DIFFICULTY_TARGET: u64 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncDataRequest<'a> {
    block_hash_checkpoints: &'a [Hash],
    start_height: u64,
    start_timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct SyncDataResponse {
    status: String,
    #[serde(default)]
    items: Vec<WalletBlock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GlobalIndexesRequest {
    start_height: u64,
    end_height: u64,
}

#[derive(Debug, Deserialize)]
struct GlobalIndexEntry {
    key: Hash,
    value: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct GlobalIndexesResponse {
    status: String,
    #[serde(default)]
    indexes: Vec<GlobalIndexEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionsStatusRequest<'a> {
    transaction_hashes: Vec<&'a Hash>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionsStatusResponse {
    status: String,
    #[serde(default)]
    transactions_in_pool: HashSet<Hash>,
    #[serde(default)]
    transactions_in_block: HashSet<Hash>,
    #[serde(default)]
    transactions_unknown: HashSet<Hash>,
}

#[derive(Debug, Serialize)]
struct SendRawTransactionRequest<'a> {
    tx_as_hex: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    height: u64,
    network_height: u64,
    #[serde(default)]
    incoming_connections_count: u64,
    #[serde(default)]
    outgoing_connections_count: u64,
    #[serde(default)]
    difficulty: u64,
}

#[derive(Debug, Deserialize)]
struct FeeResponse {
    #[serde(default)]
    address: String,
    #[serde(default)]
    amount: u64,
}

fn check_status(status: &str) -> DaemonResult<()> {
    if status == "OK" {
        Ok(())
    } else {
        Err(DaemonError::BadStatus(status.to_string()))
    }
}

/// Blocking HTTP client for a remote daemon
#[derive(Debug, Clone)]
pub struct HttpDaemon {
    client: Client,
    base_url: String,
}

impl HttpDaemon {
    pub fn new(base_url: &str) -> DaemonResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> DaemonResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DaemonError::connection_failed(&format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse<T: DeserializeOwned>(response: Response) -> DaemonResult<T> {
        if !response.status().is_success() {
            return Err(DaemonError::HttpStatus(response.status().to_string()));
        }
        response
            .json::<T>()
            .map_err(|e| DaemonError::malformed(&format!("Failed to parse response: {e}")))
    }

    fn send_error(e: reqwest::Error) -> DaemonError {
        if e.is_timeout() {
            DaemonError::Timeout
        } else {
            DaemonError::connection_failed(&format!("HTTP request failed: {e}"))
        }
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> DaemonResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(Self::send_error)?;
        Self::parse(response)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> DaemonResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .map_err(Self::send_error)?;
        Self::parse(response)
    }
}

impl DaemonProxy for HttpDaemon {
    fn get_wallet_sync_data(
        &self,
        checkpoints: &[Hash],
        start_height: u64,
        start_timestamp: u64,
    ) -> DaemonResult<Vec<WalletBlock>> {
        let response: SyncDataResponse = self.post(
            "/getwalletsyncdata",
            &SyncDataRequest {
                block_hash_checkpoints: checkpoints,
                start_height,
                start_timestamp,
            },
        )?;
        check_status(&response.status)?;
        debug!(blocks = response.items.len(), "Fetched wallet sync data");
        Ok(response.items)
    }

    fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> DaemonResult<HashMap<Hash, Vec<u64>>> {
        let response: GlobalIndexesResponse = self.post(
            "/get_global_indexes_for_range",
            &GlobalIndexesRequest {
                start_height,
                end_height,
            },
        )?;
        check_status(&response.status)?;
        Ok(response
            .indexes
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect())
    }

    fn get_transactions_status(&self, hashes: &HashSet<Hash>) -> DaemonResult<TransactionsStatus> {
        let response: TransactionsStatusResponse = self.post(
            "/get_transactions_status",
            &TransactionsStatusRequest {
                transaction_hashes: hashes.iter().collect(),
            },
        )?;
        check_status(&response.status)?;
        Ok(TransactionsStatus {
            in_pool: response.transactions_in_pool,
            in_block: response.transactions_in_block,
            unknown: response.transactions_unknown,
        })
    }

    fn send_transaction(&self, raw_transaction: &str) -> DaemonResult<bool> {
        let response: StatusResponse = self.post(
            "/sendrawtransaction",
            &SendRawTransactionRequest {
                tx_as_hex: raw_transaction,
            },
        )?;
        Ok(response.status == "OK")
    }

    fn get_daemon_info(&self) -> DaemonResult<DaemonInfo> {
        let info: InfoResponse = self.get("/info")?;
        // The daemon reports block counts; heights are one lower
        Ok(DaemonInfo {
            local_height: info.height.saturating_sub(1),
            network_height: info.network_height.saturating_sub(1),
            peer_count: info.incoming_connections_count + info.outgoing_connections_count,
            hashrate: info.difficulty / DIFFICULTY_TARGET,
        })
    }

    fn get_fee_info(&self) -> DaemonResult<NodeFee> {
        let fee: FeeResponse = self.get("/fee")?;
        Ok(NodeFee {
            amount: fee.amount,
            address: fee.address,
        })
    }
}
