//! Wallet sync runner
//!
//! Opens (or creates) an encrypted wallet file, syncs it against a daemon
//! and saves it again before exiting.
//!
//! ## Usage
//! ```bash
//! # Create a new wallet and sync it for a minute
//! cargo run --bin wallet_sync --features cli -- \
//!     --wallet my.wallet --password hunter2 --create --sync-seconds 60
//!
//! # Restore from keys, starting at a known height, and stop once synced
//! cargo run --bin wallet_sync --features cli -- \
//!     --wallet my.wallet --password hunter2 --create \
//!     --spend-key <hex> --view-key <hex> --scan-height 1200000 --exit-when-synced
//!
//! # Resume an existing wallet against a custom daemon
//! cargo run --bin wallet_sync --features cli -- \
//!     --wallet my.wallet --password hunter2 --daemon http://192.168.1.100:11898
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lightweight_wallet_sync::data_structures::SecretKey;
use lightweight_wallet_sync::events::listeners::LoggingListener;
use lightweight_wallet_sync::scanning::HttpDaemon;
use lightweight_wallet_sync::{SyncConfig, WalletBackend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Encrypted wallet file
    #[arg(short, long)]
    wallet: PathBuf,

    /// Wallet file password
    #[arg(short, long)]
    password: String,

    /// Daemon base URL
    #[arg(short, long, default_value = "http://127.0.0.1:11898")]
    daemon: String,

    /// Engine configuration as a JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Create the wallet file instead of opening it
    #[arg(long)]
    create: bool,

    /// Private spend key (hex) to restore from, used with --create
    #[arg(long, requires = "view_key")]
    spend_key: Option<String>,

    /// Private view key (hex) to restore from, used with --create
    #[arg(long, requires = "spend_key")]
    view_key: Option<String>,

    /// Height to start scanning from when restoring
    #[arg(long, default_value = "0")]
    scan_height: u64,

    /// Stop after this many seconds
    #[arg(long, default_value = "60")]
    sync_seconds: u64,

    /// Stop as soon as the wallet reaches the network height
    #[arg(long)]
    exit_when_synced: bool,
}

fn parse_key(hex_key: &str, name: &str) -> Result<SecretKey, String> {
    SecretKey::from_hex(hex_key).map_err(|e| format!("invalid {name}: {e}"))
}

fn build_wallet(args: &CliArgs, config: SyncConfig) -> Result<WalletBackend, Box<dyn std::error::Error>> {
    let daemon = Arc::new(HttpDaemon::new(&args.daemon)?);
    let builder = WalletBackend::builder()
        .with_daemon(daemon)
        .with_config(config)
        .with_event_listener(Box::new(LoggingListener::new()));

    let builder = if !args.create {
        builder.from_file(&args.wallet, &args.password)
    } else if let (Some(spend), Some(view)) = (&args.spend_key, &args.view_key) {
        builder.from_keys(
            parse_key(spend, "spend key")?,
            parse_key(view, "view key")?,
            args.scan_height,
        )
    } else {
        builder.generate_new()
    };

    Ok(builder.build()?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    if args.create && args.wallet.exists() {
        return Err(format!("{} already exists", args.wallet.display()).into());
    }

    let config = match &args.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };

    let wallet = build_wallet(&args, config)?;
    info!(address = %wallet.primary_address(), "Wallet loaded");
    if args.create {
        wallet.save(&args.wallet, &args.password)?;
    }

    wallet.start()?;
    let deadline = Instant::now() + Duration::from_secs(args.sync_seconds);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));

        if let Some(e) = wallet.take_sync_error() {
            error!(error = %e, "Sync stopped");
            break;
        }

        let heights = wallet.sync_heights();
        if args.exit_when_synced
            && heights.network_height > 0
            && heights.wallet_height >= heights.network_height
        {
            info!(height = heights.wallet_height, "Synced, exiting");
            break;
        }
    }
    wallet.stop();

    let heights = wallet.sync_heights();
    match wallet.balance() {
        Ok((unlocked, locked)) => info!(
            wallet_height = heights.wallet_height,
            network_height = heights.network_height,
            unlocked,
            locked,
            "Final wallet status"
        ),
        Err(e) => warn!(error = %e, "Could not compute balance"),
    }

    wallet.save(&args.wallet, &args.password)?;
    info!(path = %args.wallet.display(), "Wallet saved");
    Ok(())
}
