//! Satellion Core: wallet session and transaction-flow orchestration
//!
//! Client-resident state machines for a Bitcoin + Ethereum wallet whose key
//! handling, signing and chain sync live in a separate backend process.
//!
//! # Architecture
//!
//! - **Gateway**: typed async commands to the backend, tagged ok/error results
//! - **Event Bus**: unordered backend events decoded at the edge
//! - **Session Manager**: lock/unlock lifecycle, resets session-scoped stores
//! - **Stores and flows**: chain sync, balances, address derivation,
//!   mnemonic creation, two-phase transfers
//!
//! # Example
//!
//! ```ignore
//! use satellion_core::{ClientConfig, WalletClient};
//!
//! let mut client = WalletClient::connect(ClientConfig::from_env()?)?;
//! client.start();
//!
//! client.session().list_wallets().await?;
//! client.session().set_passphrase("correct horse battery staple");
//! client.session().unlock().await?;
//!
//! client.balances().refresh().await?;
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

// Public modules
pub mod amount;
pub mod balance;
pub mod client;
pub mod config;
pub mod derivation;
pub mod error;
pub mod events;
pub mod gateway;
pub mod mnemonic;
pub mod navigation;
pub mod notifier;
pub mod session;
pub mod sync;
pub mod transfer;
pub mod types;

// Re-exports for convenience
pub use amount::{display_sat, sat_to_btc, sat_to_usd, Amount, AmountError};
pub use balance::BalanceTracker;
pub use client::WalletClient;
pub use config::ClientConfig;
pub use derivation::AddressDerivationFlow;
pub use error::ClientError;
pub use events::{BackendEvent, EventBus, Subscription};
pub use gateway::{Backend, CommandError, CommandResult, ExpiryAwareBackend, RemoteBackend};
pub use mnemonic::{FlowKind, MnemonicFlow, Stage};
pub use navigation::{Navigator, Route};
pub use notifier::{Level, Notification, Notifier};
pub use session::{SessionEpoch, SessionManager, SessionScoped, WalletSession};
pub use sync::{ChainPoller, ChainSyncReducer, ChainSyncState, SyncStatus};
pub use transfer::{TransferFlow, TransferStage};
pub use types::*;

/// Result type for wallet client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Store state is plain data, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
