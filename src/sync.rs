//! Per-chain sync state reduced from backend events
//!
//! Updates replace fields, they never accumulate, so redelivered or
//! reordered events converge on the same state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::amount::{display_sat, Amount};
use crate::error::ClientError;
use crate::events::BackendEvent;
use crate::gateway::{Backend, CommandError};
use crate::lock;
use crate::notifier::Notifier;
use crate::session::{SessionEpoch, SessionScoped};
use crate::types::{Chain, ChainInfo};
use crate::Result;

const WEI_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Unsynced,
    Syncing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainSyncState {
    pub height: Option<u64>,
    /// Percent in `[0, 100]`
    pub progress: f32,
    pub status: SyncStatus,
    pub warning: Option<String>,
    /// Smallest unit (sat / wei)
    pub total_balance: u128,
}

#[derive(Clone)]
pub struct ChainSyncReducer {
    chains: Arc<Mutex<HashMap<Chain, ChainSyncState>>>,
    notifier: Notifier,
}

impl ChainSyncReducer {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            chains: Arc::new(Mutex::new(HashMap::new())),
            notifier,
        }
    }

    pub fn state(&self, chain: Chain) -> ChainSyncState {
        lock(&self.chains).get(&chain).cloned().unwrap_or_default()
    }

    /// Apply one decoded event; non-chain events are ignored
    pub fn apply(&self, event: &BackendEvent) -> Result<()> {
        match event {
            BackendEvent::HeightUpdate { chain, height, status } => {
                self.height_update(*chain, *height, *status);
                Ok(())
            }
            BackendEvent::ProgressUpdate { chain, progress } => {
                self.progress_update(*chain, *progress)
            }
            BackendEvent::Warning { chain, msg } => {
                self.warning(*chain, msg.clone());
                Ok(())
            }
            BackendEvent::NewUtxo { chain, total, value } => {
                self.new_utxo(*chain, *total, *value);
                Ok(())
            }
            BackendEvent::SessionExpired => Ok(()),
        }
    }

    /// Apply events in delivery order; the first invalid one is logged and skipped
    pub fn apply_burst(&self, events: &[BackendEvent]) {
        for event in events {
            if let Err(e) = self.apply(event) {
                log::warn!("Skipping sync event {:?}: {}", event, e);
            }
        }
    }

    /// Last update wins, including a lower height reported by a rescan
    pub fn height_update(&self, chain: Chain, height: u64, status: SyncStatus) {
        let mut chains = lock(&self.chains);
        let state = chains.entry(chain).or_default();
        if state.height.is_some_and(|current| height < current) {
            log::debug!("{} height moved back from {:?} to {}", chain, state.height, height);
        }
        state.height = Some(height);
        state.status = status;
        state.warning = None;
    }

    pub fn progress_update(&self, chain: Chain, progress: f32) -> Result<()> {
        if !progress.is_finite() || !(0.0..=100.0).contains(&progress) {
            return Err(ClientError::validation(format!("progress {} out of range", progress)));
        }
        let mut chains = lock(&self.chains);
        let state = chains.entry(chain).or_default();
        state.progress = progress;
        state.warning = None;
        if state.status == SyncStatus::Unsynced {
            state.status = SyncStatus::Syncing;
        }
        Ok(())
    }

    pub fn warning(&self, chain: Chain, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("{} sync warning: {}", chain, msg);
        lock(&self.chains).entry(chain).or_default().warning = Some(msg);
    }

    /// Replace the chain total with the backend's figure and announce the new output
    pub fn new_utxo(&self, chain: Chain, total: u128, value: u128) {
        lock(&self.chains).entry(chain).or_default().total_balance = total;

        let shown = match (chain, u64::try_from(value)) {
            (Chain::Bitcoin, Ok(sats)) => display_sat(bitcoin::Amount::from_sat(sats)),
            (Chain::Ethereum, _) => format!("{} ETH", Amount::new(value, WEI_DECIMALS)),
            (Chain::Bitcoin, Err(_)) => format!("{} sat", value),
        };
        self.notifier.ok(format!("Received {}", shown));
    }
}

impl SessionScoped for ChainSyncReducer {
    fn scope_name(&self) -> &'static str {
        "chain_sync"
    }

    fn reset(&self) {
        lock(&self.chains).clear();
    }
}

/// Periodic `eth_chain_info` poll feeding the Ethereum sync state
pub struct ChainPoller {
    handle: Option<JoinHandle<()>>,
    latest: Arc<Mutex<Option<ChainInfo>>>,
}

impl ChainPoller {
    /// `is_active` gates each tick, e.g. only poll while unlocked
    pub fn start<F>(
        backend: Arc<dyn Backend>,
        reducer: ChainSyncReducer,
        epoch: SessionEpoch,
        interval: Duration,
        is_active: F,
    ) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let latest = Arc::new(Mutex::new(None));
        let latest_in_task = latest.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !is_active() {
                    continue;
                }
                let started = epoch.current();
                let result = backend.eth_chain_info().await;
                if !epoch.is_current(started) {
                    log::debug!("Dropping chain info from a previous session");
                    continue;
                }
                match result.into_result() {
                    Ok(info) => match info.height() {
                        Some(height) => {
                            reducer.height_update(Chain::Ethereum, height, SyncStatus::Completed);
                            *lock(&latest_in_task) = Some(info);
                        }
                        None => reducer.warning(
                            Chain::Ethereum,
                            format!("Malformed block number '{}'", info.block_number),
                        ),
                    },
                    Err(CommandError::SessionExpired(_)) => {
                        log::debug!("Chain info poll hit an expired session");
                    }
                    Err(e) => reducer.warning(Chain::Ethereum, e.message()),
                }
            }
        });

        Self {
            handle: Some(handle),
            latest,
        }
    }

    pub fn latest(&self) -> Option<ChainInfo> {
        lock(&self.latest).clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            log::debug!("Chain poller stopped");
        }
    }
}

impl Drop for ChainPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
