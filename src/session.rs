//! Locked/unlocked session lifecycle
//!
//! [`SessionManager`] owns wallet enumeration and the single active
//! [`WalletSession`]. Every lock or unlock advances the shared
//! [`SessionEpoch`], and every store registered as [`SessionScoped`] is reset
//! before navigation happens, so no view ever shows a previous wallet's data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::error::ClientError;
use crate::gateway::{Backend, CommandError};
use crate::lock;
use crate::navigation::{Navigator, Route};
use crate::notifier::Notifier;
use crate::types::{AvailableWallet, Chain, ChainAddresses, WalletId};
use crate::Result;

/// Monotonic session counter shared by every store.
///
/// Async operations capture it before awaiting and discard their result
/// when it moved.
#[derive(Clone, Default)]
pub struct SessionEpoch(Arc<AtomicU64>);

impl SessionEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }
}

/// State that belongs to one unlocked session and must not outlive it
pub trait SessionScoped: Send + Sync {
    fn scope_name(&self) -> &'static str;

    /// Return to the freshly constructed state. Must not block or await.
    fn reset(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSession {
    pub wallet_id: WalletId,
    pub wallet_name: String,
    pub addresses: ChainAddresses,
    pub last_used_chain: Chain,
    pub unlocked: bool,
}

#[derive(Default)]
struct State {
    wallets: Vec<AvailableWallet>,
    pending: Option<WalletId>,
    passphrase: Zeroizing<String>,
    session: Option<WalletSession>,
}

#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    navigator: Navigator,
    epoch: SessionEpoch,
    state: Arc<Mutex<State>>,
    dependents: Arc<Mutex<Vec<Arc<dyn SessionScoped>>>>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        notifier: Notifier,
        navigator: Navigator,
        epoch: SessionEpoch,
    ) -> Self {
        Self {
            backend,
            notifier,
            navigator,
            epoch,
            state: Arc::new(Mutex::new(State::default())),
            dependents: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a store to be reset on every session boundary
    pub fn register(&self, store: Arc<dyn SessionScoped>) {
        log::debug!("Registered session-scoped store '{}'", store.scope_name());
        lock(&self.dependents).push(store);
    }

    pub fn epoch(&self) -> &SessionEpoch {
        &self.epoch
    }

    // ========================================================================
    // Wallet enumeration
    // ========================================================================

    /// Fetch the wallet list; a single wallet becomes the unlock candidate
    pub async fn list_wallets(&self) -> Result<Vec<AvailableWallet>> {
        let wallets = match self.backend.list_wallets().await.into_result() {
            Ok(wallets) => wallets,
            Err(e) => {
                self.notifier.err(format!("Failed to load wallets: {}", e));
                return Err(e.into());
            }
        };

        log::info!("Found {} wallet(s)", wallets.len());
        {
            let mut state = lock(&self.state);
            state.wallets = wallets.clone();
            if state.pending.is_some_and(|id| !wallets.iter().any(|w| w.id == id)) {
                state.pending = None;
            }
            if let [only] = wallets.as_slice() {
                state.pending = Some(only.id);
            }
        }

        if wallets.is_empty() {
            self.navigator.go(Route::CreateWallet);
        }
        Ok(wallets)
    }

    pub fn wallets(&self) -> Vec<AvailableWallet> {
        lock(&self.state).wallets.clone()
    }

    pub fn select_pending(&self, wallet_id: WalletId) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.wallets.iter().any(|w| w.id == wallet_id) {
            return Err(ClientError::validation(format!("Unknown wallet {}", wallet_id)));
        }
        if state.pending != Some(wallet_id) {
            state.passphrase = Zeroizing::new(String::new());
        }
        state.pending = Some(wallet_id);
        Ok(())
    }

    pub fn pending(&self) -> Option<WalletId> {
        lock(&self.state).pending
    }

    pub fn set_passphrase(&self, passphrase: impl Into<String>) {
        lock(&self.state).passphrase = Zeroizing::new(passphrase.into());
    }

    pub fn has_passphrase(&self) -> bool {
        !lock(&self.state).passphrase.is_empty()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Unlock the pending wallet with the entered passphrase
    pub async fn unlock(&self) -> Result<WalletSession> {
        let (wallet_id, wallet_name, passphrase) = {
            let state = lock(&self.state);
            let wallet_id = state
                .pending
                .ok_or_else(|| ClientError::validation("No wallet selected"))?;
            if state.passphrase.is_empty() {
                return Err(ClientError::validation("Passphrase is empty"));
            }
            let name = state
                .wallets
                .iter()
                .find(|w| w.id == wallet_id)
                .map(|w| w.name.clone())
                .unwrap_or_default();
            (wallet_id, name, state.passphrase.clone())
        };

        let started = self.epoch.current();
        log::info!("Unlocking wallet {}", wallet_id);
        let result = self.backend.unlock_wallet(wallet_id, &passphrase).await;
        drop(passphrase);

        if !self.epoch.is_current(started) {
            return Err(ClientError::stale("unlock"));
        }

        let response = match result.into_result() {
            Ok(response) => response,
            Err(CommandError::InvalidPassphrase(msg)) => {
                log::warn!("Unlock rejected: {}", msg);
                lock(&self.state).passphrase = Zeroizing::new(String::new());
                return Err(ClientError::InvalidPassphrase);
            }
            Err(e) => {
                self.notifier.err(format!("Failed to unlock wallet: {}", e));
                return Err(e.into());
            }
        };

        let last_used_chain = response.last_used_chain.unwrap_or(Chain::Bitcoin);
        let session = WalletSession {
            wallet_id,
            wallet_name,
            addresses: response.addresses,
            last_used_chain,
            unlocked: true,
        };

        self.epoch.advance();
        self.reset_dependents();
        {
            let mut state = lock(&self.state);
            state.session = Some(session.clone());
            state.passphrase = Zeroizing::new(String::new());
        }
        log::info!("Wallet {} unlocked", wallet_id);
        self.navigator.go(Route::from(last_used_chain));
        Ok(session)
    }

    /// Discard the session and every store derived from it. Idempotent.
    pub fn lock(&self) {
        let had_session = {
            let mut state = lock(&self.state);
            state.passphrase = Zeroizing::new(String::new());
            state.session.take().is_some()
        };
        self.epoch.advance();
        self.reset_dependents();
        if had_session {
            log::info!("Wallet locked");
        }
        self.navigator.go(Route::Unlock);
    }

    /// Delete the wallet on the backend; on success behaves like `lock`
    pub async fn forget(&self, wallet_id: WalletId) -> Result<()> {
        if let Err(e) = self.backend.forget_wallet(wallet_id).await.into_result() {
            self.notifier.err(format!("Failed to forget wallet: {}", e));
            return Err(e.into());
        }

        log::info!("Wallet {} forgotten", wallet_id);
        let now_empty = {
            let mut state = lock(&self.state);
            state.wallets.retain(|w| w.id != wallet_id);
            if state.pending == Some(wallet_id) {
                state.pending = None;
            }
            state.wallets.is_empty()
        };
        self.lock();
        if now_empty {
            self.navigator.go(Route::CreateWallet);
        }
        Ok(())
    }

    /// Backend reported the session gone: lock regardless of the current route.
    /// Nothing to do while already locked.
    pub fn handle_session_expired(&self) {
        if !self.is_unlocked() {
            log::debug!("Session expiry reported while locked, ignored");
            return;
        }
        self.notifier.err("Session expired, please unlock again");
        self.lock();
    }

    pub fn session(&self) -> Option<WalletSession> {
        lock(&self.state).session.clone()
    }

    pub fn is_unlocked(&self) -> bool {
        lock(&self.state).session.as_ref().is_some_and(|s| s.unlocked)
    }

    /// Record the chain the user is looking at
    pub fn set_active_chain(&self, chain: Chain) -> Result<()> {
        let mut state = lock(&self.state);
        let session = state.session.as_mut().ok_or(ClientError::NotUnlocked)?;
        session.last_used_chain = chain;
        drop(state);
        self.navigator.go(Route::from(chain));
        Ok(())
    }

    fn reset_dependents(&self) {
        let dependents = lock(&self.dependents).clone();
        for store in dependents {
            log::debug!("Resetting '{}'", store.scope_name());
            store.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_advances() {
        let epoch = SessionEpoch::new();
        let start = epoch.current();
        let shared = epoch.clone();
        assert_eq!(shared.advance(), start + 1);
        assert!(!epoch.is_current(start));
        assert!(epoch.is_current(start + 1));
    }
}
