//! Bitcoin child-address derivation flow
//!
//! The backend is the only authority on which indices are free. The client
//! keeps a session-local list of what it derived so the UI can show new
//! addresses before the next authoritative listing.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bitcoin::address::NetworkUnchecked;
use bitcoin::Address;

use crate::amount::display_sat;
use crate::error::ClientError;
use crate::gateway::{Backend, CommandError};
use crate::lock;
use crate::notifier::Notifier;
use crate::session::{SessionEpoch, SessionScoped};
use crate::types::{DerivedAddress, Utxo};
use crate::Result;

#[derive(Default)]
struct State {
    dialog_open: bool,
    label: String,
    index: Option<u32>,
    next_index: Option<u32>,
    next_index_generation: u64,
    /// Last authoritative listing
    listed: Vec<DerivedAddress>,
    /// Derived in this session, not yet seen in a listing
    optimistic: Vec<DerivedAddress>,
    utxos: Vec<Utxo>,
}

#[derive(Clone)]
pub struct AddressDerivationFlow {
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    epoch: SessionEpoch,
    state: Arc<Mutex<State>>,
}

impl AddressDerivationFlow {
    pub fn new(backend: Arc<dyn Backend>, notifier: Notifier, epoch: SessionEpoch) -> Self {
        Self {
            backend,
            notifier,
            epoch,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    // ========================================================================
    // Dialog
    // ========================================================================

    pub async fn open_dialog(&self) -> Result<u32> {
        lock(&self.state).dialog_open = true;
        self.request_next_index().await
    }

    pub fn close_dialog(&self) {
        let mut state = lock(&self.state);
        state.dialog_open = false;
        state.label.clear();
        state.index = None;
    }

    pub fn is_dialog_open(&self) -> bool {
        lock(&self.state).dialog_open
    }

    /// Ask the backend for the lowest free index. Never served from cache.
    pub async fn request_next_index(&self) -> Result<u32> {
        let epoch = self.epoch.current();
        let generation = {
            let mut state = lock(&self.state);
            state.next_index_generation += 1;
            state.next_index_generation
        };

        let result = self.backend.btc_unoccupied_derivation_index().await;

        let mut state = lock(&self.state);
        if !self.epoch.is_current(epoch) || state.next_index_generation != generation {
            return Err(ClientError::stale("next derivation index"));
        }
        match result.into_result() {
            Ok(index) => {
                state.next_index = Some(index);
                if state.index.is_none() {
                    state.index = Some(index);
                }
                Ok(index)
            }
            Err(e) => {
                drop(state);
                self.notifier.err(format!("Failed to get a free index: {}", e));
                Err(e.into())
            }
        }
    }

    pub fn set_label(&self, label: impl Into<String>) {
        lock(&self.state).label = label.into();
    }

    pub fn set_index(&self, index: Option<u32>) {
        lock(&self.state).index = index;
    }

    pub fn label(&self) -> String {
        lock(&self.state).label.clone()
    }

    pub fn index(&self) -> Option<u32> {
        lock(&self.state).index
    }

    pub fn next_index(&self) -> Option<u32> {
        lock(&self.state).next_index
    }

    /// Derive with the label and index entered in the dialog
    pub async fn submit(&self) -> Result<DerivedAddress> {
        let (label, index) = {
            let state = lock(&self.state);
            (state.label.clone(), state.index)
        };
        let index = index.ok_or_else(|| ClientError::validation("Index is not set"))?;
        let derived = self.derive(&label, index).await?;
        self.close_dialog();
        Ok(derived)
    }

    // ========================================================================
    // Derivation
    // ========================================================================

    pub async fn derive(&self, label: &str, index: u32) -> Result<DerivedAddress> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ClientError::validation("Label is not set"));
        }
        if index == 0 {
            return Err(ClientError::validation("Index must be at least 1"));
        }
        if self.is_known_index(index) {
            return Err(ClientError::IndexOccupied {
                index,
                reason: "already derived in this session".to_string(),
            });
        }

        let epoch = self.epoch.current();
        let result = self.backend.btc_derive_address(label, index).await;
        if !self.epoch.is_current(epoch) {
            return Err(ClientError::stale("derive"));
        }

        let derived = match result.into_result() {
            Ok(derived) => derived,
            Err(CommandError::IndexOccupied(reason)) => {
                self.notifier.err(format!("Index {} is occupied", index));
                return Err(ClientError::IndexOccupied { index, reason });
            }
            Err(e) => {
                self.notifier.err(format!("Failed to derive address: {}", e));
                return Err(e.into());
            }
        };

        if Address::<NetworkUnchecked>::from_str(&derived.address).is_err() {
            log::warn!("Backend derived an unparseable address at index {}", index);
        }
        if derived.index != index {
            log::warn!("Requested index {} but backend derived {}", index, derived.index);
        }

        {
            let mut state = lock(&self.state);
            if !state.optimistic.iter().any(|a| a.index == derived.index) {
                state.optimistic.push(derived.clone());
            }
            state.next_index = None;
        }
        log::info!("Derived '{}' at index {}", derived.label, derived.index);
        self.notifier.ok(format!("Address '{}' derived", derived.label));
        Ok(derived)
    }

    /// Authoritative listing; replaces the local view
    pub async fn list_derived_addresses(&self) -> Result<Vec<DerivedAddress>> {
        let epoch = self.epoch.current();
        let result = self.backend.btc_list_derived_addresses().await;
        if !self.epoch.is_current(epoch) {
            return Err(ClientError::stale("list derived addresses"));
        }
        match result.into_result() {
            Ok(mut listed) => {
                listed.sort_by_key(|a| a.index);
                let mut state = lock(&self.state);
                state
                    .optimistic
                    .retain(|a| !listed.iter().any(|l| l.index == a.index));
                state.listed = listed.clone();
                Ok(listed)
            }
            Err(e) => {
                self.notifier.err(format!("Failed to list addresses: {}", e));
                Err(e.into())
            }
        }
    }

    /// Listed addresses merged with the ones derived since, ordered by index
    pub fn derived_addresses(&self) -> Vec<DerivedAddress> {
        let state = lock(&self.state);
        let mut all: Vec<DerivedAddress> = state
            .listed
            .iter()
            .chain(state.optimistic.iter())
            .cloned()
            .collect();
        all.sort_by_key(|a| a.index);
        all.dedup_by_key(|a| a.index);
        all
    }

    // ========================================================================
    // UTXOs
    // ========================================================================

    pub async fn list_utxos(&self) -> Result<Vec<Utxo>> {
        let epoch = self.epoch.current();
        let result = self.backend.btc_list_utxos().await;
        if !self.epoch.is_current(epoch) {
            return Err(ClientError::stale("list utxos"));
        }
        match result.into_result() {
            Ok(utxos) => {
                lock(&self.state).utxos = utxos.clone();
                Ok(utxos)
            }
            Err(e) => {
                self.notifier.err(format!("Failed to list UTXOs: {}", e));
                Err(e.into())
            }
        }
    }

    pub fn utxos(&self) -> Vec<Utxo> {
        lock(&self.state).utxos.clone()
    }

    pub fn utxo_total(&self) -> bitcoin::Amount {
        let sats = lock(&self.state)
            .utxos
            .iter()
            .fold(0u64, |acc, u| acc.saturating_add(u.value));
        bitcoin::Amount::from_sat(sats)
    }

    pub fn utxo_total_display(&self) -> String {
        display_sat(self.utxo_total())
    }

    fn is_known_index(&self, index: u32) -> bool {
        let state = lock(&self.state);
        state
            .listed
            .iter()
            .chain(state.optimistic.iter())
            .any(|a| a.index == index)
    }
}

impl SessionScoped for AddressDerivationFlow {
    fn scope_name(&self) -> &'static str {
        "address_derivation"
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        let generation = state.next_index_generation + 1;
        *state = State {
            next_index_generation: generation,
            ..State::default()
        };
    }
}
