//! Two-phase token transfer: prepare (fee estimate), then sign and send
//!
//! Any input change after a prepare invalidates the snapshot, and an
//! in-flight prepare whose inputs changed is discarded on completion. Once a
//! transaction hash is stored the flow is frozen until [`TransferFlow::restart`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::amount::Amount;
use crate::balance::BalanceTracker;
use crate::error::ClientError;
use crate::gateway::{Backend, CommandError, CommandResult};
use crate::lock;
use crate::notifier::Notifier;
use crate::session::{SessionEpoch, SessionScoped};
use crate::types::{
    looks_like_eth_address, FeeMode, PrepareTxRequest, PreparedTransfer, NATIVE_TOKEN_ADDRESS,
};
use crate::Result;

const DEFAULT_TOKEN_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStage {
    Empty,
    AddressEntered,
    AddressVerified,
    Ready,
    Prepared,
    Sent,
    PrepareFailed,
}

#[derive(Default)]
struct State {
    address: String,
    /// `None` while unchecked or pending
    address_valid: Option<bool>,
    address_generation: u64,
    token_address: Option<String>,
    amount: String,
    fee_mode: FeeMode,
    prepared: Option<PreparedTransfer>,
    prepared_request: Option<PrepareTxRequest>,
    prepare_failed: bool,
    estimating: bool,
    sending: bool,
    tx_hash: Option<String>,
    /// Bumped on every input change
    input_generation: u64,
    prepare_generation: u64,
}

impl State {
    fn ensure_editable(&self) -> Result<()> {
        if self.tx_hash.is_some() {
            return Err(ClientError::validation("Transfer already sent, restart to make a new one"));
        }
        if self.sending {
            return Err(ClientError::validation("Transfer is being sent"));
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.input_generation += 1;
        if self.prepared.take().is_some() {
            log::debug!("Transfer inputs changed, fee estimate dropped");
        }
        self.prepared_request = None;
        self.prepare_failed = false;
    }
}

#[derive(Clone)]
pub struct TransferFlow {
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    epoch: SessionEpoch,
    balances: BalanceTracker,
    debounce: Duration,
    state: Arc<Mutex<State>>,
}

impl TransferFlow {
    pub fn new(
        backend: Arc<dyn Backend>,
        notifier: Notifier,
        epoch: SessionEpoch,
        balances: BalanceTracker,
        debounce: Duration,
    ) -> Self {
        Self {
            backend,
            notifier,
            epoch,
            balances,
            debounce,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Set the recipient and validate it after the debounce period.
    ///
    /// A newer call supersedes this one, which then returns `StaleResultDiscarded`.
    pub async fn verify_address(&self, address: &str) -> Result<bool> {
        let address = address.trim().to_string();
        let generation = {
            let mut state = lock(&self.state);
            state.ensure_editable()?;
            state.address = address.clone();
            state.address_valid = None;
            state.address_generation += 1;
            state.invalidate();
            state.address_generation
        };

        if address.is_empty() {
            return Ok(false);
        }
        if !looks_like_eth_address(&address) {
            lock(&self.state).address_valid = Some(false);
            return Ok(false);
        }

        tokio::time::sleep(self.debounce).await;
        let epoch = self.epoch.current();
        if lock(&self.state).address_generation != generation {
            return Err(ClientError::stale("address validation"));
        }

        let result = self.backend.eth_verify_address(&address).await;

        let mut state = lock(&self.state);
        if state.address_generation != generation || !self.epoch.is_current(epoch) {
            return Err(ClientError::stale("address validation"));
        }
        let valid = match result.into_result() {
            Ok(valid) => valid,
            Err(CommandError::Transport(msg)) => {
                state.address_valid = Some(false);
                drop(state);
                self.notifier.err(format!("Failed to validate address: {}", msg));
                return Ok(false);
            }
            Err(e) => {
                log::debug!("Address rejected: {}", e);
                false
            }
        };
        state.address_valid = Some(valid);
        Ok(valid)
    }

    pub fn set_token(&self, token_address: Option<String>) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_editable()?;
        if state.token_address != token_address {
            state.token_address = token_address;
            state.invalidate();
        }
        Ok(())
    }

    pub fn set_amount(&self, amount: impl Into<String>) -> Result<()> {
        let amount = amount.into();
        let mut state = lock(&self.state);
        state.ensure_editable()?;
        if state.amount != amount {
            state.amount = amount;
            state.invalidate();
        }
        Ok(())
    }

    pub fn set_fee_mode(&self, fee_mode: FeeMode) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_editable()?;
        if state.fee_mode != fee_mode {
            state.fee_mode = fee_mode;
            state.invalidate();
        }
        Ok(())
    }

    /// True while any of address, its validity, a nonzero amount or a token is missing
    pub fn disabled(&self) -> bool {
        let state = lock(&self.state);
        let Some(token) = state.token_address.as_deref() else {
            return true;
        };
        state.address.is_empty()
            || state.address_valid != Some(true)
            || !self.parse_amount(token, &state.amount).is_ok_and(|a| !a.is_zero())
    }

    // ========================================================================
    // Prepare / send
    // ========================================================================

    pub async fn prepare(&self) -> Result<PreparedTransfer> {
        let (request, input_generation, prepare_generation) = {
            let mut state = lock(&self.state);
            state.ensure_editable()?;

            match state.address_valid {
                _ if state.address.is_empty() => {
                    return Err(ClientError::validation("Recipient is not set"))
                }
                None => return Err(ClientError::validation("Recipient is still being validated")),
                Some(false) => return Err(ClientError::validation("Recipient address is invalid")),
                Some(true) => {}
            }
            let token = state
                .token_address
                .clone()
                .ok_or_else(|| ClientError::validation("Token is not selected"))?;
            let amount = self.parse_amount(&token, &state.amount)?;
            if amount.is_zero() {
                return Err(ClientError::validation("Amount must be greater than zero"));
            }
            if let Some(available) = self.balances.available(&token) {
                if amount.decimals() == available.decimals() && amount.raw() > available.raw() {
                    return Err(ClientError::validation("Amount exceeds balance"));
                }
            }

            let request = PrepareTxRequest {
                recipient: state.address.clone(),
                amount: amount.to_string(),
                token_address: token,
                fee_mode: state.fee_mode,
            };
            state.prepared = None;
            state.prepared_request = None;
            state.prepare_failed = false;
            state.estimating = true;
            state.prepare_generation += 1;
            (request, state.input_generation, state.prepare_generation)
        };

        let epoch = self.epoch.current();
        log::debug!("Preparing transfer ({:?} fee)", request.fee_mode);
        let result = self.backend.eth_prepare_send_tx(&request).await;

        let mut state = lock(&self.state);
        if state.prepare_generation != prepare_generation || !self.epoch.is_current(epoch) {
            return Err(ClientError::stale("prepare"));
        }
        state.estimating = false;
        if state.input_generation != input_generation {
            return Err(ClientError::stale("prepare"));
        }

        match result.into_result() {
            Ok(prepared) => {
                state.prepared = Some(prepared.clone());
                state.prepared_request = Some(request);
                Ok(prepared)
            }
            Err(e) => {
                state.prepare_failed = true;
                drop(state);
                self.notifier.err(format!("Failed to estimate fee: {}", e));
                Err(e.into())
            }
        }
    }

    /// Sign and broadcast the prepared transaction. Requires a current snapshot.
    pub async fn sign_and_send(&self) -> Result<String> {
        {
            let mut state = lock(&self.state);
            if state.tx_hash.is_some() {
                return Err(ClientError::validation("Transfer already sent"));
            }
            if state.sending {
                return Err(ClientError::validation("Transfer is being sent"));
            }
            if state.prepared.is_none() {
                return Err(ClientError::validation("Transaction must be prepared first"));
            }
            state.sending = true;
        }

        let epoch = self.epoch.current();
        let result = self.backend.eth_sign_and_send_tx().await;

        let mut state = lock(&self.state);
        if !self.epoch.is_current(epoch) {
            if let CommandResult::Ok { data } = &result {
                log::warn!("Transaction {} completed after the session ended", data);
            }
            return Err(ClientError::stale("sign and send"));
        }
        state.sending = false;

        match result.into_result() {
            Ok(hash) => {
                state.tx_hash = Some(hash.clone());
                drop(state);
                log::info!("Transaction sent: {}", hash);
                self.notifier.ok("Transaction sent");
                Ok(hash)
            }
            Err(e) => {
                state.prepared = None;
                state.prepared_request = None;
                drop(state);
                self.notifier.err(format!("Failed to send transaction: {}", e));
                Err(e.into())
            }
        }
    }

    /// Begin a fresh transfer
    pub fn restart(&self) {
        let mut state = lock(&self.state);
        *state = State {
            address_generation: state.address_generation + 1,
            input_generation: state.input_generation + 1,
            prepare_generation: state.prepare_generation + 1,
            ..State::default()
        };
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn stage(&self) -> TransferStage {
        let state = lock(&self.state);
        if state.tx_hash.is_some() {
            TransferStage::Sent
        } else if state.prepared.is_some() {
            TransferStage::Prepared
        } else if state.prepare_failed {
            TransferStage::PrepareFailed
        } else if state.address.is_empty() {
            TransferStage::Empty
        } else if state.address_valid != Some(true) {
            TransferStage::AddressEntered
        } else if state
            .token_address
            .as_deref()
            .is_some_and(|t| self.parse_amount(t, &state.amount).is_ok_and(|a| !a.is_zero()))
        {
            TransferStage::Ready
        } else {
            TransferStage::AddressVerified
        }
    }

    pub fn address(&self) -> String {
        lock(&self.state).address.clone()
    }

    pub fn address_valid(&self) -> Option<bool> {
        lock(&self.state).address_valid
    }

    pub fn token(&self) -> Option<String> {
        lock(&self.state).token_address.clone()
    }

    pub fn amount(&self) -> String {
        lock(&self.state).amount.clone()
    }

    pub fn fee_mode(&self) -> FeeMode {
        lock(&self.state).fee_mode
    }

    pub fn prepared(&self) -> Option<PreparedTransfer> {
        lock(&self.state).prepared.clone()
    }

    pub fn prepared_request(&self) -> Option<PrepareTxRequest> {
        lock(&self.state).prepared_request.clone()
    }

    pub fn prepare_failed(&self) -> bool {
        lock(&self.state).prepare_failed
    }

    pub fn is_estimating(&self) -> bool {
        lock(&self.state).estimating
    }

    pub fn is_sending(&self) -> bool {
        lock(&self.state).sending
    }

    pub fn tx_hash(&self) -> Option<String> {
        lock(&self.state).tx_hash.clone()
    }

    fn parse_amount(&self, token: &str, amount: &str) -> Result<Amount> {
        let decimals = if token.eq_ignore_ascii_case(NATIVE_TOKEN_ADDRESS) {
            DEFAULT_TOKEN_DECIMALS
        } else {
            self.balances
                .token(token)
                .map(|t| t.decimals)
                .unwrap_or(DEFAULT_TOKEN_DECIMALS)
        };
        Ok(Amount::parse_decimal(amount, decimals)?)
    }
}

impl SessionScoped for TransferFlow {
    fn scope_name(&self) -> &'static str {
        "transfer"
    }

    fn reset(&self) {
        self.restart();
    }
}
