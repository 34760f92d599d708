//! Ethereum balance and tracked-token store

use std::sync::{Arc, Mutex};

use crate::amount::Amount;
use crate::error::ClientError;
use crate::gateway::Backend;
use crate::lock;
use crate::notifier::Notifier;
use crate::session::{SessionEpoch, SessionScoped};
use crate::types::{
    looks_like_eth_address, ChainInfo, TokenBalance, TokenType, NATIVE_TOKEN_ADDRESS,
};
use crate::Result;

const NATIVE_SYMBOL: &str = "ETH";
const NATIVE_DECIMALS: u8 = 18;
const NATIVE_UI_PRECISION: u32 = 4;

#[derive(Default)]
struct State {
    tokens: Vec<TokenBalance>,
    native_price: Option<String>,
    chain_info: Option<ChainInfo>,
    loading: bool,
    /// Latest started refresh; older completions are dropped
    refresh_generation: u64,
}

#[derive(Clone)]
pub struct BalanceTracker {
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    epoch: SessionEpoch,
    state: Arc<Mutex<State>>,
}

impl BalanceTracker {
    pub fn new(backend: Arc<dyn Backend>, notifier: Notifier, epoch: SessionEpoch) -> Self {
        Self {
            backend,
            notifier,
            epoch,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Re-read balances; the list is replaced wholesale on success and kept on failure
    pub async fn refresh(&self) -> Result<Vec<TokenBalance>> {
        let epoch = self.epoch.current();
        let generation = {
            let mut state = lock(&self.state);
            state.loading = true;
            state.refresh_generation += 1;
            state.refresh_generation
        };

        let result = self.backend.eth_get_balance().await;

        let mut state = lock(&self.state);
        if !self.epoch.is_current(epoch) || state.refresh_generation != generation {
            log::debug!("Dropping superseded balance refresh");
            return Err(ClientError::stale("balance refresh"));
        }
        state.loading = false;

        match result.into_result() {
            Ok(balance) => {
                let mut tokens = Vec::with_capacity(balance.tokens.len() + 1);
                if !balance.tokens.iter().any(TokenBalance::is_native) {
                    tokens.push(TokenBalance {
                        symbol: NATIVE_SYMBOL.to_string(),
                        address: NATIVE_TOKEN_ADDRESS.to_string(),
                        balance: balance.wei.clone(),
                        decimals: NATIVE_DECIMALS,
                        ui_precision: NATIVE_UI_PRECISION,
                    });
                }
                for token in balance.tokens {
                    if tokens
                        .iter()
                        .any(|t: &TokenBalance| t.address.eq_ignore_ascii_case(&token.address))
                    {
                        log::warn!(
                            "Duplicate balance entry for {}, keeping the first",
                            token.address
                        );
                        continue;
                    }
                    tokens.push(token);
                }
                state.tokens = tokens.clone();
                state.native_price = balance.eth_price;
                log::debug!("Balances refreshed: {} asset(s)", tokens.len());
                Ok(tokens)
            }
            Err(e) => {
                drop(state);
                self.notifier.err(format!("Failed to load balances: {}", e));
                Err(e.into())
            }
        }
    }

    /// Ask the backend to track an ERC-20 contract. It shows up after the next refresh.
    pub async fn track(&self, contract: &str) -> Result<TokenType> {
        let contract = contract.trim();
        if !looks_like_eth_address(contract) {
            return Err(ClientError::validation(format!(
                "'{}' is not a contract address",
                contract
            )));
        }

        match self.backend.eth_track_token(contract).await.into_result() {
            Ok(token) => {
                log::info!("Tracking {} ({})", token.symbol, token.address);
                self.notifier.ok(format!("Token {} added", token.symbol));
                Ok(token)
            }
            Err(e) => {
                self.notifier.err(format!("Failed to add token: {}", e));
                Err(ClientError::InvalidToken(e.message().to_string()))
            }
        }
    }

    /// Stop tracking; the local entry goes only after the backend agrees
    pub async fn untrack(&self, contract: &str) -> Result<()> {
        if contract.eq_ignore_ascii_case(NATIVE_TOKEN_ADDRESS) {
            return Err(ClientError::validation("The native asset cannot be untracked"));
        }

        let epoch = self.epoch.current();
        let result = self.backend.eth_untrack_token(contract).await;
        if !self.epoch.is_current(epoch) {
            return Err(ClientError::stale("untrack"));
        }

        match result.into_result() {
            Ok(removed) => {
                if !removed {
                    log::debug!("Backend was not tracking {}", contract);
                }
                lock(&self.state)
                    .tokens
                    .retain(|t| !t.address.eq_ignore_ascii_case(contract));
                Ok(())
            }
            Err(e) => {
                self.notifier.err(format!("Failed to remove token: {}", e));
                Err(e.into())
            }
        }
    }

    pub async fn fetch_chain_info(&self) -> Result<ChainInfo> {
        let epoch = self.epoch.current();
        let result = self.backend.eth_chain_info().await;
        if !self.epoch.is_current(epoch) {
            return Err(ClientError::stale("chain info"));
        }
        match result.into_result() {
            Ok(info) => {
                lock(&self.state).chain_info = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                self.notifier.err(format!("Failed to load chain info: {}", e));
                Err(e.into())
            }
        }
    }

    /// Entries whose balance is still nonzero after rounding to `ui_precision`
    pub fn tokens_with_nonzero_balance(&self) -> Vec<TokenBalance> {
        lock(&self.state)
            .tokens
            .iter()
            .filter(|t| match t.amount() {
                Ok(amount) => !amount.round_to(t.ui_precision).is_zero(),
                Err(e) => {
                    log::warn!("Unreadable balance for {}: {}", t.symbol, e);
                    false
                }
            })
            .cloned()
            .collect()
    }

    pub fn tokens(&self) -> Vec<TokenBalance> {
        lock(&self.state).tokens.clone()
    }

    pub fn token(&self, address: &str) -> Option<TokenBalance> {
        lock(&self.state)
            .tokens
            .iter()
            .find(|t| t.address.eq_ignore_ascii_case(address))
            .cloned()
    }

    /// Spendable balance of `address`, if the token is known
    pub fn available(&self, address: &str) -> Option<Amount> {
        self.token(address).and_then(|t| t.amount().ok())
    }

    pub fn native_price(&self) -> Option<String> {
        lock(&self.state).native_price.clone()
    }

    pub fn chain_info(&self) -> Option<ChainInfo> {
        lock(&self.state).chain_info.clone()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).loading
    }
}

impl SessionScoped for BalanceTracker {
    fn scope_name(&self) -> &'static str {
        "balances"
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        let generation = state.refresh_generation + 1;
        *state = State {
            refresh_generation: generation,
            ..State::default()
        };
    }
}
