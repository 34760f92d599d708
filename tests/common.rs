//! Common test utilities for wallet client integration tests
//!
//! Provides a scripted in-memory [`MockBackend`] and helpers to build a
//! [`WalletClient`] around it. The mock arbitrates derivation indices the way
//! the real backend does and counts every command it receives.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use satellion_core::{
    AvailableWallet, Backend, Balance, Chain, ChainAddresses, ChainInfo, ClientConfig,
    CommandResult, DerivedAddress, PrepareTxRequest, PreparedTransfer, TokenBalance, TokenType,
    UnlockResponse, Utxo, WalletClient, WalletId, NATIVE_TOKEN_ADDRESS,
};

pub const PASSPHRASE: &str = "correct horse battery";
pub const RECIPIENT: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";
pub const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
pub const DUST: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";
pub const BTC_ADDRESSES: [&str; 3] = [
    "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
    "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx",
    "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3",
];

pub const TWELVE_WORDS: [&str; 12] = [
    "abandon", "ability", "able", "about", "above", "absent", "absorb", "abstract", "absurd",
    "abuse", "access", "accident",
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        address_debounce_ms: 10,
        chain_poll_interval_ms: 50,
        ..ClientConfig::default()
    }
}

pub fn token(
    symbol: &str,
    address: &str,
    balance: &str,
    decimals: u8,
    ui_precision: u32,
) -> TokenBalance {
    TokenBalance {
        symbol: symbol.to_string(),
        address: address.to_string(),
        balance: balance.to_string(),
        decimals,
        ui_precision,
    }
}

pub fn default_balance() -> Balance {
    Balance {
        wei: "1500000000000000000".to_string(),
        eth_price: Some("3000.50".to_string()),
        tokens: vec![
            token("USDC", USDC, "100000000", 6, 2),
            // 0.000000000000000400 DAI, hidden at precision 4
            token("DAI", DUST, "400", 18, 4),
        ],
    }
}

pub fn prepared(cost: &str) -> PreparedTransfer {
    PreparedTransfer {
        estimated_gas: "21000".to_string(),
        max_fee_per_gas: "30000000000".to_string(),
        cost: cost.to_string(),
        fiat_cost: Some("1.89".to_string()),
    }
}

/// Scripted backend. Every field can be changed between calls.
pub struct MockBackend {
    pub wallets: Mutex<Vec<AvailableWallet>>,
    pub list_error: Mutex<Option<String>>,
    pub passphrase: Mutex<String>,
    pub unlock_error: Mutex<Option<String>>,
    pub forget_error: Mutex<Option<String>>,
    pub mnemonics: Mutex<VecDeque<Vec<String>>>,
    pub create_error: Mutex<Option<String>>,
    pub created: Mutex<Vec<(String, String, String)>>,
    pub occupied: Mutex<HashSet<u32>>,
    pub derived: Mutex<Vec<DerivedAddress>>,
    pub derive_error: Mutex<Option<String>>,
    pub utxos: Mutex<Vec<Utxo>>,
    pub chain_info: Mutex<CommandResult<ChainInfo>>,
    pub balance: Mutex<CommandResult<Balance>>,
    pub track: Mutex<CommandResult<TokenType>>,
    pub untrack: Mutex<CommandResult<bool>>,
    /// `None` accepts any address
    pub verify: Mutex<Option<CommandResult<bool>>>,
    pub prepare: Mutex<CommandResult<PreparedTransfer>>,
    pub prepare_requests: Mutex<Vec<PrepareTxRequest>>,
    pub send: Mutex<CommandResult<String>>,
    pub delays: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            wallets: Mutex::new(vec![AvailableWallet {
                id: 1,
                name: "Main".to_string(),
            }]),
            list_error: Mutex::new(None),
            passphrase: Mutex::new(PASSPHRASE.to_string()),
            unlock_error: Mutex::new(None),
            forget_error: Mutex::new(None),
            mnemonics: Mutex::new(VecDeque::new()),
            create_error: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            occupied: Mutex::new(HashSet::new()),
            derived: Mutex::new(Vec::new()),
            derive_error: Mutex::new(None),
            utxos: Mutex::new(Vec::new()),
            chain_info: Mutex::new(CommandResult::ok(ChainInfo {
                block_number: "19000000".to_string(),
                block_hash: "0xabc".to_string(),
                base_fee_per_gas: Some("12000000000".to_string()),
            })),
            balance: Mutex::new(CommandResult::ok(default_balance())),
            track: Mutex::new(CommandResult::ok(TokenType {
                chain: Chain::Ethereum,
                address: USDC.to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
            })),
            untrack: Mutex::new(CommandResult::ok(true)),
            verify: Mutex::new(None),
            prepare: Mutex::new(CommandResult::ok(prepared("630000000000000"))),
            prepare_requests: Mutex::new(Vec::new()),
            send: Mutex::new(CommandResult::ok("0xfeed".to_string())),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, command: &str) -> usize {
        self.calls.lock().unwrap().get(command).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn set_delay(&self, command: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(command, delay);
    }

    pub fn push_mnemonic(&self, words: &[&str]) {
        self.mnemonics
            .lock()
            .unwrap()
            .push_back(words.iter().map(|w| w.to_string()).collect());
    }

    async fn enter(&self, command: &'static str) {
        *self.calls.lock().unwrap().entry(command).or_insert(0) += 1;
        let delay = self.delays.lock().unwrap().get(command).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn list_wallets(&self) -> CommandResult<Vec<AvailableWallet>> {
        self.enter("list_wallets").await;
        if let Some(e) = self.list_error.lock().unwrap().clone() {
            return CommandResult::error(e);
        }
        CommandResult::ok(self.wallets.lock().unwrap().clone())
    }

    async fn unlock_wallet(
        &self,
        wallet_id: WalletId,
        passphrase: &str,
    ) -> CommandResult<UnlockResponse> {
        self.enter("unlock_wallet").await;
        if let Some(e) = self.unlock_error.lock().unwrap().clone() {
            return CommandResult::error(e);
        }
        if !self.wallets.lock().unwrap().iter().any(|w| w.id == wallet_id) {
            return CommandResult::error(format!("Wallet {} not found", wallet_id));
        }
        if passphrase != *self.passphrase.lock().unwrap() {
            return CommandResult::error("Invalid passphrase");
        }
        CommandResult::ok(UnlockResponse {
            addresses: ChainAddresses {
                bitcoin: Some(BTC_ADDRESSES[0].to_string()),
                ethereum: Some(RECIPIENT.to_string()),
            },
            last_used_chain: Some(Chain::Ethereum),
        })
    }

    async fn forget_wallet(&self, wallet_id: WalletId) -> CommandResult<()> {
        self.enter("forget_wallet").await;
        if let Some(e) = self.forget_error.lock().unwrap().clone() {
            return CommandResult::error(e);
        }
        self.wallets.lock().unwrap().retain(|w| w.id != wallet_id);
        CommandResult::ok(())
    }

    async fn generate_mnemonic(&self) -> CommandResult<Vec<String>> {
        self.enter("generate_mnemonic").await;
        let scripted = self.mnemonics.lock().unwrap().pop_front();
        CommandResult::ok(
            scripted.unwrap_or_else(|| TWELVE_WORDS.iter().map(|w| w.to_string()).collect()),
        )
    }

    async fn create_wallet(
        &self,
        mnemonic: &str,
        passphrase: &str,
        name: &str,
    ) -> CommandResult<AvailableWallet> {
        self.enter("create_wallet").await;
        self.created
            .lock()
            .unwrap()
            .push((mnemonic.to_string(), passphrase.to_string(), name.to_string()));
        if let Some(e) = self.create_error.lock().unwrap().clone() {
            return CommandResult::error(e);
        }
        let mut wallets = self.wallets.lock().unwrap();
        let wallet = AvailableWallet {
            id: wallets.iter().map(|w| w.id).max().unwrap_or(0) + 1,
            name: name.to_string(),
        };
        wallets.push(wallet.clone());
        CommandResult::ok(wallet)
    }

    async fn btc_derive_address(&self, label: &str, index: u32) -> CommandResult<DerivedAddress> {
        self.enter("btc_derive_address").await;
        if let Some(e) = self.derive_error.lock().unwrap().clone() {
            return CommandResult::error(e);
        }
        if !self.occupied.lock().unwrap().insert(index) {
            return CommandResult::error(format!("Derivation index {} is already occupied", index));
        }
        let derived = DerivedAddress {
            index,
            label: label.to_string(),
            address: BTC_ADDRESSES[index as usize % BTC_ADDRESSES.len()].to_string(),
            derivation_path: format!("m/86'/0'/0'/0/{}", index),
        };
        self.derived.lock().unwrap().push(derived.clone());
        CommandResult::ok(derived)
    }

    async fn btc_unoccupied_derivation_index(&self) -> CommandResult<u32> {
        self.enter("btc_unoccupied_derivation_index").await;
        let occupied = self.occupied.lock().unwrap();
        CommandResult::ok((1..).find(|i| !occupied.contains(i)).unwrap_or(1))
    }

    async fn btc_list_derived_addresses(&self) -> CommandResult<Vec<DerivedAddress>> {
        self.enter("btc_list_derived_addresses").await;
        CommandResult::ok(self.derived.lock().unwrap().clone())
    }

    async fn btc_list_utxos(&self) -> CommandResult<Vec<Utxo>> {
        self.enter("btc_list_utxos").await;
        CommandResult::ok(self.utxos.lock().unwrap().clone())
    }

    async fn eth_chain_info(&self) -> CommandResult<ChainInfo> {
        self.enter("eth_chain_info").await;
        self.chain_info.lock().unwrap().clone()
    }

    async fn eth_get_balance(&self) -> CommandResult<Balance> {
        self.enter("eth_get_balance").await;
        self.balance.lock().unwrap().clone()
    }

    async fn eth_track_token(&self, _contract: &str) -> CommandResult<TokenType> {
        self.enter("eth_track_token").await;
        self.track.lock().unwrap().clone()
    }

    async fn eth_untrack_token(&self, _contract: &str) -> CommandResult<bool> {
        self.enter("eth_untrack_token").await;
        self.untrack.lock().unwrap().clone()
    }

    async fn eth_verify_address(&self, _address: &str) -> CommandResult<bool> {
        self.enter("eth_verify_address").await;
        self.verify.lock().unwrap().clone().unwrap_or(CommandResult::ok(true))
    }

    async fn eth_prepare_send_tx(
        &self,
        request: &PrepareTxRequest,
    ) -> CommandResult<PreparedTransfer> {
        self.enter("eth_prepare_send_tx").await;
        self.prepare_requests.lock().unwrap().push(request.clone());
        self.prepare.lock().unwrap().clone()
    }

    async fn eth_sign_and_send_tx(&self) -> CommandResult<String> {
        self.enter("eth_sign_and_send_tx").await;
        self.send.lock().unwrap().clone()
    }
}

/// Client around `backend`, not yet started
pub fn client(backend: &Arc<MockBackend>) -> WalletClient {
    init_logging();
    WalletClient::new(backend.clone(), test_config())
}

/// Client with wallet 1 unlocked and balances loaded
pub async fn unlocked_client(backend: &Arc<MockBackend>) -> anyhow::Result<WalletClient> {
    let client = client(backend);
    client.session().list_wallets().await?;
    client.session().set_passphrase(PASSPHRASE);
    client.session().unlock().await?;
    client.balances().refresh().await?;
    Ok(client)
}

pub fn native() -> Option<String> {
    Some(NATIVE_TOKEN_ADDRESS.to_string())
}
