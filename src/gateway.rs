//! Command gateway to the wallet backend
//!
//! Every command resolves to a [`CommandResult`], the `{status, data | error}`
//! tagged shape the backend speaks. Transport failures are folded into the
//! error branch, so callers only ever match on one type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ClientError;
use crate::events::{BackendEvent, EventBus};
use crate::types::{
    AvailableWallet, Balance, ChainInfo, DerivedAddress, PrepareTxRequest, PreparedTransfer,
    TokenType, UnlockResponse, Utxo, WalletId,
};

/// Lowercased prefixes of the errors `RemoteBackend` produces without a backend answer
const TRANSPORT_PREFIXES: [&str; 3] = [
    "backend unreachable",
    "invalid backend response",
    "unexpected response for",
];

/// Tagged backend result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResult<T> {
    Ok { data: T },
    Error { error: String },
}

impl<T> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { error: msg.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn into_result(self) -> Result<T, CommandError> {
        match self {
            Self::Ok { data } => Ok(data),
            Self::Error { error } => Err(CommandError::classify(error)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandResult<U> {
        match self {
            Self::Ok { data } => CommandResult::Ok { data: f(data) },
            Self::Error { error } => CommandResult::Error { error },
        }
    }
}

/// Backend error message sorted into the cases the stores react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    SessionExpired(String),
    InvalidPassphrase(String),
    IndexOccupied(String),
    /// The command never got a backend answer
    Transport(String),
    Other(String),
}

impl CommandError {
    pub fn classify(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let lower = msg.to_lowercase();
        if TRANSPORT_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            Self::Transport(msg)
        } else if lower.contains("session not found") || lower.contains("session has expired") {
            Self::SessionExpired(msg)
        } else if lower.contains("passphrase") || lower.contains("decrypt") {
            Self::InvalidPassphrase(msg)
        } else if lower.contains("occupied") || lower.contains("already derived") {
            Self::IndexOccupied(msg)
        } else {
            Self::Other(msg)
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::SessionExpired(m)
            | Self::InvalidPassphrase(m)
            | Self::IndexOccupied(m)
            | Self::Transport(m)
            | Self::Other(m) => m,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl From<CommandError> for ClientError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::SessionExpired(_) => ClientError::SessionExpired,
            CommandError::InvalidPassphrase(_) => ClientError::InvalidPassphrase,
            CommandError::IndexOccupied(m)
            | CommandError::Transport(m)
            | CommandError::Other(m) => ClientError::Backend(m),
        }
    }
}

/// Typed command surface of the wallet backend
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_wallets(&self) -> CommandResult<Vec<AvailableWallet>>;

    async fn unlock_wallet(
        &self,
        wallet_id: WalletId,
        passphrase: &str,
    ) -> CommandResult<UnlockResponse>;

    async fn forget_wallet(&self, wallet_id: WalletId) -> CommandResult<()>;

    /// Fresh mnemonic as ordered words
    async fn generate_mnemonic(&self) -> CommandResult<Vec<String>>;

    async fn create_wallet(
        &self,
        mnemonic: &str,
        passphrase: &str,
        name: &str,
    ) -> CommandResult<AvailableWallet>;

    async fn btc_derive_address(&self, label: &str, index: u32) -> CommandResult<DerivedAddress>;

    async fn btc_unoccupied_derivation_index(&self) -> CommandResult<u32>;

    async fn btc_list_derived_addresses(&self) -> CommandResult<Vec<DerivedAddress>>;

    async fn btc_list_utxos(&self) -> CommandResult<Vec<Utxo>>;

    async fn eth_chain_info(&self) -> CommandResult<ChainInfo>;

    async fn eth_get_balance(&self) -> CommandResult<Balance>;

    async fn eth_track_token(&self, contract: &str) -> CommandResult<TokenType>;

    async fn eth_untrack_token(&self, contract: &str) -> CommandResult<bool>;

    async fn eth_verify_address(&self, address: &str) -> CommandResult<bool>;

    async fn eth_prepare_send_tx(
        &self,
        request: &PrepareTxRequest,
    ) -> CommandResult<PreparedTransfer>;

    /// Returns the transaction hash
    async fn eth_sign_and_send_tx(&self) -> CommandResult<String>;
}

/// JSON-over-HTTP backend: `POST {base_url}/{command}`
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> CommandResult<T> {
        let url = format!("{}/{}", self.base_url, command);
        log::debug!("-> {}", command);

        let response = match self.client.post(&url).json(&args).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Backend command '{}' failed to send: {}", command, e);
                return CommandResult::error(format!("Backend unreachable: {}", e));
            }
        };

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!(
                    "Backend command '{}' returned unreadable body ({}): {}",
                    command,
                    status,
                    e
                );
                return CommandResult::error(format!("Invalid backend response: {}", e));
            }
        };

        match serde_json::from_value::<CommandResult<T>>(body) {
            Ok(result) => {
                if let CommandResult::Error { error } = &result {
                    log::debug!("<- {} error: {}", command, error);
                }
                result
            }
            Err(e) => {
                log::warn!("Backend command '{}' returned unexpected shape: {}", command, e);
                CommandResult::error(format!("Unexpected response for {}: {}", command, e))
            }
        }
    }
}

/// Mnemonic as either a phrase or a word list
#[derive(Deserialize)]
#[serde(untagged)]
enum MnemonicWire {
    Phrase(String),
    Words(Vec<String>),
}

impl From<MnemonicWire> for Vec<String> {
    fn from(wire: MnemonicWire) -> Self {
        match wire {
            MnemonicWire::Phrase(p) => p.split_whitespace().map(str::to_string).collect(),
            MnemonicWire::Words(w) => w,
        }
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn list_wallets(&self) -> CommandResult<Vec<AvailableWallet>> {
        self.call("list_wallets", json!({})).await
    }

    async fn unlock_wallet(
        &self,
        wallet_id: WalletId,
        passphrase: &str,
    ) -> CommandResult<UnlockResponse> {
        self.call("unlock_wallet", json!({ "wallet_id": wallet_id, "passphrase": passphrase }))
            .await
    }

    async fn forget_wallet(&self, wallet_id: WalletId) -> CommandResult<()> {
        self.call::<Option<Value>>("forget_wallet", json!({ "wallet_id": wallet_id }))
            .await
            .map(|_| ())
    }

    async fn generate_mnemonic(&self) -> CommandResult<Vec<String>> {
        self.call::<MnemonicWire>("generate_mnemonic", json!({}))
            .await
            .map(Vec::from)
    }

    async fn create_wallet(
        &self,
        mnemonic: &str,
        passphrase: &str,
        name: &str,
    ) -> CommandResult<AvailableWallet> {
        self.call(
            "create_wallet",
            json!({ "mnemonic": mnemonic, "passphrase": passphrase, "name": name }),
        )
        .await
    }

    async fn btc_derive_address(&self, label: &str, index: u32) -> CommandResult<DerivedAddress> {
        self.call("btc_derive_address", json!({ "label": label, "index": index }))
            .await
    }

    async fn btc_unoccupied_derivation_index(&self) -> CommandResult<u32> {
        self.call("btc_unoccupied_derivation_index", json!({})).await
    }

    async fn btc_list_derived_addresses(&self) -> CommandResult<Vec<DerivedAddress>> {
        self.call("btc_list_derived_addresses", json!({})).await
    }

    async fn btc_list_utxos(&self) -> CommandResult<Vec<Utxo>> {
        self.call("btc_list_utxos", json!({})).await
    }

    async fn eth_chain_info(&self) -> CommandResult<ChainInfo> {
        self.call("eth_chain_info", json!({})).await
    }

    async fn eth_get_balance(&self) -> CommandResult<Balance> {
        self.call("eth_get_balance", json!({})).await
    }

    async fn eth_track_token(&self, contract: &str) -> CommandResult<TokenType> {
        self.call("eth_track_token", json!({ "address": contract })).await
    }

    async fn eth_untrack_token(&self, contract: &str) -> CommandResult<bool> {
        self.call("eth_untrack_token", json!({ "address": contract })).await
    }

    async fn eth_verify_address(&self, address: &str) -> CommandResult<bool> {
        self.call("eth_verify_address", json!({ "address": address })).await
    }

    async fn eth_prepare_send_tx(
        &self,
        request: &PrepareTxRequest,
    ) -> CommandResult<PreparedTransfer> {
        let args = match serde_json::to_value(request) {
            Ok(args) => args,
            Err(e) => return CommandResult::error(format!("Failed to encode request: {}", e)),
        };
        self.call("eth_prepare_send_tx", args).await
    }

    async fn eth_sign_and_send_tx(&self) -> CommandResult<String> {
        self.call("eth_sign_and_send_tx", json!({})).await
    }
}

/// Backend wrapper that turns a command-level session expiry into a
/// [`BackendEvent::SessionExpired`] on the bus, so it locks the client the
/// same way a pushed expiry does.
pub struct ExpiryAwareBackend {
    inner: Arc<dyn Backend>,
    events: EventBus,
}

impl ExpiryAwareBackend {
    pub fn new(inner: Arc<dyn Backend>, events: EventBus) -> Self {
        Self { inner, events }
    }

    fn watch<T>(&self, command: &str, result: CommandResult<T>) -> CommandResult<T> {
        if let CommandResult::Error { error } = &result {
            if let CommandError::SessionExpired(msg) = CommandError::classify(error.as_str()) {
                log::warn!("'{}' reported an expired session: {}", command, msg);
                self.events.publish(BackendEvent::SessionExpired);
            }
        }
        result
    }
}

#[async_trait]
impl Backend for ExpiryAwareBackend {
    async fn list_wallets(&self) -> CommandResult<Vec<AvailableWallet>> {
        self.watch("list_wallets", self.inner.list_wallets().await)
    }

    async fn unlock_wallet(
        &self,
        wallet_id: WalletId,
        passphrase: &str,
    ) -> CommandResult<UnlockResponse> {
        let result = self.inner.unlock_wallet(wallet_id, passphrase).await;
        self.watch("unlock_wallet", result)
    }

    async fn forget_wallet(&self, wallet_id: WalletId) -> CommandResult<()> {
        self.watch("forget_wallet", self.inner.forget_wallet(wallet_id).await)
    }

    async fn generate_mnemonic(&self) -> CommandResult<Vec<String>> {
        self.watch("generate_mnemonic", self.inner.generate_mnemonic().await)
    }

    async fn create_wallet(
        &self,
        mnemonic: &str,
        passphrase: &str,
        name: &str,
    ) -> CommandResult<AvailableWallet> {
        let result = self.inner.create_wallet(mnemonic, passphrase, name).await;
        self.watch("create_wallet", result)
    }

    async fn btc_derive_address(&self, label: &str, index: u32) -> CommandResult<DerivedAddress> {
        let result = self.inner.btc_derive_address(label, index).await;
        self.watch("btc_derive_address", result)
    }

    async fn btc_unoccupied_derivation_index(&self) -> CommandResult<u32> {
        let result = self.inner.btc_unoccupied_derivation_index().await;
        self.watch("btc_unoccupied_derivation_index", result)
    }

    async fn btc_list_derived_addresses(&self) -> CommandResult<Vec<DerivedAddress>> {
        let result = self.inner.btc_list_derived_addresses().await;
        self.watch("btc_list_derived_addresses", result)
    }

    async fn btc_list_utxos(&self) -> CommandResult<Vec<Utxo>> {
        self.watch("btc_list_utxos", self.inner.btc_list_utxos().await)
    }

    async fn eth_chain_info(&self) -> CommandResult<ChainInfo> {
        self.watch("eth_chain_info", self.inner.eth_chain_info().await)
    }

    async fn eth_get_balance(&self) -> CommandResult<Balance> {
        self.watch("eth_get_balance", self.inner.eth_get_balance().await)
    }

    async fn eth_track_token(&self, contract: &str) -> CommandResult<TokenType> {
        self.watch("eth_track_token", self.inner.eth_track_token(contract).await)
    }

    async fn eth_untrack_token(&self, contract: &str) -> CommandResult<bool> {
        self.watch("eth_untrack_token", self.inner.eth_untrack_token(contract).await)
    }

    async fn eth_verify_address(&self, address: &str) -> CommandResult<bool> {
        self.watch("eth_verify_address", self.inner.eth_verify_address(address).await)
    }

    async fn eth_prepare_send_tx(
        &self,
        request: &PrepareTxRequest,
    ) -> CommandResult<PreparedTransfer> {
        let result = self.inner.eth_prepare_send_tx(request).await;
        self.watch("eth_prepare_send_tx", result)
    }

    async fn eth_sign_and_send_tx(&self) -> CommandResult<String> {
        self.watch("eth_sign_and_send_tx", self.inner.eth_sign_and_send_tx().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_result_wire_format() {
        let ok: CommandResult<u32> =
            serde_json::from_value(json!({ "status": "ok", "data": 7 })).unwrap();
        assert_eq!(ok, CommandResult::ok(7));

        let err: CommandResult<u32> =
            serde_json::from_value(json!({ "status": "error", "error": "boom" })).unwrap();
        assert_eq!(err, CommandResult::error("boom"));

        assert_eq!(
            serde_json::to_value(CommandResult::ok("0xhash")).unwrap(),
            json!({ "status": "ok", "data": "0xhash" })
        );
    }

    #[test]
    fn test_classify_session_errors() {
        assert!(matches!(
            CommandError::classify("Session not found"),
            CommandError::SessionExpired(_)
        ));
        assert!(matches!(
            CommandError::classify("Session has expired"),
            CommandError::SessionExpired(_)
        ));
        assert_eq!(
            ClientError::from(CommandError::classify("Session has expired")),
            ClientError::SessionExpired
        );
    }

    #[test]
    fn test_classify_other_errors() {
        assert!(matches!(
            CommandError::classify("Wrong passphrase"),
            CommandError::InvalidPassphrase(_)
        ));
        assert!(matches!(
            CommandError::classify("index 4 is occupied"),
            CommandError::IndexOccupied(_)
        ));
        let other = CommandError::classify("rpc timeout");
        assert_eq!(other.message(), "rpc timeout");
        assert_eq!(ClientError::from(other), ClientError::backend("rpc timeout"));
    }

    #[test]
    fn test_classify_transport_errors() {
        let err = CommandError::classify("Backend unreachable: connection refused");
        assert!(matches!(err, CommandError::Transport(_)));
        assert!(matches!(
            CommandError::classify("Invalid backend response: session not found in body"),
            CommandError::Transport(_)
        ));
        assert_eq!(
            ClientError::from(err),
            ClientError::backend("Backend unreachable: connection refused")
        );
    }

    #[tokio::test]
    async fn test_expired_command_publishes_session_expired() {
        let events = EventBus::new(8);
        let mut rx = events.raw_subscribe();
        let unreachable: Arc<dyn Backend> =
            Arc::new(RemoteBackend::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap());
        let backend = ExpiryAwareBackend::new(unreachable, events.clone());

        let expired: CommandResult<u32> = CommandResult::error("Session not found");
        assert!(!backend.watch("eth_get_balance", expired).is_ok());
        assert_eq!(rx.try_recv().unwrap(), BackendEvent::SessionExpired);

        let other: CommandResult<u32> = CommandResult::error("rpc timeout");
        backend.watch("eth_get_balance", other);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_mnemonic_wire_accepts_phrase_or_words() {
        let phrase: MnemonicWire = serde_json::from_value(json!("abandon ability able")).unwrap();
        assert_eq!(Vec::<String>::from(phrase), vec!["abandon", "ability", "able"]);

        let words: MnemonicWire = serde_json::from_value(json!(["zoo", "wrong"])).unwrap();
        assert_eq!(Vec::<String>::from(words), vec!["zoo", "wrong"]);
    }

    #[test]
    fn test_remote_backend_trims_base_url() {
        let backend = RemoteBackend::new("http://localhost:7654/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:7654");
    }

    #[tokio::test]
    async fn test_unreachable_backend_yields_error_result() {
        let backend = RemoteBackend::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let result = backend.list_wallets().await;
        assert!(!result.is_ok());
    }
}
