//! Wire data types shared by the backend gateway and the stores

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::Result;

pub type WalletId = i32;

/// Sentinel contract address used for the native asset (ETH)
pub const NATIVE_TOKEN_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Wire names are the variant names (`"Bitcoin"`, `"Ethereum"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Bitcoin,
    Ethereum,
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Chain::Bitcoin => write!(f, "bitcoin"),
            Chain::Ethereum => write!(f, "ethereum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableWallet {
    pub id: WalletId,
    pub name: String,
}

/// Per-chain receive addresses of an unlocked wallet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAddresses {
    pub bitcoin: Option<String>,
    pub ethereum: Option<String>,
}

impl ChainAddresses {
    pub fn get(&self, chain: Chain) -> Option<&str> {
        match chain {
            Chain::Bitcoin => self.bitcoin.as_deref(),
            Chain::Ethereum => self.ethereum.as_deref(),
        }
    }
}

/// Chain membership returned by `unlock_wallet`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockResponse {
    pub addresses: ChainAddresses,
    #[serde(default)]
    pub last_used_chain: Option<Chain>,
}

/// Child address derived under the wallet's account key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub index: u32,
    pub label: String,
    pub address: String,
    pub derivation_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: String,
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Decimal block number; the backend may send it as a string or a number
    #[serde(deserialize_with = "de::string_or_number")]
    pub block_number: String,
    pub block_hash: String,
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub base_fee_per_gas: Option<String>,
}

impl ChainInfo {
    pub fn height(&self) -> Option<u64> {
        self.block_number.trim().parse().ok()
    }
}

/// Balance of one tracked asset in smallest units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub symbol: String,
    pub address: String,
    #[serde(deserialize_with = "de::string_or_number")]
    pub balance: String,
    pub decimals: u8,
    pub ui_precision: u32,
}

impl TokenBalance {
    pub fn is_native(&self) -> bool {
        self.address.eq_ignore_ascii_case(NATIVE_TOKEN_ADDRESS)
    }

    pub fn amount(&self) -> Result<Amount> {
        Ok(Amount::from_raw_str(&self.balance, self.decimals)?)
    }

    /// Balance rounded to `ui_precision`, trailing zeros trimmed
    pub fn display_balance(&self) -> Result<String> {
        Ok(self.amount()?.round_to(self.ui_precision).to_string())
    }
}

/// Result of `eth_get_balance`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(deserialize_with = "de::string_or_number")]
    pub wei: String,
    /// USD price of the native asset, decimal string
    #[serde(default)]
    pub eth_price: Option<String>,
    #[serde(default)]
    pub tokens: Vec<TokenBalance>,
}

/// Token metadata resolved by `eth_track_token`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenType {
    pub chain: Chain,
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeMode {
    Minimal,
    #[default]
    Standard,
    Increased,
}

/// Arguments of `eth_prepare_send_tx`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareTxRequest {
    pub recipient: String,
    /// Decimal amount in token units, as typed by the user
    pub amount: String,
    pub token_address: String,
    pub fee_mode: FeeMode,
}

/// Fee estimate snapshot returned by a successful prepare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTransfer {
    #[serde(deserialize_with = "de::string_or_number")]
    pub estimated_gas: String,
    #[serde(deserialize_with = "de::string_or_number")]
    pub max_fee_per_gas: String,
    /// Total cost in wei
    #[serde(deserialize_with = "de::string_or_number")]
    pub cost: String,
    #[serde(default)]
    pub fiat_cost: Option<String>,
}

/// Cheap shape check for `0x` + 40 hex characters.
pub fn looks_like_eth_address(addr: &str) -> bool {
    let Some(body) = addr.strip_prefix("0x").or_else(|| addr.strip_prefix("0X")) else {
        return false;
    };
    body.len() == 40 && hex::decode(body).is_ok()
}

pub(crate) mod de {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Str(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    impl StringOrNumber {
        fn into_string(self) -> String {
            match self {
                Self::Str(s) => s,
                Self::Unsigned(n) => n.to_string(),
                Self::Signed(n) => n.to_string(),
                Self::Float(n) => n.to_string(),
            }
        }
    }

    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        StringOrNumber::deserialize(deserializer).map(StringOrNumber::into_string)
    }

    pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<StringOrNumber>::deserialize(deserializer)
            .map(|v| v.map(StringOrNumber::into_string))
    }
}
