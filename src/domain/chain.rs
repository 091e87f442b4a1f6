//! Closed chain model: every supported chain, its family, and the monitor
//! variant each (family, contract kind) pair resolves to.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Every chain the monitor knows how to watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ethereum,
    Bsc,
    Polygon,
    Arbitrum,
    Avalanche,
    Bitcoin,
    Litecoin,
    Dogecoin,
    Tron,
    Solana,
    Ton,
}

impl Chain {
    pub const ALL: [Chain; 11] = [
        Chain::Ethereum,
        Chain::Bsc,
        Chain::Polygon,
        Chain::Arbitrum,
        Chain::Avalanche,
        Chain::Bitcoin,
        Chain::Litecoin,
        Chain::Dogecoin,
        Chain::Tron,
        Chain::Solana,
        Chain::Ton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Bsc => "bsc",
            Self::Polygon => "polygon",
            Self::Arbitrum => "arbitrum",
            Self::Avalanche => "avalanche",
            Self::Bitcoin => "bitcoin",
            Self::Litecoin => "litecoin",
            Self::Dogecoin => "dogecoin",
            Self::Tron => "tron",
            Self::Solana => "solana",
            Self::Ton => "ton",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Self::Ethereum | Self::Bsc | Self::Polygon | Self::Arbitrum | Self::Avalanche => {
                ChainFamily::Evm
            }
            Self::Bitcoin | Self::Litecoin | Self::Dogecoin => ChainFamily::Utxo,
            Self::Tron => ChainFamily::Tron,
            Self::Solana => ChainFamily::Solana,
            Self::Ton => ChainFamily::Ton,
        }
    }

    /// Symbol of the chain's native asset
    pub fn native_currency(&self) -> &'static str {
        match self {
            Self::Ethereum | Self::Arbitrum => "ETH",
            Self::Bsc => "BNB",
            Self::Polygon => "POL",
            Self::Avalanche => "AVAX",
            Self::Bitcoin => "BTC",
            Self::Litecoin => "LTC",
            Self::Dogecoin => "DOGE",
            Self::Tron => "TRX",
            Self::Solana => "SOL",
            Self::Ton => "TON",
        }
    }

    pub fn native_decimals(&self) -> u8 {
        match self.family() {
            ChainFamily::Evm => 18,
            ChainFamily::Utxo => 8,
            ChainFamily::Tron => 6,
            ChainFamily::Solana | ChainFamily::Ton => 9,
        }
    }

    /// Confirmations after which a deposit is treated as final
    pub fn default_confirmations(&self) -> u64 {
        match self {
            Self::Ethereum => 12,
            Self::Bsc => 15,
            Self::Polygon => 64,
            Self::Arbitrum => 20,
            Self::Avalanche => 12,
            Self::Bitcoin => 3,
            Self::Litecoin => 6,
            Self::Dogecoin => 20,
            Self::Tron => 19,
            Self::Solana => 32,
            Self::Ton => 1,
        }
    }

    /// Contract kind implied by a currency symbol on this chain
    pub fn contract_kind(&self, currency: &str) -> ContractKind {
        if currency.eq_ignore_ascii_case(self.native_currency()) {
            ContractKind::Native
        } else {
            ContractKind::Token
        }
    }

    /// Canonical form used for address comparisons and storage.
    /// EVM addresses are case-insensitive hex; everything else is case-sensitive.
    pub fn normalize_address(&self, address: &str) -> String {
        let trimmed = address.trim();
        match self.family() {
            ChainFamily::Evm => trimmed.to_ascii_lowercase(),
            _ => trimmed.to_string(),
        }
    }

    /// Prefix for per-chain environment variables, e.g. `ETHEREUM_RPC_URL`
    pub fn env_prefix(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl std::str::FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" | "erc20" => Ok(Self::Ethereum),
            "bsc" | "bnb" | "bep20" => Ok(Self::Bsc),
            "polygon" | "matic" | "pol" => Ok(Self::Polygon),
            "arbitrum" | "arb" => Ok(Self::Arbitrum),
            "avalanche" | "avax" => Ok(Self::Avalanche),
            "bitcoin" | "btc" => Ok(Self::Bitcoin),
            "litecoin" | "ltc" => Ok(Self::Litecoin),
            "dogecoin" | "doge" => Ok(Self::Dogecoin),
            "tron" | "trx" | "trc20" => Ok(Self::Tron),
            "solana" | "sol" | "spl" => Ok(Self::Solana),
            "ton" => Ok(Self::Ton),
            _ => Err(format!("Unsupported chain: {}", s)),
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Class of chains sharing one detection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    Evm,
    Utxo,
    Tron,
    Solana,
    Ton,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Utxo => "utxo",
            Self::Tron => "tron",
            Self::Solana => "solana",
            Self::Ton => "ton",
        }
    }

    /// The externally owned watcher responsible for this family, if any.
    /// EVM chains are watched in-process.
    pub fn delegated(&self) -> Option<DelegatedFamily> {
        match self {
            Self::Evm => None,
            Self::Utxo => Some(DelegatedFamily::Utxo),
            Self::Tron => Some(DelegatedFamily::Tron),
            Self::Solana => Some(DelegatedFamily::Solana),
            Self::Ton => Some(DelegatedFamily::Ton),
        }
    }
}

impl std::str::FromStr for ChainFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evm" => Ok(Self::Evm),
            "utxo" => Ok(Self::Utxo),
            "tron" => Ok(Self::Tron),
            "solana" => Ok(Self::Solana),
            "ton" => Ok(Self::Ton),
            _ => Err(format!("Invalid chain family: {}", s)),
        }
    }
}

impl std::fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Families whose detection runs inside an external singleton service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DelegatedFamily {
    Utxo,
    Tron,
    Solana,
    Ton,
}

impl DelegatedFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utxo => "utxo",
            Self::Tron => "tron",
            Self::Solana => "solana",
            Self::Ton => "ton",
        }
    }
}

/// Whether the watched currency is the chain's native asset or a token contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Native,
    Token,
}

/// Concrete detection strategy selected for a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    /// Poll address history for native-asset transfers
    EvmNative,
    /// `eth_subscribe` to Transfer logs over WebSocket
    EvmTokenPush,
    /// `eth_getLogs` over bounded block ranges with backoff
    EvmTokenPoll,
    /// Hand the address to the family's external watcher
    Delegated(DelegatedFamily),
}

impl MonitorKind {
    /// Dispatch table from chain family and contract kind to a monitor variant.
    /// `push_capable` only matters for EVM tokens.
    pub fn select(family: ChainFamily, contract: ContractKind, push_capable: bool) -> Self {
        match family {
            ChainFamily::Evm => match (contract, push_capable) {
                (ContractKind::Native, _) => Self::EvmNative,
                (ContractKind::Token, true) => Self::EvmTokenPush,
                (ContractKind::Token, false) => Self::EvmTokenPoll,
            },
            ChainFamily::Utxo => Self::Delegated(DelegatedFamily::Utxo),
            ChainFamily::Tron => Self::Delegated(DelegatedFamily::Tron),
            ChainFamily::Solana => Self::Delegated(DelegatedFamily::Solana),
            ChainFamily::Ton => Self::Delegated(DelegatedFamily::Ton),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EvmNative => "evm_native",
            Self::EvmTokenPush => "evm_token_push",
            Self::EvmTokenPoll => "evm_token_poll",
            Self::Delegated(family) => family.as_str(),
        }
    }
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
