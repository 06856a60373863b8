//! Built-in network profiles.
//!
//! A profile fixes the chain id, the default endpoint, the confirmation depth,
//! the poll interval and the request budget for one network. The endpoint is
//! Infura when an API key is available, a public endpoint otherwise.

use std::str::FromStr;

use chainwatch_core::config::WatcherConfig;
use chainwatch_core::error::WatchError;
use chainwatch_core::policy::RateLimiterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Ethereum,
    Sepolia,
    Polygon,
    Bsc,
}

impl Network {
    pub const ALL: [Network; 4] = [Self::Ethereum, Self::Sepolia, Self::Polygon, Self::Bsc];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Sepolia => "sepolia",
            Self::Polygon => "polygon",
            Self::Bsc => "bsc",
        }
    }

    pub fn profile(self) -> NetworkProfile {
        match self {
            Self::Ethereum => NetworkProfile {
                network: self,
                chain_id: 1,
                confirmation_depth: 6,
                poll_interval_ms: 12_000,
                rate_limit: budget(10.0),
                public_rpc: "https://rpc.ankr.com/eth",
                infura_slug: "mainnet",
            },
            Self::Sepolia => NetworkProfile {
                network: self,
                chain_id: 11_155_111,
                confirmation_depth: 6,
                poll_interval_ms: 12_000,
                rate_limit: budget(10.0),
                public_rpc: "https://rpc.ankr.com/eth_sepolia",
                infura_slug: "sepolia",
            },
            Self::Polygon => NetworkProfile {
                network: self,
                chain_id: 137,
                confirmation_depth: 16,
                poll_interval_ms: 2_000,
                rate_limit: budget(20.0),
                public_rpc: "https://polygon.llamarpc.com",
                infura_slug: "polygon-mainnet",
            },
            Self::Bsc => NetworkProfile {
                network: self,
                chain_id: 56,
                confirmation_depth: 15,
                poll_interval_ms: 3_000,
                rate_limit: budget(20.0),
                public_rpc: "https://rpc.ankr.com/bsc",
                infura_slug: "bsc-mainnet",
            },
        }
    }
}

fn budget(per_second: f64) -> RateLimiterConfig {
    RateLimiterConfig {
        capacity: per_second,
        refill_rate: per_second,
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" | "eth" => Ok(Self::Ethereum),
            "sepolia" => Ok(Self::Sepolia),
            "polygon" | "matic" => Ok(Self::Polygon),
            "bsc" | "bnb" => Ok(Self::Bsc),
            other => Err(WatchError::Config(format!(
                "unknown network '{other}' (expected one of: ethereum, sepolia, polygon, bsc)"
            ))),
        }
    }
}

/// Per-network defaults.
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    pub network: Network,
    pub chain_id: u64,
    pub confirmation_depth: u64,
    pub poll_interval_ms: u64,
    pub rate_limit: RateLimiterConfig,
    pub public_rpc: &'static str,
    pub infura_slug: &'static str,
}

impl NetworkProfile {
    /// The default endpoint: Infura when `infura_key` is set, the public endpoint otherwise.
    pub fn rpc_url(&self, infura_key: Option<&str>) -> String {
        match infura_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => format!("https://{}.infura.io/v3/{}", self.infura_slug, key.trim()),
            None => self.public_rpc.to_string(),
        }
    }

    /// A watcher configuration carrying this profile's defaults.
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            chain: self.network.name().to_string(),
            chain_id: self.chain_id,
            confirmation_depth: self.confirmation_depth,
            poll_interval_ms: self.poll_interval_ms,
            rate_limit: self.rate_limit.clone(),
            ..WatcherConfig::default()
        }
    }
}
