//! Chain descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Node software family; decides the RPC dialect and the transaction shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainFamily {
    Bitcoin,
    Ethereum,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Bitcoin => "BITCOIN",
            ChainFamily::Ethereum => "ETHEREUM",
        }
    }

    /// Node endpoint used when `CHAIN_NODE_URL` is not set.
    pub fn default_node_url(&self) -> &'static str {
        match self {
            ChainFamily::Bitcoin => "http://127.0.0.1:8332",
            ChainFamily::Ethereum => "http://127.0.0.1:8545",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BITCOIN" => Ok(ChainFamily::Bitcoin),
            "ETHEREUM" => Ok(ChainFamily::Ethereum),
            other => Err(format!("unknown chain family {:?}", other)),
        }
    }
}

/// Immutable description of the chain a process pumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub name: String,
    pub family: ChainFamily,
    pub node_url: String,
}

impl ChainInfo {
    pub fn new(name: impl Into<String>, family: ChainFamily, node_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family,
            node_url: node_url.into(),
        }
    }

    pub fn block_pump_topic(&self) -> String {
        format!("{}_BLOCK_PUMP", self.name)
    }

    pub fn tx_pump_topic(&self) -> String {
        format!("{}_TX_PUMP", self.name)
    }

    pub fn mempool_pump_topic(&self) -> String {
        format!("{}_MEMPOOL_PUMP", self.name)
    }

    /// Consumer group of the supply recalculation process.
    pub fn supply_group(&self) -> String {
        format!("{}-supply-process", self.name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_parses_case_insensitively() {
        assert_eq!("bitcoin".parse::<ChainFamily>(), Ok(ChainFamily::Bitcoin));
        assert_eq!(" Ethereum ".parse::<ChainFamily>(), Ok(ChainFamily::Ethereum));
        assert!("dogecoin".parse::<ChainFamily>().is_err());
    }

    #[test]
    fn topics_are_prefixed_by_chain_name() {
        let chain = ChainInfo::new("BITCOIN_CASH", ChainFamily::Bitcoin, "http://node:8332");
        assert_eq!(chain.block_pump_topic(), "BITCOIN_CASH_BLOCK_PUMP");
        assert_eq!(chain.tx_pump_topic(), "BITCOIN_CASH_TX_PUMP");
        assert_eq!(chain.mempool_pump_topic(), "BITCOIN_CASH_MEMPOOL_PUMP");
        assert_eq!(chain.supply_group(), "bitcoin_cash-supply-process");
    }
}
