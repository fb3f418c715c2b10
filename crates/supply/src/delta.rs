//! Per-block supply deltas.

use chainpump_ingestion::model::{BlockBundle, BlockHeader};
use rust_decimal::Decimal;

const HALVING_INTERVAL: u64 = 210_000;
const INITIAL_SUBSIDY_SATS: u64 = 50 * 100_000_000;

/// New coins minted by the Bitcoin block at `height`.
pub fn bitcoin_subsidy(height: u64) -> Decimal {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return Decimal::ZERO;
    }
    Decimal::new((INITIAL_SUBSIDY_SATS >> halvings) as i64, 8)
}

/// Change in circulating supply caused by `bundle`. Genesis contributes
/// nothing: its supply is the configured starting point.
pub fn supply_delta(bundle: &BlockBundle) -> Decimal {
    if bundle.height == 0 {
        return Decimal::ZERO;
    }
    match &bundle.header {
        BlockHeader::Bitcoin(_) => bitcoin_subsidy(bundle.height),
        BlockHeader::Ethereum(header) => {
            header.block_reward + header.uncles_reward - header.burnt_fees
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use chainpump_ingestion::model::{BitcoinBlockHeader, EthereumBlockHeader};
    use chrono::Utc;
    use std::str::FromStr;

    fn bundle(height: u64, header: BlockHeader) -> BlockBundle {
        BlockBundle {
            chain: "TEST".to_string(),
            height,
            hash: format!("h{}", height),
            parent_hash: None,
            timestamp: Utc::now(),
            header,
            transactions: Vec::new(),
        }
    }

    #[test]
    fn subsidy_halves_every_interval() {
        assert_eq!(bitcoin_subsidy(1), Decimal::from(50));
        assert_eq!(bitcoin_subsidy(209_999), Decimal::from(50));
        assert_eq!(bitcoin_subsidy(210_000), Decimal::from(25));
        assert_eq!(bitcoin_subsidy(630_000), Decimal::from_str("6.25").unwrap());
        assert_eq!(bitcoin_subsidy(840_000), Decimal::from_str("3.125").unwrap());
        assert_eq!(bitcoin_subsidy(64 * 210_000), Decimal::ZERO);
    }

    #[test]
    fn ethereum_delta_nets_out_the_burn() {
        let header = BlockHeader::Ethereum(EthereumBlockHeader {
            miner: "0xminer".to_string(),
            gas_used: U256::from(21_000u64),
            base_fee_per_gas: Some(U256::from(1u64)),
            uncle_count: 1,
            block_reward: Decimal::from(2),
            uncles_reward: Decimal::from_str("1.5625").unwrap(),
            burnt_fees: Decimal::from_str("0.25").unwrap(),
        });
        assert_eq!(
            supply_delta(&bundle(12_000_000, header)),
            Decimal::from_str("3.3125").unwrap()
        );
    }

    #[test]
    fn genesis_has_no_delta() {
        let header = BlockHeader::Bitcoin(BitcoinBlockHeader {
            tx_count: 1,
            coinbase_output: Decimal::from(50),
        });
        assert_eq!(supply_delta(&bundle(0, header)), Decimal::ZERO);
    }
}
