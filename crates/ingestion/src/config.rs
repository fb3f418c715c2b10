//! Environment configuration of the pump and supply processes.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::{ChainFamily, ChainInfo};

pub const CHAIN_FAMILY: &str = "CHAIN_FAMILY";
pub const CHAIN_NAME: &str = "CHAIN_NAME";
pub const CHAIN_NODE_URL: &str = "CHAIN_NODE_URL";
pub const KAFKA_BROKERS: &str = "KAFKA_BROKERS";
pub const KAFKA_BROKERS_DEFAULT: &str = "localhost:9092";
pub const BUS_DATABASE_PATH: &str = "BUS_DATABASE_PATH";
pub const BUS_DATABASE_PATH_DEFAULT: &str = "chainpump.db";
pub const START_BLOCK_NUMBER: &str = "START_BLOCK_NUMBER";
pub const BTC_TX_DOWNLOAD_MAX_CONCURRENCY: &str = "BTC_TX_DOWNLOAD_MAX_CONCURRENCY";
pub const BTC_TX_DOWNLOAD_MAX_CONCURRENCY_DEFAULT: usize = 4;
pub const PUMP_MAX_CONCURRENCY: &str = "PUMP_MAX_CONCURRENCY";
pub const PUMP_MAX_CONCURRENCY_DEFAULT: usize = 6;
pub const PUMP_USE_BATCH: &str = "PUMP_USE_BATCH";
pub const PUMP_MAX_RETRIES: &str = "PUMP_MAX_RETRIES";
pub const PUMP_MAX_RETRIES_DEFAULT: u32 = 30;
pub const TIP_POLL_INTERVAL_MS: &str = "TIP_POLL_INTERVAL_MS";
pub const TIP_POLL_INTERVAL_MS_DEFAULT: u64 = 5_000;
pub const WITH_MEMPOOL: &str = "WITH_MEMPOOL";
pub const MEMPOOL_POLL_INTERVAL_MS: &str = "MEMPOOL_POLL_INTERVAL_MS";
pub const MEMPOOL_POLL_INTERVAL_MS_DEFAULT: u64 = 10_000;
pub const GENESIS_SUPPLY: &str = "GENESIS_SUPPLY";
pub const KAFKA_LISTENER_MAX_POLL_RECORDS: &str = "KAFKA_LISTENER_MAX_POLL_RECORDS";
pub const KAFKA_LISTENER_MAX_POLL_RECORDS_DEFAULT: u32 = 500;

/// Everything a pump or supply process reads from its environment.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpConfig {
    pub chain: ChainInfo,
    pub kafka_brokers: String,
    pub bus_database_path: String,
    /// Explicit start height; `None` resumes after the last published block.
    pub start_block_number: Option<u64>,
    pub btc_tx_download_max_concurrency: usize,
    pub pump_max_concurrency: usize,
    pub use_batch: bool,
    /// Consecutive fetch failures tolerated at one height; `None` is unbounded.
    pub max_retries: Option<u32>,
    pub tip_poll_interval: Duration,
    pub with_mempool: bool,
    pub mempool_poll_interval: Duration,
    pub genesis_supply: Decimal,
    pub max_poll_records: u32,
}

impl PumpConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let family: ChainFamily = env.required(CHAIN_FAMILY)?;
        let name = env
            .string(CHAIN_NAME)
            .map(|name| name.to_ascii_uppercase())
            .unwrap_or_else(|| family.as_str().to_string());
        let node_url = env
            .string(CHAIN_NODE_URL)
            .unwrap_or_else(|| family.default_node_url().to_string());

        let max_retries = env.parse(PUMP_MAX_RETRIES)?.unwrap_or(PUMP_MAX_RETRIES_DEFAULT);
        let btc_concurrency = env
            .parse(BTC_TX_DOWNLOAD_MAX_CONCURRENCY)?
            .unwrap_or(BTC_TX_DOWNLOAD_MAX_CONCURRENCY_DEFAULT);
        let pump_concurrency = env
            .parse(PUMP_MAX_CONCURRENCY)?
            .unwrap_or(PUMP_MAX_CONCURRENCY_DEFAULT);

        Ok(Self {
            chain: ChainInfo::new(name, family, node_url),
            kafka_brokers: env
                .string(KAFKA_BROKERS)
                .unwrap_or_else(|| KAFKA_BROKERS_DEFAULT.to_string()),
            bus_database_path: env
                .string(BUS_DATABASE_PATH)
                .unwrap_or_else(|| BUS_DATABASE_PATH_DEFAULT.to_string()),
            start_block_number: env.parse(START_BLOCK_NUMBER)?,
            btc_tx_download_max_concurrency: positive(BTC_TX_DOWNLOAD_MAX_CONCURRENCY, btc_concurrency)?,
            pump_max_concurrency: positive(PUMP_MAX_CONCURRENCY, pump_concurrency)?,
            use_batch: env.flag(PUMP_USE_BATCH)?.unwrap_or(false),
            max_retries: (max_retries > 0).then_some(max_retries),
            tip_poll_interval: Duration::from_millis(
                env.parse(TIP_POLL_INTERVAL_MS)?
                    .unwrap_or(TIP_POLL_INTERVAL_MS_DEFAULT),
            ),
            with_mempool: env.flag(WITH_MEMPOOL)?.unwrap_or(false),
            mempool_poll_interval: Duration::from_millis(
                env.parse(MEMPOOL_POLL_INTERVAL_MS)?
                    .unwrap_or(MEMPOOL_POLL_INTERVAL_MS_DEFAULT),
            ),
            genesis_supply: env.parse(GENESIS_SUPPLY)?.unwrap_or(Decimal::ZERO),
            max_poll_records: env
                .parse(KAFKA_LISTENER_MAX_POLL_RECORDS)?
                .unwrap_or(KAFKA_LISTENER_MAX_POLL_RECORDS_DEFAULT),
        })
    }

    /// Transaction download concurrency for the configured chain family.
    pub fn tx_download_concurrency(&self) -> usize {
        match self.chain.family {
            ChainFamily::Bitcoin => self.btc_tx_download_max_concurrency,
            ChainFamily::Ethereum => self.pump_max_concurrency,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::Invalid {
                    name,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn required<T>(&self, name: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse(name)?.ok_or(ConfigError::Missing(name))
    }

    fn flag(&self, name: &'static str) -> Result<Option<bool>, ConfigError> {
        self.string(name)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    value,
                    reason: "expected a boolean".to_string(),
                }),
            })
            .transpose()
    }
}

fn positive(name: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
