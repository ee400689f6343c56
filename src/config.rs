// src/config.rs
use std::time::Duration;

use clap::Parser;
use ethers::types::{Address, H256, U256};
use tracing::Level;

use crate::account::AccountConfig;
use crate::builder::GasDefaults;
use crate::pipeline::PipelineConfig;

/// Mint an NFT from a smart account, paying gas in an ERC-20 token.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(long, env = "RPC_URL")]
    pub rpc_url: String,

    #[clap(long, env = "BUNDLER_URL")]
    pub bundler_url: String,

    #[clap(long, env = "PAYMASTER_URL")]
    pub paymaster_url: String,

    #[clap(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Fetched from the RPC endpoint when not given.
    #[clap(long, env = "CHAIN_ID")]
    pub chain_id: Option<u64>,

    #[clap(long, env = "NFT_ADDRESS")]
    pub nft_address: Address,

    /// Token to pay gas in.
    #[clap(long = "preferred-token", env = "USDC")]
    pub preferred_token: Option<Address>,

    #[clap(long, env = "ENTRY_POINT", default_value = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789")]
    pub entry_point: Address,

    #[clap(long, env = "ACCOUNT_FACTORY", default_value = "0x000000a56Aaca3e9a4C479ea6b6CD0DbcB6634F5")]
    pub account_factory: Address,

    #[clap(long, env = "ECDSA_MODULE", default_value = "0x0000001c5b32F37F5beA87BDD5374eB2aC54eA8e")]
    pub ecdsa_module: Address,

    #[clap(long, env = "ACCOUNT_INDEX", default_value_t = 0)]
    pub account_index: u64,

    /// Compute the account address locally instead of asking the factory.
    #[clap(long, env = "PROXY_INIT_CODE_HASH")]
    pub proxy_init_code_hash: Option<H256>,

    /// Approve an unbounded allowance instead of this operation's fee.
    #[clap(long, env = "MAX_APPROVAL", default_value_t = false)]
    pub max_approval: bool,

    #[clap(long, env = "STEP_TIMEOUT_SECS", default_value_t = 30)]
    pub step_timeout_secs: u64,

    #[clap(long, env = "RECEIPT_TIMEOUT_SECS", default_value_t = 120)]
    pub receipt_timeout_secs: u64,

    #[clap(long, env = "POLL_INTERVAL_MS", default_value_t = 2000)]
    pub poll_interval_ms: u64,

    #[clap(long, env = "LOG_LEVEL", default_value_t = Level::INFO)]
    pub log_level: Level,
}

impl Args {
    pub fn account_config(&self) -> AccountConfig {
        AccountConfig {
            entry_point: self.entry_point,
            factory: self.account_factory,
            validation_module: self.ecdsa_module,
            index: U256::from(self.account_index),
            proxy_init_code_hash: self.proxy_init_code_hash,
            lookup_timeout: self.step_timeout(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            preferred_token: self.preferred_token,
            max_approval: self.max_approval,
            calculate_gas_limits: true,
            step_timeout: self.step_timeout(),
            gas: GasDefaults::default(),
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
