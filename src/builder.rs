// src/builder.rs
use ethers::abi::{decode, ParamType, Token};
use ethers::signers::Signer;
use ethers::types::{Bytes, U256};
use tracing::{debug, info};

use crate::account::AccountContext;
use crate::chain::ChainReader;
use crate::encoder::{encode_account_calls, encode_get_nonce};
use crate::error::PipelineError;
use crate::types::{Call, PartialUserOp, UserOperation};

/// Gas limits a partial operation starts with. They only need to be good
/// enough to be quoted; the paymaster supplies the authoritative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasDefaults {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

impl Default for GasDefaults {
    fn default() -> Self {
        Self {
            call_gas_limit: U256::from(500_000),
            verification_gas_limit: U256::from(250_000),
            pre_verification_gas: U256::from(60_000),
        }
    }
}

pub struct OperationBuilder<'a> {
    chain: &'a dyn ChainReader,
    gas: GasDefaults,
    nonce_key: U256,
}

impl<'a> OperationBuilder<'a> {
    pub fn new(chain: &'a dyn ChainReader, gas: GasDefaults) -> Self {
        Self {
            chain,
            gas,
            nonce_key: U256::zero(),
        }
    }

    pub fn with_nonce_key(mut self, nonce_key: U256) -> Self {
        self.nonce_key = nonce_key;
        self
    }

    /// Current EntryPoint nonce of the account for this builder's key.
    pub async fn nonce<S: Signer>(&self, account: &AccountContext<S>) -> Result<U256, PipelineError> {
        let output = self
            .chain
            .call(account.entry_point(), encode_get_nonce(account.address(), self.nonce_key))
            .await?;
        match decode(&[ParamType::Uint(256)], &output) {
            Ok(tokens) => match tokens.first() {
                Some(Token::Uint(nonce)) => Ok(*nonce),
                _ => Err(PipelineError::Provider("EntryPoint returned no nonce".to_string())),
            },
            Err(e) => Err(PipelineError::Provider(format!("cannot decode nonce: {e}"))),
        }
    }

    /// Builds the partial operation for `calls`: call data, nonce, init code
    /// when the account is not deployed yet, current fees, default gas limits
    /// and a placeholder signature.
    pub async fn build_partial<S: Signer>(
        &self,
        account: &AccountContext<S>,
        calls: &[Call],
    ) -> Result<PartialUserOp, PipelineError> {
        let call_data = encode_account_calls(calls)?;
        let nonce = self.nonce(account).await?;
        let init_code = if account.is_deployed(self.chain).await? {
            Bytes::new()
        } else {
            debug!("Smart account {} not deployed, attaching init code", account.address());
            account.init_code()
        };
        let fees = self.chain.gas_fees().await?;

        let op = UserOperation {
            sender: account.address(),
            nonce,
            init_code,
            call_data,
            call_gas_limit: self.gas.call_gas_limit,
            verification_gas_limit: self.gas.verification_gas_limit,
            pre_verification_gas: self.gas.pre_verification_gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            paymaster_and_data: Bytes::new(),
            signature: account.scheme().dummy_signature(),
        };
        info!("Built partial user operation for {} with nonce {}", op.sender, op.nonce);

        Ok(PartialUserOp {
            op,
            calls: calls.to_vec(),
        })
    }
}
