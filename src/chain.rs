// src/chain.rs
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;

use crate::error::PipelineError;

/// EIP-1559 fee values for a new operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Read-only chain access the pipeline needs: contract reads, code lookups
/// and fee data.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, PipelineError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, PipelineError>;

    async fn gas_fees(&self) -> Result<GasFees, PipelineError>;

    async fn chain_id(&self) -> Result<u64, PipelineError>;
}

#[async_trait]
impl<P: JsonRpcClient + 'static> ChainReader for Provider<P> {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, PipelineError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        Middleware::call(self, &tx, None)
            .await
            .map_err(|e| PipelineError::Provider(e.to_string()))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, PipelineError> {
        self.get_code(address, None)
            .await
            .map_err(|e| PipelineError::Provider(e.to_string()))
    }

    async fn gas_fees(&self) -> Result<GasFees, PipelineError> {
        let (max_fee_per_gas, max_priority_fee_per_gas) = self
            .estimate_eip1559_fees(None)
            .await
            .map_err(|e| PipelineError::Provider(e.to_string()))?;
        Ok(GasFees {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn chain_id(&self) -> Result<u64, PipelineError> {
        self.get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(|e| PipelineError::Provider(e.to_string()))
    }
}
