// src/error.rs
use std::fmt;
use std::future::Future;
use std::time::Duration;

use ethers::types::H256;
use thiserror::Error;

use crate::types::OperationState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Ethereum provider error: {0}")]
    Provider(String),

    #[error("Fee quotes unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("No fee quote could be selected")]
    NoQuoteSelected,

    #[error("Paymaster authorization failed: {0}")]
    Authorization(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("User operation {user_op_hash:?} reverted on-chain: {reason}")]
    ExecutionReverted { user_op_hash: H256, reason: String },
}

/// Pipeline stage an error surfaced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Account,
    Build,
    Quote,
    Selection,
    TokenPayment,
    Authorization,
    Signing,
    Submission,
    Confirmation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Account => "account resolution",
            Stage::Build => "operation build",
            Stage::Quote => "fee quote retrieval",
            Stage::Selection => "fee quote selection",
            Stage::TokenPayment => "token payment enrichment",
            Stage::Authorization => "paymaster authorization",
            Stage::Signing => "operation signing",
            Stage::Submission => "submission",
            Stage::Confirmation => "confirmation",
        };
        f.write_str(name)
    }
}

/// A run that terminated before producing a receipt.
///
/// `last_state` holds the operation as it stood when the run stopped, if one
/// had been built yet.
#[derive(Error, Debug, Clone)]
#[error("{stage}: {error}")]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
    pub last_state: Option<OperationState>,
}

impl RunFailure {
    pub fn new(stage: Stage, error: PipelineError, last_state: Option<OperationState>) -> Self {
        Self {
            stage,
            error,
            last_state,
        }
    }

    /// True when the operation was never handed to the Submission Endpoint.
    ///
    /// A `Submission` failure counts as handed over: a send that timed out or
    /// lost its connection may still have reached the bundler, so the nonce
    /// must be treated as possibly spent.
    pub fn aborted_before_submission(&self) -> bool {
        !matches!(self.stage, Stage::Submission | Stage::Confirmation)
    }
}

/// Bounds one suspension point. Expiry is reported through `on_timeout`, so
/// each stage fails with its own error kind.
pub async fn bounded<T, F>(
    limit: Duration,
    fut: F,
    on_timeout: impl FnOnce(String) -> PipelineError,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!("timed out after {:?}", limit))),
    }
}
