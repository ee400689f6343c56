// src/bundler.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::{Address, H256};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::account::AccountContext;
use crate::error::{bounded, PipelineError};
use crate::rpc::BundlerApiClient;
use crate::types::{FinalUserOp, UserOperation, UserOperationReceipt};

/// The bundler network that accepts signed operations.
#[async_trait]
pub trait SubmissionEndpoint: Send + Sync {
    async fn send_operation(&self, op: &UserOperation, entry_point: Address) -> Result<H256, PipelineError>;

    async fn operation_receipt(&self, user_op_hash: H256) -> Result<Option<UserOperationReceipt>, PipelineError>;
}

pub struct BundlerClient {
    client: HttpClient,
}

impl BundlerClient {
    pub fn new(bundler_url: &str, request_timeout: Duration) -> Result<Self, PipelineError> {
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(bundler_url)
            .map_err(|e| PipelineError::Submission(format!("invalid bundler url: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SubmissionEndpoint for BundlerClient {
    async fn send_operation(&self, op: &UserOperation, entry_point: Address) -> Result<H256, PipelineError> {
        self.client
            .send_user_operation(op.clone(), entry_point)
            .await
            .map_err(|e| PipelineError::Submission(e.to_string()))
    }

    async fn operation_receipt(&self, user_op_hash: H256) -> Result<Option<UserOperationReceipt>, PipelineError> {
        self.client
            .get_user_operation_receipt(user_op_hash)
            .await
            .map_err(|e| PipelineError::Submission(e.to_string()))
    }
}

/// Signs final operations and hands them to the submission endpoint. It
/// never resubmits; a retry is a new run with a fresh nonce.
pub struct Submitter {
    endpoint: Arc<dyn SubmissionEndpoint>,
    timeout: Duration,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl Submitter {
    pub fn new(endpoint: Arc<dyn SubmissionEndpoint>, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            receipt_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_receipt_polling(mut self, receipt_timeout: Duration, poll_interval: Duration) -> Self {
        self.receipt_timeout = receipt_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Replaces the placeholder signature with the owner's. Nothing is sent.
    pub async fn sign<S: Signer>(
        &self,
        account: &AccountContext<S>,
        final_op: FinalUserOp,
    ) -> Result<UserOperation, PipelineError> {
        let mut op = final_op.op;
        op.signature = account.sign_operation(&op).await?;
        Ok(op)
    }

    /// Sends an already signed operation once.
    pub async fn send<S: Signer>(
        &self,
        account: &AccountContext<S>,
        op: UserOperation,
    ) -> Result<SubmittedOperation, PipelineError> {
        debug!("Submitting user operation: {:?}", op);

        let user_op_hash = bounded(
            self.timeout,
            self.endpoint.send_operation(&op, account.entry_point()),
            PipelineError::Submission,
        )
        .await
        .map_err(|e| {
            error!("Bundler rejected user operation from {}: {}", op.sender, e);
            e
        })?;
        info!("userOp Hash: {:?}", user_op_hash);

        Ok(SubmittedOperation {
            user_op_hash,
            op,
            endpoint: self.endpoint.clone(),
            receipt_timeout: self.receipt_timeout,
            poll_interval: self.poll_interval,
        })
    }

    /// Signs `final_op` and sends it once. Signing failures are `Identity`
    /// errors and leave the endpoint untouched.
    pub async fn submit<S: Signer>(
        &self,
        account: &AccountContext<S>,
        final_op: FinalUserOp,
    ) -> Result<SubmittedOperation, PipelineError> {
        let op = self.sign(account, final_op).await?;
        self.send(account, op).await
    }
}

/// Handle to an operation the endpoint accepted.
pub struct SubmittedOperation {
    pub user_op_hash: H256,
    pub op: UserOperation,
    endpoint: Arc<dyn SubmissionEndpoint>,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl SubmittedOperation {
    /// Polls for the inclusion receipt. A reverted execution is surfaced as
    /// `ExecutionReverted` and not retried.
    pub async fn wait(&self) -> Result<UserOperationReceipt, PipelineError> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let polled = bounded(
                remaining,
                self.endpoint.operation_receipt(self.user_op_hash),
                PipelineError::Submission,
            )
            .await?;
            if let Some(receipt) = polled {
                if !receipt.success {
                    let reason = receipt
                        .reason
                        .clone()
                        .unwrap_or_else(|| "execution reverted".to_string());
                    warn!("User operation {:?} reverted: {}", self.user_op_hash, reason);
                    return Err(PipelineError::ExecutionReverted {
                        user_op_hash: self.user_op_hash,
                        reason,
                    });
                }
                info!(
                    "User operation {:?} included, gas used {}",
                    self.user_op_hash, receipt.actual_gas_used
                );
                return Ok(receipt);
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(PipelineError::Submission(format!(
                    "no receipt for {:?} within {:?}",
                    self.user_op_hash, self.receipt_timeout
                )));
            }
            sleep(self.poll_interval).await;
        }
    }
}
