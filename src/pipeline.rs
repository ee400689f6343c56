// src/pipeline.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use ethers::signers::Signer;
use ethers::types::{Address, H256};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info};

use crate::account::AccountContext;
use crate::builder::{GasDefaults, OperationBuilder};
use crate::bundler::Submitter;
use crate::chain::ChainReader;
use crate::error::{bounded, PipelineError, RunFailure, Stage};
use crate::paymaster::FeeNegotiator;
use crate::types::{Call, OperationState, UserOperation, UserOperationReceipt};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub preferred_token: Option<Address>,
    pub max_approval: bool,
    pub calculate_gas_limits: bool,
    pub step_timeout: Duration,
    pub gas: GasDefaults,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preferred_token: None,
            max_approval: false,
            calculate_gas_limits: true,
            step_timeout: Duration::from_secs(30),
            gas: GasDefaults::default(),
        }
    }
}

static SENDER_LOCKS: OnceLock<Arc<SenderLocks>> = OnceLock::new();

/// Serializes runs per sender so two runs never read the same nonce.
#[derive(Debug, Default)]
pub struct SenderLocks {
    locks: Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl SenderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry every `Pipeline` uses unless given its own.
    pub fn global() -> Arc<SenderLocks> {
        SENDER_LOCKS.get_or_init(|| Arc::new(SenderLocks::new())).clone()
    }

    pub async fn acquire(&self, sender: Address) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only the map still references are neither held nor awaited.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(sender).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Senders with a run holding or waiting for their lock.
    pub fn tracked_senders(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}

/// Outcome of a run that reached inclusion.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub user_op_hash: H256,
    pub fee_token_symbol: String,
    pub final_op: UserOperation,
    pub receipt: UserOperationReceipt,
}

/// Build, price, authorize and submit one operation, in that order.
pub struct Pipeline {
    chain: Arc<dyn ChainReader>,
    negotiator: FeeNegotiator,
    submitter: Submitter,
    locks: Arc<SenderLocks>,
    config: PipelineConfig,
}

fn abort(stage: Stage, error: PipelineError, last_state: Option<OperationState>) -> RunFailure {
    error!("Run aborted during {}: {}", stage, error);
    RunFailure::new(stage, error, last_state)
}

impl Pipeline {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        negotiator: FeeNegotiator,
        submitter: Submitter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            chain,
            negotiator,
            submitter,
            locks: SenderLocks::global(),
            config,
        }
    }

    /// Uses a private lock registry instead of the process-wide one.
    pub fn with_sender_locks(mut self, locks: Arc<SenderLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Runs the whole sequence for `calls` and waits for inclusion.
    ///
    /// Dropping the returned future before submission sends nothing; any
    /// paymaster authorization already issued simply expires.
    pub async fn run<S: Signer>(
        &self,
        account: &AccountContext<S>,
        calls: &[Call],
    ) -> Result<RunReport, RunFailure> {
        let _sender_guard = self.locks.acquire(account.address()).await;

        let builder = OperationBuilder::new(self.chain.as_ref(), self.config.gas);
        let partial = bounded(
            self.config.step_timeout,
            builder.build_partial(account, calls),
            PipelineError::Provider,
        )
        .await
        .map_err(|e| abort(Stage::Build, e, None))?;
        let partial_state = || Some(OperationState::Partial(partial.op.clone()));

        let quote_set = self
            .negotiator
            .get_quotes(&partial, self.config.preferred_token)
            .await
            .map_err(|e| abort(Stage::Quote, e, partial_state()))?;
        let quote = self
            .negotiator
            .select(&quote_set.quotes)
            .map_err(|e| abort(Stage::Selection, e, partial_state()))?
            .clone();
        let spender = quote_set.spender.ok_or_else(|| {
            abort(
                Stage::Quote,
                PipelineError::QuoteUnavailable("fee service named no token paymaster".to_string()),
                partial_state(),
            )
        })?;

        let priced = self
            .negotiator
            .attach_token_payment(&partial, &quote, spender, self.config.max_approval)
            .map_err(|e| abort(Stage::TokenPayment, e, partial_state()))?;

        let final_op = self
            .negotiator
            .authorize(&priced, self.config.calculate_gas_limits)
            .await
            .map_err(|e| abort(Stage::Authorization, e, Some(OperationState::Priced(priced.op.clone()))))?;
        let final_snapshot = final_op.op.clone();

        let signed = self
            .submitter
            .sign(account, final_op)
            .await
            .map_err(|e| abort(Stage::Signing, e, Some(OperationState::Final(final_snapshot))))?;
        let signed_snapshot = signed.clone();

        let submitted = self
            .submitter
            .send(account, signed)
            .await
            .map_err(|e| abort(Stage::Submission, e, Some(OperationState::Final(signed_snapshot))))?;

        let receipt = submitted
            .wait()
            .await
            .map_err(|e| abort(Stage::Confirmation, e, Some(OperationState::Final(submitted.op.clone()))))?;

        if let Some(inclusion) = &receipt.receipt {
            info!("Included in transaction {:?}", inclusion.transaction_hash);
        }

        Ok(RunReport {
            user_op_hash: submitted.user_op_hash,
            fee_token_symbol: quote.symbol,
            final_op: submitted.op,
            receipt,
        })
    }
}
