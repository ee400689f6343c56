// src/testing.rs
//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::Eip712;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;

use crate::bundler::SubmissionEndpoint;
use crate::chain::{ChainReader, GasFees};
use crate::error::PipelineError;
use crate::paymaster::FeeService;
use crate::types::{FeeQuote, FeeQuotesResponse, PaymasterAuthorization, PartialUserOp, UserOperation, UserOperationReceipt};

pub const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn test_wallet() -> LocalWallet {
    TEST_KEY.parse().unwrap()
}

/// Signer with a known address whose key store cannot be reached.
#[derive(Debug, Clone)]
pub struct UnavailableSigner {
    pub address: Address,
}

impl Default for UnavailableSigner {
    fn default() -> Self {
        Self {
            address: Address::repeat_byte(0x0e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("key store unavailable")]
pub struct KeyStoreUnavailable;

#[async_trait]
impl Signer for UnavailableSigner {
    type Error = KeyStoreUnavailable;

    async fn sign_message<S: Send + Sync + AsRef<[u8]>>(&self, _message: S) -> Result<Signature, Self::Error> {
        Err(KeyStoreUnavailable)
    }

    async fn sign_transaction(&self, _tx: &TypedTransaction) -> Result<Signature, Self::Error> {
        Err(KeyStoreUnavailable)
    }

    async fn sign_typed_data<T: Eip712 + Send + Sync>(&self, _payload: &T) -> Result<Signature, Self::Error> {
        Err(KeyStoreUnavailable)
    }

    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        80001
    }

    fn with_chain_id<T: Into<u64>>(self, _chain_id: T) -> Self {
        self
    }
}

pub fn token_address(symbol: &str) -> Address {
    Address::from_slice(&keccak256(symbol.as_bytes())[12..])
}

pub fn quote(symbol: &str, max_gas_fee: f64) -> FeeQuote {
    FeeQuote {
        symbol: symbol.to_string(),
        token_address: token_address(symbol),
        decimals: 6,
        max_gas_fee,
        max_gas_fee_usd: Some(max_gas_fee),
        exchange_rate: Some(1_000_000.0),
        premium_percentage: None,
        valid_until: None,
        logo_url: None,
    }
}

pub fn partial_op() -> PartialUserOp {
    let call = crate::types::Call::new(Address::repeat_byte(0x42), vec![0x40, 0xd0, 0x97, 0xc3]);
    let calls = vec![call];
    PartialUserOp {
        op: UserOperation {
            sender: Address::repeat_byte(0x11),
            nonce: U256::zero(),
            call_data: crate::encoder::encode_account_calls(&calls).unwrap(),
            call_gas_limit: U256::from(500_000),
            verification_gas_limit: U256::from(250_000),
            pre_verification_gas: U256::from(60_000),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            ..Default::default()
        },
        calls,
    }
}

pub fn receipt(success: bool, reason: Option<&str>) -> UserOperationReceipt {
    UserOperationReceipt {
        user_op_hash: H256::zero(),
        sender: Address::zero(),
        nonce: U256::zero(),
        paymaster: None,
        actual_gas_cost: U256::from(1_000),
        actual_gas_used: U256::from(100_000),
        success,
        reason: reason.map(str::to_string),
        receipt: None,
    }
}

/// Chain answering the factory address query and `getNonce` by selector.
pub struct MockChain {
    pub counterfactual: Address,
    pub nonce: U256,
    pub deployed: bool,
    pub fees: GasFees,
    pub fail_calls: bool,
    pub call_delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            counterfactual: Address::repeat_byte(0x5c),
            nonce: U256::zero(),
            deployed: false,
            fees: GasFees {
                max_fee_per_gas: U256::from(2_000_000_000u64),
                max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            },
            fail_calls: false,
            call_delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockChain {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_calls {
            return Err(PipelineError::Provider("connection refused".to_string()));
        }
        match hex::encode(&data[..4]).as_str() {
            "2e7a1a83" => Ok(encode(&[Token::Address(self.counterfactual)]).into()),
            "35567e1a" => Ok(encode(&[Token::Uint(self.nonce)]).into()),
            other => Err(PipelineError::Provider(format!("unexpected call {other}"))),
        }
    }

    async fn code_at(&self, _address: Address) -> Result<Bytes, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if self.deployed {
            Bytes::from(vec![0x60, 0x80])
        } else {
            Bytes::new()
        })
    }

    async fn gas_fees(&self) -> Result<GasFees, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fees)
    }

    async fn chain_id(&self) -> Result<u64, PipelineError> {
        Ok(80001)
    }
}

pub struct MockFeeService {
    pub quotes: Vec<FeeQuote>,
    pub spender: Option<Address>,
    pub authorization: PaymasterAuthorization,
    pub fail_quotes: bool,
    pub fail_authorization: bool,
    pub authorization_delay: Option<Duration>,
    pub quote_calls: AtomicUsize,
    pub authorization_calls: AtomicUsize,
    pub authorizations_in_flight: AtomicUsize,
    pub max_authorizations_in_flight: AtomicUsize,
    pub last_request: Mutex<Option<(Address, bool)>>,
}

impl Default for MockFeeService {
    fn default() -> Self {
        Self {
            quotes: vec![quote("USDC", 5.0)],
            spender: Some(Address::repeat_byte(0x99)),
            authorization: PaymasterAuthorization {
                paymaster_and_data: Bytes::from(vec![0xaa; 20]),
                ..Default::default()
            },
            fail_quotes: false,
            fail_authorization: false,
            authorization_delay: None,
            quote_calls: AtomicUsize::new(0),
            authorization_calls: AtomicUsize::new(0),
            authorizations_in_flight: AtomicUsize::new(0),
            max_authorizations_in_flight: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }
}

impl MockFeeService {
    pub fn with_quotes(quotes: Vec<FeeQuote>) -> Self {
        Self {
            quotes,
            ..Default::default()
        }
    }

    pub fn with_authorization(authorization: PaymasterAuthorization) -> Self {
        Self {
            authorization,
            ..Default::default()
        }
    }

    pub fn authorizing(mut self, authorization: PaymasterAuthorization) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn authorization_calls(&self) -> usize {
        self.authorization_calls.load(Ordering::SeqCst)
    }

    /// Most authorization requests ever outstanding at once.
    pub fn peak_concurrent_authorizations(&self) -> usize {
        self.max_authorizations_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_fee_token(&self) -> Option<Address> {
        self.last_request.lock().unwrap().map(|(token, _)| token)
    }

    pub fn last_calculate_gas_limits(&self) -> Option<bool> {
        self.last_request.lock().unwrap().map(|(_, calculate)| calculate)
    }
}

#[async_trait]
impl FeeService for MockFeeService {
    async fn get_quotes(
        &self,
        _op: &UserOperation,
        _token_list: &[Address],
        _preferred_token: Option<Address>,
    ) -> Result<FeeQuotesResponse, PipelineError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_quotes {
            return Err(PipelineError::QuoteUnavailable("connection refused".to_string()));
        }
        Ok(FeeQuotesResponse {
            fee_quotes: self.quotes.clone(),
            token_paymaster_address: self.spender,
            unsupported_tokens: vec![],
        })
    }

    async fn get_authorization(
        &self,
        _op: &UserOperation,
        fee_token: Address,
        calculate_gas_limits: bool,
    ) -> Result<PaymasterAuthorization, PipelineError> {
        self.authorization_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some((fee_token, calculate_gas_limits));
        let in_flight = self.authorizations_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_authorizations_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.authorization_delay {
            tokio::time::sleep(delay).await;
        }
        self.authorizations_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_authorization {
            return Err(PipelineError::Authorization("connection reset by peer".to_string()));
        }
        Ok(self.authorization.clone())
    }
}

pub struct MockBundler {
    pub chain_id: u64,
    /// Receipt served once polled enough; its hash is filled in on request.
    pub receipt: Option<UserOperationReceipt>,
    pub receipt_after_polls: usize,
    /// Each receipt poll stalls this long before answering.
    pub receipt_delay: Option<Duration>,
    pub fail_send: bool,
    pub sent: Mutex<Vec<UserOperation>>,
    pub polls: AtomicUsize,
}

impl Default for MockBundler {
    fn default() -> Self {
        Self {
            chain_id: 80001,
            receipt: Some(receipt(true, None)),
            receipt_after_polls: 0,
            receipt_delay: None,
            fail_send: false,
            sent: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }
}

impl MockBundler {
    pub fn sent(&self) -> Vec<UserOperation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionEndpoint for MockBundler {
    async fn send_operation(&self, op: &UserOperation, entry_point: Address) -> Result<H256, PipelineError> {
        if self.fail_send {
            return Err(PipelineError::Submission("bundler unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(op.clone());
        Ok(op.hash(entry_point, self.chain_id))
    }

    async fn operation_receipt(&self, user_op_hash: H256) -> Result<Option<UserOperationReceipt>, PipelineError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.receipt_delay {
            tokio::time::sleep(delay).await;
        }
        if polls < self.receipt_after_polls {
            return Ok(None);
        }
        Ok(self.receipt.clone().map(|mut receipt| {
            receipt.user_op_hash = user_op_hash;
            receipt
        }))
    }
}
