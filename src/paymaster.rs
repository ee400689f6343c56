// src/paymaster.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tracing::{debug, error, info};

use crate::encoder::{encode_account_calls, encode_erc20_approve};
use crate::error::{bounded, PipelineError};
use crate::rpc::{
    FeeQuoteParams, PaymasterApiClient, PaymasterMode, QuoteTokenInfo, SmartAccountInfo, SponsorParams,
    SponsorTokenInfo,
};
use crate::types::{
    Call, FeeQuote, FeeQuotesResponse, FinalUserOp, PartialUserOp, PaymasterAuthorization, PricedUserOp,
    UserOperation,
};

/// Extra call gas for the approval prepended to the account's calls.
pub const TOKEN_APPROVAL_GAS: u64 = 50_000;

/// The paymaster pricing and authorization service.
#[async_trait]
pub trait FeeService: Send + Sync {
    async fn get_quotes(
        &self,
        op: &UserOperation,
        token_list: &[Address],
        preferred_token: Option<Address>,
    ) -> Result<FeeQuotesResponse, PipelineError>;

    async fn get_authorization(
        &self,
        op: &UserOperation,
        fee_token: Address,
        calculate_gas_limits: bool,
    ) -> Result<PaymasterAuthorization, PipelineError>;
}

/// JSON-RPC client for a token paymaster service.
pub struct PaymasterClient {
    client: HttpClient,
    account_info: SmartAccountInfo,
}

impl PaymasterClient {
    pub fn new(paymaster_url: &str, request_timeout: Duration) -> Result<Self, PipelineError> {
        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .build(paymaster_url)
            .map_err(|e| PipelineError::QuoteUnavailable(format!("invalid paymaster url: {e}")))?;
        Ok(Self {
            client,
            account_info: SmartAccountInfo::default(),
        })
    }

    pub fn with_account_info(mut self, account_info: SmartAccountInfo) -> Self {
        self.account_info = account_info;
        self
    }
}

#[async_trait]
impl FeeService for PaymasterClient {
    async fn get_quotes(
        &self,
        op: &UserOperation,
        token_list: &[Address],
        preferred_token: Option<Address>,
    ) -> Result<FeeQuotesResponse, PipelineError> {
        let params = FeeQuoteParams {
            mode: PaymasterMode::Erc20,
            token_info: QuoteTokenInfo {
                token_list: token_list.to_vec(),
                preferred_token,
            },
        };
        debug!("Requesting fee quotes for sender {}", op.sender);
        self.client
            .get_fee_quote_or_data(op.clone(), params)
            .await
            .map_err(|e| PipelineError::QuoteUnavailable(e.to_string()))
    }

    async fn get_authorization(
        &self,
        op: &UserOperation,
        fee_token: Address,
        calculate_gas_limits: bool,
    ) -> Result<PaymasterAuthorization, PipelineError> {
        let params = SponsorParams {
            mode: PaymasterMode::Erc20,
            calculate_gas_limits,
            token_info: SponsorTokenInfo {
                fee_token_address: fee_token,
            },
            smart_account_info: self.account_info.clone(),
        };
        debug!("Requesting paymaster authorization for sender {}", op.sender);
        self.client
            .sponsor_user_operation(op.clone(), params)
            .await
            .map_err(|e| PipelineError::Authorization(e.to_string()))
    }
}

/// Picks one quote out of those the fee service returned.
pub trait QuoteSelector: Send + Sync {
    fn select<'a>(&self, quotes: &'a [FeeQuote]) -> Option<&'a FeeQuote>;
}

/// Takes the quote for one token symbol when offered, otherwise the first
/// quote in the order the service returned them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferSymbol(pub String);

impl Default for PreferSymbol {
    fn default() -> Self {
        Self("USDC".to_string())
    }
}

impl QuoteSelector for PreferSymbol {
    fn select<'a>(&self, quotes: &'a [FeeQuote]) -> Option<&'a FeeQuote> {
        quotes
            .iter()
            .find(|quote| quote.symbol == self.0)
            .or_else(|| quotes.first())
    }
}

/// Quotes for one operation and the address allowed to pull the fee token.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSet {
    pub quotes: Vec<FeeQuote>,
    pub spender: Option<Address>,
}

/// Drives the two round-trips to the fee service and the token payment in
/// between.
pub struct FeeNegotiator {
    service: Arc<dyn FeeService>,
    selector: Arc<dyn QuoteSelector>,
    token_list: Vec<Address>,
    timeout: Duration,
}

impl FeeNegotiator {
    pub fn new(service: Arc<dyn FeeService>, timeout: Duration) -> Self {
        Self {
            service,
            selector: Arc::new(PreferSymbol::default()),
            token_list: Vec::new(),
            timeout,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn QuoteSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_token_list(mut self, token_list: Vec<Address>) -> Self {
        self.token_list = token_list;
        self
    }

    /// Step A. An empty answer is only an error when no preferred token was
    /// asked for; otherwise selection reports it.
    pub async fn get_quotes(
        &self,
        partial: &PartialUserOp,
        preferred_token: Option<Address>,
    ) -> Result<QuoteSet, PipelineError> {
        let response = bounded(
            self.timeout,
            self.service.get_quotes(&partial.op, &self.token_list, preferred_token),
            PipelineError::QuoteUnavailable,
        )
        .await?;

        if response.fee_quotes.is_empty() && preferred_token.is_none() {
            return Err(PipelineError::QuoteUnavailable(
                "fee service returned no quotes".to_string(),
            ));
        }
        info!("Received {} fee quote(s)", response.fee_quotes.len());

        Ok(QuoteSet {
            quotes: response.fee_quotes,
            // a zero paymaster address is as good as none
            spender: response.token_paymaster_address.filter(|spender| !spender.is_zero()),
        })
    }

    pub fn select<'a>(&self, quotes: &'a [FeeQuote]) -> Result<&'a FeeQuote, PipelineError> {
        let quote = self.selector.select(quotes).ok_or(PipelineError::NoQuoteSelected)?;
        info!("The token that is used to pay is {}", quote.symbol);
        Ok(quote)
    }

    /// Step B. Prepends `approve(spender, amount)` on the fee token to the
    /// operation's calls. Without `max_approval` the amount is exactly the
    /// quoted maximum fee.
    pub fn attach_token_payment(
        &self,
        partial: &PartialUserOp,
        quote: &FeeQuote,
        spender: Address,
        max_approval: bool,
    ) -> Result<PricedUserOp, PipelineError> {
        if spender.is_zero() {
            return Err(PipelineError::QuoteUnavailable("fee service named no token paymaster".to_string()));
        }
        let approval_amount = if max_approval {
            U256::MAX
        } else {
            quote.max_gas_fee_base_units().map_err(PipelineError::Encoding)?
        };

        let mut calls = Vec::with_capacity(partial.calls.len() + 1);
        calls.push(Call::new(quote.token_address, encode_erc20_approve(spender, approval_amount)));
        calls.extend(partial.calls.iter().cloned());

        let mut op = partial.op.clone();
        op.call_data = encode_account_calls(&calls)?;
        op.call_gas_limit = op.call_gas_limit.saturating_add(U256::from(TOKEN_APPROVAL_GAS));

        debug!(
            "Approving {} {} base units to {}",
            approval_amount, quote.symbol, spender
        );

        Ok(PricedUserOp {
            op,
            fee_token: quote.token_address,
            spender,
            approval_amount,
        })
    }

    /// Step C, request only. The operation is not touched.
    pub async fn get_authorization(
        &self,
        priced: &PricedUserOp,
        calculate_gas_limits: bool,
    ) -> Result<PaymasterAuthorization, PipelineError> {
        let auth = bounded(
            self.timeout,
            self.service
                .get_authorization(&priced.op, priced.fee_token, calculate_gas_limits),
            PipelineError::Authorization,
        )
        .await?;
        if auth.paymaster_and_data.is_empty() {
            return Err(PipelineError::Authorization(
                "fee service did not sponsor the operation".to_string(),
            ));
        }
        Ok(auth)
    }

    /// Step C. On failure the priced operation is left as it was and the
    /// error is logged and returned; there is no partial result.
    pub async fn authorize(
        &self,
        priced: &PricedUserOp,
        calculate_gas_limits: bool,
    ) -> Result<FinalUserOp, PipelineError> {
        match self.get_authorization(priced, calculate_gas_limits).await {
            Ok(auth) => Ok(finalize(priced, &auth)),
            Err(e) => {
                error!("Paymaster authorization failed for {}: {}", priced.op.sender, e);
                Err(e)
            }
        }
    }
}

/// Attaches paymaster data and overwrites every gas limit the paymaster
/// returned, since those are the limits it signed over.
pub fn finalize(priced: &PricedUserOp, auth: &PaymasterAuthorization) -> FinalUserOp {
    let mut op = priced.op.clone();
    op.paymaster_and_data = auth.paymaster_and_data.clone();
    op.apply_gas_limits(auth);
    FinalUserOp { op }
}
