// src/rpc.rs
//! JSON-RPC surfaces of the two network collaborators. Clients are used by
//! the pipeline; the server halves let tests stand up in-process fakes.

use ethers::types::{Address, H256};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use serde::{Deserialize, Serialize};

use crate::types::{FeeQuotesResponse, PaymasterAuthorization, UserOperation, UserOperationReceipt};

/// How the paymaster is paid. Only token payment is driven by this crate;
/// sponsored mode is where the protocol branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymasterMode {
    #[serde(rename = "ERC20")]
    Erc20,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteTokenInfo {
    pub token_list: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_token: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuoteParams {
    pub mode: PaymasterMode,
    pub token_info: QuoteTokenInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorTokenInfo {
    pub fee_token_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartAccountInfo {
    pub name: String,
    pub version: String,
}

impl Default for SmartAccountInfo {
    fn default() -> Self {
        Self {
            name: "BICONOMY".to_string(),
            version: "2.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorParams {
    pub mode: PaymasterMode,
    pub calculate_gas_limits: bool,
    pub token_info: SponsorTokenInfo,
    pub smart_account_info: SmartAccountInfo,
}

#[rpc(server, client, namespace = "pm")]
pub trait PaymasterApi {
    /// Quotes the cost of `user_op` in each supported (or the preferred) token.
    #[method(name = "getFeeQuoteOrData")]
    async fn get_fee_quote_or_data(
        &self,
        user_op: UserOperation,
        quote_params: FeeQuoteParams,
    ) -> RpcResult<FeeQuotesResponse>;

    /// Returns signed paymasterAndData, and the gas limits it covers when
    /// asked to calculate them.
    #[method(name = "sponsorUserOperation")]
    async fn sponsor_user_operation(
        &self,
        user_op: UserOperation,
        sponsor_params: SponsorParams,
    ) -> RpcResult<PaymasterAuthorization>;
}

#[rpc(server, client, namespace = "eth")]
pub trait BundlerApi {
    #[method(name = "sendUserOperation")]
    async fn send_user_operation(&self, user_op: UserOperation, entry_point: Address) -> RpcResult<H256>;

    #[method(name = "getUserOperationReceipt")]
    async fn get_user_operation_receipt(&self, user_op_hash: H256) -> RpcResult<Option<UserOperationReceipt>>;
}
