// src/types.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256, U64};
use ethers::utils::keccak256;
use serde::{Deserialize, Deserializer, Serialize};

/// ERC-4337 (EntryPoint v0.6) user operation, serialized the way bundlers
/// and paymaster services expect it on the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// ABI encoding of every field except the signature, with the dynamic
    /// fields replaced by their hashes.
    pub fn pack_without_signature(&self) -> Bytes {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
        .into()
    }

    /// The hash the account's owner signs: binds the operation to one
    /// EntryPoint on one chain.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let op_hash = keccak256(self.pack_without_signature());
        keccak256(encode(&[
            Token::FixedBytes(op_hash.to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]))
        .into()
    }

    /// Copies any gas limit present in `auth` onto the operation. Absent
    /// limits are left as they are.
    pub fn apply_gas_limits(&mut self, auth: &PaymasterAuthorization) {
        if let Some(call_gas_limit) = auth.call_gas_limit {
            self.call_gas_limit = call_gas_limit;
        }
        if let Some(verification_gas_limit) = auth.verification_gas_limit {
            self.verification_gas_limit = verification_gas_limit;
        }
        if let Some(pre_verification_gas) = auth.pre_verification_gas {
            self.pre_verification_gas = pre_verification_gas;
        }
    }
}

/// A single call the smart account should make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub target: Address,
    pub data: Bytes,
}

impl Call {
    pub fn new(target: Address, data: impl Into<Bytes>) -> Self {
        Self {
            target,
            data: data.into(),
        }
    }
}

/// An operation built from calls, carrying placeholder gas values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialUserOp {
    pub op: UserOperation,
    pub calls: Vec<Call>,
}

/// An operation whose call data includes the token payment to the paymaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedUserOp {
    pub op: UserOperation,
    pub fee_token: Address,
    pub spender: Address,
    pub approval_amount: U256,
}

/// An operation carrying paymaster data and the gas limits the paymaster
/// signed over. Ready to be signed by the account owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalUserOp {
    pub op: UserOperation,
}

/// Snapshot of the operation at the last lifecycle stage a run reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Partial(UserOperation),
    Priced(UserOperation),
    Final(UserOperation),
}

impl OperationState {
    pub fn operation(&self) -> &UserOperation {
        match self {
            OperationState::Partial(op) | OperationState::Priced(op) | OperationState::Final(op) => op,
        }
    }
}

/// A priced offer from the fee service for paying gas in one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    pub symbol: String,
    pub token_address: Address,
    #[serde(rename = "decimal")]
    pub decimals: u32,
    /// Maximum fee in whole token units.
    pub max_gas_fee: f64,
    #[serde(default, rename = "maxGasFeeUSD", skip_serializing_if = "Option::is_none")]
    pub max_gas_fee_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

impl FeeQuote {
    /// The quoted maximum fee in the token's base units, rounded up.
    ///
    /// Works on the shortest decimal form of the quote so that scaling by
    /// `10^decimals` adds no binary rounding error.
    pub fn max_gas_fee_base_units(&self) -> Result<U256, String> {
        if !self.max_gas_fee.is_finite() || self.max_gas_fee < 0.0 {
            return Err(format!("invalid max gas fee {} for {}", self.max_gas_fee, self.symbol));
        }
        let text = self.max_gas_fee.abs().to_string();
        let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
        let decimals = self.decimals as usize;
        let (kept, dropped) = fraction.split_at(fraction.len().min(decimals));

        let digits = format!("{whole}{kept:0<decimals$}");
        let units = U256::from_dec_str(&digits).map_err(|e| e.to_string())?;
        if dropped.bytes().any(|digit| digit != b'0') {
            Ok(units.saturating_add(U256::one()))
        } else {
            Ok(units)
        }
    }
}

/// Result of a quote request: the offers plus the address that will pull the
/// chosen token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuotesResponse {
    #[serde(default)]
    pub fee_quotes: Vec<FeeQuote>,
    #[serde(default)]
    pub token_paymaster_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_tokens: Vec<serde_json::Value>,
}

/// Signed paymaster data, optionally with the gas limits it was signed over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterAuthorization {
    pub paymaster_and_data: Bytes,
    #[serde(default, deserialize_with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub call_gas_limit: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub verification_gas_limit: Option<U256>,
    #[serde(default, deserialize_with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub pre_verification_gas: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionReceipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_number: Option<U64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub receipt: Option<InclusionReceipt>,
}

// Paymaster services report gas values as JSON numbers, hex quantities or
// decimal strings depending on version.
#[derive(Deserialize)]
#[serde(untagged)]
enum Quantity {
    Number(u64),
    Text(String),
}

pub(crate) fn parse_quantity(text: &str) -> Result<U256, String> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16).map_err(|e| format!("{e:?}")),
        None => U256::from_dec_str(text).map_err(|e| e.to_string()),
    }
}

fn opt_quantity<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Quantity>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Quantity::Number(n)) => Ok(Some(U256::from(n))),
        Some(Quantity::Text(text)) => parse_quantity(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
