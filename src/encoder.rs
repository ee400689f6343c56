// src/encoder.rs
//! ABI encoding for target calls, the smart account's execute entry points,
//! and the factory/EntryPoint reads the pipeline performs.

use ethers::abi::{encode, AbiParser, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

use crate::error::PipelineError;
use crate::types::Call;

const EXECUTE: &str = "execute_ncC(address,uint256,bytes)";
const EXECUTE_BATCH: &str = "executeBatch_y6U(address[],uint256[],bytes[])";
const ERC20_APPROVE: &str = "approve(address,uint256)";
const INIT_FOR_SMART_ACCOUNT: &str = "initForSmartAccount(address)";
const DEPLOY_COUNTERFACTUAL: &str = "deployCounterFactualAccount(address,bytes,uint256)";
const GET_COUNTERFACTUAL_ADDRESS: &str = "getAddressForCounterFactualAccount(address,bytes,uint256)";
const GET_NONCE: &str = "getNonce(address,uint192)";

fn with_selector(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(args));
    data.into()
}

/// Encodes a call from a human-readable declaration such as
/// `"function safeMint(address _to)"`.
pub fn encode_function_call(declaration: &str, args: &[Token]) -> Result<Bytes, PipelineError> {
    let function = AbiParser::default()
        .parse_function(declaration)
        .map_err(|e| PipelineError::Encoding(format!("bad function declaration {declaration:?}: {e}")))?;
    let data = function
        .encode_input(args)
        .map_err(|e| PipelineError::Encoding(format!("cannot encode {}: {e}", function.name)))?;
    Ok(data.into())
}

fn check_call(call: &Call) -> Result<(), PipelineError> {
    if call.target.is_zero() {
        return Err(PipelineError::Encoding("call target is the zero address".to_string()));
    }
    Ok(())
}

/// Wraps the calls in the account's `execute_ncC` (one call) or
/// `executeBatch_y6U` (several calls).
pub fn encode_account_calls(calls: &[Call]) -> Result<Bytes, PipelineError> {
    for call in calls {
        check_call(call)?;
    }
    match calls {
        [] => Err(PipelineError::Encoding("at least one call is required".to_string())),
        [call] => Ok(with_selector(
            EXECUTE,
            &[
                Token::Address(call.target),
                Token::Uint(U256::zero()),
                Token::Bytes(call.data.to_vec()),
            ],
        )),
        calls => Ok(with_selector(
            EXECUTE_BATCH,
            &[
                Token::Array(calls.iter().map(|c| Token::Address(c.target)).collect()),
                Token::Array(calls.iter().map(|_| Token::Uint(U256::zero())).collect()),
                Token::Array(calls.iter().map(|c| Token::Bytes(c.data.to_vec())).collect()),
            ],
        )),
    }
}

pub fn encode_erc20_approve(spender: Address, amount: U256) -> Bytes {
    with_selector(ERC20_APPROVE, &[Token::Address(spender), Token::Uint(amount)])
}

/// Setup data handed to the ECDSA ownership module when the account is created.
pub fn encode_module_setup(owner: Address) -> Bytes {
    with_selector(INIT_FOR_SMART_ACCOUNT, &[Token::Address(owner)])
}

fn factory_args(module: Address, setup_data: &Bytes, index: U256) -> [Token; 3] {
    [
        Token::Address(module),
        Token::Bytes(setup_data.to_vec()),
        Token::Uint(index),
    ]
}

pub fn encode_deploy_account(module: Address, setup_data: &Bytes, index: U256) -> Bytes {
    with_selector(DEPLOY_COUNTERFACTUAL, &factory_args(module, setup_data, index))
}

pub fn encode_counterfactual_address_query(module: Address, setup_data: &Bytes, index: U256) -> Bytes {
    with_selector(GET_COUNTERFACTUAL_ADDRESS, &factory_args(module, setup_data, index))
}

pub fn encode_get_nonce(sender: Address, key: U256) -> Bytes {
    with_selector(GET_NONCE, &[Token::Address(sender), Token::Uint(key)])
}
