// src/account.rs
use std::time::Duration;

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H160, H256, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use tracing::{debug, info};

use crate::chain::ChainReader;
use crate::encoder::{encode_counterfactual_address_query, encode_deploy_account, encode_module_setup};
use crate::error::{bounded, PipelineError};
use crate::types::UserOperation;

/// ERC-4337 EntryPoint v0.6, deployed at the same address on every EVM chain.
pub const ENTRY_POINT_V06: Address = H160([
    0x5f, 0xf1, 0x37, 0xd4, 0xb0, 0xfd, 0xcd, 0x49, 0xdc, 0xa3, 0x0c, 0x7c, 0xf5, 0x7e, 0x57, 0x8a, 0x02, 0x6d,
    0x27, 0x89,
]);

pub const DEFAULT_ACCOUNT_FACTORY: Address = H160([
    0x00, 0x00, 0x00, 0xa5, 0x6a, 0xac, 0xa3, 0xe9, 0xa4, 0xc4, 0x79, 0xea, 0x6b, 0x6c, 0xd0, 0xdb, 0xcb, 0x66,
    0x34, 0xf5,
]);

pub const DEFAULT_ECDSA_MODULE: Address = H160([
    0x00, 0x00, 0x00, 0x1c, 0x5b, 0x32, 0xf3, 0x7f, 0x5b, 0xea, 0x87, 0xbd, 0xd5, 0x37, 0x4e, 0xb2, 0xac, 0x54,
    0xea, 0x8e,
]);

// Size-realistic placeholder signature used while the operation is quoted and
// authorized, before the owner signs it.
const DUMMY_ECDSA_SIGNATURE: &str = "73c3ac716c487ca34bb858247b5ccf1dc354fbaabdd089af3b2ac8e78ba85a4959a2d76250325bd67c11771c31fccda87c33ceec17cc0de912690521bb95ffcb1b";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub entry_point: Address,
    pub factory: Address,
    pub validation_module: Address,
    pub index: U256,
    /// When set, the account address is computed locally with CREATE2
    /// instead of asking the factory.
    pub proxy_init_code_hash: Option<H256>,
    /// Bound on the factory address lookup.
    pub lookup_timeout: Duration,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            entry_point: ENTRY_POINT_V06,
            factory: DEFAULT_ACCOUNT_FACTORY,
            validation_module: DEFAULT_ECDSA_MODULE,
            index: U256::zero(),
            proxy_init_code_hash: None,
            lookup_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    EcdsaOwnership,
}

/// The validation module the account checks signatures with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationScheme {
    pub kind: ValidationKind,
    pub module: Address,
}

impl ValidationScheme {
    pub fn ecdsa(module: Address) -> Self {
        Self {
            kind: ValidationKind::EcdsaOwnership,
            module,
        }
    }

    /// The account expects `abi.encode(bytes signature, address module)`.
    pub fn wrap_signature(&self, signature: &[u8]) -> Bytes {
        encode(&[Token::Bytes(signature.to_vec()), Token::Address(self.module)]).into()
    }

    pub fn dummy_signature(&self) -> Bytes {
        let raw = hex::decode(DUMMY_ECDSA_SIGNATURE).unwrap_or_else(|_| vec![0u8; 65]);
        self.wrap_signature(&raw)
    }
}

/// Parses owner key material into a signer bound to `chain_id`.
pub fn wallet_from_key(private_key: &str, chain_id: u64) -> Result<LocalWallet, PipelineError> {
    let key = private_key.trim();
    if key.is_empty() {
        return Err(PipelineError::Identity("no signer key material provided".to_string()));
    }
    let wallet = key
        .strip_prefix("0x")
        .unwrap_or(key)
        .parse::<LocalWallet>()
        .map_err(|e| PipelineError::Identity(format!("malformed signer key: {e}")))?;
    Ok(wallet.with_chain_id(chain_id))
}

/// The signer, its smart account and the validation scheme, resolved once
/// per run and read-only afterwards.
#[derive(Debug, Clone)]
pub struct AccountContext<S> {
    signer: S,
    owner: Address,
    chain_id: u64,
    smart_account: Address,
    scheme: ValidationScheme,
    config: AccountConfig,
    module_setup_data: Bytes,
}

impl<S: Signer> AccountContext<S> {
    /// Resolves the counterfactual smart account address for `signer`.
    ///
    /// With `proxy_init_code_hash` configured this is a pure computation;
    /// otherwise the factory is asked through a read-only call.
    pub async fn resolve(
        signer: S,
        chain_id: u64,
        config: AccountConfig,
        chain: &dyn ChainReader,
    ) -> Result<Self, PipelineError> {
        let owner = signer.address();
        if owner.is_zero() {
            return Err(PipelineError::Identity("signer produced the zero address".to_string()));
        }
        let module_setup_data = encode_module_setup(owner);

        let smart_account = match config.proxy_init_code_hash {
            Some(init_code_hash) => {
                counterfactual_address(config.factory, &module_setup_data, config.index, init_code_hash)
            }
            None => {
                let query =
                    encode_counterfactual_address_query(config.validation_module, &module_setup_data, config.index);
                let output = bounded(config.lookup_timeout, chain.call(config.factory, query), PipelineError::Identity)
                    .await
                    .map_err(|e| match e {
                        PipelineError::Identity(msg) => {
                            PipelineError::Identity(format!("factory address lookup {msg}"))
                        }
                        other => PipelineError::Identity(format!("factory address lookup failed: {other}")),
                    })?;
                decode_address(&output)?
            }
        };

        info!("Resolved smart account {} for owner {}", smart_account, owner);

        Ok(Self {
            signer,
            owner,
            chain_id,
            smart_account,
            scheme: ValidationScheme::ecdsa(config.validation_module),
            config,
            module_setup_data,
        })
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn address(&self) -> Address {
        self.smart_account
    }

    pub fn entry_point(&self) -> Address {
        self.config.entry_point
    }

    pub fn scheme(&self) -> ValidationScheme {
        self.scheme
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// `factory ‖ deployCounterFactualAccount(...)`, for the first operation
    /// of an undeployed account.
    pub fn init_code(&self) -> Bytes {
        let call = encode_deploy_account(self.config.validation_module, &self.module_setup_data, self.config.index);
        let mut init_code = self.config.factory.as_bytes().to_vec();
        init_code.extend_from_slice(&call);
        init_code.into()
    }

    pub async fn is_deployed(&self, chain: &dyn ChainReader) -> Result<bool, PipelineError> {
        let code = chain.code_at(self.smart_account).await?;
        debug!("Smart account {} code size {}", self.smart_account, code.len());
        Ok(!code.is_empty())
    }

    pub fn user_op_hash(&self, op: &UserOperation) -> H256 {
        op.hash(self.config.entry_point, self.chain_id)
    }

    /// Signs the operation hash with the owner key and wraps it for the
    /// validation module.
    pub async fn sign_operation(&self, op: &UserOperation) -> Result<Bytes, PipelineError> {
        let hash = self.user_op_hash(op);
        let signature = self
            .signer
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| PipelineError::Identity(format!("signer failed: {e}")))?;
        Ok(self.scheme.wrap_signature(&signature.to_vec()))
    }
}

/// CREATE2 address of the account proxy:
/// `salt = keccak256(keccak256(setupData) ‖ index)`.
pub fn counterfactual_address(
    factory: Address,
    module_setup_data: &Bytes,
    index: U256,
    proxy_init_code_hash: H256,
) -> Address {
    let mut salt_input = keccak256(module_setup_data).to_vec();
    let mut index_word = [0u8; 32];
    index.to_big_endian(&mut index_word);
    salt_input.extend_from_slice(&index_word);
    let salt = keccak256(salt_input);
    get_create2_address_from_hash(factory, salt, proxy_init_code_hash)
}

fn decode_address(output: &Bytes) -> Result<Address, PipelineError> {
    match decode(&[ParamType::Address], output) {
        Ok(tokens) => match tokens.first() {
            Some(Token::Address(address)) if !address.is_zero() => Ok(*address),
            _ => Err(PipelineError::Identity("factory returned no account address".to_string())),
        },
        Err(e) => Err(PipelineError::Identity(format!("cannot decode factory response: {e}"))),
    }
}
