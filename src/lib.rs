// src/lib.rs
//! Builds, prices and submits ERC-4337 user operations for a smart account
//! that pays gas in an ERC-20 token through a token paymaster.

pub mod account;
pub mod builder;
pub mod bundler;
pub mod chain;
pub mod config;
pub mod encoder;
pub mod error;
pub mod paymaster;
pub mod pipeline;
pub mod rpc;
pub mod types;

#[cfg(test)]
mod testing;

pub use crate::account::{AccountConfig, AccountContext, ValidationScheme};
pub use crate::error::{PipelineError, RunFailure, Stage};
pub use crate::paymaster::{FeeNegotiator, FeeService, PreferSymbol, QuoteSelector};
pub use crate::pipeline::{Pipeline, PipelineConfig, RunReport, SenderLocks};
pub use crate::types::{Call, FeeQuote, PaymasterAuthorization, UserOperation};
