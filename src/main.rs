// src/main.rs
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use ethers::abi::Token;
use ethers::providers::{Http, Provider};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use token_gas_userop::account::{wallet_from_key, AccountContext};
use token_gas_userop::bundler::{BundlerClient, Submitter};
use token_gas_userop::chain::ChainReader;
use token_gas_userop::config::Args;
use token_gas_userop::encoder::encode_function_call;
use token_gas_userop::error::{bounded, PipelineError};
use token_gas_userop::paymaster::{FeeNegotiator, PaymasterClient};
use token_gas_userop::pipeline::Pipeline;
use token_gas_userop::types::Call;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let provider = Provider::<Http>::try_from(args.rpc_url.as_str())?;
    let chain: Arc<dyn ChainReader> = Arc::new(provider);
    let chain_id = match args.chain_id {
        Some(chain_id) => chain_id,
        None => bounded(args.step_timeout(), chain.chain_id(), PipelineError::Provider).await?,
    };

    let wallet = wallet_from_key(&args.private_key, chain_id)?;
    info!("EOA address: {:?}", ethers::signers::Signer::address(&wallet));

    let account = AccountContext::resolve(wallet, chain_id, args.account_config(), chain.as_ref()).await?;
    info!("The SCW has been created at: {:?}", account.address());
    if !bounded(args.step_timeout(), account.is_deployed(chain.as_ref()), PipelineError::Provider).await? {
        info!("Smart account is not deployed yet; the first operation deploys it");
    }

    let mint = encode_function_call("function safeMint(address _to)", &[Token::Address(account.address())])?;
    let calls = vec![Call::new(args.nft_address, mint)];

    let fee_service = Arc::new(PaymasterClient::new(&args.paymaster_url, args.step_timeout())?);
    let endpoint = Arc::new(BundlerClient::new(&args.bundler_url, args.step_timeout())?);
    let pipeline = Pipeline::new(
        chain.clone(),
        FeeNegotiator::new(fee_service, args.step_timeout()),
        Submitter::new(endpoint, args.step_timeout())
            .with_receipt_polling(args.receipt_timeout(), args.poll_interval()),
        args.pipeline_config(),
    );

    match pipeline.run(&account, &calls).await {
        Ok(report) => {
            info!("userOp Hash: {:?}", report.user_op_hash);
            info!("Gas paid in {}", report.fee_token_symbol);
            println!("{}", serde_json::to_string_pretty(&report.receipt)?);
            info!(
                "Go check your new NFT minted at https://testnets.opensea.io/{:?}",
                account.address()
            );
            Ok(())
        }
        Err(failure) => {
            if let Some(state) = &failure.last_state {
                error!("Last operation state: {:?}", state.operation());
            }
            Err(failure.into())
        }
    }
}
