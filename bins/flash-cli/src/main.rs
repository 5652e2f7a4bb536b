//! flash-cli: pool and flash-loan covenant transactions from the command line.
//!
//! Every command derives the wallet from the configured mnemonic, runs one
//! pipeline against the explorer and node, and prints the signed
//! transaction as JSON. Nothing is submitted.

mod explorer;
mod node;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use flash_core::address::Network;
use flash_core::covenant::CovenantPolicy;
use flash_core::types::{BoxId, SignedTransaction, TokenId, UnspentBox};
use flash_wallet::{
    create_flash_loan_transaction, create_pool_top_up_transaction, create_pool_transaction,
    create_redeem_transaction, create_repayment_transaction, init_wallet, FlashContext,
    FundingRequest, LocalSigner, WalletConfig, WalletError, WalletIdentity,
};

use explorer::ExplorerClient;
use node::NodeCompiler;

/// Pool and flash-loan covenant wallet.
#[derive(Parser)]
#[command(name = "flash-cli")]
#[command(version, about = "Build and sign Ergo covenant transactions.")]
struct Cli {
    /// Config file (default: ~/.config/flash-loan/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured network (mainnet or testnet).
    #[arg(short, long, global = true)]
    network: Option<Network>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the wallet address.
    Address,
    /// Create a pool covenant box.
    Pool,
    /// Add a deposit to an existing pool box.
    PoolTopUp(TopUpArgs),
    /// Flash-loan covenant subcommands.
    FlashLoan {
        #[command(subcommand)]
        action: FlashLoanAction,
    },
    /// List unspent boxes at a covenant address.
    Covenants(CovenantsArgs),
}

#[derive(Subcommand)]
enum FlashLoanAction {
    /// Fund a new flash-loan box, minting its marker.
    Fund(FundArgs),
    /// Borrow and repay a funded box in one transaction.
    Repay(BoxArgs),
    /// Redeem an owned box back to the wallet.
    Redeem(BoxArgs),
}

#[derive(Args)]
struct FundArgs {
    /// nanoErg locked in an ERG loan (default: configured loan_principal).
    #[arg(short, long, conflicts_with = "token")]
    principal: Option<u64>,

    /// Lend this token instead of ERG.
    #[arg(short, long, requires = "amount")]
    token: Option<TokenId>,

    /// Token amount to lend.
    #[arg(short, long, requires = "token")]
    amount: Option<u64>,
}

#[derive(Args)]
struct BoxArgs {
    /// Covenant box id (hex).
    #[arg(short, long)]
    box_id: BoxId,
}

#[derive(Args)]
struct TopUpArgs {
    /// Pool box id (hex).
    #[arg(short, long)]
    box_id: BoxId,

    /// nanoErg to add.
    #[arg(short, long)]
    deposit: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum CovenantArg {
    Pool,
    FlashLoan,
}

impl CovenantArg {
    fn policy(self) -> CovenantPolicy {
        match self {
            CovenantArg::Pool => CovenantPolicy::pool(),
            CovenantArg::FlashLoan => CovenantPolicy::flash_loan(),
        }
    }
}

#[derive(Args)]
struct CovenantsArgs {
    #[arg(value_enum)]
    kind: CovenantArg,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<WalletError>() {
                Some(err) => eprintln!("{} failed: {err}", err.stage()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = WalletConfig::load(cli.config.as_deref())?;
    if let Some(network) = cli.network {
        config = config.with_network(network);
    }
    let wallet = init_wallet(&config)?;
    info!(address = %wallet.address(), network = %wallet.network(), "wallet ready");

    let provider = ExplorerClient::new(&config.explorer_url);
    let compiler = NodeCompiler::new(&config.node_url);
    let ctx = FlashContext::new(&provider, &compiler, &LocalSigner);

    let signed = match cli.command {
        Commands::Address => {
            println!("{}", wallet.address());
            return Ok(());
        }
        Commands::Covenants(args) => return list_covenants(&ctx, &wallet, args.kind).await,
        Commands::Pool => create_pool_transaction(&ctx, &wallet).await?,
        Commands::PoolTopUp(args) => {
            let pool = find_box(&ctx, &wallet, CovenantArg::Pool, &args.box_id).await?;
            create_pool_top_up_transaction(&ctx, &wallet, &pool, args.deposit).await?
        }
        Commands::FlashLoan { action } => match action {
            FlashLoanAction::Fund(args) => {
                let request = match (args.token, args.amount) {
                    (Some(token), Some(amount)) => FundingRequest::token(token, amount),
                    (None, None) => {
                        FundingRequest::erg(args.principal.unwrap_or(config.loan_principal))
                    }
                    _ => bail!("--token and --amount must be given together"),
                };
                create_flash_loan_transaction(&ctx, &wallet, &request).await?
            }
            FlashLoanAction::Repay(args) => {
                let b = find_box(&ctx, &wallet, CovenantArg::FlashLoan, &args.box_id).await?;
                create_repayment_transaction(&ctx, &wallet, &b).await?
            }
            FlashLoanAction::Redeem(args) => {
                let b = find_box(&ctx, &wallet, CovenantArg::FlashLoan, &args.box_id).await?;
                create_redeem_transaction(&ctx, &wallet, &b).await?
            }
        },
    };

    print_transaction(&signed)
}

/// Locate an unspent box at the covenant address by id.
async fn find_box(
    ctx: &FlashContext<'_>,
    wallet: &WalletIdentity,
    kind: CovenantArg,
    box_id: &BoxId,
) -> Result<UnspentBox> {
    let boxes = ctx.fetch_covenant_boxes(&kind.policy(), wallet).await?;
    match boxes.into_iter().find(|b| &b.box_id == box_id) {
        Some(b) => Ok(b),
        None => bail!("box {box_id} is not unspent at the {} covenant address", kind.policy().kind),
    }
}

async fn list_covenants(
    ctx: &FlashContext<'_>,
    wallet: &WalletIdentity,
    kind: CovenantArg,
) -> Result<()> {
    let policy = kind.policy();
    let address = ctx.covenant_address(&policy, wallet).await?;
    let boxes = ctx.fetch_covenant_boxes(&policy, wallet).await?;
    println!("{} covenant: {address}", policy.kind);
    for b in &boxes {
        let tokens: Vec<String> = b
            .assets
            .iter()
            .map(|t| format!("{}:{}", t.token_id, t.amount))
            .collect();
        println!("  {} {} nanoErg [{}]", b.box_id, b.value, tokens.join(", "));
    }
    if boxes.is_empty() {
        println!("  (none)");
    }
    Ok(())
}

fn print_transaction(tx: &SignedTransaction) -> Result<()> {
    let json = serde_json::to_string_pretty(tx).context("Failed to encode transaction")?;
    println!("{json}");
    Ok(())
}
