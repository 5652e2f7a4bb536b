//! # flash-wallet: Ergo wallet for pool and flash-loan covenants.
//!
//! Derives the wallet key from a mnemonic, selects boxes, assembles
//! balanced transactions, builds covenant outputs and signs.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`config`]: layered configuration (file, env, secret)
//! - [`mnemonic`]: BIP-39 parsing and seed stretching
//! - [`keys`]: `WalletIdentity` and BIP-32 derivation
//! - [`box_selection`]: cherry-pick box selection
//! - [`builder`]: `TransactionAssembler`
//! - [`covenant`]: covenant output construction
//! - [`signer`]: `Signer` trait and local Schnorr signer
//! - [`pipeline`]: end-to-end transaction pipelines

pub mod box_selection;
pub mod builder;
pub mod config;
pub mod covenant;
pub mod error;
pub mod keys;
pub mod mnemonic;
pub mod pipeline;
pub mod signer;

// Re-exports for convenient access
pub use box_selection::{BoxSelector, SelectionTarget};
pub use builder::TransactionAssembler;
pub use config::WalletConfig;
pub use covenant::{CovenantOutputBuilder, FundingRequest, LoanAsset};
pub use error::WalletError;
pub use keys::{init_wallet, WalletIdentity};
pub use pipeline::{
    create_flash_loan_transaction, create_pool_top_up_transaction, create_pool_transaction,
    create_redeem_transaction, create_repayment_transaction, FlashContext,
};
pub use signer::{LocalSigner, Signer};
