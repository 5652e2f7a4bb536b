//! Wallet error types.

use flash_core::error::{
    AddressError, CompileError, InvariantError, NetworkError, SignError, TransactionError,
};
use flash_core::types::TokenId;
use thiserror::Error;

/// Errors that can occur while building and signing transactions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Missing or unreadable configuration, e.g. no mnemonic.
    #[error("configuration: {0}")]
    Config(String),

    /// Chain data provider failure.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Key derivation failure.
    #[error("key derivation: {0}")]
    Derivation(String),

    /// Address encoding or decoding failure.
    #[error(transparent)]
    Encoding(#[from] AddressError),

    /// Candidate boxes cannot reach the value target.
    #[error("insufficient funds: short by {shortfall} nanoErg")]
    InsufficientFunds {
        /// `target - sum(candidates)`.
        shortfall: u64,
    },

    /// Candidate boxes cannot cover a token target.
    #[error("insufficient tokens {token_id}: short by {shortfall}")]
    InsufficientTokens { token_id: TokenId, shortfall: u64 },

    /// The selector would have emitted the same box twice.
    #[error("duplicate selection of box {0}")]
    DuplicateSelection(String),

    /// Inputs cannot pay for the outputs plus fee.
    #[error("insufficient inputs: have {have}, need {need}")]
    InsufficientInputs { have: u64, need: u64 },

    /// Assembly would destroy value or break token conservation.
    #[error("build error: {0}")]
    Build(String),

    /// Covenant box shape or successor rejected.
    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Sign(#[from] SignError),
}

impl WalletError {
    /// Name of the pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            WalletError::Config(_) => "config",
            WalletError::Derivation(_) | WalletError::Encoding(_) => "derivation",
            WalletError::Network(_) => "fetch",
            WalletError::InsufficientFunds { .. }
            | WalletError::InsufficientTokens { .. }
            | WalletError::DuplicateSelection(_) => "selection",
            WalletError::InsufficientInputs { .. } | WalletError::Build(_) => "assembly",
            WalletError::Invariant(_) => "covenant",
            WalletError::Compile(_) => "compile",
            WalletError::Sign(_) => "signing",
        }
    }
}

impl From<TransactionError> for WalletError {
    fn from(e: TransactionError) -> Self {
        WalletError::Build(e.to_string())
    }
}
