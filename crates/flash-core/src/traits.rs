//! Collaborator interfaces.
//!
//! - [`ChainDataProvider`]: unspent boxes and chain height (explorer client
//!   in `flash-cli`, mock chain in `flash-tests`)
//! - [`CovenantCompiler`]: policy source to covenant address (node client in
//!   `flash-cli`, deterministic compiler in `flash-tests`)
//!
//! Both are network-bound, so they are async. Failures are terminal for the
//! invocation; implementations do not retry.

use async_trait::async_trait;

use crate::address::{Address, Network};
use crate::error::{CompileError, NetworkError};
use crate::types::UnspentBox;

/// Read-only view of the chain.
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// All unspent boxes locked to `address`.
    async fn fetch_unspent_boxes(&self, address: &Address) -> Result<Vec<UnspentBox>, NetworkError>;

    /// Height of the current chain tip.
    async fn fetch_latest_height(&self) -> Result<u32, NetworkError>;
}

/// Compiles covenant source to a pay-to-script address.
///
/// Must be deterministic for a fixed source and network.
#[async_trait]
pub trait CovenantCompiler: Send + Sync {
    async fn compile(&self, source: &str, network: Network) -> Result<Address, CompileError>;
}
