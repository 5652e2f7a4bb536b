//! BIP-39 mnemonic parsing and seed stretching.

use bip39::{Language, Mnemonic};
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Parse a BIP-39 phrase.
///
/// Normalizes whitespace and converts to lowercase before parsing.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    );
    Mnemonic::parse_in(Language::English, normalized.as_str())
        .map_err(|e| WalletError::Derivation(format!("invalid mnemonic: {e}")))
}

/// Stretch a phrase and passphrase into the 64-byte BIP-32 seed.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase)))
}
