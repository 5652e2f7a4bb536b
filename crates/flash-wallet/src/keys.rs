//! Wallet identity: deterministic key and address from a mnemonic.
//!
//! The key is derived with BIP-32 over secp256k1 at the fixed path
//! `m/44'/429'/0'/0/0`, so the same phrase restores the same address in any
//! Ergo wallet that follows EIP-3.

use std::fmt;

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::NetworkKind;
use secp256k1::{Keypair, SecretKey};
use tracing::debug;

use flash_core::address::{Address, Network};
use flash_core::constants::DERIVATION_PATH;
use flash_core::crypto::PublicKey;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::mnemonic::mnemonic_to_seed;

/// The wallet's single key and its public address.
///
/// The secret key never leaves this type except as a [`Keypair`] handed to
/// the signer, and is erased on drop.
pub struct WalletIdentity {
    secret: SecretKey,
    public_key: PublicKey,
    address: Address,
    derivation_path: DerivationPath,
}

/// Read the secret from `config` and derive the wallet identity.
///
/// Fails with [`WalletError::Config`] when no mnemonic is configured. Makes
/// no network or disk access.
pub fn init_wallet(config: &WalletConfig) -> Result<WalletIdentity, WalletError> {
    let phrase = config
        .mnemonic
        .as_ref()
        .ok_or_else(|| WalletError::Config("no wallet mnemonic configured".into()))?;
    let identity = WalletIdentity::from_mnemonic(phrase, &config.mnemonic_password, config.network)?;
    debug!(address = %identity.address, network = %config.network, "wallet initialized");
    Ok(identity)
}

impl WalletIdentity {
    /// Derive from a BIP-39 phrase and passphrase.
    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        network: Network,
    ) -> Result<Self, WalletError> {
        let seed = mnemonic_to_seed(phrase, passphrase)?;
        Self::from_seed(&seed[..], network)
    }

    /// Derive from a raw BIP-32 seed.
    pub fn from_seed(seed: &[u8], network: Network) -> Result<Self, WalletError> {
        let path: DerivationPath = DERIVATION_PATH
            .parse()
            .map_err(|e| WalletError::Derivation(format!("derivation path: {e}")))?;

        let secp = bitcoin::secp256k1::Secp256k1::signing_only();
        let master = Xpriv::new_master(NetworkKind::Main, seed)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let child = master
            .derive_priv(&secp, &path)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;

        let secret = SecretKey::from_slice(&child.private_key.secret_bytes())
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let public_key = PublicKey::from(secret.public_key(secp256k1::SECP256K1));
        let address = Address::p2pk(public_key, network);

        Ok(Self {
            secret,
            public_key,
            address,
            derivation_path: path,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn network(&self) -> Network {
        self.address.network()
    }

    pub fn derivation_path(&self) -> &DerivationPath {
        &self.derivation_path
    }

    /// Signing keypair holding a copy of the secret. Only the signer calls
    /// this, and it erases the copy right after producing each proof.
    pub(crate) fn keypair(&self) -> Keypair {
        Keypair::from_secret_key(secp256k1::SECP256K1, &self.secret)
    }
}

impl Drop for WalletIdentity {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletIdentity")
            .field("secret", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .field("address", &self.address.to_string())
            .field("derivation_path", &self.derivation_path.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn deterministic_derivation() {
        let a = WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet).unwrap();
        let b = WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn mainnet_address_prefix() {
        let id = WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet).unwrap();
        let encoded = id.address().to_string();
        assert!(encoded.starts_with('9'), "got {encoded}");
        assert_eq!(Address::decode(&encoded).unwrap(), *id.address());
    }

    #[test]
    fn network_changes_address_not_key() {
        let main = WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet).unwrap();
        let test = WalletIdentity::from_mnemonic(PHRASE, "", Network::Testnet).unwrap();
        assert_eq!(main.public_key(), test.public_key());
        assert_ne!(main.address().to_string(), test.address().to_string());
    }

    #[test]
    fn passphrase_changes_key() {
        let a = WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet).unwrap();
        let b = WalletIdentity::from_mnemonic(PHRASE, "pass", Network::Mainnet).unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn init_without_secret_is_config_error() {
        let err = init_wallet(&WalletConfig::default()).unwrap_err();
        assert!(matches!(err, WalletError::Config(_)));
        assert_eq!(err.stage(), "config");
    }

    #[test]
    fn init_with_bad_phrase_is_derivation_error() {
        let cfg = WalletConfig::default().with_mnemonic("not a real phrase at all");
        assert!(matches!(init_wallet(&cfg), Err(WalletError::Derivation(_))));
    }

    #[test]
    fn keypair_matches_public_key() {
        let id = WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet).unwrap();
        assert_eq!(PublicKey::from(id.keypair().public_key()), *id.public_key());
    }

    #[test]
    fn debug_redacts_secret() {
        let id = WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet).unwrap();
        let printed = format!("{id:?}");
        assert!(printed.contains("[REDACTED]"));
        assert!(printed.contains("44'/429'/0'/0/0"));
    }
}
