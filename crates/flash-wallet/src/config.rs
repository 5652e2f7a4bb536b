//! Wallet configuration.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. optional TOML file (`~/.config/flash-loan/config.toml` unless a path is given)
//! 3. `FLASH_*` environment variables (`FLASH_NETWORK`, `FLASH_EXPLORER_URL`, ...)
//! 4. bare `MNEMONIC` / `MNEMONIC_PASSWORD`
//!
//! The mnemonic is the only secret and is wrapped in [`Zeroizing`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use zeroize::Zeroizing;

use flash_core::address::Network;
use flash_core::constants::{DEFAULT_EXPLORER_URL, DEFAULT_NODE_URL, MIN_BOX_VALUE};

use crate::error::WalletError;

/// Resolved wallet configuration.
#[derive(Clone)]
pub struct WalletConfig {
    pub network: Network,
    /// BIP-39 phrase. `None` when no secret is configured.
    pub mnemonic: Option<Zeroizing<String>>,
    /// BIP-39 passphrase; empty by default.
    pub mnemonic_password: Zeroizing<String>,
    pub explorer_url: String,
    pub node_url: String,
    /// nanoErg locked into a new ERG flash-loan box.
    pub loan_principal: u64,
}

#[derive(Deserialize)]
struct RawConfig {
    network: Network,
    mnemonic: Option<String>,
    mnemonic_password: Option<String>,
    explorer_url: String,
    node_url: String,
    loan_principal: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            mnemonic: None,
            mnemonic_password: Zeroizing::new(String::new()),
            explorer_url: DEFAULT_EXPLORER_URL.to_string(),
            node_url: DEFAULT_NODE_URL.to_string(),
            loan_principal: MIN_BOX_VALUE,
        }
    }
}

impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("network", &self.network)
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "[REDACTED]"))
            .field("mnemonic_password", &"[REDACTED]")
            .field("explorer_url", &self.explorer_url)
            .field("node_url", &self.node_url)
            .field("loan_principal", &self.loan_principal)
            .finish()
    }
}

impl WalletConfig {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("flash-loan").join("config.toml"))
    }

    /// Load from the process environment and an optional explicit file.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, WalletError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        match path {
            Some(p) => Self::load_from(Some(p), true, &vars),
            None => Self::load_from(Self::default_path().as_deref(), false, &vars),
        }
    }

    /// Load with an explicit environment map.
    pub fn load_from(
        path: Option<&Path>,
        required: bool,
        vars: &HashMap<String, String>,
    ) -> Result<Self, WalletError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("network", defaults.network.name())
            .and_then(|b| b.set_default("explorer_url", defaults.explorer_url.as_str()))
            .and_then(|b| b.set_default("node_url", defaults.node_url.as_str()))
            .and_then(|b| b.set_default("loan_principal", defaults.loan_principal as i64))
            .map_err(config_error)?;

        if let Some(p) = path {
            builder = builder.add_source(
                File::from(p.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }

        let built = builder
            .add_source(
                Environment::with_prefix("FLASH")
                    .source(Some(vars.clone().into_iter().collect())),
            )
            .set_override_option("mnemonic", vars.get("MNEMONIC").cloned())
            .and_then(|b| {
                b.set_override_option("mnemonic_password", vars.get("MNEMONIC_PASSWORD").cloned())
            })
            .map_err(config_error)?
            .build()
            .map_err(config_error)?;

        let raw: RawConfig = built.try_deserialize().map_err(config_error)?;
        Ok(Self {
            network: raw.network,
            mnemonic: raw
                .mnemonic
                .filter(|m| !m.trim().is_empty())
                .map(Zeroizing::new),
            mnemonic_password: Zeroizing::new(raw.mnemonic_password.unwrap_or_default()),
            explorer_url: raw.explorer_url,
            node_url: raw.node_url,
            loan_principal: raw.loan_principal,
        })
    }

    /// Builder-style setter used by callers that hold the phrase directly.
    pub fn with_mnemonic(mut self, phrase: &str) -> Self {
        self.mnemonic = Some(Zeroizing::new(phrase.to_string()));
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }
}

fn config_error(e: config::ConfigError) -> WalletError {
    WalletError::Config(e.to_string())
}
