//! Protocol constants. All monetary values in nanoErg (1 ERG = 10^9 nanoErg).

/// nanoErg per ERG.
pub const NANOERG_PER_ERG: u64 = 1_000_000_000;

/// Smallest value a newly created box may carry.
///
/// Any output below this value is dust and is never created by the assembler.
pub const MIN_BOX_VALUE: u64 = 1_000_000;

/// Fixed transaction fee paid on every assembled transaction.
pub const MIN_FEE: u64 = 1_100_000;

/// Divisor of the flash-loan premium: the borrower returns
/// `amount + amount / FLASH_FEE_DIVISOR` (1 %, floor division).
pub const FLASH_FEE_DIVISOR: u64 = 100;

/// BIP-32 derivation path of the wallet key (EIP-3 change path, index 0).
pub const DERIVATION_PATH: &str = "m/44'/429'/0'/0/0";

/// Length of a compressed secp256k1 point.
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Number of checksum bytes appended to an encoded address.
pub const ADDRESS_CHECKSUM_LENGTH: usize = 4;

/// Default explorer API root.
pub const DEFAULT_EXPLORER_URL: &str = "https://api.ergoplatform.com";

/// Default node REST API root used for covenant compilation.
pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:9053";
