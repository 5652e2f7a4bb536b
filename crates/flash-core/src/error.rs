//! Error types for flash-loan transaction assembly.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("serialization: {0}")] Serialization(String),
    #[error("value overflow")] ValueOverflow,
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("unknown network prefix: {0:#04x}")] UnknownNetwork(u8),
    #[error("unknown network name: {0}")] UnknownNetworkName(String),
    #[error("unsupported address type: {0}")] UnsupportedType(u8),
    #[error("invalid public key")] InvalidPublicKey,
    #[error("network mismatch: expected {expected}, got {got}")] NetworkMismatch { expected: String, got: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("unknown register: {0}")] UnknownRegister(String),
    #[error("unexpected constant type: {0:#04x}")] UnexpectedType(u8),
    #[error("truncated constant")] Truncated,
    #[error("invalid hex: {0}")] InvalidHex(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("unrecognized covenant shape: {asset_count} assets")] UnrecognizedShape { asset_count: usize },
    #[error("identity register {0} missing or malformed")] MissingIdentity(String),
    #[error("successor script differs from spent box script")] ScriptMismatch,
    #[error("successor identity register differs")] IdentityMismatch,
    #[error("successor marker asset differs at index {index}")] MarkerMismatch { index: usize },
    #[error("insufficient return: required {required}, got {got}")] InsufficientReturn { required: u64, got: u64 },
    #[error("loan token missing or differs in successor")] LoanTokenMismatch,
    #[error("no output continues covenant box {0}")] NoSuccessor(String),
    #[error("covenant instance already redeemed")] AlreadyRedeemed,
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request failed: {0}")] Request(String),
    #[error("HTTP status {0}")] Status(u16),
    #[error("invalid response: {0}")] InvalidResponse(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("compiler unavailable: {0}")] Unavailable(String),
    #[error("rejected policy source: {0}")] Rejected(String),
    #[error("compiled address: {0}")] Address(#[from] AddressError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("no key for input {index}")] MissingKey { index: usize },
    #[error("invalid secret key")] InvalidSecretKey,
    #[error("signature verification failed on input {index}")] VerificationFailed { index: usize },
    #[error(transparent)] Transaction(#[from] TransactionError),
}
