//! Core data model: boxes, tokens, outputs and transactions.
//!
//! All monetary values are in nanoErg (1 ERG = 10^9 nanoErg).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::PUBLIC_KEY_LENGTH;
use crate::crypto::{blake2b256, PublicKey};
use crate::error::{RegisterError, TransactionError};

/// A 32-byte Blake2b-256 digest.
///
/// Used for box ids, token ids and transaction ids.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Digest32(pub [u8; 32]);

impl Digest32 {
    /// Hash arbitrary bytes into a digest.
    pub fn hash(data: &[u8]) -> Self {
        Self(blake2b256(data))
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Digest32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Digest32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Digest32 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest32 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub type BoxId = Digest32;
pub type TokenId = Digest32;
pub type TxId = Digest32;

/// Serialized ErgoTree: the locking script of a box.
#[derive(
    Clone, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct ErgoTree(pub Vec<u8>);

impl ErgoTree {
    /// Prefix of a P2PK tree: header 0x00, SigmaProp constant (0x08), ProveDlog (0xcd).
    const P2PK_PREFIX: [u8; 3] = [0x00, 0x08, 0xcd];

    /// The tree locking a box to a single public key.
    pub fn p2pk(key: &PublicKey) -> Self {
        let mut bytes = Vec::with_capacity(Self::P2PK_PREFIX.len() + PUBLIC_KEY_LENGTH);
        bytes.extend_from_slice(&Self::P2PK_PREFIX);
        bytes.extend_from_slice(key.as_bytes());
        Self(bytes)
    }

    /// The public key if this is a P2PK tree.
    pub fn p2pk_key(&self) -> Option<PublicKey> {
        if self.0.len() != Self::P2PK_PREFIX.len() + PUBLIC_KEY_LENGTH {
            return None;
        }
        let (prefix, key) = self.0.split_at(Self::P2PK_PREFIX.len());
        if prefix != Self::P2PK_PREFIX {
            return None;
        }
        PublicKey::from_slice(key).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ErgoTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErgoTree({})", hex::encode(&self.0))
    }
}

impl Serialize for ErgoTree {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ErgoTree {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(Self).map_err(serde::de::Error::custom)
    }
}

/// An amount of a token carried by a box.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token_id: TokenId,
    pub amount: u64,
}

impl Token {
    pub fn new(token_id: TokenId, amount: u64) -> Self {
        Self { token_id, amount }
    }
}

/// Non-mandatory register slot of a box (R4..R9).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub enum RegisterId {
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for RegisterId {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R4" => Ok(Self::R4),
            "R5" => Ok(Self::R5),
            "R6" => Ok(Self::R6),
            "R7" => Ok(Self::R7),
            "R8" => Ok(Self::R8),
            "R9" => Ok(Self::R9),
            other => Err(RegisterError::UnknownRegister(other.to_string())),
        }
    }
}

/// Register contents: serialized sigma constants by slot.
pub type Registers = BTreeMap<RegisterId, Vec<u8>>;

/// An unspent box as observed on chain. Read-only to this crate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct UnspentBox {
    pub box_id: BoxId,
    /// Value in nanoErg.
    pub value: u64,
    pub ergo_tree: ErgoTree,
    pub creation_height: u32,
    pub assets: Vec<Token>,
    pub registers: Registers,
    /// Transaction that created this box.
    pub transaction_id: TxId,
    /// Index of this box among the outputs of `transaction_id`.
    pub index: u16,
}

/// A transaction output before assembly.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub value: u64,
    pub ergo_tree: ErgoTree,
    pub assets: Vec<Token>,
    pub registers: Registers,
}

impl OutputSpec {
    /// A plain value output with no assets or registers.
    pub fn new(value: u64, ergo_tree: ErgoTree) -> Self {
        Self {
            value,
            ergo_tree,
            assets: Vec::new(),
            registers: Registers::new(),
        }
    }

    pub fn with_asset(mut self, token: Token) -> Self {
        self.assets.push(token);
        self
    }

    pub fn with_register(mut self, id: RegisterId, value: Vec<u8>) -> Self {
        self.registers.insert(id, value);
        self
    }
}

/// Boxes chosen to fund a transaction.
///
/// Invariants: ids are distinct and `total == sum(boxes.value)`. Only the
/// selector and [`SelectedBoxSet::from_boxes`] construct it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SelectedBoxSet {
    boxes: Vec<UnspentBox>,
    total: u64,
}

impl SelectedBoxSet {
    /// Build a set from explicit boxes, rejecting duplicates and overflow.
    pub fn from_boxes(boxes: Vec<UnspentBox>) -> Result<Self, TransactionError> {
        let mut seen = std::collections::HashSet::with_capacity(boxes.len());
        let mut total: u64 = 0;
        for b in &boxes {
            if !seen.insert(b.box_id) {
                return Err(TransactionError::DuplicateInput(b.box_id.to_string()));
            }
            total = total
                .checked_add(b.value)
                .ok_or(TransactionError::ValueOverflow)?;
        }
        Ok(Self { boxes, total })
    }

    pub fn boxes(&self) -> &[UnspentBox] {
        &self.boxes
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn contains(&self, id: &BoxId) -> bool {
        self.boxes.iter().any(|b| &b.box_id == id)
    }

    /// Summed token amounts across all boxes, in first-seen order.
    pub fn token_totals(&self) -> Result<Vec<Token>, TransactionError> {
        sum_tokens(self.boxes.iter().flat_map(|b| b.assets.iter()))
    }

    /// Append boxes, keeping ids distinct.
    pub fn extend(self, more: Vec<UnspentBox>) -> Result<Self, TransactionError> {
        let mut boxes = self.boxes;
        boxes.extend(more);
        Self::from_boxes(boxes)
    }
}

/// Sum token amounts by id, preserving first-seen order.
pub fn sum_tokens<'a>(
    tokens: impl IntoIterator<Item = &'a Token>,
) -> Result<Vec<Token>, TransactionError> {
    let mut totals: Vec<Token> = Vec::new();
    for t in tokens {
        match totals.iter_mut().find(|acc| acc.token_id == t.token_id) {
            Some(acc) => {
                acc.amount = acc
                    .amount
                    .checked_add(t.amount)
                    .ok_or(TransactionError::ValueOverflow)?;
            }
            None => totals.push(t.clone()),
        }
    }
    Ok(totals)
}

/// How an input is authorized when signing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum SpendPath {
    /// A proof of knowledge of the secret behind this key.
    Key(PublicKey),
    /// The script is satisfied by the transaction shape; the proof is empty.
    Script,
}

/// A balanced transaction awaiting proofs.
///
/// Invariant: `inputs.total() == sum(outputs.value) + fee`, and token
/// amounts balance except for a single mint of the first input's id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub inputs: SelectedBoxSet,
    pub outputs: Vec<OutputSpec>,
    pub fee: u64,
    pub height: u32,
    /// Index of the synthetic change output, if one was added.
    pub change_index: Option<usize>,
    /// One entry per input, in input order.
    pub spend_paths: Vec<SpendPath>,
}

/// The bytes committed to by every proof: input ids, outputs, fee, height.
#[derive(bincode::Encode)]
struct TxMessage {
    inputs: Vec<BoxId>,
    outputs: Vec<OutputSpec>,
    fee: u64,
    height: u32,
}

impl UnsignedTransaction {
    /// Canonical bytes signed by each input's proof.
    pub fn bytes_to_sign(&self) -> Result<Vec<u8>, TransactionError> {
        let message = TxMessage {
            inputs: self.inputs.boxes().iter().map(|b| b.box_id).collect(),
            outputs: self.outputs.clone(),
            fee: self.fee,
            height: self.height,
        };
        bincode::encode_to_vec(&message, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Transaction id: Blake2b-256 of [`bytes_to_sign`](Self::bytes_to_sign).
    pub fn id(&self) -> Result<TxId, TransactionError> {
        Ok(Digest32::hash(&self.bytes_to_sign()?))
    }

    /// Require a key proof for an input whose script is not plain P2PK.
    pub fn authorize_with_key(&mut self, index: usize, key: PublicKey) -> Result<(), TransactionError> {
        let len = self.spend_paths.len();
        let path = self
            .spend_paths
            .get_mut(index)
            .ok_or(TransactionError::InputIndexOutOfBounds { index, len })?;
        *path = SpendPath::Key(key);
        Ok(())
    }

    /// The synthetic change output, if any.
    pub fn change(&self) -> Option<&OutputSpec> {
        self.change_index.and_then(|i| self.outputs.get(i))
    }

    /// Sum of output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

/// Proof attached to a signed input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "bytes", rename_all = "camelCase")]
pub enum SpendingProof {
    /// Script reduced to true without a secret.
    Empty,
    /// 64-byte BIP-340 proof of knowledge of a discrete log.
    Schnorr(#[serde(with = "hex_bytes")] Vec<u8>),
}

/// A spent input together with its proof.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedInput {
    pub box_id: BoxId,
    pub proof: SpendingProof,
}

/// A fully authorized transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub id: TxId,
    pub inputs: Vec<SignedInput>,
    pub outputs: Vec<OutputSpec>,
    pub fee: u64,
    pub height: u32,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
