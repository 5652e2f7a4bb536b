//! Shared test helpers: mock chain, deterministic compiler, policy checker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use flash_core::address::{Address, Network};
use flash_core::covenant::{CovenantKind, CovenantPolicy, CovenantState, SpendKind};
use flash_core::crypto::PublicKey;
use flash_core::error::{CompileError, InvariantError, NetworkError};
use flash_core::traits::{ChainDataProvider, CovenantCompiler};
use flash_core::types::{
    sum_tokens, Digest32, ErgoTree, Registers, SelectedBoxSet, SignedTransaction, SpendingProof,
    Token, TokenId, UnsignedTransaction, UnspentBox,
};
use flash_wallet::WalletIdentity;

/// BIP-39 test vector phrase.
pub const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// The wallet derived from [`PHRASE`] on mainnet.
pub fn test_wallet() -> WalletIdentity {
    WalletIdentity::from_mnemonic(PHRASE, "", Network::Mainnet)
        .unwrap_or_else(|e| panic!("test wallet derivation failed: {e}"))
}

/// A plain box locked to `key` with a distinct id per `seed`.
pub fn wallet_box(key: &PublicKey, seed: u8, value: u64) -> UnspentBox {
    UnspentBox {
        box_id: Digest32([seed; 32]),
        value,
        ergo_tree: ErgoTree::p2pk(key),
        creation_height: 1,
        assets: Vec::new(),
        registers: Registers::new(),
        transaction_id: Digest32([0xEE; 32]),
        index: u16::from(seed),
    }
}

/// Id of the `index`-th output box of transaction `tx`.
pub fn output_box_id(tx: &Digest32, index: u16) -> Digest32 {
    let mut bytes = tx.0.to_vec();
    bytes.extend_from_slice(&index.to_le_bytes());
    Digest32::hash(&bytes)
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ------------------------------------------------------------------
// Mock chain
// ------------------------------------------------------------------

/// In-memory UTXO set implementing [`ChainDataProvider`].
///
/// Counts provider calls so tests can assert that no fetch happened.
pub struct MockChain {
    boxes: Mutex<Vec<UnspentBox>>,
    height: Mutex<u32>,
    calls: AtomicUsize,
}

impl MockChain {
    pub fn new(height: u32) -> Self {
        Self {
            boxes: Mutex::new(Vec::new()),
            height: Mutex::new(height),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_boxes(height: u32, boxes: Vec<UnspentBox>) -> Self {
        let chain = Self::new(height);
        *lock(&chain.boxes) = boxes;
        chain
    }

    pub fn add_box(&self, b: UnspentBox) {
        lock(&self.boxes).push(b);
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &Digest32) -> Option<UnspentBox> {
        lock(&self.boxes).iter().find(|b| &b.box_id == id).cloned()
    }

    /// Unspent boxes locked by `tree`.
    pub fn boxes_at(&self, tree: &ErgoTree) -> Vec<UnspentBox> {
        lock(&self.boxes)
            .iter()
            .filter(|b| &b.ergo_tree == tree)
            .cloned()
            .collect()
    }

    /// Spend the inputs of `tx` and add its outputs, advancing one block.
    pub fn apply(&self, tx: &SignedTransaction) {
        let mut height = lock(&self.height);
        *height += 1;
        let mut boxes = lock(&self.boxes);
        boxes.retain(|b| !tx.inputs.iter().any(|i| i.box_id == b.box_id));
        for (i, out) in tx.outputs.iter().enumerate() {
            let index = i as u16;
            boxes.push(UnspentBox {
                box_id: output_box_id(&tx.id, index),
                value: out.value,
                ergo_tree: out.ergo_tree.clone(),
                creation_height: *height,
                assets: out.assets.clone(),
                registers: out.registers.clone(),
                transaction_id: tx.id,
                index,
            });
        }
    }
}

#[async_trait]
impl ChainDataProvider for MockChain {
    async fn fetch_unspent_boxes(&self, address: &Address) -> Result<Vec<UnspentBox>, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.boxes_at(&address.ergo_tree()))
    }

    async fn fetch_latest_height(&self) -> Result<u32, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*lock(&self.height))
    }
}

/// A provider whose every call fails.
pub struct FailingProvider;

#[async_trait]
impl ChainDataProvider for FailingProvider {
    async fn fetch_unspent_boxes(&self, _: &Address) -> Result<Vec<UnspentBox>, NetworkError> {
        Err(NetworkError::Request("connection refused".into()))
    }

    async fn fetch_latest_height(&self) -> Result<u32, NetworkError> {
        Err(NetworkError::Request("connection refused".into()))
    }
}

// ------------------------------------------------------------------
// Compilers
// ------------------------------------------------------------------

/// Deterministic compiler: the tree is a fixed header followed by the
/// Blake2b-256 digest of the source.
#[derive(Default)]
pub struct StaticCompiler {
    calls: AtomicUsize,
}

impl StaticCompiler {
    pub fn tree_for(source: &str) -> ErgoTree {
        let mut bytes = vec![0x10, 0x01, 0x0e, 0x20];
        bytes.extend_from_slice(Digest32::hash(source.as_bytes()).as_bytes());
        ErgoTree(bytes)
    }

    pub fn tree_of(policy: &CovenantPolicy) -> ErgoTree {
        Self::tree_for(&policy.source())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CovenantCompiler for StaticCompiler {
    async fn compile(&self, source: &str, network: Network) -> Result<Address, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if source.trim().is_empty() {
            return Err(CompileError::Rejected("empty source".into()));
        }
        Ok(Address::p2s(Self::tree_for(source), network))
    }
}

/// A compiler that is never reachable.
pub struct FailingCompiler;

#[async_trait]
impl CovenantCompiler for FailingCompiler {
    async fn compile(&self, _: &str, _: Network) -> Result<Address, CompileError> {
        Err(CompileError::Unavailable("node offline".into()))
    }
}

// ------------------------------------------------------------------
// Policy checker
// ------------------------------------------------------------------

/// Why the checker rejected a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownInput(Digest32),
    ValueNotConserved,
    TokensNotConserved(TokenId),
    BadProof(usize),
    Covenant(InvariantError),
}

impl From<InvariantError> for Rejection {
    fn from(e: InvariantError) -> Self {
        Rejection::Covenant(e)
    }
}

/// Minimal acceptance rules for transactions against a [`MockChain`]:
/// value and token conservation, P2PK proofs, and the covenant policies
/// registered with [`PolicyChecker::register`].
///
/// Tracks the lifecycle of each flash-loan instance by its marker id.
#[derive(Default)]
pub struct PolicyChecker {
    policies: Vec<(ErgoTree, CovenantPolicy)>,
    states: HashMap<TokenId, CovenantState>,
}

impl PolicyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat boxes locked by `tree` as instances of `policy`.
    pub fn register(&mut self, tree: ErgoTree, policy: CovenantPolicy) {
        self.policies.push((tree, policy));
    }

    pub fn state(&self, marker: &TokenId) -> Option<CovenantState> {
        self.states.get(marker).copied()
    }

    /// Accept or reject `tx` given the current chain. On acceptance the
    /// covenant states are advanced; the chain itself is not modified.
    pub fn check(&mut self, chain: &MockChain, tx: &SignedTransaction) -> Result<(), Rejection> {
        let mut spent = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            spent.push(chain.get(&input.box_id).ok_or(Rejection::UnknownInput(input.box_id))?);
        }

        let in_total: u128 = spent.iter().map(|b| u128::from(b.value)).sum();
        let out_total: u128 = tx.outputs.iter().map(|o| u128::from(o.value)).sum();
        if in_total != out_total + u128::from(tx.fee) {
            return Err(Rejection::ValueNotConserved);
        }
        let mint = spent.first().map(|b| b.box_id);
        check_tokens(&spent, tx, mint)?;

        let unsigned = UnsignedTransaction {
            inputs: SelectedBoxSet::from_boxes(spent.clone()).map_err(|_| Rejection::ValueNotConserved)?,
            outputs: tx.outputs.clone(),
            fee: tx.fee,
            height: tx.height,
            change_index: None,
            spend_paths: Vec::new(),
        };
        let digest = unsigned.id().map_err(|_| Rejection::ValueNotConserved)?;
        if digest != tx.id {
            return Err(Rejection::BadProof(0));
        }

        let mut transitions = Vec::new();
        for (index, (b, input)) in spent.iter().zip(&tx.inputs).enumerate() {
            let proven = |key: &PublicKey| match &input.proof {
                SpendingProof::Schnorr(bytes) => key.verify(digest.as_bytes(), bytes, index).is_ok(),
                SpendingProof::Empty => false,
            };

            if let Some(key) = b.ergo_tree.p2pk_key() {
                if !proven(&key) {
                    return Err(Rejection::BadProof(index));
                }
                continue;
            }

            let Some((_, policy)) = self.policies.iter().find(|(t, _)| t == &b.ergo_tree) else {
                // Unknown scripts are accepted as-is.
                continue;
            };
            match policy.kind {
                CovenantKind::Pool => {
                    policy.find_successor(b, &tx.outputs)?;
                }
                CovenantKind::FlashLoan => {
                    let owner = policy.owner_key(b)?;
                    let marker = b
                        .assets
                        .get(policy.marker_asset_index)
                        .map(|t| t.token_id)
                        .ok_or(InvariantError::UnrecognizedShape { asset_count: b.assets.len() })?;
                    let kind = if proven(&owner) {
                        SpendKind::OwnerRedeem
                    } else {
                        policy.find_successor(b, &tx.outputs)?;
                        SpendKind::Repay
                    };
                    let current = self.states.get(&marker).copied().unwrap_or_default();
                    transitions.push((marker, current.transition(kind)?));
                }
            }
        }

        // Newly created instances start funded.
        for out in &tx.outputs {
            let is_flash = self
                .policies
                .iter()
                .any(|(t, p)| t == &out.ergo_tree && p.kind == CovenantKind::FlashLoan);
            if let (true, Some(marker)) = (is_flash, out.assets.first()) {
                transitions.push((marker.token_id, CovenantState::Funded));
            }
        }
        self.states.extend(transitions);
        Ok(())
    }
}

fn check_tokens(spent: &[UnspentBox], tx: &SignedTransaction, mint: Option<TokenId>) -> Result<(), Rejection> {
    let have = sum_tokens(spent.iter().flat_map(|b| b.assets.iter()))
        .map_err(|_| Rejection::ValueNotConserved)?;
    let out = sum_tokens(tx.outputs.iter().flat_map(|o| o.assets.iter()))
        .map_err(|_| Rejection::ValueNotConserved)?;
    let amount = |list: &[Token], id: &TokenId| list.iter().find(|t| &t.token_id == id).map_or(0, |t| t.amount);
    for t in have.iter().chain(out.iter()) {
        if Some(t.token_id) == mint {
            continue;
        }
        if amount(&have, &t.token_id) != amount(&out, &t.token_id) {
            return Err(Rejection::TokensNotConserved(t.token_id));
        }
    }
    Ok(())
}
