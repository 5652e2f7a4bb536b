//! End-to-end transaction pipelines.
//!
//! Each pipeline runs its stages in order (compile, fetch, select, build,
//! sign) and stops at the first failure, returning that stage's error
//! unchanged. Nothing reaches the signer unless every earlier stage
//! succeeded. Every call re-fetches boxes and height; nothing is cached.

use std::collections::HashSet;

use tracing::{debug, info};

use flash_core::address::Address;
use flash_core::constants::{MIN_BOX_VALUE, MIN_FEE};
use flash_core::covenant::{CovenantPolicy, CovenantState, SpendKind};
use flash_core::error::SignError;
use flash_core::traits::{ChainDataProvider, CovenantCompiler};
use flash_core::types::{
    sum_tokens, BoxId, OutputSpec, SelectedBoxSet, SignedTransaction, Token, UnspentBox,
    UnsignedTransaction,
};

use crate::box_selection::{BoxSelector, SelectionTarget};
use crate::builder::TransactionAssembler;
use crate::covenant::{CovenantOutputBuilder, FundingRequest, LoanAsset};
use crate::error::WalletError;
use crate::keys::WalletIdentity;
use crate::signer::Signer;

/// External collaborators used by the pipelines.
pub struct FlashContext<'a> {
    pub provider: &'a dyn ChainDataProvider,
    pub compiler: &'a dyn CovenantCompiler,
    pub signer: &'a dyn Signer,
}

impl<'a> FlashContext<'a> {
    pub fn new(
        provider: &'a dyn ChainDataProvider,
        compiler: &'a dyn CovenantCompiler,
        signer: &'a dyn Signer,
    ) -> Self {
        Self { provider, compiler, signer }
    }

    /// Compile `policy` for the wallet's network.
    pub async fn covenant_address(
        &self,
        policy: &CovenantPolicy,
        wallet: &WalletIdentity,
    ) -> Result<Address, WalletError> {
        let address = self.compiler.compile(&policy.source(), wallet.network()).await?;
        debug!(kind = %policy.kind, %address, "covenant compiled");
        Ok(address)
    }

    /// Unspent boxes currently locked by `policy`.
    pub async fn fetch_covenant_boxes(
        &self,
        policy: &CovenantPolicy,
        wallet: &WalletIdentity,
    ) -> Result<Vec<UnspentBox>, WalletError> {
        let address = self.covenant_address(policy, wallet).await?;
        Ok(self.provider.fetch_unspent_boxes(&address).await?)
    }

    /// Fetch the height, then wallet boxes covering `target` on top of the
    /// `fixed` inputs. Fixed inputs come first in the returned set.
    async fn gather_inputs(
        &self,
        wallet: &WalletIdentity,
        fixed: Vec<UnspentBox>,
        target: &SelectionTarget,
        avoid_dust: bool,
    ) -> Result<(SelectedBoxSet, u32), WalletError> {
        let height = self.provider.fetch_latest_height().await?;
        if target.value == 0 && target.tokens.is_empty() {
            return Ok((SelectedBoxSet::from_boxes(fixed)?, height));
        }

        let exclude: HashSet<BoxId> = fixed.iter().map(|b| b.box_id).collect();
        let candidates: Vec<UnspentBox> = self
            .provider
            .fetch_unspent_boxes(wallet.address())
            .await?
            .into_iter()
            .filter(|b| !exclude.contains(&b.box_id))
            .collect();
        debug!(height, candidates = candidates.len(), "wallet boxes fetched");

        let selected = if avoid_dust {
            BoxSelector::select_avoiding_dust(&candidates, target, MIN_BOX_VALUE)?
        } else {
            BoxSelector::select_target(&candidates, target)?
        };
        info!(
            selected = selected.len(),
            total = selected.total(),
            target = target.value,
            "inputs selected"
        );

        let inputs = SelectedBoxSet::from_boxes(fixed)
            .and_then(|set| set.extend(selected.boxes().to_vec()))
            .map_err(|e| match e {
                flash_core::error::TransactionError::DuplicateInput(id) => {
                    WalletError::DuplicateSelection(id)
                }
                other => other.into(),
            })?;
        Ok((inputs, height))
    }

    fn sign(
        &self,
        tx: UnsignedTransaction,
        wallet: &WalletIdentity,
    ) -> Result<SignedTransaction, WalletError> {
        let signed = self.signer.sign(tx, wallet)?;
        info!(id = %signed.id, inputs = signed.inputs.len(), outputs = signed.outputs.len(), "transaction signed");
        Ok(signed)
    }
}

/// What the wallet must add so that `fixed` inputs can pay for `outputs`
/// and the fee, leaving either nothing or at least a minimum box as change.
///
/// Returns the target and whether dust-avoiding selection applies.
fn wallet_target(
    fixed: &[UnspentBox],
    outputs: &[OutputSpec],
    fee: u64,
) -> Result<(SelectionTarget, bool), WalletError> {
    let fixed_total = fixed
        .iter()
        .try_fold(0u64, |acc, b| acc.checked_add(b.value))
        .ok_or_else(|| WalletError::Build("input total overflow".into()))?;
    let need = outputs
        .iter()
        .try_fold(fee, |acc, o| acc.checked_add(o.value))
        .ok_or_else(|| WalletError::Build("output total overflow".into()))?;

    let held = sum_tokens(fixed.iter().flat_map(|b| b.assets.iter()))?;
    let wanted = sum_tokens(outputs.iter().flat_map(|o| o.assets.iter()))?;
    let amount = |list: &[Token], t: &Token| {
        list.iter().find(|x| x.token_id == t.token_id).map_or(0, |x| x.amount)
    };
    let tokens: Vec<Token> = wanted
        .iter()
        .filter_map(|w| {
            let short = w.amount.saturating_sub(amount(&held, w));
            (short > 0).then(|| Token::new(w.token_id, short))
        })
        .collect();
    let tokens_left = held.iter().any(|h| h.amount > amount(&wanted, h));

    if fixed_total < need {
        let deficit = need - fixed_total;
        // Tokens left on the fixed inputs force a change box, so the wallet
        // must fund it as well as the deficit.
        if tokens_left {
            let value = deficit
                .checked_add(MIN_BOX_VALUE)
                .ok_or_else(|| WalletError::Build("change target overflow".into()))?;
            return Ok((SelectionTarget { value, tokens }, false));
        }
        return Ok((SelectionTarget { value: deficit, tokens }, true));
    }
    let surplus = fixed_total - need;
    let value = if surplus < MIN_BOX_VALUE && (surplus > 0 || tokens_left) {
        MIN_BOX_VALUE - surplus
    } else {
        0
    };
    Ok((SelectionTarget { value, tokens }, false))
}

/// Create a pool covenant box holding the minimum box value.
pub async fn create_pool_transaction(
    ctx: &FlashContext<'_>,
    wallet: &WalletIdentity,
) -> Result<SignedTransaction, WalletError> {
    let policy = CovenantPolicy::pool();
    let pool = ctx.covenant_address(&policy, wallet).await?;
    let output = OutputSpec::new(MIN_BOX_VALUE, pool.ergo_tree());

    let assembler = TransactionAssembler::new();
    let target = SelectionTarget::value(MIN_BOX_VALUE + assembler.fee());
    let (inputs, height) = ctx.gather_inputs(wallet, Vec::new(), &target, true).await?;

    let tx = assembler.build(&inputs, vec![output], wallet.address(), height)?;
    info!(%pool, height, fee = tx.fee, "pool transaction assembled");
    ctx.sign(tx, wallet)
}

/// Create a funded flash-loan covenant box, minting its marker NFT.
///
/// The caller chooses the ERG or token-denominated shape through
/// [`FundingRequest`].
pub async fn create_flash_loan_transaction(
    ctx: &FlashContext<'_>,
    wallet: &WalletIdentity,
    request: &FundingRequest,
) -> Result<SignedTransaction, WalletError> {
    let policy = CovenantPolicy::flash_loan();
    let covenant = ctx.covenant_address(&policy, wallet).await?;
    let builder = CovenantOutputBuilder::new(policy);

    let mut assembler = TransactionAssembler::new();
    assembler.allow_mint();
    let value = request
        .principal
        .checked_add(assembler.fee())
        .ok_or_else(|| WalletError::Build("principal overflow".into()))?;
    let mut target = SelectionTarget::value(value);
    if let LoanAsset::Token(token) = &request.asset {
        target = target.with_token(token.clone());
    }
    let (inputs, height) = ctx.gather_inputs(wallet, Vec::new(), &target, true).await?;

    let marker = inputs
        .boxes()
        .first()
        .map(|b| b.box_id)
        .ok_or_else(|| WalletError::Build("no inputs".into()))?;
    let output =
        builder.build_funding_output(covenant.ergo_tree(), wallet.public_key(), marker, request)?;

    let tx = assembler.build(&inputs, vec![output], wallet.address(), height)?;
    info!(%covenant, %marker, principal = request.principal, height, "flash-loan funding assembled");
    ctx.sign(tx, wallet)
}

/// Borrow from and repay a funded flash-loan box in one transaction.
///
/// The successor carries the premium; the wallet pays the premium and fee.
pub async fn create_repayment_transaction(
    ctx: &FlashContext<'_>,
    wallet: &WalletIdentity,
    covenant_box: &UnspentBox,
) -> Result<SignedTransaction, WalletError> {
    let builder = CovenantOutputBuilder::new(CovenantPolicy::flash_loan());
    let successor = builder.build_repayment_output(covenant_box)?;
    let next = CovenantState::Funded.transition(SpendKind::Repay)?;

    let assembler = TransactionAssembler::new();
    let fixed = vec![covenant_box.clone()];
    let outputs = vec![successor];
    let (target, avoid_dust) = wallet_target(&fixed, &outputs, assembler.fee())?;
    let (inputs, height) = ctx.gather_inputs(wallet, fixed, &target, avoid_dust).await?;

    let tx = assembler.build(&inputs, outputs, wallet.address(), height)?;
    info!(box_id = %covenant_box.box_id, state = ?next, height, "repayment assembled");
    ctx.sign(tx, wallet)
}

/// Owner spend of a flash-loan box: value and assets return to the wallet.
pub async fn create_redeem_transaction(
    ctx: &FlashContext<'_>,
    wallet: &WalletIdentity,
    covenant_box: &UnspentBox,
) -> Result<SignedTransaction, WalletError> {
    let policy = CovenantPolicy::flash_loan();
    let owner = policy.owner_key(covenant_box)?;
    if &owner != wallet.public_key() {
        return Err(SignError::MissingKey { index: 0 }.into());
    }
    let next = CovenantState::Funded.transition(SpendKind::OwnerRedeem)?;

    let assembler = TransactionAssembler::new();
    let fixed = vec![covenant_box.clone()];
    let (target, avoid_dust) = wallet_target(&fixed, &[], assembler.fee())?;
    let (inputs, height) = ctx.gather_inputs(wallet, fixed, &target, avoid_dust).await?;

    let mut tx = assembler.build(&inputs, Vec::new(), wallet.address(), height)?;
    tx.authorize_with_key(0, owner)?;
    info!(box_id = %covenant_box.box_id, state = ?next, height, "redeem assembled");
    ctx.sign(tx, wallet)
}

/// Continue a pool box with `deposit` more nanoErg from the wallet.
pub async fn create_pool_top_up_transaction(
    ctx: &FlashContext<'_>,
    wallet: &WalletIdentity,
    pool_box: &UnspentBox,
    deposit: u64,
) -> Result<SignedTransaction, WalletError> {
    let builder = CovenantOutputBuilder::new(CovenantPolicy::pool());
    let successor = builder.build_pool_successor(pool_box, deposit)?;

    let assembler = TransactionAssembler::new();
    let fixed = vec![pool_box.clone()];
    let outputs = vec![successor];
    let (target, avoid_dust) = wallet_target(&fixed, &outputs, assembler.fee())?;
    let (inputs, height) = ctx.gather_inputs(wallet, fixed, &target, avoid_dust).await?;

    let tx = assembler.build(&inputs, outputs, wallet.address(), height)?;
    info!(box_id = %pool_box.box_id, deposit, height, "pool top-up assembled");
    ctx.sign(tx, wallet)
}
