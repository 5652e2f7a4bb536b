//! Transaction assembly.
//!
//! Combines selected inputs, explicit outputs and the fixed fee into a
//! balanced [`UnsignedTransaction`]:
//! 1. Every explicit output must carry at least the minimum box value
//! 2. `leftover = inputs - outputs - fee` becomes a change output, unless it
//!    is zero
//! 3. A leftover below the minimum box value is an error, never folded into
//!    the fee
//! 4. Token amounts must balance; unspent tokens ride on the change output

use tracing::debug;

use flash_core::address::Address;
use flash_core::constants::{MIN_BOX_VALUE, MIN_FEE};
use flash_core::types::{
    sum_tokens, OutputSpec, SelectedBoxSet, SpendPath, Token, TokenId, UnsignedTransaction,
};

use crate::error::WalletError;

/// Builder for balanced unsigned transactions.
///
/// # Example
/// ```ignore
/// let tx = TransactionAssembler::new()
///     .build(&selected, vec![output], wallet.address(), height)?;
/// ```
pub struct TransactionAssembler {
    fee: u64,
    min_box_value: u64,
    allow_mint: bool,
}

impl TransactionAssembler {
    /// Create an assembler with the protocol-minimum fee.
    pub fn new() -> Self {
        Self {
            fee: MIN_FEE,
            min_box_value: MIN_BOX_VALUE,
            allow_mint: false,
        }
    }

    /// Override the fee (default: [`MIN_FEE`]).
    pub fn set_fee(&mut self, fee: u64) -> &mut Self {
        self.fee = fee;
        self
    }

    /// Permit outputs to carry a new token whose id is the first input's box
    /// id. Ergo allows exactly one such mint per transaction.
    pub fn allow_mint(&mut self) -> &mut Self {
        self.allow_mint = true;
        self
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Assemble `outputs` funded by `inputs`, sending change to `change_address`.
    pub fn build(
        &self,
        inputs: &SelectedBoxSet,
        mut outputs: Vec<OutputSpec>,
        change_address: &Address,
        height: u32,
    ) -> Result<UnsignedTransaction, WalletError> {
        let first_input = inputs
            .boxes()
            .first()
            .ok_or_else(|| WalletError::Build("no inputs".into()))?;
        let mint_id = self.allow_mint.then_some(first_input.box_id);

        let mut output_total: u64 = 0;
        for (i, out) in outputs.iter().enumerate() {
            if out.value < self.min_box_value {
                return Err(WalletError::Build(format!(
                    "output {i} value {} below minimum box value {}",
                    out.value, self.min_box_value
                )));
            }
            output_total = output_total
                .checked_add(out.value)
                .ok_or_else(|| WalletError::Build("output total overflow".into()))?;
        }

        let need = output_total
            .checked_add(self.fee)
            .ok_or_else(|| WalletError::Build("output total overflow".into()))?;
        let have = inputs.total();
        if have < need {
            return Err(WalletError::InsufficientInputs { have, need });
        }
        let leftover = have - need;

        let spare_tokens = token_surplus(inputs, &outputs, mint_id)?;

        let change_index = if leftover == 0 {
            if !spare_tokens.is_empty() {
                return Err(WalletError::Build(
                    "unspent tokens but no value left for a change box".into(),
                ));
            }
            None
        } else if leftover < self.min_box_value {
            return Err(WalletError::Build(format!(
                "leftover {leftover} below minimum box value {}",
                self.min_box_value
            )));
        } else {
            let mut change = OutputSpec::new(leftover, change_address.ergo_tree());
            change.assets = spare_tokens;
            outputs.push(change);
            Some(outputs.len() - 1)
        };

        let spend_paths = inputs
            .boxes()
            .iter()
            .map(|b| match b.ergo_tree.p2pk_key() {
                Some(key) => SpendPath::Key(key),
                None => SpendPath::Script,
            })
            .collect();

        let tx = UnsignedTransaction {
            inputs: inputs.clone(),
            outputs,
            fee: self.fee,
            height,
            change_index,
            spend_paths,
        };
        verify_balance(&tx, mint_id)?;

        debug!(
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee = tx.fee,
            change = leftover,
            height,
            "transaction assembled"
        );
        Ok(tx)
    }
}

impl Default for TransactionAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokens in the inputs not claimed by any output.
///
/// Errors if an output carries more of a token than the inputs hold, except
/// for the permitted mint.
fn token_surplus(
    inputs: &SelectedBoxSet,
    outputs: &[OutputSpec],
    mint_id: Option<TokenId>,
) -> Result<Vec<Token>, WalletError> {
    let have = inputs.token_totals()?;
    let spent = sum_tokens(outputs.iter().flat_map(|o| o.assets.iter()))?;

    for out in &spent {
        if Some(out.token_id) == mint_id {
            continue;
        }
        let held = have
            .iter()
            .find(|t| t.token_id == out.token_id)
            .map_or(0, |t| t.amount);
        if out.amount > held {
            return Err(WalletError::Build(format!(
                "token {} outputs {} exceed inputs {held}",
                out.token_id, out.amount
            )));
        }
    }

    Ok(have
        .into_iter()
        .filter_map(|t| {
            let used = spent
                .iter()
                .find(|s| s.token_id == t.token_id)
                .map_or(0, |s| s.amount);
            let rest = t.amount - used.min(t.amount);
            (rest > 0).then(|| Token::new(t.token_id, rest))
        })
        .collect())
}

/// Check value and token conservation of an assembled transaction.
pub fn verify_balance(tx: &UnsignedTransaction, mint_id: Option<TokenId>) -> Result<(), WalletError> {
    let outputs = tx
        .total_output_value()
        .ok_or_else(|| WalletError::Build("output total overflow".into()))?;
    if Some(tx.inputs.total()) != outputs.checked_add(tx.fee) {
        return Err(WalletError::Build(format!(
            "value not conserved: inputs {}, outputs {outputs}, fee {}",
            tx.inputs.total(),
            tx.fee
        )));
    }

    let have = tx.inputs.token_totals()?;
    let spent = sum_tokens(tx.outputs.iter().flat_map(|o| o.assets.iter()))?;
    let amount = |list: &[Token], id: &TokenId| {
        list.iter().find(|t| &t.token_id == id).map_or(0, |t| t.amount)
    };
    for t in have.iter().chain(spent.iter()) {
        if Some(t.token_id) == mint_id {
            continue;
        }
        if amount(&have, &t.token_id) != amount(&spent, &t.token_id) {
            return Err(WalletError::Build(format!("token {} not conserved", t.token_id)));
        }
    }
    if tx.spend_paths.len() != tx.inputs.len() {
        return Err(WalletError::Build("spend paths do not match inputs".into()));
    }
    Ok(())
}
