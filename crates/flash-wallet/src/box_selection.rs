//! Box selection.
//!
//! Picks a subset of unspent boxes covering a value target (and optionally
//! token targets) with as few boxes as practical:
//!
//! 1. Candidates are deduplicated by id, so repeated or adversarially
//!    ordered input never inflates the available total.
//! 2. Token targets are met first, taking the holders with the largest
//!    amounts.
//! 3. The remaining value is covered by the smallest single box that
//!    suffices, or otherwise by taking the largest box and repeating.
//!
//! The result depends only on candidate order and the target.

use std::collections::HashSet;

use flash_core::error::TransactionError;
use flash_core::types::{sum_tokens, BoxId, SelectedBoxSet, Token, TokenId, UnspentBox};

use crate::error::WalletError;

/// What a selection must cover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionTarget {
    /// nanoErg.
    pub value: u64,
    pub tokens: Vec<Token>,
}

impl SelectionTarget {
    pub fn value(value: u64) -> Self {
        Self { value, tokens: Vec::new() }
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.tokens.push(token);
        self
    }
}

/// Greedy cherry-pick selector.
pub struct BoxSelector;

impl BoxSelector {
    /// Select boxes whose total value is at least `target`.
    pub fn select(candidates: &[UnspentBox], target: u64) -> Result<SelectedBoxSet, WalletError> {
        Self::select_target(candidates, &SelectionTarget::value(target))
    }

    /// Select boxes covering a value and token target.
    ///
    /// Fails with [`WalletError::InsufficientFunds`] when the distinct
    /// candidates cannot reach the value, or
    /// [`WalletError::InsufficientTokens`] for the first uncovered token.
    pub fn select_target(
        candidates: &[UnspentBox],
        target: &SelectionTarget,
    ) -> Result<SelectedBoxSet, WalletError> {
        let unique = dedup(candidates);

        let available: u128 = unique.iter().map(|b| u128::from(b.value)).sum();
        if available < u128::from(target.value) {
            return Err(WalletError::InsufficientFunds {
                shortfall: target.value - available as u64,
            });
        }

        let mut chosen: Vec<UnspentBox> = Vec::new();
        let mut seen: HashSet<BoxId> = HashSet::new();

        // Tokens first: their holders also contribute value.
        for want in sum_tokens(target.tokens.iter())? {
            let mut have = token_amount(&chosen, &want.token_id);
            if have >= u128::from(want.amount) {
                continue;
            }
            let mut holders: Vec<&UnspentBox> = unique
                .iter()
                .copied()
                .filter(|b| !seen.contains(&b.box_id) && box_token_amount(b, &want.token_id) > 0)
                .collect();
            holders.sort_by(|a, b| {
                box_token_amount(b, &want.token_id).cmp(&box_token_amount(a, &want.token_id))
            });
            for holder in holders {
                if have >= u128::from(want.amount) {
                    break;
                }
                have += box_token_amount(holder, &want.token_id);
                push_unique(&mut chosen, &mut seen, holder)?;
            }
            if have < u128::from(want.amount) {
                return Err(WalletError::InsufficientTokens {
                    token_id: want.token_id,
                    shortfall: want.amount - have as u64,
                });
            }
        }

        let mut total: u128 = chosen.iter().map(|b| u128::from(b.value)).sum();
        let mut rest: Vec<&UnspentBox> = unique
            .iter()
            .copied()
            .filter(|b| !seen.contains(&b.box_id))
            .collect();
        // Largest first; stable so equal values keep candidate order.
        rest.sort_by(|a, b| b.value.cmp(&a.value));

        while total < u128::from(target.value) {
            let remaining = u128::from(target.value) - total;
            let pick = rest
                .iter()
                .rposition(|b| u128::from(b.value) >= remaining)
                .unwrap_or(0);
            if pick >= rest.len() {
                break;
            }
            let next = rest.remove(pick);
            total += u128::from(next.value);
            push_unique(&mut chosen, &mut seen, next)?;
        }

        SelectedBoxSet::from_boxes(chosen).map_err(|e| match e {
            TransactionError::DuplicateInput(id) => WalletError::DuplicateSelection(id),
            other => WalletError::from(other),
        })
    }

    /// Select so that any leftover is either zero or at least `dust`.
    ///
    /// If the plain selection would leave `0 < leftover < dust`, or leave
    /// tokens over with less than `dust` to carry them, selection is retried
    /// once with the target raised by `dust`. If that cannot be met the
    /// plain selection is returned and assembly reports the dust.
    pub fn select_avoiding_dust(
        candidates: &[UnspentBox],
        target: &SelectionTarget,
        dust: u64,
    ) -> Result<SelectedBoxSet, WalletError> {
        let first = Self::select_target(candidates, target)?;
        let leftover = first.total().saturating_sub(target.value);
        let tokens_left = has_token_surplus(&first, &target.tokens)?;

        let needs_change = leftover > 0 || tokens_left;
        if !needs_change || leftover >= dust {
            return Ok(first);
        }

        let Some(raised) = target.value.checked_add(dust) else {
            return Ok(first);
        };
        let bumped = SelectionTarget {
            value: raised,
            tokens: target.tokens.clone(),
        };
        match Self::select_target(candidates, &bumped) {
            Ok(better) => Ok(better),
            Err(WalletError::InsufficientFunds { .. }) => Ok(first),
            Err(e) => Err(e),
        }
    }
}

/// Distinct candidates by id, first occurrence wins.
fn dedup(candidates: &[UnspentBox]) -> Vec<&UnspentBox> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates.iter().filter(|b| seen.insert(b.box_id)).collect()
}

/// Add a box to the selection, refusing an id already selected.
fn push_unique(
    chosen: &mut Vec<UnspentBox>,
    seen: &mut HashSet<BoxId>,
    candidate: &UnspentBox,
) -> Result<(), WalletError> {
    if !seen.insert(candidate.box_id) {
        return Err(WalletError::DuplicateSelection(candidate.box_id.to_string()));
    }
    chosen.push(candidate.clone());
    Ok(())
}

fn box_token_amount(b: &UnspentBox, id: &TokenId) -> u128 {
    b.assets
        .iter()
        .filter(|t| &t.token_id == id)
        .map(|t| u128::from(t.amount))
        .sum()
}

fn token_amount(boxes: &[UnspentBox], id: &TokenId) -> u128 {
    boxes.iter().map(|b| box_token_amount(b, id)).sum()
}

fn has_token_surplus(set: &SelectedBoxSet, wanted: &[Token]) -> Result<bool, WalletError> {
    let wanted = sum_tokens(wanted.iter())?;
    Ok(set.token_totals()?.iter().any(|have| {
        let need = wanted
            .iter()
            .find(|w| w.token_id == have.token_id)
            .map_or(0, |w| w.amount);
        have.amount > need
    }))
}
