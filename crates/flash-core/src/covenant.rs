//! Covenant policies and the pure functions that decide whether a spend
//! honours them.
//!
//! Two covenants exist:
//! - the pool, which may only be spent into a successor with the same
//!   script and at least the same value
//! - the flash loan, which may be spent either by its owner (proof of the
//!   key in the identity register) or by any transaction that recreates it
//!   with the loan repaid plus a 1 % premium
//!
//! The flash loan comes in two shapes, told apart by the spent box's asset
//! count: one asset (marker only, ERG is lent) or two assets (marker at
//! index 0, lent token at index 1). Any other count is not a covenant
//! instance.
//!
//! The repayment arithmetic lives here as plain functions so that the
//! wallet's output builder and test-side checkers share one definition.

use std::fmt;

use crate::constants::FLASH_FEE_DIVISOR;
use crate::crypto::PublicKey;
use crate::error::InvariantError;
use crate::register::decode_public_key;
use crate::types::{OutputSpec, RegisterId, TokenId, UnspentBox};

/// Which covenant a policy describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CovenantKind {
    Pool,
    FlashLoan,
}

impl fmt::Display for CovenantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovenantKind::Pool => f.write_str("pool"),
            CovenantKind::FlashLoan => f.write_str("flash-loan"),
        }
    }
}

/// Typed description of a covenant script.
///
/// The flash-loan fields are ignored by the pool covenant, which has no
/// identity register or marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CovenantPolicy {
    pub kind: CovenantKind,
    /// Register holding the owner's key as `Coll[Byte]`.
    pub identity_register: RegisterId,
    /// Index of the marker NFT in the covenant box's assets.
    pub marker_asset_index: usize,
    /// Index of the lent token in the token-denominated shape.
    pub loan_asset_index: usize,
    /// Premium divisor: `return >= amount + amount / fee_divisor`.
    pub fee_divisor: u64,
}

const POOL_SOURCE: &str = r#"{
  val poolAmount = SELF.value
  val poolBox = OUTPUTS.exists({ (box: Box) =>
    box.propositionBytes == SELF.propositionBytes &&
    box.value >= poolAmount
  })
  sigmaProp(poolBox)
}"#;

const FLASH_LOAN_SOURCE: &str = r#"{
  if (!(SELF.$REG[Coll[Byte]].isDefined) || SELF.tokens.size == 0 || SELF.tokens.size > 2) {
    sigmaProp(false)
  } else {
    val ownerPk = SELF.$REG[Coll[Byte]].get
    val nftId = SELF.tokens($MARKER)._1

    def continues(box: Box): Boolean = {
      box.propositionBytes == SELF.propositionBytes &&
      box.$REG[Coll[Byte]].isDefined &&
      box.$REG[Coll[Byte]].get == ownerPk &&
      box.tokens.size > $MARKER &&
      box.tokens($MARKER)._1 == nftId
    }

    def repaysErg(box: Box): Boolean = {
      SELF.tokens.size == 1 &&
      box.value >= SELF.value + (SELF.value / $DIVL)
    }

    def repaysToken(box: Box): Boolean = {
      SELF.tokens.size == 2 && box.tokens.size == 2 && {
        val lent = SELF.tokens($LOAN)
        val returned = box.tokens($LOAN)
        returned._1 == lent._1 &&
        returned._2 >= lent._2 + (lent._2 / $DIVL)
      }
    }

    val repaid = OUTPUTS.exists({ (box: Box) =>
      continues(box) && (repaysErg(box) || repaysToken(box))
    })

    sigmaProp(proveDlog(decodePoint(ownerPk)) || repaid)
  }
}"#;

impl CovenantPolicy {
    /// The pool covenant.
    pub fn pool() -> Self {
        Self {
            kind: CovenantKind::Pool,
            identity_register: RegisterId::R4,
            marker_asset_index: 0,
            loan_asset_index: 1,
            fee_divisor: FLASH_FEE_DIVISOR,
        }
    }

    /// The flash-loan covenant: owner key in R4, marker first, 1 % premium.
    pub fn flash_loan() -> Self {
        Self {
            kind: CovenantKind::FlashLoan,
            ..Self::pool()
        }
    }

    /// Render the ErgoScript source handed to the compiler.
    ///
    /// Deterministic: equal policies render byte-identical source.
    pub fn source(&self) -> String {
        match self.kind {
            CovenantKind::Pool => POOL_SOURCE.to_string(),
            CovenantKind::FlashLoan => FLASH_LOAN_SOURCE
                .replace("$REG", &self.identity_register.to_string())
                .replace("$MARKER", &self.marker_asset_index.to_string())
                .replace("$LOAN", &self.loan_asset_index.to_string())
                .replace("$DIV", &self.fee_divisor.to_string()),
        }
    }

    /// Owner key stored in a covenant box's identity register.
    pub fn owner_key(&self, spent: &UnspentBox) -> Result<PublicKey, InvariantError> {
        let raw = spent
            .registers
            .get(&self.identity_register)
            .ok_or_else(|| InvariantError::MissingIdentity(self.identity_register.to_string()))?;
        decode_public_key(raw)
            .map_err(|_| InvariantError::MissingIdentity(self.identity_register.to_string()))
    }

    /// Check that `candidate` preserves the spent box's script, identity
    /// register and marker.
    pub fn check_continuity(
        &self,
        spent: &UnspentBox,
        candidate: &OutputSpec,
    ) -> Result<(), InvariantError> {
        if candidate.ergo_tree != spent.ergo_tree {
            return Err(InvariantError::ScriptMismatch);
        }

        let reg = self.identity_register;
        self.owner_key(spent)?;
        if candidate.registers.get(&reg) != spent.registers.get(&reg) {
            return Err(InvariantError::IdentityMismatch);
        }

        let index = self.marker_asset_index;
        let marker = spent
            .assets
            .get(index)
            .ok_or(InvariantError::UnrecognizedShape { asset_count: spent.assets.len() })?;
        match candidate.assets.get(index) {
            Some(t) if t.token_id == marker.token_id => Ok(()),
            _ => Err(InvariantError::MarkerMismatch { index }),
        }
    }

    /// Check that `candidate` continues the spent flash-loan box and repays
    /// it under the box's variant.
    pub fn check_repayment(
        &self,
        spent: &UnspentBox,
        candidate: &OutputSpec,
    ) -> Result<(), InvariantError> {
        let variant = RepaymentVariant::of(spent, self)?;
        self.check_continuity(spent, candidate)?;
        let required = variant.required_return(self.fee_divisor)?;
        match variant {
            RepaymentVariant::Erg { .. } => {
                if candidate.value < required {
                    return Err(InvariantError::InsufficientReturn {
                        required,
                        got: candidate.value,
                    });
                }
            }
            RepaymentVariant::Token { token_id, .. } => {
                if candidate.assets.len() != 2 {
                    return Err(InvariantError::LoanTokenMismatch);
                }
                let returned = candidate
                    .assets
                    .get(self.loan_asset_index)
                    .filter(|t| t.token_id == token_id)
                    .ok_or(InvariantError::LoanTokenMismatch)?;
                if returned.amount < required {
                    return Err(InvariantError::InsufficientReturn {
                        required,
                        got: returned.amount,
                    });
                }
            }
        }
        Ok(())
    }

    /// Index of the first output that validly continues the spent box.
    ///
    /// Flash loans require a repaying successor; pools a successor with the
    /// same script and no less value.
    pub fn find_successor(
        &self,
        spent: &UnspentBox,
        outputs: &[OutputSpec],
    ) -> Result<usize, InvariantError> {
        let found = match self.kind {
            CovenantKind::FlashLoan => {
                // Surface shape errors even when there are no outputs.
                RepaymentVariant::of(spent, self)?;
                outputs
                    .iter()
                    .position(|o| self.check_repayment(spent, o).is_ok())
            }
            CovenantKind::Pool => outputs
                .iter()
                .position(|o| o.ergo_tree == spent.ergo_tree && o.value >= spent.value),
        };
        found.ok_or_else(|| InvariantError::NoSuccessor(spent.box_id.to_string()))
    }
}

/// `amount + amount / divisor`, the least acceptable repayment.
pub fn min_return(amount: u64, divisor: u64) -> Result<u64, InvariantError> {
    let premium = amount
        .checked_div(divisor)
        .ok_or(InvariantError::ArithmeticOverflow)?;
    amount
        .checked_add(premium)
        .ok_or(InvariantError::ArithmeticOverflow)
}

/// What a flash-loan box lends, read from its asset count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepaymentVariant {
    /// One asset (the marker): the box's nanoErg value is lent.
    Erg { principal: u64 },
    /// Two assets: the token at the loan index is lent.
    Token { token_id: TokenId, borrowed: u64 },
}

impl RepaymentVariant {
    pub fn of(spent: &UnspentBox, policy: &CovenantPolicy) -> Result<Self, InvariantError> {
        match spent.assets.len() {
            1 => Ok(Self::Erg { principal: spent.value }),
            2 => {
                let lent = spent
                    .assets
                    .get(policy.loan_asset_index)
                    .ok_or(InvariantError::UnrecognizedShape { asset_count: 2 })?;
                Ok(Self::Token {
                    token_id: lent.token_id,
                    borrowed: lent.amount,
                })
            }
            asset_count => Err(InvariantError::UnrecognizedShape { asset_count }),
        }
    }

    /// Least acceptable return for this variant.
    pub fn required_return(&self, divisor: u64) -> Result<u64, InvariantError> {
        match self {
            Self::Erg { principal } => min_return(*principal, divisor),
            Self::Token { borrowed, .. } => min_return(*borrowed, divisor),
        }
    }
}

/// How a covenant box is being spent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpendKind {
    /// Borrow and repay: a successor box continues the instance.
    Repay,
    /// Owner-authorized spend with no successor.
    OwnerRedeem,
}

/// Lifecycle of one flash-loan covenant instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CovenantState {
    #[default]
    Funded,
    Redeemed,
}

impl CovenantState {
    pub fn transition(self, spend: SpendKind) -> Result<Self, InvariantError> {
        match (self, spend) {
            (CovenantState::Redeemed, _) => Err(InvariantError::AlreadyRedeemed),
            (CovenantState::Funded, SpendKind::Repay) => Ok(CovenantState::Funded),
            (CovenantState::Funded, SpendKind::OwnerRedeem) => Ok(CovenantState::Redeemed),
        }
    }
}
