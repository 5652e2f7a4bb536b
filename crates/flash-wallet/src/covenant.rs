//! Covenant output construction.
//!
//! Builds the boxes that create or continue a covenant instance. Every
//! successor is checked against the same policy functions a validator would
//! apply before it is returned.

use flash_core::constants::MIN_BOX_VALUE;
use flash_core::covenant::{CovenantKind, CovenantPolicy, RepaymentVariant};
use flash_core::crypto::PublicKey;
use flash_core::error::InvariantError;
use flash_core::register::encode_public_key;
use flash_core::types::{ErgoTree, OutputSpec, Token, TokenId, UnspentBox};

use crate::error::WalletError;

/// What a new flash-loan box lends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanAsset {
    /// The box's own nanoErg value is lent (one asset: the marker).
    Erg,
    /// A token is lent (two assets: marker, then this token).
    Token(Token),
}

/// Parameters of a new flash-loan covenant instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRequest {
    /// nanoErg locked in the covenant box.
    pub principal: u64,
    pub asset: LoanAsset,
}

impl FundingRequest {
    pub fn erg(principal: u64) -> Self {
        Self { principal, asset: LoanAsset::Erg }
    }

    pub fn token(token_id: TokenId, amount: u64) -> Self {
        Self {
            principal: MIN_BOX_VALUE,
            asset: LoanAsset::Token(Token::new(token_id, amount)),
        }
    }
}

/// Builds covenant outputs under a fixed policy.
pub struct CovenantOutputBuilder {
    policy: CovenantPolicy,
}

impl CovenantOutputBuilder {
    pub fn new(policy: CovenantPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CovenantPolicy {
        &self.policy
    }

    /// The least-valued successor that repays `spent`.
    ///
    /// Same script, registers and marker as the spent box. The ERG variant
    /// returns `value + value / 100` nanoErg; the token variant keeps the
    /// value and returns `borrowed + borrowed / 100` of the lent token.
    pub fn build_repayment_output(&self, spent: &UnspentBox) -> Result<OutputSpec, WalletError> {
        if self.policy.kind != CovenantKind::FlashLoan {
            return Err(WalletError::Build(format!(
                "{} covenant has no repayment output",
                self.policy.kind
            )));
        }
        let variant = RepaymentVariant::of(spent, &self.policy)?;
        self.policy.owner_key(spent)?;
        let required = variant.required_return(self.policy.fee_divisor)?;

        let (value, assets) = match variant {
            RepaymentVariant::Erg { .. } => (required, spent.assets.clone()),
            RepaymentVariant::Token { token_id, .. } => {
                let mut assets = spent.assets.clone();
                let slot = assets
                    .get_mut(self.policy.loan_asset_index)
                    .ok_or(InvariantError::UnrecognizedShape { asset_count: 2 })?;
                *slot = Token::new(token_id, required);
                (spent.value, assets)
            }
        };

        let output = OutputSpec {
            value,
            ergo_tree: spent.ergo_tree.clone(),
            assets,
            registers: spent.registers.clone(),
        };
        self.policy.check_repayment(spent, &output)?;
        Ok(output)
    }

    /// A pool successor holding the previous value plus `deposit`.
    pub fn build_pool_successor(
        &self,
        spent: &UnspentBox,
        deposit: u64,
    ) -> Result<OutputSpec, WalletError> {
        let value = spent
            .value
            .checked_add(deposit)
            .ok_or(InvariantError::ArithmeticOverflow)?;
        let output = OutputSpec {
            value,
            ergo_tree: spent.ergo_tree.clone(),
            assets: spent.assets.clone(),
            registers: spent.registers.clone(),
        };
        self.policy.find_successor(spent, std::slice::from_ref(&output))?;
        Ok(output)
    }

    /// A new funded flash-loan box.
    ///
    /// `marker` must be the id of the first input of the funding
    /// transaction: the marker NFT is minted there.
    pub fn build_funding_output(
        &self,
        covenant_tree: ErgoTree,
        owner: &PublicKey,
        marker: TokenId,
        request: &FundingRequest,
    ) -> Result<OutputSpec, WalletError> {
        if request.principal < MIN_BOX_VALUE {
            return Err(WalletError::Build(format!(
                "principal {} below minimum box value {MIN_BOX_VALUE}",
                request.principal
            )));
        }
        let mut output = OutputSpec::new(request.principal, covenant_tree)
            .with_register(self.policy.identity_register, encode_public_key(owner))
            .with_asset(Token::new(marker, 1));
        if let LoanAsset::Token(token) = &request.asset {
            if token.amount == 0 {
                return Err(WalletError::Build("loan token amount is zero".into()));
            }
            output = output.with_asset(token.clone());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_core::types::{Digest32, RegisterId, Registers};

    const MARKER: Digest32 = Digest32([0xAA; 32]);
    const LOAN: Digest32 = Digest32([0xBB; 32]);

    fn owner() -> PublicKey {
        let sk = secp256k1::SecretKey::from_slice(&[6u8; 32]).unwrap();
        PublicKey::from(secp256k1::PublicKey::from_secret_key_global(&sk))
    }

    fn covenant_box(value: u64, assets: Vec<Token>) -> UnspentBox {
        let mut registers = Registers::new();
        registers.insert(RegisterId::R4, encode_public_key(&owner()));
        UnspentBox {
            box_id: Digest32([0x01; 32]),
            value,
            ergo_tree: ErgoTree(vec![0x10, 0x05, 0xd1]),
            creation_height: 10,
            assets,
            registers,
            transaction_id: Digest32([0x02; 32]),
            index: 0,
        }
    }

    fn builder() -> CovenantOutputBuilder {
        CovenantOutputBuilder::new(CovenantPolicy::flash_loan())
    }

    #[test]
    fn erg_repayment_output() {
        let spent = covenant_box(1_000_000_000, vec![Token::new(MARKER, 1)]);
        let out = builder().build_repayment_output(&spent).unwrap();
        assert_eq!(out.value, 1_010_000_000);
        assert_eq!(out.ergo_tree, spent.ergo_tree);
        assert_eq!(out.registers, spent.registers);
        assert_eq!(out.assets, spent.assets);
    }

    #[test]
    fn token_repayment_output() {
        let spent = covenant_box(2_000_000, vec![Token::new(MARKER, 1), Token::new(LOAN, 100)]);
        let out = builder().build_repayment_output(&spent).unwrap();
        assert_eq!(out.value, 2_000_000);
        assert_eq!(out.assets, vec![Token::new(MARKER, 1), Token::new(LOAN, 101)]);
    }

    #[test]
    fn unrecognized_shape_is_invariant_error() {
        for assets in [
            vec![],
            vec![Token::new(MARKER, 1), Token::new(LOAN, 1), Token::new(Digest32([3; 32]), 1)],
        ] {
            let count = assets.len();
            let err = builder().build_repayment_output(&covenant_box(1_000_000, assets)).unwrap_err();
            assert_eq!(
                err,
                WalletError::Invariant(InvariantError::UnrecognizedShape { asset_count: count })
            );
        }
    }

    #[test]
    fn missing_owner_register_is_invariant_error() {
        let mut spent = covenant_box(1_000_000, vec![Token::new(MARKER, 1)]);
        spent.registers.clear();
        assert!(matches!(
            builder().build_repayment_output(&spent),
            Err(WalletError::Invariant(InvariantError::MissingIdentity(_)))
        ));
    }

    #[test]
    fn pool_builder_has_no_repayment() {
        let b = CovenantOutputBuilder::new(CovenantPolicy::pool());
        let spent = covenant_box(1_000_000, vec![Token::new(MARKER, 1)]);
        assert!(matches!(b.build_repayment_output(&spent), Err(WalletError::Build(_))));
    }

    #[test]
    fn pool_successor_adds_deposit() {
        let b = CovenantOutputBuilder::new(CovenantPolicy::pool());
        let spent = covenant_box(3_000_000, vec![]);
        let out = b.build_pool_successor(&spent, 2_000_000).unwrap();
        assert_eq!(out.value, 5_000_000);
        assert_eq!(out.ergo_tree, spent.ergo_tree);
    }

    #[test]
    fn funding_output_shapes() {
        let tree = ErgoTree(vec![0x10, 0x07]);
        let marker = Digest32([0x42; 32]);

        let erg = builder()
            .build_funding_output(tree.clone(), &owner(), marker, &FundingRequest::erg(5_000_000))
            .unwrap();
        assert_eq!(erg.value, 5_000_000);
        assert_eq!(erg.assets, vec![Token::new(marker, 1)]);
        assert_eq!(erg.registers[&RegisterId::R4], encode_public_key(&owner()));

        let token = builder()
            .build_funding_output(tree, &owner(), marker, &FundingRequest::token(LOAN, 100))
            .unwrap();
        assert_eq!(token.value, MIN_BOX_VALUE);
        assert_eq!(token.assets, vec![Token::new(marker, 1), Token::new(LOAN, 100)]);
    }

    #[test]
    fn funding_below_min_box_rejected() {
        let err = builder()
            .build_funding_output(ErgoTree(vec![0x10]), &owner(), MARKER, &FundingRequest::erg(10))
            .unwrap_err();
        assert!(matches!(err, WalletError::Build(_)));
    }
}
