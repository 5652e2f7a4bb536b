//! Transaction signing.
//!
//! A [`Signer`] turns an [`UnsignedTransaction`] into a
//! [`SignedTransaction`] with exactly one proof per input. Signing is
//! all-or-nothing: on any failure no partially signed transaction escapes.

use secp256k1::Message;
use tracing::debug;

use flash_core::error::{SignError, TransactionError};
use flash_core::types::{SignedInput, SignedTransaction, SpendPath, SpendingProof, UnsignedTransaction};

use crate::keys::WalletIdentity;

/// Produces authorization proofs for a transaction.
pub trait Signer: Send + Sync {
    fn sign(
        &self,
        tx: UnsignedTransaction,
        wallet: &WalletIdentity,
    ) -> Result<SignedTransaction, SignError>;
}

/// Signs in-process with the wallet's key.
///
/// Key-authorized inputs get a BIP-340 Schnorr proof over the transaction
/// id; script-authorized inputs get an empty proof. Each proof is verified
/// before the transaction is released.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSigner;

impl Signer for LocalSigner {
    fn sign(
        &self,
        tx: UnsignedTransaction,
        wallet: &WalletIdentity,
    ) -> Result<SignedTransaction, SignError> {
        let len = tx.inputs.len();
        if tx.spend_paths.len() != len {
            return Err(TransactionError::InputIndexOutOfBounds {
                index: tx.spend_paths.len(),
                len,
            }
            .into());
        }

        let id = tx.id()?;
        let digest = *id.as_bytes();
        let message = Message::from_digest(digest);

        let mut inputs = Vec::with_capacity(len);
        for (index, (input, path)) in tx.inputs.boxes().iter().zip(&tx.spend_paths).enumerate() {
            let proof = match path {
                SpendPath::Script => SpendingProof::Empty,
                SpendPath::Key(key) => {
                    if key != wallet.public_key() {
                        return Err(SignError::MissingKey { index });
                    }
                    let mut keypair = wallet.keypair();
                    let sig = secp256k1::SECP256K1.sign_schnorr_no_aux_rand(&message, &keypair);
                    keypair.non_secure_erase();
                    let bytes = sig.serialize();
                    key.verify(&digest, &bytes, index)?;
                    SpendingProof::Schnorr(bytes.to_vec())
                }
            };
            inputs.push(SignedInput {
                box_id: input.box_id,
                proof,
            });
        }

        debug!(%id, inputs = inputs.len(), "transaction signed");
        Ok(SignedTransaction {
            id,
            inputs,
            outputs: tx.outputs,
            fee: tx.fee,
            height: tx.height,
        })
    }
}
