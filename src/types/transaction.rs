/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The signed transaction type and its canonical serialized form.
//!
//! A transaction is immutable once constructed. Its identity is the digest of its full
//! canonical bytes, so any mutation (including re-signing) produces a different
//! transaction. The ledger core treats the payload as a closed union dispatched by the
//! apply engine; everything else (fee, sequence, signature, expiry) is common framing.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::{Drops, FeeLevel, LedgerSeq, SequenceNumber};
use crate::types::crypto_primitives::{
    verify_signature, AccountID, Keypair, SignatureBytes, VerifyingKey,
};
use crate::types::hash::{Hash256, HashPrefix, Hasher};

/// The identity of a transaction: the digest of its canonical bytes.
pub type TxId = Hash256;

/// Type-specific payloads. Adding a variant means adding a transactor in
/// [`crate::apply::transactor`].
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum TxPayload {
    /// Move `amount` drops from the signer to `destination`.
    Payment {
        destination: AccountID,
        amount: Drops,
    },
    /// Administrative no-op. Burns its fee and advances the signer's sequence, nothing
    /// else. Useful for keeping an account's sequence moving.
    AccountSet,
}

/// A signed transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Transaction {
    /// The signing account.
    pub account: AccountID,
    /// The signer's per-account sequence number. Exactly one transaction per
    /// `(account, sequence)` can ever be applied.
    pub sequence: SequenceNumber,
    /// The declared fee, debited in full whenever the transaction makes it into a ledger.
    pub fee: Drops,
    /// If set, the transaction is only valid in ledgers up to and including this sequence.
    pub last_valid: Option<LedgerSeq>,
    pub payload: TxPayload,
    /// Raw bytes of the Ed25519 key that signed this transaction.
    pub signing_pubkey: [u8; 32],
    pub signature: SignatureBytes,
}

impl Transaction {
    /// Construct and sign in one step. The account is derived from the keypair.
    pub fn new_signed(
        keypair: &Keypair,
        sequence: SequenceNumber,
        fee: Drops,
        last_valid: Option<LedgerSeq>,
        payload: TxPayload,
    ) -> Transaction {
        let mut tx = Transaction {
            account: keypair.account(),
            sequence,
            fee,
            last_valid,
            payload,
            signing_pubkey: keypair.public().to_bytes(),
            signature: SignatureBytes::new([0u8; 64]),
        };
        tx.signature = keypair.sign(&tx.signing_image());
        tx
    }

    /// The canonical serialized form. This is what peers exchange and what the
    /// transaction trie stores.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    /// The transaction's identity under the canonical serialization rule.
    pub fn id(&self) -> TxId {
        Hasher::digest(HashPrefix::Transaction, self.canonical_bytes())
    }

    /// The byte image the signature commits to: every field except the signature itself,
    /// under the signing domain tag.
    fn signing_image(&self) -> Vec<u8> {
        let mut image = HashPrefix::TransactionSig.bytes().to_vec();
        image.extend_from_slice(&self.account.bytes());
        image.extend_from_slice(&self.sequence.try_to_vec().unwrap());
        image.extend_from_slice(&self.fee.try_to_vec().unwrap());
        image.extend_from_slice(&self.last_valid.try_to_vec().unwrap());
        image.extend_from_slice(&self.payload.try_to_vec().unwrap());
        image.extend_from_slice(&self.signing_pubkey);
        image
    }

    /// The verifying key that signed this transaction, if its bytes form a valid key.
    pub fn signer_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.signing_pubkey).ok()
    }

    /// Checks the signature and that the signing key actually derives the `account` field.
    pub fn is_correctly_signed(&self) -> bool {
        match self.signer_key() {
            Some(key) => {
                AccountID::from_public_key(&key) == self.account
                    && verify_signature(&key, &self.signing_image(), &self.signature)
            }
            None => false,
        }
    }

    /// The reference fee this transaction is measured against, per payload type.
    ///
    /// Both current payload types cost exactly the reference fee; the seam exists so that
    /// heavier types can declare a multiple.
    pub fn base_fee(&self, reference_fee: Drops) -> Drops {
        match self.payload {
            TxPayload::Payment { .. } => reference_fee,
            TxPayload::AccountSet => reference_fee,
        }
    }

    /// The declared fee expressed as a dimensionless level against this transaction's own
    /// base fee.
    pub fn fee_level(&self, reference_fee: Drops) -> FeeLevel {
        FeeLevel::from_fee(self.fee, self.base_fee(reference_fee))
    }
}
