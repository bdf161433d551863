/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Debug, Display, Formatter};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::types::hash::{HashPrefix, Hasher};

// re-exports below.
pub use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Signature represented in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub(crate) fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// A wrapper around [SigningKey](ed25519_dalek::SigningKey) that implements a
/// [convenience method](Self::sign) for creating signatures as well as a [getter](Self::public)
/// for the public key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Convenience method for creating signatures over values or messages represented as
    /// byte slices.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    pub fn account(&self) -> AccountID {
        AccountID::from_public_key(&self.public())
    }
}

/// Verify `signature` over `message` against `public_key`. Returns false for malformed
/// signature bytes as well as for honest mismatches.
pub fn verify_signature(
    public_key: &VerifyingKey,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    let signature = Signature::from_bytes(&signature.bytes());
    public_key.verify(message, &signature).is_ok()
}

/// A 160-bit account identity derived from an Ed25519 public key.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct AccountID([u8; 20]);

impl AccountID {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }

    /// The first 20 bytes of the SHA-256 digest of the key's byte representation.
    pub fn from_public_key(public_key: &VerifyingKey) -> AccountID {
        let digest = Hasher::digest(HashPrefix::AccountID, public_key.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.bytes()[..20]);
        AccountID(bytes)
    }
}

impl Display for AccountID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "{}", &encoded[..7])
    }
}

impl Debug for AccountID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
