// Copyright (c) 2022-2023 The Cardlock Authors

//! BIP-0032 public key derivation over NIST P-256
//!
//! Cards and the host session key are derived from the provisioned card root
//! xpub using non-hardened child derivation, only the public half is ever
//! required on the device. Serialisation and the HMAC-SHA512 chain are
//! provided by [bip32], [CardKey] supplies the P-256 point arithmetic.

use bip32::{ChildNumber, ExtendedKey, ExtendedKeyAttrs, Prefix, PrivateKeyBytes, PublicKeyBytes};
use byteorder::{BigEndian, ByteOrder};
use p256::{
    elliptic_curve::{sec1::ToEncodedPoint, PrimeField},
    FieldBytes, ProjectivePoint, PublicKey, Scalar,
};

use crate::Error;

/// Serialised extended public key version (`xpub`)
pub const XPUB_VERSION: u32 = 0x0488_B21E;

/// Serialised extended public key length
pub const XPUB_LEN: usize = 78;

/// Compressed SEC1 public key length
pub const PUBLIC_KEY_LEN: usize = 33;

/// Extended P-256 card public key
pub type ExtendedPublicKey = bip32::ExtendedPublicKey<CardKey>;

/// P-256 public key for use with [bip32] extended keys
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct CardKey(PublicKey);

impl CardKey {
    pub fn as_public_key(&self) -> &PublicKey {
        &self.0
    }
}

impl From<PublicKey> for CardKey {
    fn from(k: PublicKey) -> Self {
        Self(k)
    }
}

impl bip32::PublicKey for CardKey {
    fn from_bytes(bytes: PublicKeyBytes) -> Result<Self, bip32::Error> {
        PublicKey::from_sec1_bytes(&bytes)
            .map(Self)
            .map_err(|_| bip32::Error::Crypto)
    }

    fn to_bytes(&self) -> PublicKeyBytes {
        let mut k = [0u8; PUBLIC_KEY_LEN];
        k.copy_from_slice(self.0.to_encoded_point(true).as_bytes());
        k
    }

    /// `K_child = IL·G + K`, IL must be a valid scalar
    fn derive_child(&self, other: PrivateKeyBytes) -> Result<Self, bip32::Error> {
        let il = Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(other)))
            .ok_or(bip32::Error::Crypto)?;

        let p = ProjectivePoint::GENERATOR * il + self.0.to_projective();

        // Identity point is not a valid key
        PublicKey::from_affine(p.to_affine())
            .map(Self)
            .map_err(|_| bip32::Error::Crypto)
    }
}

/// Parse a serialised (78-byte) extended public key
///
/// `VERSION (4) ‖ DEPTH (1) ‖ PARENT_FINGERPRINT (4) ‖ CHILD_NUMBER (4) ‖ CHAIN_CODE (32) ‖ KEY (33)`
pub fn parse_xpub(b: &[u8; XPUB_LEN]) -> Result<ExtendedPublicKey, Error> {
    if BigEndian::read_u32(&b[0..]) != XPUB_VERSION {
        return Err(Error::InvalidXpub);
    }

    let mut parent_fingerprint = [0u8; 4];
    parent_fingerprint.copy_from_slice(&b[5..9]);

    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&b[13..45]);

    let mut key_bytes = [0u8; PUBLIC_KEY_LEN];
    key_bytes.copy_from_slice(&b[45..]);

    let key = ExtendedKey {
        prefix: Prefix::XPUB,
        attrs: ExtendedKeyAttrs {
            depth: b[4],
            parent_fingerprint,
            child_number: ChildNumber(BigEndian::read_u32(&b[9..])),
            chain_code,
        },
        key_bytes,
    };

    ExtendedPublicKey::try_from(key).map_err(|_| Error::InvalidXpub)
}

/// Parse a base58check encoded extended public key
pub fn parse_xpub_base58(s: &str) -> Result<ExtendedPublicKey, Error> {
    let key: ExtendedKey = s.parse().map_err(|_| Error::InvalidXpub)?;

    if key.prefix != Prefix::XPUB {
        return Err(Error::InvalidXpub);
    }

    ExtendedPublicKey::try_from(key).map_err(|_| Error::InvalidXpub)
}

/// Derive along a path of non-hardened indices
pub fn derive_path(root: &ExtendedPublicKey, path: &[u32]) -> Result<ExtendedPublicKey, Error> {
    let mut k = root.clone();

    for i in path {
        let n = ChildNumber(*i);
        if n.is_hardened() {
            return Err(Error::DerivationFailed);
        }

        k = k.derive_child(n).map_err(|_| Error::DerivationFailed)?;
    }

    Ok(k)
}
