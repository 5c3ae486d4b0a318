// Copyright (c) 2022-2023 The Cardlock Authors

//! Device / card pairing APDUs
//!
//! Pairing exchanges a signed record in each direction, both share the same
//! layout so the card can answer in the request buffer.

use byteorder::{BigEndian, ByteOrder};
use encdec::{Decode, Encode};
use heapless::Vec;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{ApduError, ApduStatic, CardCommand, Instruction, CARD_KEY_ID_SIZE, CLA_ISO7816};

/// Length of the signed prefix of a pairing record
pub const PAIRING_SIGNED_LEN: usize = 44;

/// Maximum DER encoded ECDSA (P-256) signature length
pub const MAX_DER_SIGNATURE_LEN: usize = 72;

/// Maximum pairing record length
pub const PAIRING_MAX_LEN: usize = 128;

/// Pairing record
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            KEY_ID                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// /                             NONCE                             /
/// /                           (32-byte)                           /
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      DERIVATION_INDEX_0 (BE)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      DERIVATION_INDEX_1 (BE)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// /                           SIGNATURE                           /
/// /              (DER ECDSA over SHA-256 of bytes 0..44)          /
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// In a request the key id / path are the device's permanent self key, in the
/// response they identify the card key used to sign.
#[derive(Clone, PartialEq, Debug)]
pub struct PairRecord {
    /// Signer key identifier
    pub key_id: [u8; CARD_KEY_ID_SIZE],
    /// Signer nonce
    pub nonce: [u8; 32],
    /// Non-hardened derivation indices of the signing key
    pub path: [u32; 2],
    /// DER encoded signature over [PairRecord::signed_data]
    pub signature: Vec<u8, MAX_DER_SIGNATURE_LEN>,
}

impl PairRecord {
    /// Create an unsigned pairing record
    pub fn new(key_id: [u8; CARD_KEY_ID_SIZE], nonce: [u8; 32], path: [u32; 2]) -> Self {
        Self {
            key_id,
            nonce,
            path,
            signature: Vec::new(),
        }
    }

    /// Fetch the signed prefix of the record
    pub fn signed_data(&self) -> [u8; PAIRING_SIGNED_LEN] {
        let mut d = [0u8; PAIRING_SIGNED_LEN];

        d[..4].copy_from_slice(&self.key_id);
        d[4..36].copy_from_slice(&self.nonce);
        BigEndian::write_u32(&mut d[36..], self.path[0]);
        BigEndian::write_u32(&mut d[40..], self.path[1]);

        d
    }

    /// Attach a DER encoded signature
    pub fn set_signature(&mut self, der: &[u8]) -> Result<(), ApduError> {
        self.signature = Vec::from_slice(der).map_err(|_| ApduError::InvalidLength)?;
        Ok(())
    }
}

impl Zeroize for PairRecord {
    fn zeroize(&mut self) {
        self.key_id.zeroize();
        self.nonce.zeroize();
        self.path.zeroize();
        self.signature[..].zeroize();
        self.signature.clear();
    }
}

impl Drop for PairRecord {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for PairRecord {}

impl ApduStatic for PairRecord {
    const CLA: u8 = CLA_ISO7816;
    const INS: u8 = Instruction::Pair as u8;
}

impl CardCommand for PairRecord {}

impl Encode for PairRecord {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(PAIRING_SIGNED_LEN + self.signature.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[..PAIRING_SIGNED_LEN].copy_from_slice(&self.signed_data());
        buff[PAIRING_SIGNED_LEN..n].copy_from_slice(&self.signature);

        Ok(n)
    }
}

impl<'a> Decode<'a> for PairRecord {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        // Require the signed prefix and at least a signature header
        if buff.len() < PAIRING_SIGNED_LEN + 2 || buff.len() > PAIRING_MAX_LEN {
            return Err(ApduError::InvalidLength);
        }

        let mut key_id = [0u8; CARD_KEY_ID_SIZE];
        key_id.copy_from_slice(&buff[..4]);

        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&buff[4..36]);

        let path = [
            BigEndian::read_u32(&buff[36..]),
            BigEndian::read_u32(&buff[40..]),
        ];

        // DER SEQUENCE header gives the signature length
        let sig = &buff[PAIRING_SIGNED_LEN..];
        if sig[0] != 0x30 {
            return Err(ApduError::InvalidEncoding);
        }
        let sig_len = sig[1] as usize + 2;
        if sig_len > sig.len() || sig_len > MAX_DER_SIGNATURE_LEN {
            return Err(ApduError::InvalidLength);
        }

        let signature = Vec::from_slice(&sig[..sig_len]).map_err(|_| ApduError::InvalidLength)?;

        Ok((
            Self {
                key_id,
                nonce,
                path,
                signature,
            },
            PAIRING_SIGNED_LEN + sig_len,
        ))
    }
}
