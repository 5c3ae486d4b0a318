// Copyright (c) 2022-2023 The Cardlock Authors

//! Protocol / APDU definitions for cardlock card and host communication
//!
//! This module provides protocol definitions and a reference implementation for
//! the records exchanged between the device and its four smart cards (over NFC),
//! and between the device and the companion application (host sessions).
//!
//! Card commands are ISO7816 APDUs (`CLA INS P1 P2 LC DATA`), responses carry a
//! trailing status word which the transport reports separately from the payload.
//! Card-side payloads are either fixed-layout records or simple TLV lists
//! (`[TAG][LEN][VALUE]`), multi-byte integers on the card interface are big-endian
//! as the card applet expects.
//!

#![no_std]

use core::fmt::Debug;

pub use ledger_proto::{ApduError, ApduStatic};

pub mod pair;
pub mod pow;
pub mod prelude;
pub mod select;
pub mod session;
pub mod slots;
pub mod status;

mod helpers;

/// ISO7816 APDU class used by the card applet
pub const CLA_ISO7816: u8 = 0x00;

/// Offset of command data within an encoded APDU
pub const OFFSET_CDATA: usize = 5;

/// Maximum short APDU payload
pub const MAX_APDU_DATA: usize = 255;

/// Size of the device family identifier
pub const FAMILY_ID_SIZE: usize = 4;

/// Size of a card (pairing) key identifier
pub const CARD_KEY_ID_SIZE: usize = 4;

/// Size of the card applet version
pub const CARD_VERSION_SIZE: usize = 4;

/// Size of a wallet name on cards
pub const NAME_SIZE: usize = 16;

/// Size of the wallet password double-hash
pub const PASSWORD_HASH_SIZE: usize = 32;

/// Size of the proof-of-work target
pub const POW_TARGET_SIZE: usize = 32;

/// Size of the proof-of-work random number (search seed)
pub const POW_RAND_NUMBER_SIZE: usize = 32;

/// Size of a proof-of-work nonce
pub const POW_NONCE_SIZE: usize = 32;

/// Card applet instruction codes
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Instruction {
    /// Select the wallet applet
    Select = 0xA4,

    /// Pair device and card
    Pair = 0x12,

    /// Proof-of-work challenge operations (see [PowFunction])
    ProofOfWork = 0xCB,
}

/// Proof-of-work sub-functions, sent as `P1`
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum PowFunction {
    GetChallenge = 0x00,
    VerifyChallenge = 0x01,
}

/// TLV tags used in card payloads
#[derive(Copy, Clone, Debug, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Tag {
    /// Wallet name
    Name = 0xE0,
    /// Wallet password double-hash
    Password = 0xE1,

    /// Applet version (select response)
    Version = 0xB0,
    /// Family id (select response)
    FamilyId = 0xB1,
    /// Card number, 1..=4 (select response)
    CardNumber = 0xB2,
    /// Card pairing key id (select response)
    CardKeyId = 0xB3,
    /// Card recovery mode flag (select response)
    RecoveryMode = 0xB5,

    /// Proof-of-work random number
    PowRandomNumber = 0xD1,
    /// Proof-of-work target
    PowTarget = 0xD2,
    /// Proof-of-work nonce
    PowNonce = 0xD3,
}

/// Card command APDU, extends [ApduStatic] with the `P1` function selector
pub trait CardCommand: ApduStatic + encdec::Encode<Error = ApduError> + Debug {
    /// `P1` value for this command
    const P1: u8 = 0x00;

    /// Encode a complete command APDU (header, length and data) into the provided buffer
    fn encode_apdu(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let n = self.encode_len()?;

        if n > MAX_APDU_DATA || buff.len() < OFFSET_CDATA + n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = Self::CLA;
        buff[1] = Self::INS;
        buff[2] = Self::P1;
        buff[3] = 0x00;
        buff[4] = n as u8;

        let m = self.encode(&mut buff[OFFSET_CDATA..])?;

        Ok(OFFSET_CDATA + m)
    }
}

/// Helper macro for encoding `bitflags` types
#[macro_export]
macro_rules! encdec_bitflags {
    ($b:ty) => {
        impl encdec::Encode for $b {
            type Error = ApduError;

            fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
                let bits: u8 = self.bits();
                encdec::Encode::encode(&bits, buff).map_err(|e| e.into())
            }

            fn encode_len(&self) -> Result<usize, Self::Error> {
                let bits: u8 = self.bits();
                encdec::Encode::encode_len(&bits).map_err(|e| e.into())
            }
        }

        impl encdec::DecodeOwned for $b {
            type Output = $b;
            type Error = ApduError;

            fn decode_owned(buff: &[u8]) -> Result<(Self, usize), Self::Error> {
                if buff.is_empty() {
                    return Err(ApduError::InvalidLength);
                }
                let v = <$b>::from_bits_truncate(buff[0]);
                Ok((v, 1))
            }
        }
    };
}
