// Copyright (c) 2022-2023 The Cardlock Authors

//! Card and NFC status words
//!
//! Card operations report a single `u32` status, either an ISO7816 status word
//! returned by the card applet or an NFC transport error (`NFC_ERROR_BASE` and up).
//! [Status] classifies these into a closed set of variants so callers match
//! exhaustively rather than comparing raw codes.

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter};

/// Base for errors raised by the NFC layer (rather than the card)
pub const NFC_ERROR_BASE: u32 = 0x1_0000;

/// Base for NFC module errors
pub const NFC_APP_ERROR_BASE: u32 = NFC_ERROR_BASE + 0x1000;

/// Card not present in the field
pub const NFC_CARD_ABSENT: u32 = NFC_APP_ERROR_BASE + 0x11;

/// First secure channel error (encryption key initialisation)
pub const NFC_SC_ENC_KEY_ERROR: u32 = NFC_APP_ERROR_BASE + 0x12;

/// Last secure channel error (decryption failure)
pub const NFC_SC_DEC_ERROR: u32 = NFC_APP_ERROR_BASE + 0x18;

/// ISO7816 / applet status words with fixed values
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumIter, TryFromPrimitive)]
#[repr(u16)]
pub enum StatusWord {
    IncompatibleApplet = 0x1000,
    StateUnchanged = 0x6200,
    NullPointerException = 0x6281,
    TransactionException = 0x6900,
    SecurityConditionsNotSatisfied = 0x6982,
    FileInvalid = 0x6983,
    ConditionsNotSatisfied = 0x6985,
    WrongData = 0x6A80,
    FileNotFound = 0x6A82,
    RecordNotFound = 0x6A83,
    FileFull = 0x6A84,
    ChallengeFailed = 0x6A88,
    InvalidIns = 0x6D00,
    NotPaired = 0x7985,
    InsBlocked = 0x7E00,
    NoError = 0x9000,
    OutOfBoundary = 0x91BE,
}

/// Status word classes where the low byte carries data
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumIter, TryFromPrimitive)]
#[repr(u8)]
pub enum StatusClass {
    /// Incorrect PIN, low byte is the remaining attempt count
    PinMismatch = 0x6C,
    /// Crypto exception on the card
    CryptoException = 0x7C,
    /// Wallet locked behind a proof-of-work challenge
    WalletLocked = 0x7D,
}

/// Classified card / transport status
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    /// A fixed card status word
    Card(StatusWord),
    /// Incorrect PIN with remaining attempts
    PinMismatch(u8),
    /// Card crypto exception (low byte is card specific)
    CryptoException(u8),
    /// Wallet locked (low byte is card specific)
    WalletLocked(u8),
    /// Card left the field
    CardAbsent,
    /// Secure channel failure between device and card
    SecureChannel(u32),
    /// Other NFC transport failure
    Nfc(u32),
    /// Unrecognised status
    Unknown(u32),
}

impl Status {
    /// Successful status
    pub const OK: Status = Status::Card(StatusWord::NoError);

    /// Classify a raw status code
    pub fn classify(code: u32) -> Self {
        if code >= NFC_ERROR_BASE {
            return match code {
                NFC_CARD_ABSENT => Status::CardAbsent,
                NFC_SC_ENC_KEY_ERROR..=NFC_SC_DEC_ERROR => Status::SecureChannel(code),
                _ if code & NFC_ERROR_BASE == NFC_ERROR_BASE => Status::Nfc(code),
                _ => Status::Unknown(code),
            };
        }

        let sw = code as u16;

        if let Ok(w) = StatusWord::try_from(sw) {
            return Status::Card(w);
        }

        match StatusClass::try_from((sw >> 8) as u8) {
            Ok(StatusClass::PinMismatch) => Status::PinMismatch(sw as u8),
            Ok(StatusClass::CryptoException) => Status::CryptoException(sw as u8),
            Ok(StatusClass::WalletLocked) => Status::WalletLocked(sw as u8),
            Err(_) => Status::Unknown(code),
        }
    }

    /// Raw status code
    pub fn code(&self) -> u32 {
        match self {
            Status::Card(w) => *w as u32,
            Status::PinMismatch(n) => ((StatusClass::PinMismatch as u32) << 8) | *n as u32,
            Status::CryptoException(n) => {
                ((StatusClass::CryptoException as u32) << 8) | *n as u32
            }
            Status::WalletLocked(n) => ((StatusClass::WalletLocked as u32) << 8) | *n as u32,
            Status::CardAbsent => NFC_CARD_ABSENT,
            Status::SecureChannel(c) | Status::Nfc(c) | Status::Unknown(c) => *c,
        }
    }

    /// Check whether this status indicates success
    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }
}

impl From<u32> for Status {
    fn from(code: u32) -> Self {
        Status::classify(code)
    }
}

impl From<StatusWord> for Status {
    fn from(w: StatusWord) -> Self {
        Status::Card(w)
    }
}

/// Display status as hex, matching card documentation
impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04X}", self.code())
    }
}
