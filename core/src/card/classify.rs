// Copyright (c) 2022-2023 The Cardlock Authors

//! Status classification tables
//!
//! One table per context, both match exhaustively over [Status] so newly
//! added status words fail to compile until they are classified.

use super::CardMessage;
use crate::apdu::status::{Status, StatusWord};

/// Classified status, resolved to a [CardOperationResult][super::CardOperationResult]
/// by the state machine
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Verdict {
    /// Proceed with the operation
    Success,
    /// User must tap again (wrong card / family)
    Retap(CardMessage),
    /// Terminal failure
    Abort(CardMessage),
    /// Card does not hold pairing keys for this device
    NotPaired,
    /// Wallet is locked behind a proof-of-work challenge
    LockedWallet,
    /// Incorrect PIN, remaining attempts
    IncorrectPin(u8),
    /// Status is not an error for this context but the operation did not complete
    Invalid,
    /// Transport or unrecognised failure, handled by the retry policy
    Default,
}

/// Classify the status of an applet selection
pub fn classify_select(status: Status) -> Verdict {
    use StatusWord::*;

    match status {
        Status::Card(w) => match w {
            NoError => Verdict::Success,
            ConditionsNotSatisfied => Verdict::Retap(CardMessage::WrongCardSequence),
            FileInvalid => Verdict::Retap(CardMessage::FamilyIdMismatch),
            FileNotFound => Verdict::Abort(CardMessage::CorruptedCard),
            IncompatibleApplet => Verdict::Abort(CardMessage::IncompatibleCard),

            StateUnchanged
            | NullPointerException
            | TransactionException
            | SecurityConditionsNotSatisfied
            | WrongData
            | RecordNotFound
            | FileFull
            | ChallengeFailed
            | InvalidIns
            | NotPaired
            | InsBlocked
            | OutOfBoundary => Verdict::Default,
        },

        Status::PinMismatch(_)
        | Status::CryptoException(_)
        | Status::WalletLocked(_)
        | Status::CardAbsent
        | Status::SecureChannel(_)
        | Status::Nfc(_)
        | Status::Unknown(_) => Verdict::Default,
    }
}

/// Classify the status of an authenticated card operation
pub fn classify_authenticated(status: Status) -> Verdict {
    use StatusWord::*;

    match status {
        Status::Card(w) => match w {
            NoError => Verdict::Success,
            SecurityConditionsNotSatisfied => Verdict::Abort(CardMessage::RetryOrRepair),
            NotPaired => Verdict::NotPaired,
            ConditionsNotSatisfied => Verdict::Invalid,
            WrongData => Verdict::Abort(CardMessage::WalletAlreadyExists),
            FileFull => Verdict::Abort(CardMessage::CardFull),
            RecordNotFound => Verdict::Abort(CardMessage::WalletNotFound),
            TransactionException => Verdict::Abort(CardMessage::TransactionException),
            NullPointerException => Verdict::Abort(CardMessage::InvalidMemory),
            OutOfBoundary => Verdict::Abort(CardMessage::OutOfBoundary),
            InvalidIns => Verdict::Abort(CardMessage::ShareDeviceLogs),
            InsBlocked => Verdict::Abort(CardMessage::CardHealthCritical),
            ChallengeFailed => Verdict::LockedWallet,

            StateUnchanged | FileInvalid | FileNotFound | IncompatibleApplet => {
                Verdict::Default
            }
        },

        Status::WalletLocked(_) => Verdict::LockedWallet,
        Status::PinMismatch(n) => Verdict::IncorrectPin(n),
        Status::CryptoException(_) => Verdict::Abort(CardMessage::CryptoException),

        Status::CardAbsent | Status::SecureChannel(_) | Status::Nfc(_) | Status::Unknown(_) => {
            Verdict::Default
        }
    }
}
