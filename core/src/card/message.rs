// Copyright (c) 2022-2023 The Cardlock Authors

use core::fmt;

/// User-facing card operation messages
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CardMessage {
    /// Place a card for the current operation
    PlaceCard,
    /// Tap a specific card (1..=4)
    TapCard { card: u8 },
    CardDetected,
    RemoveCard,

    WrongCardSequence,
    FamilyIdMismatch,
    CorruptedCard,
    IncompatibleCard,
    CardHealthCritical,
    NotPaired,

    CardRemovedFast,
    FrequentDisconnections,
    RetryOrRepair,
    UnknownError,
    AlignWithScreen,

    WalletAlreadyExists,
    CardFull,
    WalletNotFound,
    TransactionException,
    InvalidMemory,
    OutOfBoundary,
    ShareDeviceLogs,
    CryptoException,

    WalletLocked,
    IncorrectPin { remaining: u8 },

    DeviceCompromised,
    CannotVerifyCard,
    SecurityConditionsNotMet,
}

impl fmt::Display for CardMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CardMessage::*;

        let s = match self {
            TapCard { card } => return write!(f, "Tap card #{card}"),
            IncorrectPin { remaining } => {
                return write!(f, "Wrong PIN!\n{remaining} attempt(s) left")
            }

            PlaceCard => "Place card\nbelow the device",
            CardDetected => "Card detected Processing...",
            RemoveCard => "Process complete Remove card",

            WrongCardSequence => "Wrong card sequence",
            FamilyIdMismatch => "Error! Use correct cards of the wallet",
            CorruptedCard => "Corrupted card! Contact support",
            IncompatibleCard => "Incompatible card version! Contact support",
            CardHealthCritical => "Card health is critical! Migrate to new set of cards",
            NotPaired => "This device & card are not paired",

            CardRemovedFast => "Too fast, tap again and wait for buzzer sound",
            FrequentDisconnections => "Frequent disconnections detected!\nContact support",
            RetryOrRepair => "Retry or re-pair your cards",
            UnknownError => "Unknown card error! Contact support",
            AlignWithScreen => "Hold the card and align with the device screen",

            WalletAlreadyExists => "Wallet with same name or seed already exists",
            CardFull => "Error!\nCard is full",
            WalletNotFound => "Wallet does not exist on this card",
            TransactionException => "Operation failed on card (Tx Exp)",
            InvalidMemory => "Error! Invalid memory accessed",
            OutOfBoundary => "Operation failed on card (OOB)",
            ShareDeviceLogs => "Contact support & share the device logs",
            CryptoException => "Operation failed on card (Crypto Exp)",

            WalletLocked => "Wrong PIN!\nWallet is now locked",

            DeviceCompromised => "Device is compromised! Contact support",
            CannotVerifyCard => "Couldn't verify card! Contact support",
            SecurityConditionsNotMet => "Security conditions not met!",
        };

        f.write_str(s)
    }
}
