// Copyright (c) 2022-2023 The Cardlock Authors

//! Card operation state machine
//!
//! Drives card detection and applet selection, classifies card / NFC status
//! words and decides between retry, re-tap and abort.
//! Classification and retry policy live in the pure [step] / [handle_status]
//! functions, [Engine][crate::Engine] runs the resulting actions against the platform.

use strum::{Display, EnumIter};

use crate::apdu::{
    slots::CardSlots,
    status::{Status, NFC_CARD_ABSENT},
    CARD_KEY_ID_SIZE, CARD_VERSION_SIZE, FAMILY_ID_SIZE,
};

mod classify;
pub use classify::{classify_authenticated, classify_select, Verdict};

mod message;
pub use message::CardMessage;

mod state;
pub use state::{handle_status, step, Action, Event, PairingLookup, Selection, State, Transition};

mod runner;
pub use runner::MAX_RESPONSE_LEN;

/// Default generic retry count
pub const DEFAULT_RETRIES: u8 = 5;

/// Default card-absent retry count
pub const DEFAULT_CARD_ABSENT_RETRIES: u8 = 100;

/// Default card wait inactivity timeout
pub const DEFAULT_TIMEOUT_MS: u32 = 300_000;

/// Family id value prior to first pairing
pub const UNSET_FAMILY_ID: [u8; FAMILY_ID_SIZE] = [0xFF; FAMILY_ID_SIZE];

/// Card serial length (family id ‖ card number)
pub const CARD_SERIAL_SIZE: usize = FAMILY_ID_SIZE + 1;

/// Card operation outcome
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumIter)]
#[repr(u8)]
pub enum CardOperationResult {
    Success = 0x00,
    CardRemoved = 0x01,
    LockedWallet = 0x02,
    IncorrectPin = 0x03,
    RetapRequired = 0x04,
    VerificationFailed = 0x05,
    AbortOperation = 0x06,
    P0Occurred = 0x07,
    DefaultInvalid = 0x08,
}

/// Card operation result with an optional user-facing message
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Outcome {
    pub result: CardOperationResult,
    pub message: Option<CardMessage>,
}

impl Outcome {
    pub const SUCCESS: Outcome = Outcome::new(CardOperationResult::Success, None);

    pub const P0: Outcome = Outcome::new(CardOperationResult::P0Occurred, None);

    pub const INVALID: Outcome = Outcome::new(CardOperationResult::DefaultInvalid, None);

    pub const fn new(result: CardOperationResult, message: Option<CardMessage>) -> Self {
        Self { result, message }
    }

    /// Terminal abort with a message
    pub const fn abort(message: CardMessage) -> Self {
        Self::new(CardOperationResult::AbortOperation, Some(message))
    }

    /// User must tap a card again
    pub const fn retap(message: CardMessage) -> Self {
        Self::new(CardOperationResult::RetapRequired, Some(message))
    }

    pub fn is_success(&self) -> bool {
        self.result == CardOperationResult::Success
    }

    /// Check whether the flow may indicate the error and wait for another tap
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.result,
            CardOperationResult::CardRemoved | CardOperationResult::RetapRequired
        )
    }
}

/// Card operation configuration
#[derive(Clone, PartialEq, Debug)]
pub struct CardOperationConfig {
    /// Card slots accepted for this tap
    pub acceptable_cards: CardSlots,
    /// Expected family id, [UNSET_FAMILY_ID] to adopt the card's
    pub family_id: [u8; FAMILY_ID_SIZE],
    /// Load pairing keys for the tapped card (authenticated operations)
    pub init_session_keys: bool,
    /// Generic retries before aborting
    pub retries: u8,
    /// Card-absent retries before aborting, `0` selects the default
    pub card_absent_retries: u8,
    /// Inactivity timeout while waiting for a card
    pub timeout_ms: u32,
}

impl Default for CardOperationConfig {
    fn default() -> Self {
        Self {
            acceptable_cards: CardSlots::all(),
            family_id: UNSET_FAMILY_ID,
            init_session_keys: false,
            retries: DEFAULT_RETRIES,
            card_absent_retries: DEFAULT_CARD_ABSENT_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl CardOperationConfig {
    pub fn new(acceptable_cards: CardSlots, family_id: [u8; FAMILY_ID_SIZE]) -> Self {
        Self {
            acceptable_cards,
            family_id,
            ..Default::default()
        }
    }

    /// Require session keys for the tapped card
    pub fn with_session_keys(mut self) -> Self {
        self.init_session_keys = true;
        self
    }
}

/// Per-operation NFC connection context
///
/// Created per top-level operation and owned by its caller, the state machine
/// is the only writer.
#[derive(Clone, PartialEq, Debug)]
pub struct NfcConnectionData {
    pub family_id: [u8; FAMILY_ID_SIZE],
    pub acceptable_cards: CardSlots,
    /// Slot that responded to the last applet selection
    pub tapped_card: CardSlots,
    pub card_key_id: [u8; CARD_KEY_ID_SIZE],
    pub card_version: [u8; CARD_VERSION_SIZE],
    /// Generic retries remaining
    pub retries: u8,
    /// Card-absent retries remaining
    pub card_absent_retries: u8,
    pub recovery_mode: bool,
    pub init_session_keys: bool,
    /// Set when the card / device pairing is missing
    pub pairing_error: bool,
    /// Last raw status code
    pub status: u32,
    pub timeout_ms: u32,
}

impl NfcConnectionData {
    pub fn new(cfg: &CardOperationConfig) -> Self {
        let card_absent_retries = match cfg.card_absent_retries {
            0 => DEFAULT_CARD_ABSENT_RETRIES,
            n => n,
        };

        Self {
            family_id: cfg.family_id,
            acceptable_cards: cfg.acceptable_cards,
            tapped_card: CardSlots::empty(),
            card_key_id: [0u8; CARD_KEY_ID_SIZE],
            card_version: [0u8; CARD_VERSION_SIZE],
            retries: cfg.retries,
            card_absent_retries,
            recovery_mode: false,
            init_session_keys: cfg.init_session_keys,
            pairing_error: false,
            status: 0,
            timeout_ms: cfg.timeout_ms,
        }
    }

    /// Reset per-tap fields prior to another tap in the same flow
    pub fn reset_tap(&mut self, acceptable_cards: CardSlots, family_id: [u8; FAMILY_ID_SIZE]) {
        self.acceptable_cards = acceptable_cards;
        self.family_id = family_id;
        self.tapped_card = CardSlots::empty();
    }

    /// Classified last status
    pub fn last_status(&self) -> Status {
        Status::classify(self.status)
    }

    /// Card serial, `FAMILY_ID ‖ CARD_NUMBER` of the tapped card
    pub fn card_serial(&self) -> [u8; CARD_SERIAL_SIZE] {
        let mut s = [0u8; CARD_SERIAL_SIZE];

        s[..FAMILY_ID_SIZE].copy_from_slice(&self.family_id);
        s[FAMILY_ID_SIZE] = self.tapped_card.card_number().unwrap_or(0xFF);

        s
    }

    pub(crate) fn mark_card_absent(&mut self) {
        self.status = NFC_CARD_ABSENT;
    }
}
