// Copyright (c) 2022-2023 The Cardlock Authors

//! Platform traits, implemented by firmware to bind the core to hardware
//!
//! All calls are blocking, the core is single threaded and card operations are
//! serialised by ownership of the per-operation connection context.

use core::fmt::Debug;

use zeroize::Zeroizing;

use crate::{
    apdu::{session::AuthData, slots::CardSlots, FAMILY_ID_SIZE, NAME_SIZE},
    card::CardMessage,
    keystore::KeystoreEntry,
    pow::Challenge,
    Error,
};

/// Result of waiting on an NFC event
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum NfcEvent {
    /// Awaited event occurred (card detected / removed)
    Ready,
    /// Inactivity timeout elapsed
    Timeout,
    /// External abort signalled
    Abort,
}

/// Result of a single APDU exchange
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Exchange {
    /// Card status word or NFC error code
    pub status: u32,
    /// Response payload length (excluding status word)
    pub len: usize,
}

/// NFC transport, owns the radio and card framing
pub trait Transport {
    /// Wait for a card to enter the field
    fn wait_for_card(&mut self, timeout_ms: u32) -> NfcEvent;

    /// Wait for the current card to leave the field
    fn wait_for_card_removed(&mut self, timeout_ms: u32) -> NfcEvent;

    /// Exchange an encoded command APDU, writing the response payload to `resp`
    fn transceive(&mut self, apdu: &[u8], resp: &mut [u8]) -> Exchange;

    /// Deselect the current card
    fn deselect(&mut self);

    /// Diagnose whether the card has left the field
    fn card_absent(&mut self) -> bool;

    /// Load secure channel keys for subsequent exchanges
    fn init_session_keys(&mut self, enc_key: &[u8; 32], mac_key: &[u8; 32]);
}

impl<T: Transport> Transport for &mut T {
    fn wait_for_card(&mut self, timeout_ms: u32) -> NfcEvent {
        T::wait_for_card(self, timeout_ms)
    }

    fn wait_for_card_removed(&mut self, timeout_ms: u32) -> NfcEvent {
        T::wait_for_card_removed(self, timeout_ms)
    }

    fn transceive(&mut self, apdu: &[u8], resp: &mut [u8]) -> Exchange {
        T::transceive(self, apdu, resp)
    }

    fn deselect(&mut self) {
        T::deselect(self)
    }

    fn card_absent(&mut self) -> bool {
        T::card_absent(self)
    }

    fn init_session_keys(&mut self, enc_key: &[u8; 32], mac_key: &[u8; 32]) {
        T::init_session_keys(self, enc_key, mac_key)
    }
}

/// Secure element key slots
#[derive(Copy, Clone, PartialEq, Debug)]
#[repr(u8)]
pub enum KeySlot {
    /// Device authentication key
    DeviceAuth = 0,
    /// NFC pairing key
    NfcPair = 3,
}

/// Secure element capability interface
pub trait SecureElement {
    type Error: Debug;

    /// Sign a digest with the key in `slot`, returning a raw `r ‖ s` signature
    fn sign(&mut self, slot: KeySlot, digest: &[u8; 32]) -> Result<[u8; 64], Self::Error>;

    /// Sign a digest using the internal-sign mode, returning the signature and auxiliary fields
    fn sign_internal(&mut self, digest: &[u8; 32]) -> Result<AuthData, Self::Error>;

    /// ECDH between the key in `slot` and an uncompressed peer key (`X ‖ Y`, no prefix)
    fn ecdh(
        &mut self,
        slot: KeySlot,
        peer: &[u8; 64],
    ) -> Result<Zeroizing<[u8; 32]>, Self::Error>;

    /// Read the device hardware serial
    fn device_serial(&mut self) -> Result<[u8; 32], Self::Error>;
}

impl<T: SecureElement> SecureElement for &mut T {
    type Error = T::Error;

    fn sign(&mut self, slot: KeySlot, digest: &[u8; 32]) -> Result<[u8; 64], Self::Error> {
        T::sign(self, slot, digest)
    }

    fn sign_internal(&mut self, digest: &[u8; 32]) -> Result<AuthData, Self::Error> {
        T::sign_internal(self, digest)
    }

    fn ecdh(
        &mut self,
        slot: KeySlot,
        peer: &[u8; 64],
    ) -> Result<Zeroizing<[u8; 32]>, Self::Error> {
        T::ecdh(self, slot, peer)
    }

    fn device_serial(&mut self) -> Result<[u8; 32], Self::Error> {
        T::device_serial(self)
    }
}

/// Default secure element attempts per operation
pub const DEFAULT_SE_RETRIES: usize = 5;

/// Bounded retry adaptor for [SecureElement] operations
pub struct Retrying<SE: SecureElement> {
    se: SE,
    attempts: usize,
}

impl<SE: SecureElement> Retrying<SE> {
    pub fn new(se: SE) -> Self {
        Self::with_attempts(se, DEFAULT_SE_RETRIES)
    }

    pub fn with_attempts(se: SE, attempts: usize) -> Self {
        Self {
            se,
            attempts: attempts.max(1),
        }
    }

    pub fn set_attempts(&mut self, attempts: usize) {
        self.attempts = attempts.max(1);
    }

    fn retry<T>(
        &mut self,
        _op: &str,
        mut f: impl FnMut(&mut SE) -> Result<T, SE::Error>,
    ) -> Result<T, Error> {
        for _n in 0..self.attempts {
            match f(&mut self.se) {
                Ok(v) => return Ok(v),
                Err(_e) => {
                    #[cfg(feature = "log")]
                    log::warn!("{} failed: {:?} (attempt {})", _op, _e, _n + 1);
                }
            }
        }

        #[cfg(feature = "log")]
        log::error!("{} failed after {} attempts", _op, self.attempts);

        Err(Error::SecureElement)
    }

    pub fn sign(&mut self, slot: KeySlot, digest: &[u8; 32]) -> Result<[u8; 64], Error> {
        self.retry("sign", |se| se.sign(slot, digest))
    }

    pub fn sign_internal(&mut self, digest: &[u8; 32]) -> Result<AuthData, Error> {
        self.retry("internal sign", |se| se.sign_internal(digest))
    }

    pub fn ecdh(&mut self, slot: KeySlot, peer: &[u8; 64]) -> Result<Zeroizing<[u8; 32]>, Error> {
        self.retry("ecdh", |se| se.ecdh(slot, peer))
    }

    pub fn device_serial(&mut self) -> Result<[u8; 32], Error> {
        self.retry("device serial", |se| se.device_serial())
    }
}

/// Device provisioning data, written at manufacture
#[derive(Clone, PartialEq, Debug)]
pub struct Provisioning {
    /// Permanent self key identifier
    pub self_key_id: [u8; 4],
    /// Permanent self key derivation path (two BE `u32` indices)
    pub self_key_path: [u8; 8],
    /// Serialised card root extended public key
    pub card_root_xpub: [u8; 78],
}

impl Provisioning {
    /// Check whether provisioning data has been written
    pub fn is_provisioned(&self) -> bool {
        self.self_key_path.iter().any(|b| *b != 0xFF)
    }
}

/// Persistent storage (flash)
pub trait Storage {
    /// Load the keystore entry for `index` (0..=3), `None` if unused
    fn keystore_entry(&self, index: usize) -> Option<KeystoreEntry>;

    /// Store the keystore entry for `index` (0..=3)
    fn store_keystore_entry(&mut self, index: usize, entry: &KeystoreEntry);

    /// Clear all four keystore entries
    fn invalidate_keystore(&mut self);

    /// Device family id, all `0xFF` prior to first pairing
    fn family_id(&self) -> [u8; FAMILY_ID_SIZE];

    /// Persist the device family id
    fn store_family_id(&mut self, family_id: &[u8; FAMILY_ID_SIZE]);

    /// Device provisioning data
    fn provisioning(&self) -> Provisioning;

    /// Load the stored challenge for a wallet
    fn wallet_challenge(&self, wallet: &[u8; NAME_SIZE]) -> Option<Challenge>;

    /// Persist a challenge for a wallet
    fn store_wallet_challenge(&mut self, wallet: &[u8; NAME_SIZE], challenge: &Challenge);

    /// Fetch the lock state of a wallet, `Some(slots)` with the card(s) holding the lock
    fn wallet_locked(&self, wallet: &[u8; NAME_SIZE]) -> Option<CardSlots>;

    /// Update the lock state of a wallet
    fn set_wallet_locked(&mut self, wallet: &[u8; NAME_SIZE], locked: Option<CardSlots>);
}

impl<T: Storage> Storage for &mut T {
    fn keystore_entry(&self, index: usize) -> Option<KeystoreEntry> {
        T::keystore_entry(self, index)
    }

    fn store_keystore_entry(&mut self, index: usize, entry: &KeystoreEntry) {
        T::store_keystore_entry(self, index, entry)
    }

    fn invalidate_keystore(&mut self) {
        T::invalidate_keystore(self)
    }

    fn family_id(&self) -> [u8; FAMILY_ID_SIZE] {
        T::family_id(self)
    }

    fn store_family_id(&mut self, family_id: &[u8; FAMILY_ID_SIZE]) {
        T::store_family_id(self, family_id)
    }

    fn provisioning(&self) -> Provisioning {
        T::provisioning(self)
    }

    fn wallet_challenge(&self, wallet: &[u8; NAME_SIZE]) -> Option<Challenge> {
        T::wallet_challenge(self, wallet)
    }

    fn store_wallet_challenge(&mut self, wallet: &[u8; NAME_SIZE], challenge: &Challenge) {
        T::store_wallet_challenge(self, wallet, challenge)
    }

    fn wallet_locked(&self, wallet: &[u8; NAME_SIZE]) -> Option<CardSlots> {
        T::wallet_locked(self, wallet)
    }

    fn set_wallet_locked(&mut self, wallet: &[u8; NAME_SIZE], locked: Option<CardSlots>) {
        T::set_wallet_locked(self, wallet, locked)
    }
}

/// User response to an error indication
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum UiEvent {
    /// User confirmed
    Confirmed,
    /// Inactivity timeout or external abort
    P0,
    /// Any other input
    Other,
}

/// User interface, rendering is owned by the firmware
pub trait Ui {
    /// Update the instruction text on the current screen
    fn instruction(&mut self, msg: &CardMessage);

    /// Show an error message and wait for the user
    fn indicate_error(&mut self, msg: &CardMessage) -> UiEvent;

    /// Sound the tap-complete buzzer
    fn buzzer(&mut self);
}

impl<T: Ui> Ui for &mut T {
    fn instruction(&mut self, msg: &CardMessage) {
        T::instruction(self, msg)
    }

    fn indicate_error(&mut self, msg: &CardMessage) -> UiEvent {
        T::indicate_error(self, msg)
    }

    fn buzzer(&mut self) {
        T::buzzer(self)
    }
}
