// Copyright (c) 2022-2023 The Cardlock Authors

//! Card pairing keystore
//!
//! One entry per card slot, populated by [pairing][crate::pairing] and used to
//! load secure channel keys before authenticated card operations.

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{apdu::CARD_KEY_ID_SIZE, platform::Storage};

/// Number of keystore entries (one per card slot)
pub const MAX_KEYSTORE_ENTRY: usize = 4;

/// Pairing key size
pub const PAIRING_KEY_SIZE: usize = 64;

/// Keystore entry for a paired card
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct KeystoreEntry {
    /// Pairing key, `ENC_KEY (32) ‖ MAC_KEY (32)`
    pub pairing_key: [u8; PAIRING_KEY_SIZE],
    /// Card pairing key identifier
    pub card_key_id: [u8; CARD_KEY_ID_SIZE],
    /// Entry in use
    pub used: bool,
}

impl KeystoreEntry {
    pub fn new(
        pairing_key: &[u8; PAIRING_KEY_SIZE],
        card_key_id: &[u8; CARD_KEY_ID_SIZE],
    ) -> Self {
        Self {
            pairing_key: *pairing_key,
            card_key_id: *card_key_id,
            used: true,
        }
    }

    /// Split the pairing key into secure channel `(ENC_KEY, MAC_KEY)`
    pub fn session_keys(&self) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
        let mut enc = Zeroizing::new([0u8; 32]);
        let mut mac = Zeroizing::new([0u8; 32]);

        enc.copy_from_slice(&self.pairing_key[..32]);
        mac.copy_from_slice(&self.pairing_key[32..]);

        (enc, mac)
    }
}

/// Debug without key material
impl core::fmt::Debug for KeystoreEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeystoreEntry")
            .field("card_key_id", &self.card_key_id)
            .field("used", &self.used)
            .finish_non_exhaustive()
    }
}

/// Find the keystore index of the entry paired with `card_key_id`
pub fn paired_card_index<S: Storage>(
    storage: &S,
    card_key_id: &[u8; CARD_KEY_ID_SIZE],
) -> Option<usize> {
    (0..MAX_KEYSTORE_ENTRY).find(|i| match storage.keystore_entry(*i) {
        Some(e) => e.used && &e.card_key_id == card_key_id,
        None => false,
    })
}
