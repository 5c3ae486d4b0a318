// Copyright (c) 2022-2023 The Cardlock Authors

//! Device / card pairing
//!
//! Pairing establishes a 64-byte pairing key between the device and one card
//! slot. The device signs a request with its secure element pairing key, the
//! card answers with a record signed by a key derived from the card root xpub
//! along the path it reports. Once the response verifies the device completes
//! ECDH against the derived card key and stores
//! `SHA512(SHARED ‖ CARD_NONCE ‖ SESSION_NONCE)` in the keystore.
//!
//! Nothing is persisted until the card response has been verified.

use encdec::Decode;
use p256::{
    ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256, Sha512};
use static_assertions::const_assert;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    apdu::{
        pair::{PairRecord, MAX_DER_SIGNATURE_LEN, PAIRING_MAX_LEN, PAIRING_SIGNED_LEN},
        slots::CardSlots,
        status::{Status, StatusWord},
        CARD_KEY_ID_SIZE,
    },
    card::{
        CardMessage, CardOperationConfig, CardOperationResult, NfcConnectionData, Outcome,
        MAX_RESPONSE_LEN, UNSET_FAMILY_ID,
    },
    helpers::bip32::{derive_path, parse_xpub, ExtendedPublicKey},
    keystore::{paired_card_index, KeystoreEntry, PAIRING_KEY_SIZE},
    platform::{KeySlot, Provisioning, Retrying, SecureElement, Storage, Transport, Ui},
    Engine, Error,
};

/// Pairing session nonce size
pub const SESSION_NONCE_SIZE: usize = 32;

/// Card slot that completes a pairing flow without a removal prompt
const LAST_CARD: u8 = 4;

const_assert!(PAIRING_SIGNED_LEN == CARD_KEY_ID_SIZE + SESSION_NONCE_SIZE + 8);
const_assert!(PAIRING_SIGNED_LEN + MAX_DER_SIGNATURE_LEN <= PAIRING_MAX_LEN);
const_assert!(PAIRING_MAX_LEN <= MAX_RESPONSE_LEN);

/// Raw status reported by [Engine::pair_without_retap]
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum PairStatus {
    /// Last card / transport status
    Card(Status),
    /// Device side failure
    Internal(Error),
}

/// Ephemeral pairing state, zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PairingSession {
    session_nonce: [u8; SESSION_NONCE_SIZE],
    request: PairRecord,
    card_number: u8,
}

impl PairingSession {
    /// Build and sign a pairing request for `card_number` (1..=4)
    pub fn new<RNG: CryptoRngCore, SE: SecureElement>(
        rng: &mut RNG,
        se: &mut Retrying<SE>,
        provisioning: &Provisioning,
        card_number: u8,
    ) -> Result<Self, Error> {
        if CardSlots::from_card_number(card_number).is_none() {
            return Err(Error::InvalidSlot);
        }

        if !provisioning.is_provisioned() {
            #[cfg(feature = "log")]
            log::error!("device is not provisioned");

            return Err(Error::NotProvisioned);
        }

        let mut session_nonce = [0u8; SESSION_NONCE_SIZE];
        rng.fill_bytes(&mut session_nonce);

        let p = &provisioning.self_key_path;
        let path = [
            u32::from_be_bytes([p[0], p[1], p[2], p[3]]),
            u32::from_be_bytes([p[4], p[5], p[6], p[7]]),
        ];

        let mut s = Self {
            session_nonce,
            request: PairRecord::new(provisioning.self_key_id, session_nonce, path),
            card_number,
        };
        session_nonce.zeroize();

        let digest: [u8; 32] = Sha256::digest(s.request.signed_data()).into();
        let sig = se.sign(KeySlot::NfcPair, &digest)?;

        let sig = Signature::from_slice(&sig)?;
        s.request.set_signature(sig.to_der().as_bytes())?;

        Ok(s)
    }

    /// Signed pairing request
    pub fn request(&self) -> &PairRecord {
        &self.request
    }

    pub fn card_number(&self) -> u8 {
        self.card_number
    }

    /// Verify the card response and derive the keystore entry
    ///
    /// The card key is derived from `card_root` along the path in the response.
    pub fn postprocess<SE: SecureElement>(
        &self,
        response: &PairRecord,
        card_root: &ExtendedPublicKey,
        se: &mut Retrying<SE>,
    ) -> Result<KeystoreEntry, Error> {
        let card_key = derive_path(card_root, &response.path)
            .map_err(|_| Error::VerificationFailed)?;
        let card_key = card_key.public_key().as_public_key();

        let digest: [u8; 32] = Sha256::digest(response.signed_data()).into();
        let sig = Signature::from_der(&response.signature)?;

        VerifyingKey::from(card_key)
            .verify_prehash(&digest, &sig)
            .map_err(|_| Error::VerificationFailed)?;

        let p = card_key.to_encoded_point(false);
        let mut peer = [0u8; 64];
        peer.copy_from_slice(&p.as_bytes()[1..]);

        let shared = se.ecdh(KeySlot::NfcPair, &peer)?;

        let mut pairing_key = Zeroizing::new([0u8; PAIRING_KEY_SIZE]);
        let mut h = Sha512::new();
        h.update(&shared[..]);
        h.update(response.nonce);
        h.update(self.session_nonce);
        pairing_key.copy_from_slice(&h.finalize());

        Ok(KeystoreEntry::new(&pairing_key, &response.key_id))
    }
}

/// Map device side pairing failures to an outcome
fn pairing_failure(e: Error) -> Outcome {
    #[cfg(feature = "log")]
    log::error!("pairing failed: {:?}", e);

    match e {
        Error::NotProvisioned | Error::InvalidXpub => Outcome::abort(CardMessage::DeviceCompromised),
        Error::VerificationFailed
        | Error::InvalidSignature
        | Error::InvalidKey
        | Error::DecodingFailed
        | Error::InvalidLength
        | Error::DerivationFailed => Outcome::new(
            CardOperationResult::VerificationFailed,
            Some(CardMessage::CannotVerifyCard),
        ),
        Error::SecureElement
        | Error::EncodingFailed
        | Error::InvalidState
        | Error::InvalidSlot
        | Error::Unknown => Outcome::abort(CardMessage::UnknownError),
    }
}

impl<T, S, U, SE, RNG> Engine<T, S, U, SE, RNG>
where
    T: Transport,
    S: Storage,
    U: Ui,
    SE: SecureElement,
    RNG: CryptoRngCore,
{
    fn pairing_session(&mut self, card_number: u8) -> Result<PairingSession, Error> {
        let provisioning = self.storage.provisioning();

        PairingSession::new(&mut self.rng, &mut self.se, &provisioning, card_number)
    }

    fn pairing_connection(&self, card_number: u8) -> NfcConnectionData {
        let card = CardSlots::from_card_number(card_number).unwrap_or(CardSlots::empty());

        NfcConnectionData::new(&CardOperationConfig::new(card, self.storage.family_id()))
    }

    /// Pair with card `card_number` (1..=4), prompting the user to tap it
    ///
    /// Cards already present in the keystore complete without an exchange.
    pub fn pair(&mut self, card_number: u8) -> Outcome {
        let session = match self.pairing_session(card_number) {
            Ok(s) => s,
            Err(e) => return pairing_failure(e),
        };

        let instruction = CardMessage::TapCard { card: card_number };
        self.ui.instruction(&instruction);

        let mut conn = self.pairing_connection(card_number);

        self.card_flow(&mut conn, &instruction, |e, conn| {
            let outcome = match e.pair_tapped_card(conn, &session) {
                Ok(o) => o,
                Err(err) => return pairing_failure(err),
            };
            if !outcome.is_success() {
                return outcome;
            }

            e.ui.buzzer();

            if card_number != LAST_CARD
                && e.wait_for_card_removal() == CardOperationResult::P0Occurred
            {
                return Outcome::P0;
            }

            outcome
        })
    }

    /// Pair with card `card_number` during another card tap
    ///
    /// Retries only while the card is removed, errors are returned to the
    /// caller without prompting along with the raw status.
    pub fn pair_without_retap(&mut self, card_number: u8) -> (Outcome, PairStatus) {
        let session = match self.pairing_session(card_number) {
            Ok(s) => s,
            Err(e) => return (pairing_failure(e), PairStatus::Internal(e)),
        };

        let mut conn = self.pairing_connection(card_number);
        let (acceptable_cards, family_id) = (conn.acceptable_cards, conn.family_id);

        let (outcome, err) = loop {
            conn.reset_tap(acceptable_cards, family_id);

            let mut r = (self.initialize_applet(&mut conn), None);
            if r.0.is_success() {
                r = match self.pair_tapped_card(&mut conn, &session) {
                    Ok(o) => (o, None),
                    Err(e) => (pairing_failure(e), Some(e)),
                };
            }

            if r.0.result != CardOperationResult::CardRemoved {
                break r;
            }
        };

        self.ui.buzzer();
        self.transport.deselect();

        let status = match err {
            Some(e) => PairStatus::Internal(e),
            None => PairStatus::Card(conn.last_status()),
        };

        (outcome, status)
    }

    /// Exchange pairing records with the selected card and commit the result
    fn pair_tapped_card(
        &mut self,
        conn: &mut NfcConnectionData,
        session: &PairingSession,
    ) -> Result<Outcome, Error> {
        if paired_card_index(&self.storage, &conn.card_key_id).is_some() {
            #[cfg(feature = "log")]
            log::debug!("card {:02x?} already paired", conn.card_key_id);

            return Ok(Outcome::SUCCESS);
        }

        let mut resp = Zeroizing::new([0u8; MAX_RESPONSE_LEN]);
        let (status, n) = self.exchange(session.request(), &mut resp[..])?;

        if !status.is_ok() {
            let mut outcome = self.handle_errors(conn, status);

            // Supply chain red flag, distinct from a secure channel retry
            if status == Status::Card(StatusWord::SecurityConditionsNotSatisfied) {
                outcome.message = Some(CardMessage::SecurityConditionsNotMet);
            }

            return Ok(outcome);
        }
        conn.status = status.code();

        let (response, _) = PairRecord::decode(&resp[..n]).map_err(|_| Error::VerificationFailed)?;

        let card_root = parse_xpub(&self.storage.provisioning().card_root_xpub)?;
        let entry = session.postprocess(&response, &card_root, &mut self.se)?;

        let index = conn.tapped_card.index().ok_or(Error::InvalidSlot)?;
        self.storage.store_keystore_entry(index, &entry);

        if self.storage.family_id() == UNSET_FAMILY_ID {
            self.storage.store_family_id(&conn.family_id);
        }

        #[cfg(feature = "log")]
        log::debug!("paired card {} ({:02x?})", index + 1, entry.card_key_id);

        Ok(Outcome::SUCCESS)
    }
}
