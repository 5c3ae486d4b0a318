// Copyright (c) 2022-2023 The Cardlock Authors

//! Host session
//!
//! Authenticates the device to a companion application over an unencrypted
//! transport.
//!
//! 1. [Engine::session_start] derives the session public key from the card root
//!    xpub, reads the device serial and signs `DEVICE_RANDOM ‖ DEVICE_ID`.
//! 2. The host replies with a [SessionReply] signed over
//!    `SESSION_RANDOM ‖ SESSION_AGE ‖ DEVICE_ID ‖ DEVICE_RANDOM`.
//! 3. [Engine::session_verify] checks the reply against the key stored in
//!    step 1, derives `SESSION_ID = SHA256(SESSION_RANDOM ‖ DEVICE_RANDOM)` and
//!    signs the same payload for the host.

use p256::{
    ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey},
    PublicKey,
};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    apdu::session::{
        SessionReply, SessionStart, SessionVerify, DEVICE_SERIAL_SIZE, SESSION_RANDOM_SIZE,
    },
    helpers::bip32::{derive_path, parse_xpub, PUBLIC_KEY_LEN},
    platform::{SecureElement, Storage, Transport, Ui},
    Engine, Error,
};

/// Session id size
pub const SESSION_ID_SIZE: usize = 32;

/// Maximum session key derivation depth
pub const MAX_SESSION_PATH: usize = 3;

/// Default session key derivation path
pub const DEFAULT_SESSION_PATH: [u32; 2] = [6, 7];

/// Signed host reply payload length
const REPLY_PAYLOAD_LEN: usize = SESSION_RANDOM_SIZE + 4 + DEVICE_SERIAL_SIZE + SESSION_RANDOM_SIZE;

/// Host session states
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Start record issued, awaiting host reply
    Started,
    /// Host verified, session id available
    Established,
}

/// Host session metadata, zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HostSession {
    device_random: [u8; SESSION_RANDOM_SIZE],
    device_id: [u8; DEVICE_SERIAL_SIZE],
    session_id: [u8; SESSION_ID_SIZE],
    public_key: [u8; PUBLIC_KEY_LEN],
    session_age: u32,
    #[zeroize(skip)]
    state: SessionState,
}

impl Default for HostSession {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSession {
    pub const fn new() -> Self {
        Self {
            device_random: [0u8; SESSION_RANDOM_SIZE],
            device_id: [0u8; DEVICE_SERIAL_SIZE],
            session_id: [0u8; SESSION_ID_SIZE],
            public_key: [0u8; PUBLIC_KEY_LEN],
            session_age: 0,
            state: SessionState::Idle,
        }
    }

    /// Clear all session metadata (host disconnect)
    pub fn clear(&mut self) {
        self.zeroize();
        self.state = SessionState::Idle;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device_random(&self) -> &[u8; SESSION_RANDOM_SIZE] {
        &self.device_random
    }

    pub fn device_id(&self) -> &[u8; DEVICE_SERIAL_SIZE] {
        &self.device_id
    }

    /// Compressed session public key, fixed from session start
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    pub fn session_age(&self) -> u32 {
        self.session_age
    }

    /// Session id, available once the host has been verified
    pub fn session_id(&self) -> Option<&[u8; SESSION_ID_SIZE]> {
        match self.state {
            SessionState::Established => Some(&self.session_id),
            _ => None,
        }
    }

    fn reply_payload(&self, reply: &SessionReply) -> [u8; REPLY_PAYLOAD_LEN] {
        let mut p = [0u8; REPLY_PAYLOAD_LEN];

        p[..32].copy_from_slice(&reply.session_random);
        p[32..36].copy_from_slice(&reply.session_age.to_be_bytes());
        p[36..68].copy_from_slice(&self.device_id);
        p[68..].copy_from_slice(&self.device_random);

        p
    }
}

impl core::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostSession")
            .field("state", &self.state)
            .field("session_age", &self.session_age)
            .finish_non_exhaustive()
    }
}

/// Derive a session id, `SHA256(SESSION_RANDOM ‖ DEVICE_RANDOM)`
pub fn derive_session_id(
    device_random: &[u8; SESSION_RANDOM_SIZE],
    session_random: &[u8; SESSION_RANDOM_SIZE],
) -> [u8; SESSION_ID_SIZE] {
    let mut h = Sha256::new();
    h.update(session_random);
    h.update(device_random);
    h.finalize().into()
}

impl<T, S, U, SE, RNG> Engine<T, S, U, SE, RNG>
where
    T: Transport,
    S: Storage,
    U: Ui,
    SE: SecureElement,
    RNG: CryptoRngCore,
{
    /// Start a host session, deriving the session key along `path`
    ///
    /// Any existing session state is replaced once all secure element
    /// operations have completed.
    pub fn session_start(
        &mut self,
        session: &mut HostSession,
        path: &[u32],
    ) -> Result<SessionStart, Error> {
        if path.is_empty() || path.len() > MAX_SESSION_PATH {
            return Err(Error::InvalidLength);
        }

        let card_root = parse_xpub(&self.storage.provisioning().card_root_xpub)?;
        let key = derive_path(&card_root, path)?;

        let device_id = self.se.device_serial()?;

        let mut device_random = Zeroizing::new([0u8; SESSION_RANDOM_SIZE]);
        self.rng.fill_bytes(&mut device_random[..]);

        let mut h = Sha256::new();
        h.update(&device_random[..]);
        h.update(device_id);
        let digest: [u8; 32] = h.finalize().into();

        let auth = self.se.sign_internal(&digest)?;

        session.clear();
        session.device_random = *device_random;
        session.device_id = device_id;
        session.public_key = key.to_bytes();
        session.state = SessionState::Started;

        #[cfg(feature = "log")]
        log::debug!("host session started");

        Ok(SessionStart::new(&session.device_random, &device_id, &auth))
    }

    /// Verify the host reply and establish the session
    ///
    /// A reply that fails verification clears the session.
    pub fn session_verify(
        &mut self,
        session: &mut HostSession,
        reply: &SessionReply,
    ) -> Result<SessionVerify, Error> {
        if session.state != SessionState::Started {
            return Err(Error::InvalidState);
        }

        let payload = session.reply_payload(reply);
        let digest: [u8; 32] = Sha256::digest(payload).into();

        if let Err(e) = verify_reply(&session.public_key, &digest, reply) {
            #[cfg(feature = "log")]
            log::error!("host reply verification failed: {:?}", e);

            session.clear();
            return Err(e);
        }

        let auth = self.se.sign_internal(&digest)?;

        session.session_id = derive_session_id(&session.device_random, &reply.session_random);
        session.session_age = reply.session_age;
        session.state = SessionState::Established;

        #[cfg(feature = "log")]
        log::debug!("host session established (age {})", reply.session_age);

        Ok(SessionVerify::new(&session.device_id, &auth))
    }
}

fn verify_reply(
    public_key: &[u8; PUBLIC_KEY_LEN],
    digest: &[u8; 32],
    reply: &SessionReply,
) -> Result<(), Error> {
    let pk = PublicKey::from_sec1_bytes(public_key)?;
    let sig = Signature::from_slice(&reply.signature)?;

    VerifyingKey::from(&pk)
        .verify_prehash(digest, &sig)
        .map_err(|_| Error::VerificationFailed)
}
