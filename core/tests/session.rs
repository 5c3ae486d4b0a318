//! Host session establishment

use p256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use sha2::{Digest, Sha256};

use cardlock_core::{
    apdu::session::{AuthData, SessionReply, SessionStart},
    session::{derive_session_id, HostSession, SessionState, DEFAULT_SESSION_PATH},
    Error,
};

mod helpers;
use helpers::*;

const SESSION_RANDOM: [u8; 32] = [0x5a; 32];
const SESSION_AGE: u32 = 0x0000_0e10;

/// Host reply signed with the session key derived along `path`
fn host_reply(card: &SoftCard, path: &[u32], start: &SessionStart) -> SessionReply {
    let mut h = Sha256::new();
    h.update(SESSION_RANDOM);
    h.update(SESSION_AGE.to_be_bytes());
    h.update(start.device_id);
    h.update(start.device_random);
    let digest: [u8; 32] = h.finalize().into();

    let auth = AuthData {
        signature: sign_raw(&card.derive(path), &digest),
        ..Default::default()
    };

    SessionReply::new(&SESSION_RANDOM, SESSION_AGE, &auth)
}

fn verify_device(signature: &[u8; 64], digest: &[u8; 32]) {
    let se = SoftSe::new();
    let sig = Signature::from_slice(signature).unwrap();

    VerifyingKey::from(se.device_key.public_key())
        .verify_prehash(digest, &sig)
        .unwrap();
}

#[test]
fn establish_session() -> anyhow::Result<()> {
    let card = SoftCard::new();
    let mut e = engine(MemoryStorage::new(&card), MockTransport::default());
    let mut s = HostSession::new();

    let start = e.session_start(&mut s, &DEFAULT_SESSION_PATH)?;

    assert_eq!(s.state(), SessionState::Started);
    assert_eq!(start.device_id, SoftSe::new().serial);
    assert_eq!(&start.device_random, s.device_random());
    assert_eq!(start.postfix1, [0x01; 7]);
    assert!(s.session_id().is_none());

    let mut d = [0u8; 64];
    d[..32].copy_from_slice(&start.device_random);
    d[32..].copy_from_slice(&start.device_id);
    verify_device(&start.signature, &Sha256::digest(d).into());

    let reply = host_reply(&card, &DEFAULT_SESSION_PATH, &start);
    let verify = e.session_verify(&mut s, &reply)?;

    assert_eq!(s.state(), SessionState::Established);
    assert_eq!(s.session_age(), SESSION_AGE);
    assert_eq!(
        s.session_id(),
        Some(&derive_session_id(&start.device_random, &SESSION_RANDOM))
    );

    // Device signs the same payload as the host
    assert_eq!(verify.device_id, start.device_id);

    let mut h = Sha256::new();
    h.update(SESSION_RANDOM);
    h.update(SESSION_AGE.to_be_bytes());
    h.update(start.device_id);
    h.update(start.device_random);
    verify_device(&verify.signature, &h.finalize().into());

    Ok(())
}

#[test]
fn session_key_path() {
    let card = SoftCard::new();
    let mut e = engine(MemoryStorage::new(&card), MockTransport::default());
    let mut s = HostSession::new();

    let start = e.session_start(&mut s, &[1, 2, 3]).unwrap();

    // Reply signed with the default path key is rejected
    let reply = host_reply(&card, &DEFAULT_SESSION_PATH, &start);
    assert_eq!(
        e.session_verify(&mut s, &reply).unwrap_err(),
        Error::VerificationFailed
    );

    let start = e.session_start(&mut s, &[1, 2, 3]).unwrap();
    let reply = host_reply(&card, &[1, 2, 3], &start);
    assert!(e.session_verify(&mut s, &reply).is_ok());
}

#[test]
fn invalid_reply_clears_session() {
    let card = SoftCard::new();
    let mut e = engine(MemoryStorage::new(&card), MockTransport::default());
    let mut s = HostSession::new();

    let start = e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap();

    let mut reply = host_reply(&card, &DEFAULT_SESSION_PATH, &start);
    reply.session_age += 1;

    assert_eq!(
        e.session_verify(&mut s, &reply).unwrap_err(),
        Error::VerificationFailed
    );
    assert_eq!(s.state(), SessionState::Idle);
    assert_eq!(s.device_random(), &[0u8; 32]);

    // A cleared session can not be verified
    let reply = host_reply(&card, &DEFAULT_SESSION_PATH, &start);
    assert_eq!(
        e.session_verify(&mut s, &reply).unwrap_err(),
        Error::InvalidState
    );
}

#[test]
fn verify_requires_start() {
    let card = SoftCard::new();
    let mut e = engine(MemoryStorage::new(&card), MockTransport::default());
    let mut s = HostSession::new();

    let reply = SessionReply::new(&SESSION_RANDOM, SESSION_AGE, &AuthData::default());
    assert_eq!(
        e.session_verify(&mut s, &reply).unwrap_err(),
        Error::InvalidState
    );
}

#[test]
fn restart_replaces_session() {
    let card = SoftCard::new();
    let mut e = engine(MemoryStorage::new(&card), MockTransport::default());
    let mut s = HostSession::new();

    let first = e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap();
    let reply = host_reply(&card, &DEFAULT_SESSION_PATH, &first);
    e.session_verify(&mut s, &reply).unwrap();
    let id = *s.session_id().unwrap();

    let second = e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap();
    assert_ne!(first.device_random, second.device_random);
    assert_eq!(s.state(), SessionState::Started);
    assert!(s.session_id().is_none());

    // Replies to the previous start no longer verify
    assert!(e.session_verify(&mut s, &reply).is_err());

    let second = e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap();
    let reply = host_reply(&card, &DEFAULT_SESSION_PATH, &second);
    e.session_verify(&mut s, &reply).unwrap();
    assert_ne!(s.session_id(), Some(&id));
}

#[test]
fn invalid_path() {
    let card = SoftCard::new();
    let mut e = engine(MemoryStorage::new(&card), MockTransport::default());
    let mut s = HostSession::new();

    assert_eq!(
        e.session_start(&mut s, &[]).unwrap_err(),
        Error::InvalidLength
    );
    assert_eq!(
        e.session_start(&mut s, &[1, 2, 3, 4]).unwrap_err(),
        Error::InvalidLength
    );
    assert_eq!(
        e.session_start(&mut s, &[1 << 31]).unwrap_err(),
        Error::DerivationFailed
    );
    assert_eq!(s.state(), SessionState::Idle);
}

#[test]
fn secure_element_failure_keeps_session() {
    let card = SoftCard::new();
    let mut e = engine(MemoryStorage::new(&card), MockTransport::default());
    let mut s = HostSession::new();

    let start = e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap();
    let reply = host_reply(&card, &DEFAULT_SESSION_PATH, &start);
    e.session_verify(&mut s, &reply).unwrap();
    let id = *s.session_id().unwrap();

    let mut se = SoftSe::new();
    se.failures = 10;
    let mut e = cardlock_core::Engine::new(
        MockTransport::default(),
        MemoryStorage::new(&card),
        RecordingUi::default(),
        se,
    );

    assert_eq!(
        e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap_err(),
        Error::SecureElement
    );

    // Existing session is untouched until all operations succeed
    assert_eq!(s.state(), SessionState::Established);
    assert_eq!(s.session_id(), Some(&id));
}

#[test]
fn signing_failure_leaves_session_idle() {
    let card = SoftCard::new();

    let mut se = SoftSe::new();
    se.sign_failures = 2;
    let mut e = cardlock_core::Engine::new(
        MockTransport::default(),
        MemoryStorage::new(&card),
        RecordingUi::default(),
        se,
    )
    .with_se_attempts(2);

    let mut s = HostSession::new();

    assert_eq!(
        e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap_err(),
        Error::SecureElement
    );
    assert_eq!(s.state(), SessionState::Idle);
    assert_eq!(s.device_random(), &[0u8; 32]);
    assert_eq!(s.public_key(), &[0u8; 33]);

    // Signing recovers, the next start commits a fresh session
    let start = e.session_start(&mut s, &DEFAULT_SESSION_PATH).unwrap();
    assert_eq!(s.state(), SessionState::Started);
    assert_eq!(&start.device_random, s.device_random());
    assert_ne!(s.device_random(), &[0u8; 32]);
}
