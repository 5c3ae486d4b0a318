#![allow(unused)]

use std::collections::{HashMap, VecDeque};

use byteorder::{BigEndian, ByteOrder};
use encdec::Encode;
use hmac::{Hmac, Mac};
use log::{debug, trace};
use p256::{
    ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
    elliptic_curve::{sec1::ToEncodedPoint, PrimeField},
    FieldBytes, PublicKey, Scalar, SecretKey,
};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use cardlock_core::{
    apdu::{
        prelude::*,
        session::{POSTFIX1_SIZE, POSTFIX2_SIZE},
        status::NFC_CARD_ABSENT,
        NAME_SIZE,
    },
    card::{CardMessage, UNSET_FAMILY_ID},
    helpers::bip32::{XPUB_LEN, XPUB_VERSION},
    keystore::{KeystoreEntry, MAX_KEYSTORE_ENTRY},
    platform::{
        Exchange, KeySlot, NfcEvent, Provisioning, SecureElement, Storage, Transport, Ui, UiEvent,
    },
    pow::Challenge,
    Engine,
};

pub const FAMILY: [u8; 4] = [0xca, 0xfe, 0x00, 0x01];

pub const SW_OK: u32 = 0x9000;

pub type TestEngine = Engine<MockTransport, MemoryStorage, RecordingUi, SoftSe>;

pub fn init_logging() {
    let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, Default::default());
}

pub fn engine(storage: MemoryStorage, transport: MockTransport) -> TestEngine {
    init_logging();

    Engine::new(transport, storage, RecordingUi::default(), SoftSe::new())
}

pub fn wallet(name: &str) -> [u8; NAME_SIZE] {
    let mut n = [0u8; NAME_SIZE];
    n[..name.len()].copy_from_slice(name.as_bytes());
    n
}

/// Scripted NFC transport
///
/// Card waits default to [NfcEvent::Timeout] once the script is exhausted so
/// a runaway flow terminates.
#[derive(Default)]
pub struct MockTransport {
    pub waits: VecDeque<NfcEvent>,
    pub removals: VecDeque<NfcEvent>,
    pub responses: VecDeque<(u32, Vec<u8>)>,
    pub absent: VecDeque<bool>,

    pub commands: Vec<Vec<u8>>,
    pub deselects: usize,
    pub session_keys: Option<([u8; 32], [u8; 32])>,
}

impl MockTransport {
    /// Queue a card tap answered with `resp`
    pub fn tap(mut self, select: Vec<u8>) -> Self {
        self.waits.push_back(NfcEvent::Ready);
        self.responses.push_back((SW_OK, select));
        self
    }

    /// Queue a card tap where selection fails with `status`
    pub fn tap_failed(mut self, status: u32) -> Self {
        self.waits.push_back(NfcEvent::Ready);
        self.responses.push_back((status, vec![]));
        self
    }

    /// Queue a response to the next command
    pub fn respond(mut self, status: u32, data: Vec<u8>) -> Self {
        self.responses.push_back((status, data));
        self
    }

    /// Command data of the `n`th exchange (header stripped)
    pub fn command_data(&self, n: usize) -> &[u8] {
        &self.commands[n][5..]
    }

    /// Instruction byte of the `n`th exchange
    pub fn command_ins(&self, n: usize) -> u8 {
        self.commands[n][1]
    }
}

impl Transport for MockTransport {
    fn wait_for_card(&mut self, _timeout_ms: u32) -> NfcEvent {
        self.waits.pop_front().unwrap_or(NfcEvent::Timeout)
    }

    fn wait_for_card_removed(&mut self, _timeout_ms: u32) -> NfcEvent {
        self.removals.pop_front().unwrap_or(NfcEvent::Ready)
    }

    fn transceive(&mut self, apdu: &[u8], resp: &mut [u8]) -> Exchange {
        trace!("cmd: {:02x?}", apdu);
        self.commands.push(apdu.to_vec());

        let (status, data) = self
            .responses
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected exchange: {:02x?}", apdu));

        resp[..data.len()].copy_from_slice(&data);

        debug!("resp: {:04x} ({} bytes)", status, data.len());

        Exchange {
            status,
            len: data.len(),
        }
    }

    fn deselect(&mut self) {
        self.deselects += 1;
    }

    fn card_absent(&mut self) -> bool {
        self.absent.pop_front().unwrap_or(false)
    }

    fn init_session_keys(&mut self, enc_key: &[u8; 32], mac_key: &[u8; 32]) {
        self.session_keys = Some((*enc_key, *mac_key));
    }
}

/// Software secure element
pub struct SoftSe {
    pub device_key: SecretKey,
    pub pair_key: SecretKey,
    pub serial: [u8; 32],
    /// Operations to fail before succeeding
    pub failures: usize,
    /// Internal signatures to fail before succeeding
    pub sign_failures: usize,
}

impl SoftSe {
    pub fn new() -> Self {
        Self {
            device_key: secret(0x5e),
            pair_key: secret(0x9a),
            serial: [0xd1; 32],
            failures: 0,
            sign_failures: 0,
        }
    }

    fn key(&self, slot: KeySlot) -> &SecretKey {
        match slot {
            KeySlot::DeviceAuth => &self.device_key,
            KeySlot::NfcPair => &self.pair_key,
        }
    }

    fn check(&mut self) -> Result<(), &'static str> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err("injected failure");
        }
        Ok(())
    }
}

impl SecureElement for SoftSe {
    type Error = &'static str;

    fn sign(&mut self, slot: KeySlot, digest: &[u8; 32]) -> Result<[u8; 64], Self::Error> {
        self.check()?;
        Ok(sign_raw(self.key(slot), digest))
    }

    fn sign_internal(&mut self, digest: &[u8; 32]) -> Result<AuthData, Self::Error> {
        self.check()?;

        if self.sign_failures > 0 {
            self.sign_failures -= 1;
            return Err("injected signing failure");
        }

        Ok(AuthData {
            signature: sign_raw(&self.device_key, digest),
            postfix1: [0x01; POSTFIX1_SIZE],
            postfix2: [0x02; POSTFIX2_SIZE],
        })
    }

    fn ecdh(
        &mut self,
        slot: KeySlot,
        peer: &[u8; 64],
    ) -> Result<Zeroizing<[u8; 32]>, Self::Error> {
        self.check()?;

        let mut b = [0x04; 65];
        b[1..].copy_from_slice(peer);
        let pk = PublicKey::from_sec1_bytes(&b).map_err(|_| "invalid peer key")?;

        Ok(Zeroizing::new(ecdh(self.key(slot), &pk)))
    }

    fn device_serial(&mut self) -> Result<[u8; 32], Self::Error> {
        self.check()?;
        Ok(self.serial)
    }
}

/// In-memory persistent storage
pub struct MemoryStorage {
    pub keystore: [Option<KeystoreEntry>; MAX_KEYSTORE_ENTRY],
    pub family_id: [u8; 4],
    pub provisioning: Provisioning,
    pub challenges: HashMap<[u8; NAME_SIZE], Challenge>,
    pub locked: HashMap<[u8; NAME_SIZE], CardSlots>,

    pub keystore_writes: usize,
    pub family_writes: usize,
    pub lock_writes: usize,
}

impl MemoryStorage {
    /// Storage provisioned against `card`, prior to any pairing
    pub fn new(card: &SoftCard) -> Self {
        Self {
            keystore: Default::default(),
            family_id: UNSET_FAMILY_ID,
            provisioning: Provisioning {
                self_key_id: [0x5e, 0x1f, 0x00, 0x01],
                self_key_path: [0, 0, 0, 1, 0, 0, 0, 2],
                card_root_xpub: card.xpub(),
            },
            challenges: HashMap::new(),
            locked: HashMap::new(),
            keystore_writes: 0,
            family_writes: 0,
            lock_writes: 0,
        }
    }

    /// Storage with `card_number` already paired to `card_key_id`
    pub fn paired(card: &SoftCard, card_number: u8, card_key_id: [u8; 4]) -> Self {
        let mut s = Self::new(card);
        s.family_id = card.family_id;
        s.keystore[card_number as usize - 1] = Some(KeystoreEntry::new(&[0xab; 64], &card_key_id));
        s
    }

    pub fn unprovisioned(mut self) -> Self {
        self.provisioning.self_key_path = [0xFF; 8];
        self
    }
}

impl Storage for MemoryStorage {
    fn keystore_entry(&self, index: usize) -> Option<KeystoreEntry> {
        self.keystore.get(index).cloned().flatten()
    }

    fn store_keystore_entry(&mut self, index: usize, entry: &KeystoreEntry) {
        self.keystore_writes += 1;
        self.keystore[index] = Some(entry.clone());
    }

    fn invalidate_keystore(&mut self) {
        self.keystore_writes += 1;
        self.keystore = Default::default();
    }

    fn family_id(&self) -> [u8; 4] {
        self.family_id
    }

    fn store_family_id(&mut self, family_id: &[u8; 4]) {
        self.family_writes += 1;
        self.family_id = *family_id;
    }

    fn provisioning(&self) -> Provisioning {
        self.provisioning.clone()
    }

    fn wallet_challenge(&self, wallet: &[u8; NAME_SIZE]) -> Option<Challenge> {
        self.challenges.get(wallet).cloned()
    }

    fn store_wallet_challenge(&mut self, wallet: &[u8; NAME_SIZE], challenge: &Challenge) {
        self.challenges.insert(*wallet, challenge.clone());
    }

    fn wallet_locked(&self, wallet: &[u8; NAME_SIZE]) -> Option<CardSlots> {
        self.locked.get(wallet).copied()
    }

    fn set_wallet_locked(&mut self, wallet: &[u8; NAME_SIZE], locked: Option<CardSlots>) {
        self.lock_writes += 1;

        match locked {
            Some(c) => self.locked.insert(*wallet, c),
            None => self.locked.remove(wallet),
        };
    }
}

/// UI recording instructions and errors, error prompts are answered from `responses`
#[derive(Default)]
pub struct RecordingUi {
    pub instructions: Vec<CardMessage>,
    pub errors: Vec<CardMessage>,
    pub responses: VecDeque<UiEvent>,
    pub buzzes: usize,
}

impl Ui for RecordingUi {
    fn instruction(&mut self, msg: &CardMessage) {
        debug!("instruction: {}", msg);
        self.instructions.push(*msg);
    }

    fn indicate_error(&mut self, msg: &CardMessage) -> UiEvent {
        debug!("error: {}", msg);
        self.errors.push(*msg);
        self.responses.pop_front().unwrap_or(UiEvent::Confirmed)
    }

    fn buzzer(&mut self) {
        self.buzzes += 1;
    }
}

/// Software card family, holds the card root private key
pub struct SoftCard {
    pub root: SecretKey,
    pub chain_code: [u8; 32],
    pub family_id: [u8; 4],
}

impl SoftCard {
    pub fn new() -> Self {
        Self {
            root: secret(0x42),
            chain_code: [0x24; 32],
            family_id: FAMILY,
        }
    }

    /// Serialised card root xpub
    pub fn xpub(&self) -> [u8; XPUB_LEN] {
        let mut b = [0u8; XPUB_LEN];
        BigEndian::write_u32(&mut b[0..], XPUB_VERSION);
        b[13..45].copy_from_slice(&self.chain_code);
        b[45..].copy_from_slice(self.root.public_key().to_encoded_point(true).as_bytes());
        b
    }

    /// Private child key derivation along `path`
    pub fn derive(&self, path: &[u32]) -> SecretKey {
        let mut k = self.root.clone();
        let mut chain_code = self.chain_code;

        for i in path {
            let mut data = [0u8; 37];
            data[..33].copy_from_slice(k.public_key().to_encoded_point(true).as_bytes());
            BigEndian::write_u32(&mut data[33..], *i);

            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(&chain_code).unwrap();
            mac.update(&data);
            let h = mac.finalize().into_bytes();

            let il: [u8; 32] = h[..32].try_into().unwrap();
            let il = Scalar::from_repr(FieldBytes::from(il)).unwrap();
            let child = il + *k.to_nonzero_scalar();

            k = SecretKey::from_slice(&child.to_repr()).unwrap();
            chain_code.copy_from_slice(&h[32..]);
        }

        k
    }

    /// Encoded select response for card `card_number`
    pub fn select(&self, card_number: u8, card_key_id: [u8; 4]) -> Vec<u8> {
        let r = SelectResp {
            version: [2, 0, 0, 0],
            family_id: self.family_id,
            card_number,
            card_key_id,
            recovery_mode: false,
        };
        encode(&r)
    }

    /// Pairing response signed with the key derived along `path`
    pub fn pair_response(&self, card_key_id: [u8; 4], nonce: [u8; 32], path: [u32; 2]) -> PairRecord {
        let mut r = PairRecord::new(card_key_id, nonce, path);

        let digest: [u8; 32] = Sha256::digest(r.signed_data()).into();
        let sig: Signature = SigningKey::from(&self.derive(&path))
            .sign_prehash(&digest)
            .unwrap();
        r.set_signature(sig.to_der().as_bytes()).unwrap();

        r
    }

    /// Expected pairing key for a response along `path`
    pub fn pairing_key(
        &self,
        se: &SoftSe,
        path: [u32; 2],
        card_nonce: &[u8; 32],
        session_nonce: &[u8],
    ) -> [u8; 64] {
        let shared = ecdh(&se.pair_key, &self.derive(&path).public_key());

        let mut h = Sha512::new();
        h.update(shared);
        h.update(card_nonce);
        h.update(session_nonce);

        let mut k = [0u8; 64];
        k.copy_from_slice(&h.finalize());
        k
    }
}

pub fn encode<E: Encode>(v: &E) -> Vec<u8>
where
    E::Error: core::fmt::Debug,
{
    let mut b = [0u8; 256];
    let n = v.encode(&mut b).unwrap();
    b[..n].to_vec()
}

pub fn secret(seed: u8) -> SecretKey {
    let mut b = [seed; 32];
    b[0] = 0x01;
    SecretKey::from_slice(&b).unwrap()
}

pub fn sign_raw(key: &SecretKey, digest: &[u8; 32]) -> [u8; 64] {
    let sig: Signature = SigningKey::from(key).sign_prehash(digest).unwrap();

    let mut s = [0u8; 64];
    s.copy_from_slice(&sig.to_bytes());
    s
}

pub fn ecdh(key: &SecretKey, peer: &PublicKey) -> [u8; 32] {
    let shared = p256::ecdh::diffie_hellman(key.to_nonzero_scalar(), peer.as_affine());

    let mut s = [0u8; 32];
    s.copy_from_slice(shared.raw_secret_bytes());
    s
}
