// Copyright (c) 2022-2023 The Cardlock Authors

//! Proof-of-work wallet lock
//!
//! A card locks a wallet after repeated PIN failures. The device fetches a
//! challenge from the locking card, an external search finds a nonce whose
//! hash falls below the challenge target, and [Engine::unlock] presents the
//! nonce with the wallet password double-hash.

use encdec::Decode;
use rand_core::CryptoRngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    apdu::{
        prelude::*,
        status::{Status, StatusWord},
        NAME_SIZE, PASSWORD_HASH_SIZE, POW_NONCE_SIZE, POW_RAND_NUMBER_SIZE, POW_TARGET_SIZE,
    },
    card::{
        CardMessage, CardOperationConfig, CardOperationResult, NfcConnectionData, Outcome,
        MAX_RESPONSE_LEN,
    },
    platform::{SecureElement, Storage, Transport, Ui},
    Engine,
};

/// Unlock time estimates beyond this many bits of work are not computed
pub const MAX_ESTIMATE_BITS: u16 = 63;

/// Stored wallet lock challenge
#[derive(Clone, PartialEq, Debug, Default, Zeroize, ZeroizeOnDrop)]
pub struct Challenge {
    /// Hash target, more trailing set bits make the search easier
    pub target: [u8; POW_TARGET_SIZE],
    /// Search seed issued by the card
    pub random_number: [u8; POW_RAND_NUMBER_SIZE],
}

impl From<ChallengeResp> for Challenge {
    fn from(r: ChallengeResp) -> Self {
        Self {
            target: r.target,
            random_number: r.random_number,
        }
    }
}

impl Challenge {
    /// Estimated unlock time for this challenge
    pub fn unlock_time(&self, cfg: &PowConfig) -> UnlockTime {
        convert_secs_to_time(approx_time_in_secs(&self.target, cfg.hash_rate))
    }
}

/// Proof-of-work estimation parameters
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PowConfig {
    /// Measured search rate in hashes per second
    pub hash_rate: u32,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self { hash_rate: 1 }
    }
}

impl PowConfig {
    pub fn new(hash_rate: u32) -> Self {
        Self {
            hash_rate: hash_rate.max(1),
        }
    }
}

/// Bucketed unlock time estimate
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnlockTime {
    /// Less than a minute
    InProgress,
    /// Wait for the provided period
    Wait(&'static str),
    /// Longer than the largest bucket
    MoreThanYear,
}

/// Count the target's set bits from the least significant end
///
/// Whole `0xFF` bytes count eight, the first other byte counts its bit length
/// (at most seven).
pub fn count_set_bits(target: &[u8; POW_TARGET_SIZE]) -> u16 {
    let full = target.iter().rev().take_while(|b| **b == 0xFF).count();

    let partial = match target.len().checked_sub(full + 1) {
        Some(i) => (8 - target[i].leading_zeros()).min(7) as u16,
        None => 0,
    };

    full as u16 * 8 + partial
}

/// Approximate search time in seconds at `hash_rate`
///
/// Saturates at `u32::MAX`, including when the estimate exceeds
/// [MAX_ESTIMATE_BITS] of work.
pub fn approx_time_in_secs(target: &[u8; POW_TARGET_SIZE], hash_rate: u32) -> u32 {
    let bits = 256 - count_set_bits(target);
    if bits > MAX_ESTIMATE_BITS {
        return u32::MAX;
    }

    let secs = (1u64 << bits) / hash_rate.max(1) as u64;

    secs.min(u32::MAX as u64) as u32
}

/// Bucket an estimated unlock time
pub fn convert_secs_to_time(secs: u32) -> UnlockTime {
    match secs {
        0..=60 => UnlockTime::InProgress,
        61..=300 => UnlockTime::Wait("10 Minutes"),
        301..=3_600 => UnlockTime::Wait("2 Hours"),
        3_601..=18_000 => UnlockTime::Wait("10 Hours"),
        18_001..=86_400 => UnlockTime::Wait("2 Days"),
        86_401..=432_000 => UnlockTime::Wait("10 Days"),
        432_001..=2_628_000 => UnlockTime::Wait("2 Months"),
        _ => UnlockTime::MoreThanYear,
    }
}

/// Instruction for tapping one of `cards`
fn tap_instruction(cards: CardSlots) -> CardMessage {
    match cards.card_number() {
        Some(card) if cards.bits().count_ones() == 1 => CardMessage::TapCard { card },
        _ => CardMessage::PlaceCard,
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
    fn lock_connection(&self, wallet: &[u8; NAME_SIZE]) -> NfcConnectionData {
        let cards = self.storage.wallet_locked(wallet).unwrap_or(CardSlots::all());

        NfcConnectionData::new(
            &CardOperationConfig::new(cards, self.storage.family_id()).with_session_keys(),
        )
    }

    /// Fetch and persist the lock challenge for a wallet from the locking card
    ///
    /// A card reporting the wallet already unlocked clears the lock flag.
    pub fn fetch_challenge(&mut self, wallet: &[u8; NAME_SIZE]) -> Outcome {
        let mut conn = self.lock_connection(wallet);
        let instruction = tap_instruction(conn.acceptable_cards);

        self.ui.instruction(&instruction);

        self.card_flow(&mut conn, &instruction, |e, conn| {
            let req = GetChallengeReq::new(wallet);
            let mut resp = Zeroizing::new([0u8; MAX_RESPONSE_LEN]);

            let (status, n) = match e.exchange(&req, &mut resp[..]) {
                Ok(v) => v,
                Err(_) => return Outcome::abort(CardMessage::UnknownError),
            };
            conn.status = status.code();

            match status {
                Status::Card(StatusWord::NoError) => {
                    let challenge = match ChallengeResp::decode(&resp[..n]) {
                        Ok((r, _)) => Challenge::from(r),
                        Err(_e) => {
                            #[cfg(feature = "log")]
                            log::error!("invalid challenge response: {:?}", _e);

                            return Outcome::abort(CardMessage::UnknownError);
                        }
                    };

                    e.storage.store_wallet_challenge(wallet, &challenge);

                    #[cfg(feature = "log")]
                    log::debug!("challenge target bits: {}", count_set_bits(&challenge.target));

                    e.ui.buzzer();

                    match e.wait_for_card_removal() {
                        CardOperationResult::P0Occurred => Outcome::P0,
                        _ => Outcome::SUCCESS,
                    }
                }
                Status::Card(StatusWord::StateUnchanged) => {
                    e.storage.set_wallet_locked(wallet, None);
                    e.ui.buzzer();

                    Outcome::SUCCESS
                }
                s => e.handle_errors(conn, s),
            }
        })
    }

    /// Present a proof-of-work solution to unlock a wallet
    ///
    /// A failed challenge returns [CardOperationResult::VerificationFailed],
    /// the caller must fetch a new challenge before retrying.
    pub fn unlock(
        &mut self,
        wallet: &[u8; NAME_SIZE],
        nonce: &[u8; POW_NONCE_SIZE],
        password_hash: &[u8; PASSWORD_HASH_SIZE],
    ) -> Outcome {
        let mut conn = self.lock_connection(wallet);
        let instruction = tap_instruction(conn.acceptable_cards);

        self.ui.instruction(&instruction);

        let req = VerifyChallengeReq::new(wallet, nonce, password_hash);

        let outcome = self.card_flow(&mut conn, &instruction, |e, conn| {
            let mut resp = Zeroizing::new([0u8; MAX_RESPONSE_LEN]);

            let status = match e.exchange(&req, &mut resp[..]) {
                Ok((s, _)) => s,
                Err(_) => return Outcome::abort(CardMessage::UnknownError),
            };
            conn.status = status.code();

            match status {
                Status::Card(StatusWord::NoError | StatusWord::StateUnchanged) => {
                    if e.storage.wallet_locked(wallet).is_some() {
                        e.storage.set_wallet_locked(wallet, None);
                    }

                    Outcome::SUCCESS
                }
                Status::Card(StatusWord::ChallengeFailed) => {
                    #[cfg(feature = "log")]
                    if let Some(c) = e.storage.wallet_challenge(wallet) {
                        log::error!("challenge failed, target bits: {}", count_set_bits(&c.target));
                    }

                    Outcome::new(CardOperationResult::VerificationFailed, None)
                }
                s => e.handle_errors(conn, s),
            }
        });

        // The tap session continues with a challenge fetch for locked wallets
        if outcome.result == CardOperationResult::LockedWallet {
            if !conn.tapped_card.is_empty() {
                self.storage.set_wallet_locked(wallet, Some(conn.tapped_card));
            }
        } else {
            self.ui.buzzer();
        }

        outcome
    }

    /// Estimated unlock time for a wallet's stored challenge
    pub fn unlock_time(&self, wallet: &[u8; NAME_SIZE]) -> Option<UnlockTime> {
        self.storage
            .wallet_challenge(wallet)
            .map(|c| c.unlock_time(&self.pow))
    }
}
