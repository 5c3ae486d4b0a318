// Copyright (c) 2022-2023 The Cardlock Authors

//! Host session records
//!
//! Exchanged with the companion application to establish an authenticated
//! session. Every record carries a secure element signature together with the
//! two auxiliary fields produced by the internal-sign mode, these are
//! transmitted verbatim in the order `SIGNATURE ‖ POSTFIX_1 ‖ POSTFIX_2`.

use encdec::{Decode, Encode};

use super::ApduError;
use crate::helpers::{arr, be32};

/// Size of the device hardware serial
pub const DEVICE_SERIAL_SIZE: usize = 32;

/// Size of session randoms
pub const SESSION_RANDOM_SIZE: usize = 32;

/// Size of a raw (`r ‖ s`) P-256 signature
pub const SIGNATURE_SIZE: usize = 64;

/// Size of the first internal-sign auxiliary field
pub const POSTFIX1_SIZE: usize = 7;

/// Size of the second internal-sign auxiliary field
pub const POSTFIX2_SIZE: usize = 23;

/// Signature and auxiliary fields as produced by the secure element
#[derive(Clone, PartialEq, Debug)]
pub struct AuthData {
    pub signature: [u8; SIGNATURE_SIZE],
    pub postfix1: [u8; POSTFIX1_SIZE],
    pub postfix2: [u8; POSTFIX2_SIZE],
}

impl Default for AuthData {
    fn default() -> Self {
        Self {
            signature: [0u8; SIGNATURE_SIZE],
            postfix1: [0u8; POSTFIX1_SIZE],
            postfix2: [0u8; POSTFIX2_SIZE],
        }
    }
}

/// Device session start record
///
/// ## Encoding:
/// `DEVICE_RANDOM (32) ‖ DEVICE_ID (32) ‖ SIGNATURE (64) ‖ POSTFIX_1 (7) ‖ POSTFIX_2 (23)`
///
/// The signature covers `DEVICE_RANDOM ‖ DEVICE_ID`.
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct SessionStart {
    #[encdec(with = "arr")]
    pub device_random: [u8; SESSION_RANDOM_SIZE],

    #[encdec(with = "arr")]
    pub device_id: [u8; DEVICE_SERIAL_SIZE],

    #[encdec(with = "arr")]
    pub signature: [u8; SIGNATURE_SIZE],

    #[encdec(with = "arr")]
    pub postfix1: [u8; POSTFIX1_SIZE],

    #[encdec(with = "arr")]
    pub postfix2: [u8; POSTFIX2_SIZE],
}

impl SessionStart {
    pub fn new(
        device_random: &[u8; SESSION_RANDOM_SIZE],
        device_id: &[u8; DEVICE_SERIAL_SIZE],
        auth: &AuthData,
    ) -> Self {
        Self {
            device_random: *device_random,
            device_id: *device_id,
            signature: auth.signature,
            postfix1: auth.postfix1,
            postfix2: auth.postfix2,
        }
    }

    pub fn auth(&self) -> AuthData {
        AuthData {
            signature: self.signature,
            postfix1: self.postfix1,
            postfix2: self.postfix2,
        }
    }
}

/// Host session reply record
///
/// ## Encoding:
/// `SESSION_RANDOM (32) ‖ SESSION_AGE (BE u32) ‖ SIGNATURE (64) ‖ POSTFIX_1 (7) ‖ POSTFIX_2 (23)`
///
/// The signature covers `SESSION_RANDOM ‖ SESSION_AGE ‖ DEVICE_ID ‖ DEVICE_RANDOM`.
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct SessionReply {
    #[encdec(with = "arr")]
    pub session_random: [u8; SESSION_RANDOM_SIZE],

    #[encdec(with = "be32")]
    pub session_age: u32,

    #[encdec(with = "arr")]
    pub signature: [u8; SIGNATURE_SIZE],

    #[encdec(with = "arr")]
    pub postfix1: [u8; POSTFIX1_SIZE],

    #[encdec(with = "arr")]
    pub postfix2: [u8; POSTFIX2_SIZE],
}

impl SessionReply {
    pub fn new(
        session_random: &[u8; SESSION_RANDOM_SIZE],
        session_age: u32,
        auth: &AuthData,
    ) -> Self {
        Self {
            session_random: *session_random,
            session_age,
            signature: auth.signature,
            postfix1: auth.postfix1,
            postfix2: auth.postfix2,
        }
    }
}

/// Device session verification record
///
/// ## Encoding:
/// `DEVICE_ID (32) ‖ SIGNATURE (64) ‖ POSTFIX_1 (7) ‖ POSTFIX_2 (23)`
///
/// The signature covers the same payload as the host [SessionReply].
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct SessionVerify {
    #[encdec(with = "arr")]
    pub device_id: [u8; DEVICE_SERIAL_SIZE],

    #[encdec(with = "arr")]
    pub signature: [u8; SIGNATURE_SIZE],

    #[encdec(with = "arr")]
    pub postfix1: [u8; POSTFIX1_SIZE],

    #[encdec(with = "arr")]
    pub postfix2: [u8; POSTFIX2_SIZE],
}

impl SessionVerify {
    pub fn new(device_id: &[u8; DEVICE_SERIAL_SIZE], auth: &AuthData) -> Self {
        Self {
            device_id: *device_id,
            signature: auth.signature,
            postfix1: auth.postfix1,
            postfix2: auth.postfix2,
        }
    }
}
