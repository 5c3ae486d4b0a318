// Copyright (c) 2022-2023 The Cardlock Authors

use ledger_proto::ApduError;

/// Core errors
///
/// These cover failures internal to the device, card-reported
/// failures are classified into [CardOperationResult][crate::card::CardOperationResult]s.
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[repr(u8)]
pub enum Error {
    /// Invalid argument length
    #[cfg_attr(feature = "thiserror", error("Invalid argument length"))]
    InvalidLength = 0x00,

    /// Message encoding failed
    #[cfg_attr(feature = "thiserror", error("message encoding failed"))]
    EncodingFailed = 0x01,

    /// Message decoding failed
    #[cfg_attr(feature = "thiserror", error("message decoding failed"))]
    DecodingFailed = 0x02,

    /// Device provisioning data missing or invalid
    #[cfg_attr(feature = "thiserror", error("device is not provisioned"))]
    NotProvisioned = 0x03,

    /// Extended public key could not be parsed
    #[cfg_attr(feature = "thiserror", error("invalid extended public key"))]
    InvalidXpub = 0x04,

    /// Child key derivation produced an invalid key
    #[cfg_attr(feature = "thiserror", error("key derivation failed"))]
    DerivationFailed = 0x05,

    /// Invalid public key encoding
    #[cfg_attr(feature = "thiserror", error("invalid public key"))]
    InvalidKey = 0x06,

    /// Invalid signature encoding
    #[cfg_attr(feature = "thiserror", error("invalid signature"))]
    InvalidSignature = 0x07,

    /// Signature verification failed
    #[cfg_attr(feature = "thiserror", error("signature verification failed"))]
    VerificationFailed = 0x08,

    /// Secure element operation failed after all retries
    #[cfg_attr(feature = "thiserror", error("secure element failure"))]
    SecureElement = 0x09,

    /// Invalid session state
    #[cfg_attr(feature = "thiserror", error("invalid session state"))]
    InvalidState = 0x0a,

    /// Invalid card slot
    #[cfg_attr(feature = "thiserror", error("invalid card slot"))]
    InvalidSlot = 0x0b,

    /// Unknown / not-yet defined error (placeholder)
    #[cfg_attr(feature = "thiserror", error("unknown"))]
    Unknown = 0xf0,
}

impl From<ApduError> for Error {
    fn from(e: ApduError) -> Self {
        match e {
            ApduError::InvalidLength => Error::InvalidLength,
            _ => Error::DecodingFailed,
        }
    }
}

impl From<p256::elliptic_curve::Error> for Error {
    fn from(_: p256::elliptic_curve::Error) -> Self {
        Error::InvalidKey
    }
}

impl From<p256::ecdsa::Error> for Error {
    fn from(_: p256::ecdsa::Error) -> Self {
        Error::InvalidSignature
    }
}
