// Copyright (c) 2022-2023 The Cardlock Authors

//! Cardlock hardware wallet core
//!
//! This provides the card-facing protocol engine for a hardware wallet that
//! cooperates with up to four removable smart cards over NFC.
//!
//! Platform integration is via the [platform] traits, the firmware provides an
//! NFC [Transport][platform::Transport], a [SecureElement][platform::SecureElement],
//! persistent [Storage][platform::Storage] and a [Ui][platform::Ui].
//! See [cardlock_apdu] for APDU objects and wire encodings.
//!
//! ## Operations
//!
//! ### Card operations
//!
//! Every card interaction starts with [`card_operation`][Engine::card_operation],
//! which waits for a tap, selects the wallet applet, checks the card belongs to
//! this device family and loads session keys for paired cards. Outcomes are
//! reported as a [`CardOperationResult`][card::CardOperationResult] with an
//! optional [`CardMessage`][card::CardMessage] for display, transient faults are
//! retried internally up to the configured bounds.
//!
//! The retry / classification logic is a pure transition function
//! ([`step`][card::step]) driven by the runner, so it is testable without a transport.
//!
//! ### Pairing
//!
//! [`pair`][Engine::pair] establishes a 64-byte pairing key with a card slot
//! using the secure element pairing key and ECDH, the card is authenticated
//! against a key derived from the provisioned card root xpub.
//!
//! ### Host sessions
//!
//! [`HostSession`][session::HostSession] authenticates the device to a companion
//! application and derives a session id, see [Engine::session_start] and
//! [Engine::session_verify].
//!
//! ### Wallet lock
//!
//! [`fetch_challenge`][Engine::fetch_challenge] and [`unlock`][Engine::unlock] manage
//! the proof-of-work lock placed on a wallet after repeated PIN failures.
//!

#![cfg_attr(not(feature = "std"), no_std)]

pub use cardlock_apdu::{self as apdu};

pub mod card;

mod engine;
pub use engine::Engine;

mod error;
pub use error::Error;

pub mod helpers;

pub mod keystore;

pub mod pairing;

pub mod platform;

pub mod pow;

pub mod session;
