// Copyright (c) 2022-2023 The Cardlock Authors

//! The [Engine] binds card, pairing, host session and wallet lock protocols
//! to the platform.
//!
//! Operations are implemented alongside their protocols, see [card][crate::card],
//! [pairing][crate::pairing], [session][crate::session] and [pow][crate::pow].

use rand_core::{CryptoRngCore, OsRng};

use crate::{
    platform::{Retrying, SecureElement, Storage, Transport, Ui},
    pow::PowConfig,
};

/// [Engine] provides hardware-independent card and session operations
///
/// The engine owns the platform drivers, card operations take `&mut self` so
/// only one can run at a time.
pub struct Engine<T, S, U, SE, RNG = OsRng>
where
    T: Transport,
    S: Storage,
    U: Ui,
    SE: SecureElement,
    RNG: CryptoRngCore,
{
    pub(crate) transport: T,
    pub(crate) storage: S,
    pub(crate) ui: U,
    pub(crate) se: Retrying<SE>,
    pub(crate) rng: RNG,
    pub(crate) pow: PowConfig,
}

impl<T: Transport, S: Storage, U: Ui, SE: SecureElement> Engine<T, S, U, SE> {
    /// Create a new engine instance with the provided drivers,
    /// using the default [OsRng]
    pub fn new(transport: T, storage: S, ui: U, se: SE) -> Self {
        Self::new_with_rng(transport, storage, ui, se, OsRng {})
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
    /// Create a new engine instance with the provided drivers and rng
    pub fn new_with_rng(transport: T, storage: S, ui: U, se: SE, rng: RNG) -> Self {
        Self {
            transport,
            storage,
            ui,
            se: Retrying::new(se),
            rng,
            pow: PowConfig::default(),
        }
    }

    /// Set proof-of-work estimation parameters
    pub fn with_pow_config(mut self, pow: PowConfig) -> Self {
        self.pow = pow;
        self
    }

    /// Set the number of attempts for each secure element operation
    pub fn with_se_attempts(mut self, attempts: usize) -> Self {
        self.se.set_attempts(attempts);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn pow_config(&self) -> &PowConfig {
        &self.pow
    }
}
