// Copyright (c) 2022-2023 The Cardlock Authors

//! Card slot masks
//!
//! Each of the four physical cards in a family occupies one bit of a 4-bit mask,
//! card `n` (1..=4) maps to bit `n - 1`.

use bitflags::bitflags;

use super::ApduError;
use crate::encdec_bitflags;

bitflags! {
    /// Mask of card slots, one bit per physical card
    pub struct CardSlots: u8 {
        const CARD_1 = 1 << 0;
        const CARD_2 = 1 << 1;
        const CARD_3 = 1 << 2;
        const CARD_4 = 1 << 3;
    }
}

encdec_bitflags!(CardSlots);

impl CardSlots {
    /// Mask for a single card number (1..=4), `None` if out of range
    pub const fn from_card_number(n: u8) -> Option<Self> {
        match n {
            1..=4 => Some(Self { bits: 1 << (n - 1) }),
            _ => None,
        }
    }

    /// Card number (1..=4) of the lowest set slot, `None` for an empty mask
    pub fn card_number(&self) -> Option<u8> {
        match self.bits() {
            0 => None,
            b => Some(b.trailing_zeros() as u8 + 1),
        }
    }

    /// Keystore index (0..=3) of the lowest set slot
    pub fn index(&self) -> Option<usize> {
        self.card_number().map(|n| n as usize - 1)
    }
}
