// Copyright (c) 2022-2023 The Cardlock Authors

//! Applet selection APDUs

use encdec::{Decode, Encode};

use super::{
    ApduError, ApduStatic, CardCommand, Instruction, Tag, CARD_KEY_ID_SIZE, CARD_VERSION_SIZE,
    CLA_ISO7816, FAMILY_ID_SIZE,
};
use crate::helpers::{arr, tlv};

/// Wallet applet identifier
pub const APPLET_AID: [u8; 5] = [0x01, 0x02, 0x03, 0x04, 0x05];

/// Applet major version no longer supported by the device
pub const INCOMPATIBLE_APPLET_MAJOR: u8 = 0x01;

/// Select the wallet applet on a tapped card
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct SelectReq {
    #[encdec(with = "arr")]
    pub aid: [u8; 5],
}

impl SelectReq {
    pub fn new() -> Self {
        Self { aid: APPLET_AID }
    }
}

impl Default for SelectReq {
    fn default() -> Self {
        Self::new()
    }
}

impl ApduStatic for SelectReq {
    const CLA: u8 = CLA_ISO7816;
    const INS: u8 = Instruction::Select as u8;
}

impl CardCommand for SelectReq {
    const P1: u8 = 0x04;
}

/// Applet selection response, card identity and health
///
/// ## Encoding:
/// TLV list containing [Tag::Version], [Tag::FamilyId], [Tag::CardNumber],
/// [Tag::CardKeyId] and [Tag::RecoveryMode] entries, unknown tags are skipped.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SelectResp {
    /// Applet version
    pub version: [u8; CARD_VERSION_SIZE],
    /// Card family identifier
    pub family_id: [u8; FAMILY_ID_SIZE],
    /// Card number within the family (1..=4)
    pub card_number: u8,
    /// Card pairing key identifier
    pub card_key_id: [u8; CARD_KEY_ID_SIZE],
    /// Card reports degraded health and should be migrated
    pub recovery_mode: bool,
}

impl SelectResp {
    /// Check whether the applet version is supported by this device
    pub fn is_compatible(&self) -> bool {
        self.version[0] != INCOMPATIBLE_APPLET_MAJOR
    }
}

impl Encode for SelectResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(5 * 2 + CARD_VERSION_SIZE + FAMILY_ID_SIZE + 1 + CARD_KEY_ID_SIZE + 1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut index = 0;

        index += tlv::write(&mut buff[index..], Tag::Version, &self.version)?;
        index += tlv::write(&mut buff[index..], Tag::FamilyId, &self.family_id)?;
        index += tlv::write(&mut buff[index..], Tag::CardNumber, &[self.card_number])?;
        index += tlv::write(&mut buff[index..], Tag::CardKeyId, &self.card_key_id)?;
        index += tlv::write(
            &mut buff[index..],
            Tag::RecoveryMode,
            &[self.recovery_mode as u8],
        )?;

        Ok(index)
    }
}

impl<'a> Decode<'a> for SelectResp {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut r = SelectResp::default();
        let (mut has_family, mut has_number) = (false, false);

        for e in tlv::entries(buff) {
            let (tag, value) = e?;

            match Tag::try_from(tag) {
                Ok(Tag::Version) => {
                    // Short versions are zero-padded
                    let n = value.len().min(CARD_VERSION_SIZE);
                    r.version[..n].copy_from_slice(&value[..n]);
                }
                Ok(Tag::FamilyId) => {
                    r.family_id = tlv::copy(value)?;
                    has_family = true;
                }
                Ok(Tag::CardNumber) => {
                    r.card_number = *value.first().ok_or(ApduError::InvalidLength)?;
                    has_number = true;
                }
                Ok(Tag::CardKeyId) => r.card_key_id = tlv::copy(value)?,
                Ok(Tag::RecoveryMode) => {
                    r.recovery_mode = value.first().map(|v| *v == 1).unwrap_or(false)
                }
                _ => (),
            }
        }

        if !has_family || !has_number {
            return Err(ApduError::InvalidEncoding);
        }

        Ok((r, buff.len()))
    }
}
