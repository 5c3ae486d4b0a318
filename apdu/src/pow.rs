// Copyright (c) 2022-2023 The Cardlock Authors

//! Proof-of-work wallet lock APDUs
//!
//! A wallet locked after repeated PIN failures is unlocked by solving a
//! challenge fetched from one of its cards, then presenting the nonce together
//! with the password double-hash.

use encdec::{Decode, Encode};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    ApduError, ApduStatic, CardCommand, Instruction, PowFunction, Tag, CLA_ISO7816, NAME_SIZE,
    PASSWORD_HASH_SIZE, POW_NONCE_SIZE, POW_RAND_NUMBER_SIZE, POW_TARGET_SIZE,
};
use crate::helpers::tlv;

/// Fetch the proof-of-work challenge for a wallet
///
/// ## Encoding:
/// `[Tag::Name][NAME_SIZE][NAME]`
#[derive(Clone, PartialEq, Debug)]
pub struct GetChallengeReq {
    pub name: [u8; NAME_SIZE],
}

impl GetChallengeReq {
    pub fn new(name: &[u8; NAME_SIZE]) -> Self {
        Self { name: *name }
    }
}

impl ApduStatic for GetChallengeReq {
    const CLA: u8 = CLA_ISO7816;
    const INS: u8 = Instruction::ProofOfWork as u8;
}

impl CardCommand for GetChallengeReq {
    const P1: u8 = PowFunction::GetChallenge as u8;
}

impl Encode for GetChallengeReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(2 + NAME_SIZE)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        tlv::write(buff, Tag::Name, &self.name)
    }
}

impl<'a> Decode<'a> for GetChallengeReq {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut name = None;

        for e in tlv::entries(buff) {
            let (tag, value) = e?;
            if tag == Tag::Name as u8 {
                name = Some(tlv::copy(value)?);
            }
        }

        match name {
            Some(name) => Ok((Self { name }, buff.len())),
            None => Err(ApduError::InvalidEncoding),
        }
    }
}

/// Proof-of-work challenge returned by the card
///
/// ## Encoding:
/// TLV list containing [Tag::PowTarget] and [Tag::PowRandomNumber], in any order.
#[derive(Clone, PartialEq, Debug, Default, Zeroize, ZeroizeOnDrop)]
pub struct ChallengeResp {
    /// Hash target, solutions must hash below this value
    pub target: [u8; POW_TARGET_SIZE],
    /// Random number seeding the nonce search
    pub random_number: [u8; POW_RAND_NUMBER_SIZE],
}

impl Encode for ChallengeResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(2 + POW_TARGET_SIZE + 2 + POW_RAND_NUMBER_SIZE)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut index = 0;

        index += tlv::write(&mut buff[index..], Tag::PowTarget, &self.target)?;
        index += tlv::write(
            &mut buff[index..],
            Tag::PowRandomNumber,
            &self.random_number,
        )?;

        Ok(index)
    }
}

impl<'a> Decode<'a> for ChallengeResp {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut r = ChallengeResp::default();
        let (mut has_target, mut has_random) = (false, false);

        for e in tlv::entries(buff) {
            let (tag, value) = e?;

            match Tag::try_from(tag) {
                Ok(Tag::PowTarget) => {
                    r.target = tlv::copy(value)?;
                    has_target = true;
                }
                Ok(Tag::PowRandomNumber) => {
                    r.random_number = tlv::copy(value)?;
                    has_random = true;
                }
                _ => (),
            }
        }

        if !has_target || !has_random {
            return Err(ApduError::InvalidEncoding);
        }

        Ok((r, buff.len()))
    }
}

/// Present a proof-of-work solution to unlock a wallet
///
/// ## Encoding:
/// ```text
/// [Tag::Name][NAME_SIZE][NAME]
/// [Tag::PowNonce][POW_NONCE_SIZE][NONCE]
/// [Tag::Password][PASSWORD_HASH_SIZE][PASSWORD_DOUBLE_HASH]
/// ```
#[derive(Clone, PartialEq, Debug, Zeroize, ZeroizeOnDrop)]
pub struct VerifyChallengeReq {
    pub name: [u8; NAME_SIZE],
    pub nonce: [u8; POW_NONCE_SIZE],
    pub password: [u8; PASSWORD_HASH_SIZE],
}

impl VerifyChallengeReq {
    pub fn new(
        name: &[u8; NAME_SIZE],
        nonce: &[u8; POW_NONCE_SIZE],
        password: &[u8; PASSWORD_HASH_SIZE],
    ) -> Self {
        Self {
            name: *name,
            nonce: *nonce,
            password: *password,
        }
    }
}

impl ApduStatic for VerifyChallengeReq {
    const CLA: u8 = CLA_ISO7816;
    const INS: u8 = Instruction::ProofOfWork as u8;
}

impl CardCommand for VerifyChallengeReq {
    const P1: u8 = PowFunction::VerifyChallenge as u8;
}

impl Encode for VerifyChallengeReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(3 * 2 + NAME_SIZE + POW_NONCE_SIZE + PASSWORD_HASH_SIZE)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut index = 0;

        index += tlv::write(&mut buff[index..], Tag::Name, &self.name)?;
        index += tlv::write(&mut buff[index..], Tag::PowNonce, &self.nonce)?;
        index += tlv::write(&mut buff[index..], Tag::Password, &self.password)?;

        Ok(index)
    }
}

impl<'a> Decode<'a> for VerifyChallengeReq {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let (mut name, mut nonce, mut password) = (None, None, None);

        for e in tlv::entries(buff) {
            let (tag, value) = e?;

            match Tag::try_from(tag) {
                Ok(Tag::Name) => name = Some(tlv::copy(value)?),
                Ok(Tag::PowNonce) => nonce = Some(tlv::copy(value)?),
                Ok(Tag::Password) => password = Some(tlv::copy(value)?),
                _ => (),
            }
        }

        match (name, nonce, password) {
            (Some(name), Some(nonce), Some(password)) => Ok((
                Self {
                    name,
                    nonce,
                    password,
                },
                buff.len(),
            )),
            _ => Err(ApduError::InvalidEncoding),
        }
    }
}
