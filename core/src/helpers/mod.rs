// Copyright (c) 2022-2023 The Cardlock Authors

use core::str::from_utf8;

use emstr::EncodeStr;

use crate::{apdu::NAME_SIZE, pow::UnlockTime};

pub mod bip32;

/// Fetch the printable portion of a NUL-padded wallet name
pub fn wallet_name(name: &[u8; NAME_SIZE]) -> &str {
    let n = name.iter().position(|c| *c == 0).unwrap_or(NAME_SIZE);

    match from_utf8(&name[..n]) {
        Ok(v) => v,
        Err(_) => "INVALID_UTF8",
    }
}

// Format helper for wallet unlock time estimates
pub fn fmt_unlock_time<'a>(
    t: UnlockTime,
    name: &[u8; NAME_SIZE],
    buff: &'a mut [u8],
) -> &'a str {
    let name = wallet_name(name);

    let r = match t {
        UnlockTime::InProgress => {
            emstr::write!(&mut buff[..], name, " is in process to unlock...")
        }
        UnlockTime::Wait(period) => emstr::write!(
            &mut buff[..],
            name,
            " is currently locked\nWait for ",
            period
        ),
        UnlockTime::MoreThanYear => emstr::write!(
            &mut buff[..],
            name,
            " is currently locked\nWait for more than a year"
        ),
    };

    let n = match r {
        Ok(v) => v,
        Err(_) => return "ENCODE_ERR",
    };

    match from_utf8(&buff[..n]) {
        Ok(v) => v,
        Err(_) => "INVALID_UTF8",
    }
}
