//! Prelude to simplify downstream use of APDU objects
//!

pub use crate::{
    pair::PairRecord,
    pow::{ChallengeResp, GetChallengeReq, VerifyChallengeReq},
    select::{SelectReq, SelectResp},
    session::{AuthData, SessionReply, SessionStart, SessionVerify},
    slots::CardSlots,
    status::{Status, StatusWord},
    CardCommand,
};
