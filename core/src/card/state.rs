// Copyright (c) 2022-2023 The Cardlock Authors

//! Card operation transition function
//!
//! [step] consumes one [Event] in a [State] and returns the next state along
//! with the side effects the runner must apply. All connection context updates
//! happen here, the runner only performs I/O.

use heapless::Vec;

use super::{
    classify_authenticated, classify_select, CardMessage, CardOperationResult,
    NfcConnectionData, Outcome, Verdict, UNSET_FAMILY_ID,
};
use crate::{
    apdu::{
        select::SelectResp,
        slots::CardSlots,
        status::{Status, StatusWord},
        CARD_KEY_ID_SIZE, CARD_VERSION_SIZE, FAMILY_ID_SIZE,
    },
    platform::NfcEvent,
};

/// Maximum side effects per transition
pub const MAX_ACTIONS: usize = 4;

/// Card operation states
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    /// Waiting for a card to enter the field
    WaitForCard,
    /// Card detected, selecting the applet
    SelectApplet,
    /// Operation complete
    Complete(Outcome),
}

/// Card operation events
#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    /// Card wait completed
    Wait(NfcEvent),
    /// Applet selection completed
    Selected(Selection),
}

/// Keystore lookup for the tapped card
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum PairingLookup {
    /// Operation does not require session keys
    NotRequired,
    /// Card paired at keystore index
    Paired(usize),
    /// No keystore entry matches the card
    NotPaired,
}

/// Result of an applet selection exchange
#[derive(Clone, PartialEq, Debug)]
pub struct Selection {
    pub status: Status,
    /// Acceptable card mask after selection, the tapped card bit is cleared on success
    pub acceptable_cards: CardSlots,
    pub family_id: [u8; FAMILY_ID_SIZE],
    pub card_key_id: [u8; CARD_KEY_ID_SIZE],
    pub card_version: [u8; CARD_VERSION_SIZE],
    pub recovery_mode: bool,
    pub pairing: PairingLookup,
    /// Transport reports the card left the field
    pub card_absent: bool,
}

impl Selection {
    /// Selection failed before the applet responded
    pub fn failed(conn: &NfcConnectionData, status: Status) -> Self {
        Self {
            status,
            acceptable_cards: conn.acceptable_cards,
            family_id: conn.family_id,
            card_key_id: conn.card_key_id,
            card_version: conn.card_version,
            recovery_mode: false,
            pairing: PairingLookup::NotRequired,
            card_absent: false,
        }
    }

    /// Check a decoded selection response against the connection context
    ///
    /// An unset family id adopts the card's, otherwise it must match. The
    /// card number must be in the acceptable mask and is removed from it.
    pub fn from_response(conn: &NfcConnectionData, resp: &SelectResp) -> Self {
        let mut s = Self::failed(conn, Status::OK);
        s.card_key_id = resp.card_key_id;
        s.recovery_mode = resp.recovery_mode;

        if !resp.is_compatible() {
            s.status = StatusWord::IncompatibleApplet.into();
            return s;
        }
        s.card_version = resp.version;

        if conn.family_id == UNSET_FAMILY_ID {
            s.family_id = resp.family_id;
        } else if conn.family_id != resp.family_id {
            s.status = StatusWord::FileInvalid.into();
            return s;
        }

        match CardSlots::from_card_number(resp.card_number) {
            Some(c) if conn.acceptable_cards.contains(c) => {
                s.acceptable_cards.remove(c);
            }
            _ => s.status = StatusWord::ConditionsNotSatisfied.into(),
        }

        s
    }
}

/// Side effects of a transition, applied in order
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Action {
    /// Update the instruction screen
    Instruction(CardMessage),
    /// Load secure channel keys from the keystore entry
    LoadSessionKeys(usize),
    /// Deselect the card
    Deselect,
    /// Clear all keystore entries
    InvalidateKeystore,
}

/// State transition
#[derive(Clone, PartialEq, Debug)]
pub struct Transition {
    pub next: State,
    pub actions: Vec<Action, MAX_ACTIONS>,
}

impl Transition {
    fn new(next: State) -> Self {
        Self {
            next,
            actions: Vec::new(),
        }
    }

    fn complete(outcome: Outcome) -> Self {
        Self::new(State::Complete(outcome))
    }

    fn push(&mut self, a: Action) {
        let r = self.actions.push(a);
        debug_assert!(r.is_ok(), "transition exceeded {} actions", MAX_ACTIONS);
    }

    /// Fetch the outcome for completed transitions
    pub fn outcome(&self) -> Option<Outcome> {
        match self.next {
            State::Complete(o) => Some(o),
            _ => None,
        }
    }
}

/// Advance the card operation state machine
pub fn step(conn: &mut NfcConnectionData, state: State, event: Event) -> Transition {
    #[cfg(feature = "log")]
    log::debug!("card state: {:?} event: {:?}", state, event);

    match (state, event) {
        (State::WaitForCard, Event::Wait(NfcEvent::Ready)) => {
            let mut t = Transition::new(State::SelectApplet);
            t.push(Action::Instruction(CardMessage::CardDetected));
            t
        }
        (State::WaitForCard, Event::Wait(NfcEvent::Timeout | NfcEvent::Abort)) => {
            Transition::complete(Outcome::P0)
        }
        (State::SelectApplet, Event::Selected(sel)) => selected(conn, sel),
        _ => Transition::complete(Outcome::INVALID),
    }
}

fn selected(conn: &mut NfcConnectionData, sel: Selection) -> Transition {
    conn.status = sel.status.code();
    conn.tapped_card = conn.acceptable_cards ^ sel.acceptable_cards;
    conn.acceptable_cards = sel.acceptable_cards;
    conn.family_id = sel.family_id;
    conn.card_key_id = sel.card_key_id;
    conn.card_version = sel.card_version;
    conn.recovery_mode = sel.recovery_mode;

    match classify_select(sel.status) {
        Verdict::Success => {
            let mut t = Transition::complete(Outcome::SUCCESS);

            if conn.init_session_keys {
                match sel.pairing {
                    PairingLookup::Paired(i) => t.push(Action::LoadSessionKeys(i)),
                    PairingLookup::NotPaired | PairingLookup::NotRequired => {
                        conn.pairing_error = true;
                        return Transition::complete(Outcome::abort(CardMessage::NotPaired));
                    }
                }
            }

            if conn.recovery_mode {
                return Transition::complete(Outcome::abort(CardMessage::CardHealthCritical));
            }

            t
        }
        Verdict::Default => {
            conn.acceptable_cards |= conn.tapped_card;

            let mut t = default_nfc_errors(conn, sel.card_absent);
            if t.outcome().map(|o| o.result) == Some(CardOperationResult::CardRemoved) {
                t.next = State::WaitForCard;
            }
            t
        }
        v => resolve(conn, v, sel.card_absent),
    }
}

/// Resolve the status of an authenticated card operation
///
/// Always completes, card-removed outcomes are returned to the caller to
/// restart the flow.
pub fn handle_status(conn: &mut NfcConnectionData, status: Status, card_absent: bool) -> Transition {
    conn.status = status.code();

    resolve(conn, classify_authenticated(status), card_absent)
}

fn resolve(conn: &mut NfcConnectionData, verdict: Verdict, card_absent: bool) -> Transition {
    use CardOperationResult as R;

    let outcome = match verdict {
        Verdict::Success => Outcome::SUCCESS,
        Verdict::Retap(m) => Outcome::retap(m),
        Verdict::Abort(m) => Outcome::abort(m),
        Verdict::NotPaired => {
            conn.pairing_error = true;

            let mut t = Transition::complete(Outcome::abort(CardMessage::NotPaired));
            t.push(Action::InvalidateKeystore);
            return t;
        }
        Verdict::LockedWallet => Outcome::new(R::LockedWallet, Some(CardMessage::WalletLocked)),
        Verdict::IncorrectPin(n) => Outcome::new(
            R::IncorrectPin,
            Some(CardMessage::IncorrectPin { remaining: n }),
        ),
        Verdict::Invalid => Outcome::INVALID,
        Verdict::Default => return default_nfc_errors(conn, card_absent),
    };

    Transition::complete(outcome)
}

/// Retry policy for transport and unrecognised failures
fn default_nfc_errors(conn: &mut NfcConnectionData, card_absent: bool) -> Transition {
    let status = conn.last_status();
    let removed = Outcome::new(CardOperationResult::CardRemoved, None);

    let mut t = Transition::complete(removed);
    conn.tapped_card = CardSlots::empty();

    if status == Status::CardAbsent || card_absent {
        t.push(Action::Instruction(CardMessage::CardRemovedFast));

        if conn.card_absent_retries == 0 {
            conn.mark_card_absent();
            t.next = State::Complete(Outcome::abort(CardMessage::FrequentDisconnections));
            return t;
        }
        conn.card_absent_retries -= 1;
    } else if let Status::SecureChannel(_) = status {
        return Transition::complete(Outcome::abort(CardMessage::RetryOrRepair));
    } else if conn.retries == 0 {
        return Transition::complete(Outcome::abort(CardMessage::UnknownError));
    } else {
        conn.retries -= 1;

        if let Status::Nfc(_) = status {
            t.push(Action::Instruction(CardMessage::AlignWithScreen));
            t.push(Action::Deselect);
        }
    }

    t
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        apdu::status::{NFC_APP_ERROR_BASE, NFC_SC_ENC_KEY_ERROR},
        card::CardOperationConfig,
    };

    const FAMILY: [u8; 4] = [0xca, 0xfe, 0x00, 0x01];

    fn conn(acceptable: CardSlots) -> NfcConnectionData {
        NfcConnectionData::new(&CardOperationConfig::new(acceptable, FAMILY))
    }

    fn resp(card_number: u8) -> SelectResp {
        SelectResp {
            version: [2, 0, 0, 0],
            family_id: FAMILY,
            card_number,
            card_key_id: [1, 2, 3, 4],
            recovery_mode: false,
        }
    }

    fn select(c: &mut NfcConnectionData, sel: Selection) -> Transition {
        let t = step(c, State::WaitForCard, Event::Wait(NfcEvent::Ready));
        assert_eq!(t.next, State::SelectApplet);
        step(c, State::SelectApplet, Event::Selected(sel))
    }

    #[test]
    fn p0_while_waiting() {
        for e in [NfcEvent::Timeout, NfcEvent::Abort] {
            let mut c = conn(CardSlots::all());
            let before = c.clone();

            let t = step(&mut c, State::WaitForCard, Event::Wait(e));

            assert_eq!(t.outcome(), Some(Outcome::P0));
            assert_eq!(c.retries, before.retries);
            assert_eq!(c.card_absent_retries, before.card_absent_retries);
        }
    }

    #[test]
    fn select_success_updates_tapped_card() {
        let mut c = conn(CardSlots::CARD_1 | CardSlots::CARD_3);
        let sel = Selection::from_response(&c, &resp(3));

        let t = select(&mut c, sel);

        assert_eq!(t.outcome(), Some(Outcome::SUCCESS));
        assert_eq!(c.tapped_card, CardSlots::CARD_3);
        assert_eq!(c.acceptable_cards, CardSlots::CARD_1);
        assert_eq!(c.card_key_id, [1, 2, 3, 4]);
    }

    #[test]
    fn select_wrong_card() {
        let mut c = conn(CardSlots::CARD_1);
        let sel = Selection::from_response(&c, &resp(2));

        let t = select(&mut c, sel);

        assert_eq!(
            t.outcome(),
            Some(Outcome::retap(CardMessage::WrongCardSequence))
        );
        assert_eq!(c.tapped_card, CardSlots::empty());
    }

    #[test]
    fn select_family_mismatch() {
        let mut c = conn(CardSlots::all());
        let mut r = resp(1);
        r.family_id = [0; 4];

        let sel = Selection::from_response(&c, &r);
        let t = select(&mut c, sel);

        assert_eq!(
            t.outcome(),
            Some(Outcome::retap(CardMessage::FamilyIdMismatch))
        );
        assert_eq!(c.family_id, FAMILY);
    }

    #[test]
    fn select_adopts_unset_family() {
        let mut c = NfcConnectionData::new(&CardOperationConfig::default());
        let sel = Selection::from_response(&c, &resp(2));
        let t = select(&mut c, sel);

        assert_eq!(t.outcome(), Some(Outcome::SUCCESS));
        assert_eq!(c.family_id, FAMILY);
    }

    #[test]
    fn select_incompatible() {
        let mut c = conn(CardSlots::all());
        let mut r = resp(1);
        r.version[0] = 0x01;

        let sel = Selection::from_response(&c, &r);
        let t = select(&mut c, sel);

        assert_eq!(
            t.outcome(),
            Some(Outcome::abort(CardMessage::IncompatibleCard))
        );
    }

    #[test]
    fn select_not_paired() {
        let mut c = NfcConnectionData::new(
            &CardOperationConfig::new(CardSlots::all(), FAMILY).with_session_keys(),
        );
        let mut sel = Selection::from_response(&c, &resp(1));
        sel.pairing = PairingLookup::NotPaired;

        let t = select(&mut c, sel);

        assert_eq!(t.outcome(), Some(Outcome::abort(CardMessage::NotPaired)));
        assert!(c.pairing_error);
        assert!(!t.actions.contains(&Action::InvalidateKeystore));
    }

    #[test]
    fn select_loads_session_keys() {
        let mut c = NfcConnectionData::new(
            &CardOperationConfig::new(CardSlots::all(), FAMILY).with_session_keys(),
        );
        let mut sel = Selection::from_response(&c, &resp(2));
        sel.pairing = PairingLookup::Paired(1);

        let t = select(&mut c, sel);

        assert_eq!(t.outcome(), Some(Outcome::SUCCESS));
        assert_eq!(t.actions.as_slice(), &[Action::LoadSessionKeys(1)]);
    }

    #[test]
    fn select_recovery_mode() {
        let mut c = conn(CardSlots::all());
        let mut r = resp(1);
        r.recovery_mode = true;

        let sel = Selection::from_response(&c, &r);
        let t = select(&mut c, sel);

        assert_eq!(
            t.outcome(),
            Some(Outcome::abort(CardMessage::CardHealthCritical))
        );
    }

    #[test]
    fn transition_action_capacity() {
        let mut t = Transition::new(State::WaitForCard);
        for _ in 0..MAX_ACTIONS {
            t.push(Action::Deselect);
        }
        assert_eq!(t.actions.len(), MAX_ACTIONS);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn transition_action_overflow() {
        let mut t = Transition::new(State::WaitForCard);
        for _ in 0..=MAX_ACTIONS {
            t.push(Action::Deselect);
        }
    }

    #[test]
    fn card_absent_single_retry() {
        let mut c = NfcConnectionData::new(&CardOperationConfig {
            card_absent_retries: 1,
            ..CardOperationConfig::new(CardSlots::all(), FAMILY)
        });

        let sel = Selection::failed(&c, Status::CardAbsent);
        let t = select(&mut c, sel.clone());
        assert_eq!(t.next, State::WaitForCard);
        assert_eq!(
            t.actions.as_slice(),
            &[Action::Instruction(CardMessage::CardRemovedFast)]
        );

        let t = select(&mut c, sel);
        assert_eq!(
            t.outcome(),
            Some(Outcome::abort(CardMessage::FrequentDisconnections))
        );
        assert_eq!(c.last_status(), Status::CardAbsent);
    }

    #[test]
    fn transport_reported_absence() {
        let mut c = conn(CardSlots::all());
        let mut sel = Selection::failed(&c, Status::Nfc(NFC_APP_ERROR_BASE + 2));
        sel.card_absent = true;

        let t = select(&mut c, sel);

        assert_eq!(t.next, State::WaitForCard);
        assert_eq!(c.retries, 5);
        assert_eq!(c.card_absent_retries, 99);
    }

    #[test]
    fn nfc_error_retries() {
        let mut c = conn(CardSlots::all());
        c.retries = 1;
        let sel = Selection::failed(&c, Status::Nfc(NFC_APP_ERROR_BASE + 2));

        let t = select(&mut c, sel.clone());
        assert_eq!(t.next, State::WaitForCard);
        assert_eq!(
            t.actions.as_slice(),
            &[
                Action::Instruction(CardMessage::AlignWithScreen),
                Action::Deselect
            ]
        );

        let t = select(&mut c, sel);
        assert_eq!(t.outcome(), Some(Outcome::abort(CardMessage::UnknownError)));
    }

    #[test]
    fn secure_channel_error() {
        let mut c = conn(CardSlots::all());
        let sel = Selection::failed(&c, Status::SecureChannel(NFC_SC_ENC_KEY_ERROR));

        let t = select(&mut c, sel);

        assert_eq!(t.outcome(), Some(Outcome::abort(CardMessage::RetryOrRepair)));
    }

    #[test]
    fn failed_select_restores_tapped_card() {
        let mut c = conn(CardSlots::CARD_2);
        let mut sel = Selection::failed(&c, Status::Unknown(0x6F00));
        sel.acceptable_cards = CardSlots::empty();

        let t = select(&mut c, sel);

        assert_eq!(t.next, State::WaitForCard);
        assert_eq!(c.acceptable_cards, CardSlots::CARD_2);
        assert_eq!(c.tapped_card, CardSlots::empty());
    }

    #[test]
    fn incorrect_pin() {
        let mut c = conn(CardSlots::all());
        let t = handle_status(&mut c, Status::classify(0x6C03), false);

        let o = t.outcome().unwrap();
        assert_eq!(o.result, CardOperationResult::IncorrectPin);
        assert!(o.message.unwrap().to_string().contains('3'));
    }

    #[test]
    fn not_paired_invalidates_keystore() {
        let mut c = conn(CardSlots::all());
        let t = handle_status(&mut c, StatusWord::NotPaired.into(), false);

        assert_eq!(t.outcome(), Some(Outcome::abort(CardMessage::NotPaired)));
        assert_eq!(t.actions.as_slice(), &[Action::InvalidateKeystore]);
        assert!(c.pairing_error);
    }

    #[test]
    fn authenticated_card_removed() {
        let mut c = conn(CardSlots::all());
        let t = handle_status(&mut c, Status::CardAbsent, false);

        assert_eq!(
            t.outcome().map(|o| o.result),
            Some(CardOperationResult::CardRemoved)
        );
        assert_eq!(c.card_absent_retries, 99);
    }

    #[test]
    fn unexpected_event() {
        let mut c = conn(CardSlots::all());
        let t = step(
            &mut c,
            State::SelectApplet,
            Event::Wait(NfcEvent::Ready),
        );

        assert_eq!(t.outcome(), Some(Outcome::INVALID));
    }
}
