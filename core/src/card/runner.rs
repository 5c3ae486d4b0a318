// Copyright (c) 2022-2023 The Cardlock Authors

//! Card operation runner, applies [step] transitions against the platform

use encdec::Decode;
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use super::{
    classify_authenticated, classify_select, handle_status, step, Action, CardMessage,
    CardOperationConfig, CardOperationResult, Event, NfcConnectionData, Outcome, PairingLookup,
    Selection, State, Verdict,
};
use crate::{
    apdu::{
        prelude::*,
        status::{Status, StatusWord},
        MAX_APDU_DATA, OFFSET_CDATA,
    },
    keystore::paired_card_index,
    platform::{NfcEvent, SecureElement, Storage, Transport, Ui, UiEvent},
    Engine, Error,
};

/// Maximum card response length
pub const MAX_RESPONSE_LEN: usize = 256;

impl<T, S, U, SE, RNG> Engine<T, S, U, SE, RNG>
where
    T: Transport,
    S: Storage,
    U: Ui,
    SE: SecureElement,
    RNG: CryptoRngCore,
{
    /// Wait for a card tap, select the applet and load session keys if required
    ///
    /// Transient faults are retried within the connection's bounds, the
    /// returned [Outcome] is always terminal for this tap.
    pub fn initialize_applet(&mut self, conn: &mut NfcConnectionData) -> Outcome {
        conn.recovery_mode = false;

        let mut state = State::WaitForCard;

        loop {
            let event = match state {
                State::WaitForCard => Event::Wait(self.transport.wait_for_card(conn.timeout_ms)),
                State::SelectApplet => Event::Selected(self.select_applet(conn)),
                State::Complete(outcome) => return outcome,
            };

            let t = step(conn, state, event);
            self.apply(&t.actions);

            state = t.next;
        }
    }

    /// Classify the status of an authenticated card operation
    pub fn handle_errors(&mut self, conn: &mut NfcConnectionData, status: Status) -> Outcome {
        if !status.is_ok() {
            #[cfg(feature = "log")]
            log::error!("card error ({})", status);
        }

        let card_absent = classify_authenticated(status) == Verdict::Default
            && self.transport.card_absent();

        let t = handle_status(conn, status, card_absent);
        self.apply(&t.actions);

        t.outcome().unwrap_or(Outcome::INVALID)
    }

    /// Show the error for a retryable outcome and wait for the user
    ///
    /// Returns `None` if the flow should re-render `instruction` and retry,
    /// otherwise the outcome to stop with.
    pub fn indicate_card_error(
        &mut self,
        outcome: &Outcome,
        instruction: &CardMessage,
    ) -> Option<Outcome> {
        if let Some(m) = &outcome.message {
            match self.ui.indicate_error(m) {
                UiEvent::Confirmed => (),
                UiEvent::P0 => return Some(Outcome::P0),
                UiEvent::Other => return Some(*outcome),
            }
        }

        self.ui.instruction(instruction);

        None
    }

    /// Prompt for and wait until the card leaves the field
    pub fn wait_for_card_removal(&mut self) -> CardOperationResult {
        if self.transport.card_absent() {
            return CardOperationResult::Success;
        }

        self.ui.instruction(&CardMessage::RemoveCard);

        match self.transport.wait_for_card_removed(super::DEFAULT_TIMEOUT_MS) {
            NfcEvent::Ready => CardOperationResult::Success,
            NfcEvent::Timeout | NfcEvent::Abort => CardOperationResult::P0Occurred,
        }
    }

    /// Tap an acceptable card and select the applet, retrying on user-recoverable errors
    ///
    /// Returns the outcome with the connection context describing the tapped card.
    pub fn card_operation(
        &mut self,
        cfg: &CardOperationConfig,
        instruction: &CardMessage,
    ) -> (Outcome, NfcConnectionData) {
        let mut conn = NfcConnectionData::new(cfg);

        self.ui.instruction(instruction);

        let outcome = self.card_flow(&mut conn, instruction, |e, _conn| {
            e.ui.buzzer();
            Outcome::SUCCESS
        });

        (outcome, conn)
    }

    /// Run `op` against a selected card, restarting the tap on retryable errors
    ///
    /// The acceptable card mask and family id are reset for each tap, the card
    /// is deselected on exit.
    pub(crate) fn card_flow<F>(
        &mut self,
        conn: &mut NfcConnectionData,
        instruction: &CardMessage,
        mut op: F,
    ) -> Outcome
    where
        F: FnMut(&mut Self, &mut NfcConnectionData) -> Outcome,
    {
        let (acceptable_cards, family_id) = (conn.acceptable_cards, conn.family_id);

        let outcome = loop {
            conn.reset_tap(acceptable_cards, family_id);

            let mut outcome = self.initialize_applet(conn);
            if outcome.is_success() {
                outcome = op(self, conn);
            }

            if !outcome.is_retryable() {
                break outcome;
            }

            if let Some(o) = self.indicate_card_error(&outcome, instruction) {
                break o;
            }
        };

        self.transport.deselect();

        #[cfg(feature = "log")]
        log::debug!("card operation complete: {:?}", outcome);

        outcome
    }

    /// Exchange a command with the selected card
    pub(crate) fn exchange<C: CardCommand>(
        &mut self,
        cmd: &C,
        resp: &mut [u8],
    ) -> Result<(Status, usize), Error> {
        let mut buff = Zeroizing::new([0u8; OFFSET_CDATA + MAX_APDU_DATA]);

        let n = cmd
            .encode_apdu(&mut buff[..])
            .map_err(|_| Error::EncodingFailed)?;

        let x = self.transport.transceive(&buff[..n], resp);

        Ok((Status::classify(x.status), x.len.min(resp.len())))
    }

    fn select_applet(&mut self, conn: &NfcConnectionData) -> Selection {
        let mut resp = [0u8; MAX_RESPONSE_LEN];

        let mut sel = match self.exchange(&SelectReq::new(), &mut resp) {
            Ok((s, n)) if s.is_ok() => match SelectResp::decode(&resp[..n]) {
                Ok((r, _)) => Selection::from_response(conn, &r),
                Err(_) => Selection::failed(conn, StatusWord::FileNotFound.into()),
            },
            Ok((s, _)) => Selection::failed(conn, s),
            Err(_) => Selection::failed(conn, StatusWord::WrongData.into()),
        };

        if !sel.status.is_ok() {
            #[cfg(feature = "log")]
            log::error!("applet selection error ({})", sel.status);
        }

        if sel.status.is_ok() && conn.init_session_keys {
            sel.pairing = match paired_card_index(&self.storage, &sel.card_key_id) {
                Some(i) => PairingLookup::Paired(i),
                None => PairingLookup::NotPaired,
            };
        }

        if classify_select(sel.status) == Verdict::Default {
            sel.card_absent = self.transport.card_absent();
        }

        sel
    }

    fn apply(&mut self, actions: &[Action]) {
        for a in actions {
            match a {
                Action::Instruction(m) => self.ui.instruction(m),
                Action::LoadSessionKeys(i) => {
                    if let Some(e) = self.storage.keystore_entry(*i) {
                        let (enc, mac) = e.session_keys();
                        self.transport.init_session_keys(&enc, &mac);
                    }
                }
                Action::Deselect => self.transport.deselect(),
                Action::InvalidateKeystore => self.storage.invalidate_keystore(),
            }
        }
    }
}
