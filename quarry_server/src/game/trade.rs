// Trade negotiation engine.
//
// State is one live offer per seat plus one `NegotiationRound` of recorded
// responses, replaced wholesale (never patched field by field) at every
// reset point: turn start, trade execution, and a reject round resolving
// with nothing live. Wholesale replacement is what makes "is this response
// stale" unambiguous.
//
// Every negotiation round pivots on the current player. Responses fold into
// resolution only when they answer the current player's offer; responses
// about third-party counters are relayed for visibility but never recorded.
// Two events are decisive:
//
// - the offer's author accepts a recorded acceptance of it (the
//   "accept-to-accept" closing handshake), or
// - the current player accepts a counter-offer addressed to them.
//
// Either way, if a human is party to the agreement a `PendingConfirmation`
// defers execution until both parties confirm; robot parties are
// pre-confirmed. Execution revalidates against current hands and moves
// resources between exactly the two parties, atomically under the game
// lock.
//
// After any recorded response the completion scan runs: once every seat is
// accounted for, the round is classified by accept count (nAcc) and live
// offer count (nOff). The scan only ever *clears* state; it never executes
// a trade, which keeps re-evaluation idempotent and safe under races with
// the stall supervisor.

use log::error;

use quarry_protocol::message::ServerMessage;
use quarry_protocol::types::{
    MAX_SEATS, Phase, ResourceSet, ResponseKind, SeatIndex, TradeOffer,
};

use crate::error::Deny;

use super::{Game, Outbound, Outbox};

/// One seat's recorded response and the offer author it answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeatResponse {
    pub kind: ResponseKind,
    pub about: SeatIndex,
}

/// The per-turn response array. Replaced wholesale at every reset point.
#[derive(Clone, Debug, Default)]
pub struct NegotiationRound {
    pub responses: [Option<SeatResponse>; MAX_SEATS],
}

impl NegotiationRound {
    fn record(&mut self, seat: usize, kind: ResponseKind, about: SeatIndex) {
        self.responses[seat] = Some(SeatResponse { kind, about });
    }

    /// Drop responses answering `author`'s (now superseded) offer.
    fn forget_about(&mut self, author: usize) {
        for slot in &mut self.responses {
            if slot.is_some_and(|r| r.about.idx() == author) {
                *slot = None;
            }
        }
    }

    fn accept_count(&self) -> usize {
        self.responses
            .iter()
            .flatten()
            .filter(|r| r.kind == ResponseKind::Accept)
            .count()
    }
}

/// A two-party agreement awaiting human confirmation. Robot parties are
/// confirmed at creation; execution happens when both flags are set.
#[derive(Clone, Debug)]
pub struct PendingConfirmation {
    pub offering: SeatIndex,
    pub accepting: SeatIndex,
    pub give: ResourceSet,
    pub get: ResourceSet,
    pub offering_confirmed: bool,
    pub accepting_confirmed: bool,
}

impl Game {
    /// Propose a trade. A fresh offer from the current player starts a new
    /// round; an offer from anyone else is a counter that narrows to the
    /// current player.
    pub fn make_offer(&mut self, name: &str, mut offer: TradeOffer) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if self.phase != Phase::Play {
            return Err(Deny::WrongPhase);
        }
        // Identity comes from the connection, never the payload.
        offer.from = SeatIndex(s as u8);
        if offer.to[s] {
            return Err(Deny::SelfTrade);
        }
        if !offer.to.iter().any(|&t| t) {
            return Err(Deny::NotRecipient);
        }
        if !self.seats[s].hand.contains(&offer.give) {
            return Err(Deny::InsufficientResources);
        }
        if s == self.current {
            // Fresh round: everyone's stale responses go away at once.
            self.round = NegotiationRound::default();
        } else {
            // A counter supersedes the seat's previous offer and voids its
            // own recorded response.
            self.round.forget_about(s);
            self.round.responses[s] = None;
        }
        self.seats[s].offer = Some(offer.clone());
        self.touch(s);
        Ok(vec![Outbound::All(ServerMessage::OfferMade {
            game: self.name.clone(),
            offer,
        })])
    }

    /// Retract the sender's outstanding offer.
    pub fn clear_offer(&mut self, name: &str) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if self.seats[s].offer.take().is_none() {
            return Err(Deny::NoSuchOffer);
        }
        self.round.forget_about(s);
        self.touch(s);
        let mut out = vec![Outbound::All(ServerMessage::OfferCleared {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
        })];
        out.extend(self.scan_round());
        Ok(out)
    }

    /// Accept the offer made by `offering_seat`. Depending on who accepts
    /// what, this is a recorded response, the decisive acceptance of a
    /// counter, the closing handshake, or a visibility-only relay.
    pub fn accept_offer(&mut self, name: &str, offering_seat: SeatIndex) -> Result<Outbox, Deny> {
        let r = self.acting_seat(name)?;
        if !offering_seat.in_range() {
            return Err(Deny::BadSeat);
        }
        let t = offering_seat.idx();
        if t == r {
            return Err(Deny::SelfTrade);
        }

        // Closing handshake: the accepter named in this message previously
        // accepted the sender's own live offer, and the sender is its
        // author.
        let counterparty_accepted_mine = self.round.responses[t]
            .is_some_and(|resp| resp.kind == ResponseKind::Accept && resp.about.idx() == r);
        if counterparty_accepted_mine && self.seats[r].offer.is_some() {
            self.touch(r);
            return self.begin_confirmation(r, t);
        }

        let Some(offer) = self.seats[t].offer.clone() else {
            return Err(Deny::NoSuchOffer);
        };
        if !offer.to[r] {
            return Err(Deny::NotRecipient);
        }
        self.touch(r);

        if r == self.current {
            // The pivot accepting a counter addressed to them is decisive.
            return self.begin_confirmation(t, r);
        }

        let mut out = vec![Outbound::All(ServerMessage::ResponseMade {
            game: self.name.clone(),
            seat: SeatIndex(r as u8),
            about: offering_seat,
            response: ResponseKind::Accept,
        })];
        if t == self.current {
            self.round.record(r, ResponseKind::Accept, offering_seat);
            out.extend(self.scan_round());
        }
        // Otherwise: outside the negotiation topology, relayed only.
        Ok(out)
    }

    /// Reject the current player's offer. A reject from the current player
    /// itself is relayed but never recorded; it exists to let other seats
    /// stop waiting.
    pub fn reject_offer(&mut self, name: &str) -> Result<Outbox, Deny> {
        self.respond(name, ResponseKind::Reject)
    }

    /// Decline to engage with the current player's offer.
    pub fn no_response(&mut self, name: &str) -> Result<Outbox, Deny> {
        self.respond(name, ResponseKind::NoResponse)
    }

    fn respond(&mut self, name: &str, kind: ResponseKind) -> Result<Outbox, Deny> {
        let r = self.acting_seat(name)?;
        let about = SeatIndex(self.current as u8);
        self.touch(r);
        let mut out = vec![Outbound::All(ServerMessage::ResponseMade {
            game: self.name.clone(),
            seat: SeatIndex(r as u8),
            about,
            response: kind,
        })];
        if r == self.current {
            return Ok(out);
        }
        // A recorded response must reference a live offer.
        if self.seats[self.current].offer.is_none() {
            return Err(Deny::NoSuchOffer);
        }
        self.round.record(r, kind, about);
        out.extend(self.scan_round());
        Ok(out)
    }

    /// Answer a pending confirmation. Declining aborts the trade and leaves
    /// every other piece of negotiation state untouched.
    pub fn confirm_trade(&mut self, name: &str, accept: bool) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        let Some(pending) = self.pending_trade.clone() else {
            return Err(Deny::NoPendingTrade);
        };
        let is_offering = pending.offering.idx() == s;
        let is_accepting = pending.accepting.idx() == s;
        if !is_offering && !is_accepting {
            return Err(Deny::NoPendingTrade);
        }
        self.touch(s);
        if !accept {
            self.pending_trade = None;
            return Ok(self.notify_parties(
                pending.offering,
                pending.accepting,
                ServerMessage::TradeNotConfirmed {
                    game: self.name.clone(),
                },
            ));
        }
        let mut pending = pending;
        if is_offering {
            pending.offering_confirmed = true;
        }
        if is_accepting {
            pending.accepting_confirmed = true;
        }
        if pending.offering_confirmed && pending.accepting_confirmed {
            self.pending_trade = None;
            return Ok(self.execute_trade(pending.offering.idx(), pending.accepting.idx()));
        }
        self.pending_trade = Some(pending);
        Ok(Vec::new())
    }

    /// A two-party agreement was reached between `offering`'s live offer
    /// and `accepting`. Execute at once if both parties are automated,
    /// otherwise park it for human confirmation.
    fn begin_confirmation(&mut self, offering: usize, accepting: usize) -> Result<Outbox, Deny> {
        if self.pending_trade.is_some() {
            return Err(Deny::ConfirmationPending);
        }
        let Some(offer) = self.seats[offering].offer.clone() else {
            return Err(Deny::NoSuchOffer);
        };
        let offering_robot = self.seats[offering].occupant.is_robot();
        let accepting_robot = self.seats[accepting].occupant.is_robot();
        if offering_robot && accepting_robot {
            return Ok(self.execute_trade(offering, accepting));
        }
        let pending = PendingConfirmation {
            offering: SeatIndex(offering as u8),
            accepting: SeatIndex(accepting as u8),
            give: offer.give,
            get: offer.get,
            offering_confirmed: offering_robot,
            accepting_confirmed: accepting_robot,
        };
        let msg = ServerMessage::ConfirmRequired {
            game: self.name.clone(),
            offering: pending.offering,
            accepting: pending.accepting,
            give: pending.give,
            get: pending.get,
        };
        let out = self.notify_parties(pending.offering, pending.accepting, msg);
        self.pending_trade = Some(pending);
        Ok(out)
    }

    /// Transfer resources per `offering`'s live offer. Revalidates against
    /// current hands first; an illegal trade is never executed, only logged
    /// and cleared.
    fn execute_trade(&mut self, offering: usize, accepting: usize) -> Outbox {
        self.pending_trade = None;
        let Some(offer) = self.seats[offering].offer.take() else {
            error!(
                "game {:?}: trade execution with no live offer from seat {offering}",
                self.name
            );
            self.clear_negotiation();
            return Vec::new();
        };
        let give_ok = self.seats[offering].hand.checked_sub(&offer.give);
        let get_ok = self.seats[accepting].hand.checked_sub(&offer.get);
        let (Some(offering_rest), Some(accepting_rest)) = (give_ok, get_ok) else {
            error!(
                "game {:?}: trade between seats {offering} and {accepting} no longer legal",
                self.name
            );
            self.clear_negotiation();
            return vec![Outbound::All(ServerMessage::TradeNotConfirmed {
                game: self.name.clone(),
            })];
        };
        self.seats[offering].hand = offering_rest;
        self.seats[offering].hand.add(&offer.get);
        self.seats[accepting].hand = accepting_rest;
        self.seats[accepting].hand.add(&offer.give);

        self.seats[accepting].offer = None;
        self.round.responses[offering] = None;
        self.round.responses[accepting] = None;
        self.touch(offering);
        self.touch(accepting);

        // Broadcast to everyone: observers (robot or human) track hand
        // sizes even for trades they were not party to.
        vec![Outbound::All(ServerMessage::TradeExecuted {
            game: self.name.clone(),
            offering: SeatIndex(offering as u8),
            accepting: SeatIndex(accepting as u8),
            give: offer.give,
            get: offer.get,
        })]
    }

    /// The completion scan (run after every recorded response). Decides
    /// whether the round is settled; only ever clears state.
    pub(crate) fn scan_round(&mut self) -> Outbox {
        if self.phase != Phase::Play {
            return Vec::new();
        }
        let live_offers: Vec<usize> = (0..MAX_SEATS)
            .filter(|&i| self.seats[i].offer.is_some())
            .collect();
        let n_off = live_offers.len();
        let n_acc = self.round.accept_count();

        if n_off == 0 {
            if n_acc > 1 {
                // Should be unreachable: two accepts with nothing live.
                error!(
                    "game {:?}: {n_acc} accepts recorded with no live offer",
                    self.name
                );
            }
            if self.round.responses.iter().any(Option::is_some) {
                self.round = NegotiationRound::default();
            }
            return Vec::new();
        }

        for (k, seat) in self.seats.iter().enumerate() {
            if seat.occupant.is_vacant() {
                continue;
            }
            let responded = self.round.responses[k].is_some() || seat.offer.is_some();
            // Humans are not obliged to answer offers never addressed to
            // them.
            let exempt = seat.occupant.is_human() && !self.addressed_by_any_offer(k);
            if !responded && !exempt {
                return Vec::new();
            }
        }

        match (n_acc, n_off) {
            (1, 1) => Vec::new(), // awaiting the closing handshake
            (0, 1) => {
                // The lone offer was rejected or ignored by everyone it
                // addressed: the round is over, nothing executes.
                let author = live_offers[0];
                self.seats[author].offer = None;
                self.round = NegotiationRound::default();
                vec![Outbound::All(ServerMessage::OfferCleared {
                    game: self.name.clone(),
                    seat: SeatIndex(author as u8),
                })]
            }
            _ => Vec::new(), // still negotiating
        }
    }

    fn addressed_by_any_offer(&self, k: usize) -> bool {
        self.seats
            .iter()
            .filter_map(|s| s.offer.as_ref())
            .any(|offer| offer.to[k])
    }

    /// Wholesale negotiation reset, silent. Used at turn end and after
    /// invariant violations.
    pub(crate) fn clear_negotiation(&mut self) {
        self.round = NegotiationRound::default();
        self.pending_trade = None;
        for seat in &mut self.seats {
            seat.offer = None;
        }
    }

    /// Pull a departing seat out of the negotiation: retract its offer,
    /// drop its responses, abort any confirmation it was party to, and
    /// re-run the scan since a waiter just disappeared.
    pub(crate) fn clear_seat_negotiation(&mut self, s: usize, out: &mut Outbox) {
        if self.seats[s].offer.take().is_some() {
            out.push(Outbound::All(ServerMessage::OfferCleared {
                game: self.name.clone(),
                seat: SeatIndex(s as u8),
            }));
        }
        self.round.responses[s] = None;
        self.round.forget_about(s);
        if let Some(pending) = self.pending_trade.clone()
            && (pending.offering.idx() == s || pending.accepting.idx() == s)
        {
            self.pending_trade = None;
            out.extend(self.notify_parties(
                pending.offering,
                pending.accepting,
                ServerMessage::TradeNotConfirmed {
                    game: self.name.clone(),
                },
            ));
        }
        out.extend(self.scan_round());
    }

    /// The stall supervisor's negotiation unwind: like a departure, but
    /// additionally records a `Forced` response so the round can resolve
    /// without the stalled seat.
    pub(crate) fn force_negotiation_exit(&mut self, s: usize) -> Outbox {
        let mut out = Vec::new();
        self.clear_seat_negotiation(s, &mut out);
        if s != self.current && self.seats[self.current].offer.is_some() {
            let about = SeatIndex(self.current as u8);
            self.round.record(s, ResponseKind::Forced, about);
            out.push(Outbound::All(ServerMessage::ResponseMade {
                game: self.name.clone(),
                seat: SeatIndex(s as u8),
                about,
                response: ResponseKind::Forced,
            }));
            out.extend(self.scan_round());
        }
        out
    }

    fn notify_parties(
        &self,
        offering: SeatIndex,
        accepting: SeatIndex,
        msg: ServerMessage,
    ) -> Outbox {
        [offering, accepting]
            .iter()
            .filter_map(|seat| self.seats[seat.idx()].occupant.name())
            .map(|name| Outbound::To(name.to_string(), msg.clone()))
            .collect()
    }
}
