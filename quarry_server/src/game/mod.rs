// Game state for one session.
//
// `Game` is the central data structure the dispatch layer drives. It tracks
// members (seated players and watchers), the four seats, the turn/phase
// machine, the trade negotiation round, the reset vote, and the outstanding
// robot join requests. All mutation happens through methods called while
// holding the game's lock (see `directory.rs`) — no internal locking.
//
// Every mutating method returns an **outbox** instead of writing to
// sockets: `Outbound::All` entries go to every current member,
// `Outbound::To` entries to one named connection. The caller delivers the
// outbox *after* releasing the game lock, so a slow client write can never
// extend a critical section, and a membership change racing a broadcast
// costs at most a missed or duplicated delivery, never a deadlock.
//
// Submodules carve the state machine into its three hard parts:
// - `turn.rs`:  turn/phase transitions and forced termination.
// - `trade.rs`: the negotiation round and its resolution algorithm.
// - `reset.rs`: board-reset voting.

mod reset;
mod trade;
mod turn;

use std::time::{Duration, Instant};

use quarry_protocol::message::ServerMessage;
use quarry_protocol::types::{
    MAX_SEATS, Phase, PieceType, ResourceSet, SeatIndex, SeatInfo, TradeOffer,
};
use rustc_hash::FxHashMap;

use crate::config::GameRules;
use crate::error::Deny;

pub use trade::{NegotiationRound, PendingConfirmation, SeatResponse};
pub use reset::ResetVote;

/// One outbound message produced under the game lock, delivered after it.
#[derive(Debug, PartialEq)]
pub enum Outbound {
    /// To every current member of the game.
    All(ServerMessage),
    /// To one named connection (member or not).
    To(String, ServerMessage),
}

pub type Outbox = Vec<Outbound>;

/// Who holds a seat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Occupant {
    Vacant,
    Human(String),
    Robot(String),
}

impl Occupant {
    pub fn name(&self) -> Option<&str> {
        match self {
            Occupant::Vacant => None,
            Occupant::Human(n) | Occupant::Robot(n) => Some(n),
        }
    }

    pub fn is_vacant(&self) -> bool {
        matches!(self, Occupant::Vacant)
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Occupant::Human(_))
    }

    pub fn is_robot(&self) -> bool {
        matches!(self, Occupant::Robot(_))
    }
}

/// One of the game's four player slots.
#[derive(Clone, Debug)]
pub struct Seat {
    pub occupant: Occupant,
    /// A locked seat is never offered to robot recruitment.
    pub locked: bool,
    pub hand: ResourceSet,
    /// At most one outstanding trade offer made *by* this seat.
    pub offer: Option<TradeOffer>,
    /// Set during 7-roll resolution until the seat has discarded.
    pub needs_discard: bool,
    /// A development card was played this turn and not yet resolved.
    pub dev_card_in_flight: bool,
    pub points: u8,
    /// Settlement placed but road not yet, during initial placement.
    pub mid_placement: bool,
    /// Most recent build this turn, for cancel-build.
    pub last_built: Option<PieceType>,
    /// Last time this seat's occupant did anything; drives stall detection.
    pub last_action: Instant,
}

impl Seat {
    fn new(now: Instant) -> Self {
        Self {
            occupant: Occupant::Vacant,
            locked: false,
            hand: ResourceSet::EMPTY,
            offer: None,
            needs_discard: false,
            dev_card_in_flight: false,
            points: 0,
            mid_placement: false,
            last_built: None,
            last_action: now,
        }
    }
}

/// A connection that has joined this game (seated or watching).
#[derive(Clone, Debug)]
pub(crate) struct Member {
    pub name: String,
    pub is_robot: bool,
}

/// An outstanding robot recruitment request.
#[derive(Clone, Debug)]
pub struct JoinRequest {
    pub seat: SeatIndex,
    pub issued: Instant,
}

pub struct Game {
    pub name: String,
    pub rules: GameRules,
    pub seats: [Seat; MAX_SEATS],
    pub phase: Phase,
    /// Seat index of the current player. Meaningful only in active phases.
    pub(crate) current: usize,
    pub(crate) members: Vec<Member>,
    pub(crate) round: NegotiationRound,
    pub(crate) pending_trade: Option<PendingConfirmation>,
    pub(crate) reset_vote: Option<ResetVote>,
    /// Robot name → request, drained as robots sit down. Game start is
    /// gated on this becoming empty.
    pub(crate) join_requests: FxHashMap<String, JoinRequest>,
    /// Who asked for the start (gets the diagnostic if seat-fill fails).
    pub(crate) start_requester: Option<String>,
    // Initial-placement bookkeeping: seats in placement order, the index of
    // the seat currently placing, and whether we are in the reverse round.
    pub(crate) placement_order: Vec<usize>,
    pub(crate) placement_idx: usize,
    pub(crate) placement_round2: bool,
    /// Seat currently in its special-build window (6-player variant).
    pub(crate) special_builder: Option<usize>,
    /// Guard against forced and normal termination racing each other.
    pub(crate) terminating: bool,
    pub last_action: Instant,
    pub expires_at: Instant,
    /// Idleness budget; `expires_at` is pushed out by this on every action.
    pub(crate) expiry: Duration,
    pub(crate) layout: String,
}

impl Game {
    pub fn new(name: String, rules: GameRules, now: Instant, expiry: Duration) -> Self {
        Self {
            name,
            rules,
            seats: std::array::from_fn(|_| Seat::new(now)),
            phase: Phase::New,
            current: 0,
            members: Vec::new(),
            round: NegotiationRound::default(),
            pending_trade: None,
            reset_vote: None,
            join_requests: FxHashMap::default(),
            start_requester: None,
            placement_order: Vec::new(),
            placement_idx: 0,
            placement_round2: false,
            special_builder: None,
            terminating: false,
            last_action: now,
            expires_at: now + expiry,
            expiry,
            layout: String::new(),
        }
    }

    // -----------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------

    /// Add a member. Re-joining is idempotent: the caller just gets a fresh
    /// snapshot.
    pub fn join(&mut self, name: &str, is_robot: bool) -> Outbox {
        self.touch_game(Instant::now());
        if !self.is_member(name) {
            self.members.push(Member {
                name: name.to_string(),
                is_robot,
            });
        }
        vec![
            Outbound::All(ServerMessage::MemberJoined {
                game: self.name.clone(),
                name: name.to_string(),
            }),
            Outbound::To(name.to_string(), self.snapshot()),
        ]
    }

    /// Remove a member. Covers explicit leave, `Goodbye`, and disconnect —
    /// all three are the same event from the game's point of view. Vacates
    /// the member's seat and recovers any turn, discard, vote, or
    /// negotiation state that was waiting on them.
    pub fn leave(&mut self, name: &str) -> Outbox {
        if !self.is_member(name) {
            return Vec::new();
        }
        self.members.retain(|m| m.name != name);
        self.join_requests.remove(name);
        let mut out = vec![Outbound::All(ServerMessage::MemberLeft {
            game: self.name.clone(),
            name: name.to_string(),
        })];

        let Some(s) = self.seat_of(name) else {
            return out;
        };
        let was_current = self.phase.is_active()
            && (s == self.current || self.special_builder == Some(s));

        self.seats[s].occupant = Occupant::Vacant;
        self.clear_seat_negotiation(s, &mut out);

        // A leaver with a pending reset vote counts as "no" so the vote
        // can resolve.
        out.extend(self.fabricate_reset_no(SeatIndex(s as u8)));

        if self.phase == Phase::DiscardWait && self.seats[s].needs_discard {
            self.seats[s].needs_discard = false;
            out.extend(self.check_discards_done());
        }

        if was_current {
            out.extend(self.force_end_turn(SeatIndex(s as u8)));
        }
        out
    }

    /// Claim a seat. Only legal before the game starts (robots sit during
    /// the `Ready` holding state; humans during `New`).
    pub fn sit_down(
        &mut self,
        name: &str,
        seat: SeatIndex,
        is_robot: bool,
    ) -> Result<Outbox, Deny> {
        if !self.is_member(name) {
            return Err(Deny::NotMember);
        }
        if !seat.in_range() {
            return Err(Deny::BadSeat);
        }
        if !matches!(self.phase, Phase::New | Phase::Ready) {
            return Err(Deny::WrongPhase);
        }
        if self.seat_of(name).is_some() {
            return Err(Deny::AlreadySeated);
        }
        let slot = &mut self.seats[seat.idx()];
        if !slot.occupant.is_vacant() {
            return Err(Deny::SeatTaken);
        }
        if slot.locked && is_robot {
            return Err(Deny::SeatLocked);
        }
        slot.occupant = if is_robot {
            Occupant::Robot(name.to_string())
        } else {
            Occupant::Human(name.to_string())
        };
        let now = Instant::now();
        slot.last_action = now;
        self.touch_game(now);
        if is_robot {
            self.join_requests.remove(name);
        }
        Ok(vec![Outbound::All(ServerMessage::SatDown {
            game: self.name.clone(),
            seat,
            name: name.to_string(),
            is_robot,
        })])
    }

    /// Lock or unlock a vacant seat against robot recruitment.
    pub fn set_seat_lock(
        &mut self,
        name: &str,
        seat: SeatIndex,
        locked: bool,
    ) -> Result<Outbox, Deny> {
        if self.seat_of(name).is_none() {
            return Err(Deny::NotSeated);
        }
        if !seat.in_range() {
            return Err(Deny::BadSeat);
        }
        if !self.seats[seat.idx()].occupant.is_vacant() {
            return Err(Deny::SeatTaken);
        }
        self.seats[seat.idx()].locked = locked;
        Ok(vec![Outbound::All(ServerMessage::SeatLockChanged {
            game: self.name.clone(),
            seat,
            locked,
        })])
    }

    pub fn chat(&mut self, name: &str, text: String) -> Result<Outbox, Deny> {
        if !self.is_member(name) {
            return Err(Deny::NotMember);
        }
        Ok(vec![Outbound::All(ServerMessage::ChatBroadcast {
            game: self.name.clone(),
            from: name.to_string(),
            text,
        })])
    }

    // -----------------------------------------------------------------
    // Start gating
    // -----------------------------------------------------------------

    /// Request game start. Returns the vacant unlocked seats that need
    /// robot recruitment; if empty, the caller should `begin` at once,
    /// otherwise the game enters `Ready` until every requested robot has
    /// sat down (or seat-fill gives up).
    pub fn request_start(&mut self, name: &str) -> Result<Vec<SeatIndex>, Deny> {
        let Some(_s) = self.seat_of(name) else {
            return Err(Deny::NotSeated);
        };
        if self.phase != Phase::New {
            return Err(Deny::AlreadyStarted);
        }
        let vacancies: Vec<SeatIndex> = (0..MAX_SEATS)
            .filter(|&i| self.seats[i].occupant.is_vacant() && !self.seats[i].locked)
            .map(|i| SeatIndex(i as u8))
            .collect();
        let seated = self.seats_taken() as usize;
        let eventual = seated + vacancies.len();
        let every_other_seat_locked = vacancies.is_empty();
        if eventual < 2 && !(seated == 1 && every_other_seat_locked) {
            return Err(Deny::CannotStart("need at least 2 players".into()));
        }
        self.start_requester = Some(name.to_string());
        // `Ready` holds until every recruited robot sits; with no
        // vacancies the gate is already open.
        self.phase = Phase::Ready;
        self.touch_game(Instant::now());
        Ok(vacancies)
    }

    /// True once a `Ready` game's last recruited robot has sat down.
    pub fn ready_to_begin(&self) -> bool {
        self.phase == Phase::Ready && self.join_requests.is_empty()
    }

    /// Record one issued robot recruitment request.
    pub fn record_join_request(&mut self, robot: &str, seat: SeatIndex, now: Instant) {
        self.join_requests.insert(
            robot.to_string(),
            JoinRequest { seat, issued: now },
        );
    }

    pub fn join_requests(&self) -> &FxHashMap<String, JoinRequest> {
        &self.join_requests
    }

    /// Vacant unlocked seats with no recruitment request outstanding.
    pub fn unrequested_vacancies(&self) -> Vec<SeatIndex> {
        (0..MAX_SEATS)
            .filter(|&i| {
                self.seats[i].occupant.is_vacant()
                    && !self.seats[i].locked
                    && !self.join_requests.values().any(|r| r.seat.idx() == i)
            })
            .map(|i| SeatIndex(i as u8))
            .collect()
    }

    pub fn drop_join_request(&mut self, robot: &str) {
        self.join_requests.remove(robot);
    }

    /// Abandon a start attempt (seat-fill could not be satisfied). The
    /// diagnostic goes to whoever asked for the start.
    pub fn abort_start(&mut self, diagnostic: String) -> Outbox {
        self.phase = Phase::New;
        self.join_requests.clear();
        match self.start_requester.take() {
            Some(requester) => vec![Outbound::To(
                requester,
                ServerMessage::Deny {
                    game: Some(self.name.clone()),
                    reason: diagnostic,
                },
            )],
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------
    // Views and helpers
    // -----------------------------------------------------------------

    pub fn snapshot(&self) -> ServerMessage {
        ServerMessage::GameJoined {
            game: self.name.clone(),
            members: self.member_names(),
            seats: self
                .seats
                .iter()
                .map(|s| SeatInfo {
                    occupant: s.occupant.name().map(String::from),
                    is_robot: s.occupant.is_robot(),
                    locked: s.locked,
                })
                .collect(),
            phase: self.phase,
            current: self
                .phase
                .is_active()
                .then_some(SeatIndex(self.current as u8)),
        }
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }

    pub fn seat_of(&self, name: &str) -> Option<usize> {
        self.seats
            .iter()
            .position(|s| s.occupant.name() == Some(name))
    }

    pub fn seats_taken(&self) -> u8 {
        self.seats.iter().filter(|s| !s.occupant.is_vacant()).count() as u8
    }

    pub(crate) fn humans_seated(&self) -> usize {
        self.seats.iter().filter(|s| s.occupant.is_human()).count()
    }

    /// No human members at all (seated or watching): nothing keeps the
    /// game alive.
    pub fn is_abandoned(&self) -> bool {
        !self.members.iter().any(|m| !m.is_robot)
    }

    /// Next occupied seat after `i`, wrapping; `None` if no other seat is
    /// occupied.
    pub(crate) fn next_occupied_after(&self, i: usize) -> Option<usize> {
        (1..=MAX_SEATS)
            .map(|step| (i + step) % MAX_SEATS)
            .find(|&j| !self.seats[j].occupant.is_vacant() && j != i)
    }

    /// Name of the seat whose turn it is. Meaningful only in active phases.
    pub fn current_player_name(&self) -> Option<&str> {
        self.seats[self.current].occupant.name()
    }

    /// Record activity by a seat (resets its stall window) and by the game
    /// (resets expiry-relevant idleness).
    pub(crate) fn touch(&mut self, seat: usize) {
        let now = Instant::now();
        self.seats[seat].last_action = now;
        self.touch_game(now);
    }

    /// Record game-level activity. Expiry is measured from the last action,
    /// not from creation, so an actively played game is never destroyed.
    pub(crate) fn touch_game(&mut self, now: Instant) {
        self.last_action = now;
        self.expires_at = now + self.expiry;
    }

    /// Resolve the sender to their seat, denying non-seated senders.
    pub(crate) fn acting_seat(&self, name: &str) -> Result<usize, Deny> {
        self.seat_of(name).ok_or(Deny::NotSeated)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A game with the given occupants seated, in phase `New`.
    /// `occupants[i]` of `Some((name, is_robot))` fills seat i.
    pub fn game_with_seats(occupants: &[Option<(&str, bool)>]) -> Game {
        let mut game = Game::new(
            "test".into(),
            GameRules::default(),
            Instant::now(),
            Duration::from_secs(3600),
        );
        for (i, occ) in occupants.iter().enumerate() {
            if let Some((name, is_robot)) = occ {
                let _ = game.join(name, *is_robot);
                game.sit_down(name, SeatIndex(i as u8), *is_robot).unwrap();
            }
        }
        game
    }

    /// Start the game and fast-forward through initial placement so the
    /// first player sits at `Roll`.
    pub fn started_game(occupants: &[Option<(&str, bool)>]) -> Game {
        let mut game = game_with_seats(occupants);
        let starter = game
            .seats
            .iter()
            .find_map(|s| s.occupant.name().map(String::from))
            .unwrap();
        // Lock the unused seats so the start needs no robot recruitment.
        for i in 0..MAX_SEATS {
            if game.seats[i].occupant.is_vacant() {
                game.set_seat_lock(&starter, SeatIndex(i as u8), true).unwrap();
            }
        }
        let vacancies = game.request_start(&starter).unwrap();
        assert!(vacancies.is_empty(), "locking left a seat recruitable");
        let _ = game.begin("{}".into());
        // Walk every seat through both placement rounds.
        while game.phase.is_placement() {
            let name = game.current_player_name().unwrap().to_string();
            let piece = match game.phase {
                Phase::Placement1A | Phase::Placement2A => PieceType::Settlement,
                _ => PieceType::Road,
            };
            game.build(&name, piece).unwrap();
        }
        assert_eq!(game.phase, Phase::Roll);
        game
    }

    /// Give a seat a hand (tests set up trades directly).
    pub fn set_hand(game: &mut Game, seat: usize, hand: ResourceSet) {
        game.seats[seat].hand = hand;
    }

    /// Move a started game into the `Play` phase with a non-7 roll.
    pub fn to_play_phase(game: &mut Game) {
        let name = game.current_player_name().unwrap().to_string();
        game.roll(&name, 6).unwrap();
        assert_eq!(game.phase, Phase::Play);
    }
}
