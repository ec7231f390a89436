// Turn/phase state machine.
//
// Phase flow: New → Ready → Placement(1A,1B,2A,2B) → Roll → [DiscardWait →]
// Robber → Play → [SpecialBuild …] → next seat's Roll, until a win drives
// the game to Over.
//
// Two termination paths exist. `end_turn` is the validated path the current
// player invokes. `force_end_turn` is the supervisor's path: it bypasses
// `can_end_turn` and instead unwinds whatever the stalled seat left half
// done (mid-placement piece, unresolved dev card, owed discard, outstanding
// offer, pending reset vote). The `terminating` flag makes the two paths
// mutually idempotent when a stall sweep races a late arriving end-turn.

use log::{error, info, warn};

use quarry_protocol::message::ServerMessage;
use quarry_protocol::types::{Phase, PieceType, ResourceSet, SeatIndex};

use crate::error::Deny;

use super::{Game, Outbound, Outbox};

const ROAD_COST: ResourceSet = ResourceSet {
    brick: 1,
    wood: 1,
    ore: 0,
    grain: 0,
    wool: 0,
};
const SETTLEMENT_COST: ResourceSet = ResourceSet {
    brick: 1,
    wood: 1,
    ore: 0,
    grain: 1,
    wool: 1,
};
const CITY_COST: ResourceSet = ResourceSet {
    brick: 0,
    wood: 0,
    ore: 3,
    grain: 2,
    wool: 0,
};

fn cost_of(piece: PieceType) -> &'static ResourceSet {
    match piece {
        PieceType::Road => &ROAD_COST,
        PieceType::Settlement => &SETTLEMENT_COST,
        PieceType::City => &CITY_COST,
    }
}

/// Points a finished piece is worth. A city replaces a settlement, so its
/// net contribution is one additional point.
fn points_of(piece: PieceType) -> u8 {
    match piece {
        PieceType::Road => 0,
        PieceType::Settlement | PieceType::City => 1,
    }
}

impl Game {
    /// Start play. Callable once every recruited robot has sat down (or
    /// immediately when no recruitment was needed).
    pub fn begin(&mut self, layout: String) -> Outbox {
        debug_assert!(matches!(self.phase, Phase::New | Phase::Ready));
        self.layout = layout;
        self.placement_order = (0..self.seats.len())
            .filter(|&i| !self.seats[i].occupant.is_vacant())
            .collect();
        self.placement_idx = 0;
        self.placement_round2 = false;
        self.current = self.placement_order[0];
        self.phase = Phase::Placement1A;
        self.terminating = false;
        let now = std::time::Instant::now();
        for seat in &mut self.seats {
            seat.last_action = now;
        }
        self.touch_game(now);
        info!("game {:?} started with {} seats", self.name, self.placement_order.len());
        vec![
            Outbound::All(ServerMessage::GameStarted {
                game: self.name.clone(),
                layout: self.layout.clone(),
            }),
            self.turn_announcement(),
        ]
    }

    /// Roll the dice. The server rolls (the total comes from its PRNG);
    /// this folds the result into the machine. A 7 flags every over-limit
    /// hand for discarding and detours through `DiscardWait` and `Robber`.
    pub fn roll(&mut self, name: &str, total: u8) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if s != self.current {
            return Err(Deny::NotYourTurn);
        }
        if self.phase != Phase::Roll {
            return Err(Deny::WrongPhase);
        }
        self.touch(s);
        let mut out = vec![Outbound::All(ServerMessage::Rolled {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
            total,
        })];
        if total == 7 {
            let limit = u32::from(self.rules.discard_limit);
            for (i, seat) in self.seats.iter_mut().enumerate() {
                let hand_size = seat.hand.total();
                if seat.occupant.is_vacant() || hand_size <= limit {
                    continue;
                }
                seat.needs_discard = true;
                if let Some(occupant) = seat.occupant.name() {
                    // Over-limit hands lose half, rounded down.
                    let down_to = (hand_size - hand_size / 2) as u8;
                    out.push(Outbound::To(
                        occupant.to_string(),
                        ServerMessage::DiscardRequired {
                            game: self.name.clone(),
                            seat: SeatIndex(i as u8),
                            hand: seat.hand,
                            down_to,
                        },
                    ));
                }
            }
            if self.seats.iter().any(|seat| seat.needs_discard) {
                self.phase = Phase::DiscardWait;
            } else {
                self.phase = Phase::Robber;
            }
        } else {
            // Resource production for the rolled number is the board
            // collaborator's concern; the machine only advances.
            self.phase = Phase::Play;
        }
        out.push(self.turn_announcement());
        Ok(out)
    }

    /// Discard toward the hand limit after a 7.
    pub fn discard(&mut self, name: &str, resources: ResourceSet) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if self.phase != Phase::DiscardWait {
            return Err(Deny::WrongPhase);
        }
        if !self.seats[s].needs_discard {
            return Err(Deny::NoDiscardOwed);
        }
        let required = self.seats[s].hand.total() / 2;
        if resources.total() != required {
            return Err(Deny::BadDiscard(required));
        }
        let remaining = self.seats[s]
            .hand
            .checked_sub(&resources)
            .ok_or(Deny::InsufficientResources)?;
        self.seats[s].hand = remaining;
        self.seats[s].needs_discard = false;
        self.touch(s);
        let mut out = vec![Outbound::All(ServerMessage::Discarded {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
            count: required as u8,
        })];
        out.extend(self.check_discards_done());
        Ok(out)
    }

    /// Advance out of `DiscardWait` once no seat owes a discard.
    pub(crate) fn check_discards_done(&mut self) -> Outbox {
        if self.phase != Phase::DiscardWait || self.seats.iter().any(|s| s.needs_discard) {
            return Vec::new();
        }
        self.phase = Phase::Robber;
        vec![self.turn_announcement()]
    }

    /// Place the robber. Which seat gets robbed (and of what) is the board
    /// collaborator's concern.
    pub fn move_robber(&mut self, name: &str, hex: u8) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if s != self.current {
            return Err(Deny::NotYourTurn);
        }
        if self.phase != Phase::Robber {
            return Err(Deny::WrongPhase);
        }
        self.touch(s);
        self.phase = Phase::Play;
        Ok(vec![
            Outbound::All(ServerMessage::RobberMoved {
                game: self.name.clone(),
                seat: SeatIndex(s as u8),
                hex,
            }),
            self.turn_announcement(),
        ])
    }

    /// Build a piece. During initial placement this drives the placement
    /// cursor; in `Play`/`SpecialBuild` it spends resources and may win the
    /// game.
    pub fn build(&mut self, name: &str, piece: PieceType) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if self.phase.is_placement() {
            return self.build_placement(s, piece);
        }
        match self.phase {
            Phase::Play => {
                if s != self.current {
                    return Err(Deny::NotYourTurn);
                }
            }
            Phase::SpecialBuild => {
                if Some(s) != self.special_builder {
                    return Err(Deny::NotYourTurn);
                }
            }
            _ => return Err(Deny::WrongPhase),
        }
        let cost = cost_of(piece);
        let remaining = self.seats[s]
            .hand
            .checked_sub(cost)
            .ok_or(Deny::InsufficientResources)?;
        self.seats[s].hand = remaining;
        self.seats[s].points += points_of(piece);
        self.seats[s].last_built = Some(piece);
        self.touch(s);
        let mut out = vec![Outbound::All(ServerMessage::Built {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
            piece,
        })];
        if self.seats[s].points >= self.rules.win_points {
            out.extend(self.finish(Some(SeatIndex(s as u8))));
        }
        Ok(out)
    }

    fn build_placement(&mut self, s: usize, piece: PieceType) -> Result<Outbox, Deny> {
        if s != self.current {
            return Err(Deny::NotYourTurn);
        }
        let expected = match self.phase {
            Phase::Placement1A | Phase::Placement2A => PieceType::Settlement,
            _ => PieceType::Road,
        };
        if piece != expected {
            return Err(Deny::WrongPhase);
        }
        self.touch(s);
        let mut out = vec![Outbound::All(ServerMessage::Built {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
            piece,
        })];
        match self.phase {
            Phase::Placement1A => {
                self.seats[s].points += 1;
                self.seats[s].mid_placement = true;
                self.phase = Phase::Placement1B;
            }
            Phase::Placement2A => {
                self.seats[s].points += 1;
                self.seats[s].mid_placement = true;
                self.phase = Phase::Placement2B;
            }
            Phase::Placement1B | Phase::Placement2B => {
                self.seats[s].mid_placement = false;
                out.extend(self.advance_placement());
                return Ok(out);
            }
            _ => unreachable!("build_placement called outside placement"),
        }
        out.push(self.turn_announcement());
        Ok(out)
    }

    /// Hand the placement prompt to the next seat in the snake: forward
    /// through round one, the last placer again to open round two, then
    /// reverse back to the first placer, who rolls first. Seats vacated
    /// mid-placement are skipped. Shared by the build path and the forced
    /// path, which uses it to step past a stalled placer.
    fn advance_placement(&mut self) -> Outbox {
        debug_assert!(self.phase.is_placement());
        let mut idx = self.placement_idx;
        let mut round2 = self.placement_round2;
        loop {
            if !round2 {
                if idx + 1 < self.placement_order.len() {
                    idx += 1;
                } else {
                    // Round two starts with the same seat.
                    round2 = true;
                }
            } else if idx > 0 {
                idx -= 1;
            } else {
                return self.conclude_placement();
            }
            let seat = self.placement_order[idx];
            if !self.seats[seat].occupant.is_vacant() {
                self.placement_idx = idx;
                self.placement_round2 = round2;
                self.current = seat;
                self.phase = if round2 {
                    Phase::Placement2A
                } else {
                    Phase::Placement1A
                };
                self.touch(seat);
                return vec![self.turn_announcement()];
            }
        }
    }

    /// The snake is complete: the first placer rolls first (or the next
    /// occupied seat, if the first placer is gone).
    fn conclude_placement(&mut self) -> Outbox {
        self.placement_round2 = true;
        self.placement_idx = 0;
        let first = self.placement_order[0];
        self.phase = Phase::Roll;
        if self.seats[first].occupant.is_vacant() {
            let Some(next) = self.next_occupied_after(first) else {
                return self.finish(None);
            };
            self.current = next;
        } else {
            self.current = first;
        }
        self.touch(self.current);
        vec![self.turn_announcement()]
    }

    /// Undo the most recent build this turn, refunding its cost.
    pub fn cancel_build(&mut self, name: &str, piece: PieceType) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if !matches!(self.phase, Phase::Play | Phase::SpecialBuild) {
            return Err(Deny::WrongPhase);
        }
        if self.seats[s].last_built != Some(piece) {
            return Err(Deny::WrongPhase);
        }
        self.seats[s].hand.add(cost_of(piece));
        self.seats[s].points -= points_of(piece);
        self.seats[s].last_built = None;
        self.touch(s);
        Ok(vec![Outbound::All(ServerMessage::BuildCanceled {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
            piece,
        })])
    }

    /// Play a development card. Resolution (what the card does) is
    /// delegated; the machine tracks only that one is in flight, so a
    /// forced unwind can return it.
    pub fn play_dev_card(&mut self, name: &str) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if s != self.current {
            return Err(Deny::NotYourTurn);
        }
        if self.phase != Phase::Play {
            return Err(Deny::WrongPhase);
        }
        if self.seats[s].dev_card_in_flight {
            return Err(Deny::WrongPhase);
        }
        self.seats[s].dev_card_in_flight = true;
        self.touch(s);
        Ok(vec![Outbound::All(ServerMessage::DevCardPlayed {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
        })])
    }

    /// Validated end-of-turn check, the normal path's gate.
    pub fn can_end_turn(&self, s: usize) -> Result<(), Deny> {
        match self.phase {
            Phase::Play => {
                if s != self.current {
                    return Err(Deny::NotYourTurn);
                }
            }
            Phase::SpecialBuild => {
                if Some(s) != self.special_builder {
                    return Err(Deny::NotYourTurn);
                }
            }
            _ => return Err(Deny::WrongPhase),
        }
        Ok(())
    }

    pub fn end_turn(&mut self, name: &str) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        self.can_end_turn(s)?;
        Ok(self.advance_turn())
    }

    /// Supervisor path: unconditionally unwind whatever `seat` left half
    /// done, then advance the turn if the seat held it. Safe to call for
    /// any occupied-or-just-vacated seat; also the disconnect path.
    pub fn force_end_turn(&mut self, seat: SeatIndex) -> Outbox {
        if self.terminating || !self.phase.is_active() || !seat.in_range() {
            return Vec::new();
        }
        let s = seat.idx();
        let mut out = Vec::new();
        warn!("game {:?}: forcing end of seat {s}'s turn", self.name);

        // Unwind an in-progress initial placement: take back the settlement
        // and re-prompt for it.
        if self.seats[s].mid_placement {
            self.seats[s].mid_placement = false;
            self.seats[s].points = self.seats[s].points.saturating_sub(1);
            if s == self.current {
                match self.phase {
                    Phase::Placement1B => self.phase = Phase::Placement1A,
                    Phase::Placement2B => self.phase = Phase::Placement2A,
                    _ => {}
                }
            }
        }

        // Return an unresolved development card.
        self.seats[s].dev_card_in_flight = false;

        // Pay the owed discard on the seat's behalf.
        if self.seats[s].needs_discard {
            let required = self.seats[s].hand.total() / 2;
            self.seats[s].hand = auto_discard(&self.seats[s].hand, required);
            self.seats[s].needs_discard = false;
            out.push(Outbound::All(ServerMessage::Discarded {
                game: self.name.clone(),
                seat,
                count: required as u8,
            }));
            out.extend(self.check_discards_done());
        }

        // Retract the seat's offer and record a forced response, so the
        // negotiation round can resolve without it.
        out.extend(self.force_negotiation_exit(s));

        // A pending reset vote counts the stalled seat as "no".
        out.extend(self.fabricate_reset_no(seat));

        if self.phase.is_active() && (s == self.current || self.special_builder == Some(s)) {
            out.extend(self.advance_turn());
        }
        out
    }

    /// Advance to the next seat's turn (or to `Over` when nobody is left).
    /// Shared by the validated and forced paths; the `terminating` guard
    /// makes racing calls collapse into one transition.
    fn advance_turn(&mut self) -> Outbox {
        if self.terminating {
            return Vec::new();
        }
        self.terminating = true;
        let mut out = Vec::new();

        self.clear_negotiation();
        let s = self.current;
        self.seats[s].dev_card_in_flight = false;
        self.seats[s].last_built = None;
        self.seats[s].mid_placement = false;

        // A forced exit during initial placement continues the snake with
        // the next placer; it never jumps to normal turns.
        if self.phase.is_placement() {
            out.extend(self.advance_placement());
            self.terminating = false;
            return out;
        }

        // Special-build windows: after the current player's turn, each
        // other occupied seat gets one, in order, before the turn advances.
        if self.rules.special_build {
            let from = self.special_builder.unwrap_or(self.current);
            if let Some(next) = self.next_occupied_after(from) {
                if next != self.current {
                    self.special_builder = Some(next);
                    self.phase = Phase::SpecialBuild;
                    self.touch(next);
                    out.push(Outbound::All(ServerMessage::TurnStarted {
                        game: self.name.clone(),
                        seat: SeatIndex(next as u8),
                        phase: Phase::SpecialBuild,
                    }));
                    self.terminating = false;
                    return out;
                }
            }
            self.special_builder = None;
        }

        match self.next_occupied_after(self.current) {
            Some(next) => {
                self.current = next;
                self.phase = Phase::Roll;
                self.touch(next);
                out.push(self.turn_announcement());
            }
            None => {
                // Nobody left to hand the turn to: abandon, don't advance.
                out.extend(self.finish(None));
            }
        }
        self.terminating = false;
        out
    }

    /// Drive the game to `Over`.
    pub(crate) fn finish(&mut self, winner: Option<SeatIndex>) -> Outbox {
        if self.phase == Phase::Over {
            return Vec::new();
        }
        self.phase = Phase::Over;
        self.clear_negotiation();
        self.reset_vote = None;
        match winner {
            Some(w) => info!("game {:?} over, seat {} wins", self.name, w.0),
            None => info!("game {:?} over, abandoned", self.name),
        }
        vec![Outbound::All(ServerMessage::GameOver {
            game: self.name.clone(),
            winner,
        })]
    }

    pub(crate) fn turn_announcement(&self) -> Outbound {
        let seat = match self.phase {
            Phase::SpecialBuild => self.special_builder.unwrap_or(self.current),
            _ => self.current,
        };
        Outbound::All(ServerMessage::TurnStarted {
            game: self.name.clone(),
            seat: SeatIndex(seat as u8),
            phase: self.phase,
        })
    }

    /// Names of winner and losers once a game is over, for the registry's
    /// win/loss counters. Robots are counted too; the registry decides.
    pub fn result_names(&self, winner: SeatIndex) -> (Option<String>, Vec<String>) {
        let won = self.seats[winner.idx()].occupant.name().map(String::from);
        let lost = self
            .seats
            .iter()
            .enumerate()
            .filter(|(i, seat)| *i != winner.idx() && !seat.occupant.is_vacant())
            .filter_map(|(_, seat)| seat.occupant.name().map(String::from))
            .collect();
        (won, lost)
    }
}

/// Remove `count` cards from `hand`, largest piles first, and return what
/// is left. Used when the supervisor discards on a stalled seat's behalf.
fn auto_discard(hand: &ResourceSet, count: u32) -> ResourceSet {
    let mut piles = [
        hand.brick, hand.wood, hand.ore, hand.grain, hand.wool,
    ];
    let mut left = count;
    while left > 0 {
        let (biggest, _) = piles
            .iter()
            .enumerate()
            .max_by_key(|&(_, n)| *n)
            .unwrap_or((0, &0));
        if piles[biggest] == 0 {
            error!("auto-discard ran out of cards with {left} still owed");
            break;
        }
        piles[biggest] -= 1;
        left -= 1;
    }
    ResourceSet {
        brick: piles[0],
        wood: piles[1],
        ore: piles[2],
        grain: piles[3],
        wool: piles[4],
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{game_with_seats, set_hand, started_game, to_play_phase};
    use super::*;

    const FOUR_HUMANS: [Option<(&str, bool)>; 4] = [
        Some(("Alice", false)),
        Some(("Bob", false)),
        Some(("Carol", false)),
        Some(("Dave", false)),
    ];

    #[test]
    fn placement_snakes_through_seats() {
        let mut game = game_with_seats(&FOUR_HUMANS);
        let _ = game.request_start("Alice").unwrap();
        let _ = game.begin("{}".into());

        // Round one runs 0,1,2,3; round two runs 3,2,1,0.
        let mut placers = Vec::new();
        while game.phase.is_placement() {
            placers.push(game.current);
            let name = game.current_player_name().unwrap().to_string();
            let piece = match game.phase {
                Phase::Placement1A | Phase::Placement2A => PieceType::Settlement,
                _ => PieceType::Road,
            };
            game.build(&name, piece).unwrap();
        }
        assert_eq!(
            placers,
            vec![0, 0, 1, 1, 2, 2, 3, 3, 3, 3, 2, 2, 1, 1, 0, 0]
        );
        assert_eq!(game.phase, Phase::Roll);
        assert_eq!(game.current, 0);
        // Each seat placed two settlements.
        for seat in &game.seats {
            assert_eq!(seat.points, 2);
        }
    }

    #[test]
    fn placement_rejects_wrong_piece_and_wrong_seat() {
        let mut game = game_with_seats(&FOUR_HUMANS);
        let _ = game.request_start("Alice").unwrap();
        let _ = game.begin("{}".into());

        assert_eq!(
            game.build("Alice", PieceType::Road),
            Err(Deny::WrongPhase)
        );
        assert_eq!(
            game.build("Bob", PieceType::Settlement),
            Err(Deny::NotYourTurn)
        );
    }

    #[test]
    fn non_seven_roll_goes_to_play() {
        let mut game = started_game(&FOUR_HUMANS);
        let out = game.roll("Alice", 8).unwrap();
        assert_eq!(game.phase, Phase::Play);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::Rolled { total: 8, .. })
        )));
    }

    #[test]
    fn roll_twice_denied() {
        let mut game = started_game(&FOUR_HUMANS);
        game.roll("Alice", 8).unwrap();
        assert_eq!(game.roll("Alice", 8), Err(Deny::WrongPhase));
    }

    #[test]
    fn seven_without_fat_hands_goes_straight_to_robber() {
        let mut game = started_game(&FOUR_HUMANS);
        game.roll("Alice", 7).unwrap();
        assert_eq!(game.phase, Phase::Robber);
        game.move_robber("Alice", 10).unwrap();
        assert_eq!(game.phase, Phase::Play);
    }

    #[test]
    fn seven_flags_over_limit_hands() {
        let mut game = started_game(&FOUR_HUMANS);
        set_hand(&mut game, 1, ResourceSet::new(4, 4, 1, 0, 0)); // 9 cards
        set_hand(&mut game, 2, ResourceSet::new(2, 2, 2, 0, 0)); // 6 cards

        let out = game.roll("Alice", 7).unwrap();
        assert_eq!(game.phase, Phase::DiscardWait);
        assert!(game.seats[1].needs_discard);
        assert!(!game.seats[2].needs_discard);
        // The discard prompt is private to the flagged seat.
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::To(name, ServerMessage::DiscardRequired { down_to: 5, .. })
                if name == "Bob"
        )));

        // 9 cards discard 4.
        assert_eq!(
            game.discard("Bob", ResourceSet::new(1, 1, 0, 0, 0)),
            Err(Deny::BadDiscard(4))
        );
        game.discard("Bob", ResourceSet::new(2, 2, 0, 0, 0)).unwrap();
        assert_eq!(game.seats[1].hand.total(), 5);
        assert_eq!(game.phase, Phase::Robber);
    }

    #[test]
    fn discard_without_owing_denied() {
        let mut game = started_game(&FOUR_HUMANS);
        set_hand(&mut game, 1, ResourceSet::new(4, 4, 1, 0, 0));
        game.roll("Alice", 7).unwrap();
        assert_eq!(
            game.discard("Carol", ResourceSet::EMPTY),
            Err(Deny::NoDiscardOwed)
        );
    }

    #[test]
    fn build_spends_resources_and_scores() {
        let mut game = started_game(&FOUR_HUMANS);
        to_play_phase(&mut game);
        set_hand(&mut game, 0, ResourceSet::new(1, 1, 0, 1, 1));

        game.build("Alice", PieceType::Settlement).unwrap();
        assert!(game.seats[0].hand.is_empty());
        assert_eq!(game.seats[0].points, 3); // 2 from placement

        assert_eq!(
            game.build("Alice", PieceType::Road),
            Err(Deny::InsufficientResources)
        );
    }

    #[test]
    fn cancel_build_refunds() {
        let mut game = started_game(&FOUR_HUMANS);
        to_play_phase(&mut game);
        set_hand(&mut game, 0, ResourceSet::new(1, 1, 0, 0, 0));

        game.build("Alice", PieceType::Road).unwrap();
        assert!(game.seats[0].hand.is_empty());
        game.cancel_build("Alice", PieceType::Road).unwrap();
        assert_eq!(game.seats[0].hand, ResourceSet::new(1, 1, 0, 0, 0));
        // Nothing left to cancel.
        assert!(game.cancel_build("Alice", PieceType::Road).is_err());
    }

    #[test]
    fn winning_build_ends_game() {
        let mut game = started_game(&FOUR_HUMANS);
        to_play_phase(&mut game);
        game.seats[0].points = game.rules.win_points - 1;
        set_hand(&mut game, 0, ResourceSet::new(1, 1, 0, 1, 1));

        let out = game.build("Alice", PieceType::Settlement).unwrap();
        assert_eq!(game.phase, Phase::Over);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::GameOver {
                winner: Some(SeatIndex(0)),
                ..
            })
        )));
        let (won, lost) = game.result_names(SeatIndex(0));
        assert_eq!(won.as_deref(), Some("Alice"));
        assert_eq!(lost.len(), 3);
    }

    #[test]
    fn end_turn_advances_and_skips_vacant() {
        let mut game = started_game(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            None,
            Some(("Dave", false)),
        ]);
        to_play_phase(&mut game);
        game.end_turn("Alice").unwrap();
        assert_eq!(game.current, 1);
        assert_eq!(game.phase, Phase::Roll);

        to_play_phase(&mut game);
        game.end_turn("Bob").unwrap();
        assert_eq!(game.current, 3); // seat 2 vacant
    }

    #[test]
    fn end_turn_validation() {
        let mut game = started_game(&FOUR_HUMANS);
        // Not rolled yet.
        assert_eq!(game.end_turn("Alice"), Err(Deny::WrongPhase));
        to_play_phase(&mut game);
        assert_eq!(game.end_turn("Bob"), Err(Deny::NotYourTurn));
        assert!(game.end_turn("Alice").is_ok());
    }

    #[test]
    fn forced_termination_auto_discards() {
        let mut game = started_game(&FOUR_HUMANS);
        set_hand(&mut game, 1, ResourceSet::new(4, 4, 1, 0, 0));
        game.roll("Alice", 7).unwrap();
        assert_eq!(game.phase, Phase::DiscardWait);

        // Seat 1 stalls; the supervisor discards for it. Seat 1 is not the
        // current player, so the turn itself is untouched.
        let out = game.force_end_turn(SeatIndex(1));
        assert!(!game.seats[1].needs_discard);
        assert_eq!(game.seats[1].hand.total(), 5);
        assert_eq!(game.phase, Phase::Robber);
        assert_eq!(game.current, 0);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::Discarded { count: 4, .. })
        )));
    }

    #[test]
    fn forced_termination_unwinds_mid_placement() {
        let mut game = game_with_seats(&FOUR_HUMANS);
        let _ = game.request_start("Alice").unwrap();
        let _ = game.begin("{}".into());
        game.build("Alice", PieceType::Settlement).unwrap();
        assert_eq!(game.phase, Phase::Placement1B);
        assert_eq!(game.seats[0].points, 1);

        let _ = game.force_end_turn(SeatIndex(0));
        // The half-placed settlement is taken back and placement continues
        // with the next placer; normal turns have not begun.
        assert_eq!(game.seats[0].points, 0);
        assert!(!game.seats[0].mid_placement);
        assert_eq!(game.current, 1);
        assert_eq!(game.phase, Phase::Placement1A);
    }

    #[test]
    fn placement_completes_after_forced_seat() {
        let mut game = game_with_seats(&FOUR_HUMANS);
        let _ = game.request_start("Alice").unwrap();
        let _ = game.begin("{}".into());
        game.build("Alice", PieceType::Settlement).unwrap();
        let _ = game.force_end_turn(SeatIndex(0));

        // The snake carries on through every other seat (and gives seat 0
        // its reverse-round placements), then normal turns begin.
        while game.phase.is_placement() {
            let name = game.current_player_name().unwrap().to_string();
            let piece = match game.phase {
                Phase::Placement1A | Phase::Placement2A => PieceType::Settlement,
                _ => PieceType::Road,
            };
            game.build(&name, piece).unwrap();
        }
        assert_eq!(game.phase, Phase::Roll);
        assert_eq!(game.current, 0);
        assert_eq!(game.seats[0].points, 1); // first-round pair was skipped
        assert_eq!(game.seats[1].points, 2);
    }

    #[test]
    fn leaver_is_skipped_for_rest_of_placement() {
        let mut game = game_with_seats(&FOUR_HUMANS);
        let _ = game.request_start("Alice").unwrap();
        let _ = game.begin("{}".into());
        // Bob quits before his first placement.
        let _ = game.leave("Bob");

        let mut placers = Vec::new();
        while game.phase.is_placement() {
            placers.push(game.current);
            let name = game.current_player_name().unwrap().to_string();
            let piece = match game.phase {
                Phase::Placement1A | Phase::Placement2A => PieceType::Settlement,
                _ => PieceType::Road,
            };
            game.build(&name, piece).unwrap();
        }
        assert!(!placers.contains(&1));
        assert_eq!(game.phase, Phase::Roll);
        assert_eq!(game.current, 0);
    }

    #[test]
    fn forced_termination_advances_current() {
        let mut game = started_game(&FOUR_HUMANS);
        let out = game.force_end_turn(SeatIndex(0));
        assert_eq!(game.current, 1);
        assert_eq!(game.phase, Phase::Roll);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::TurnStarted {
                seat: SeatIndex(1),
                phase: Phase::Roll,
                ..
            })
        )));
    }

    #[test]
    fn forced_termination_with_no_seats_left_abandons() {
        let mut game = started_game(&[Some(("Alice", false)), Some(("Bob", false)), None, None]);
        let _ = game.leave("Bob");
        // Alice is the only occupant; forcing her turn has nowhere to go.
        let out = game.force_end_turn(SeatIndex(0));
        assert_eq!(game.phase, Phase::Over);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::GameOver { winner: None, .. })
        )));
    }

    #[test]
    fn current_player_leaving_advances_turn() {
        let mut game = started_game(&FOUR_HUMANS);
        let _ = game.leave("Alice");
        assert!(game.seats[0].occupant.is_vacant());
        assert_eq!(game.current, 1);
        assert_eq!(game.phase, Phase::Roll);
    }

    #[test]
    fn auto_discard_takes_largest_piles() {
        let hand = ResourceSet::new(5, 1, 0, 2, 0);
        let left = auto_discard(&hand, 4);
        assert_eq!(left.total(), 4);
        assert!(left.brick <= 2); // the big pile pays most
    }

    #[test]
    fn special_build_window_rotates() {
        let mut game = started_game(&FOUR_HUMANS);
        game.rules.special_build = true;
        to_play_phase(&mut game);

        game.end_turn("Alice").unwrap();
        assert_eq!(game.phase, Phase::SpecialBuild);
        assert_eq!(game.special_builder, Some(1));
        // Only the window's owner may build.
        assert_eq!(game.build("Carol", PieceType::Road), Err(Deny::NotYourTurn));

        game.end_turn("Bob").unwrap();
        assert_eq!(game.special_builder, Some(2));
        game.end_turn("Carol").unwrap();
        game.end_turn("Dave").unwrap();
        // All windows done: the turn proper advances.
        assert_eq!(game.phase, Phase::Roll);
        assert_eq!(game.current, 1);
        assert_eq!(game.special_builder, None);
    }
}
