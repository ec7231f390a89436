// Board-reset voting.
//
// Any seated player may ask to restart the game with the same roster and a
// fresh board. With fewer than two humans there is nobody to ask: the reset
// proceeds at once if robots are present, otherwise it is refused. With two
// or more humans, every other human seat votes; seats whose client cannot
// vote (old protocol version) count as automatic yes. Unanimity
// reconstructs the game; a single no aborts it. A stalled or departing
// voter has a "no" fabricated on their behalf so the vote always resolves.
//
// Reconstruction keeps humans seated and vacates robot seats — the robots
// run in their own processes and are re-recruited through the normal
// seat-fill path, exactly as at first start.

use log::info;

use quarry_protocol::message::ServerMessage;
use quarry_protocol::types::{MAX_SEATS, Phase, ResourceSet, SeatIndex};

use crate::error::Deny;

use super::{Game, NegotiationRound, Occupant, Outbound, Outbox};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VoteSlot {
    /// Not a voter (vacant, robot, or the requester).
    NotAsked,
    Pending,
    Voted(bool),
}

/// An in-progress reset vote. At most one per game.
#[derive(Clone, Debug)]
pub struct ResetVote {
    pub requester: SeatIndex,
    slots: [VoteSlot; MAX_SEATS],
}

impl ResetVote {
    fn settled(&self) -> bool {
        !self.slots.contains(&VoteSlot::Pending)
    }

    /// Whether `seat`'s vote is still outstanding.
    pub fn awaiting(&self, seat: usize) -> bool {
        seat < MAX_SEATS && self.slots[seat] == VoteSlot::Pending
    }
}

impl Game {
    /// Ask for a board reset. `can_vote[i]` says whether seat i's client is
    /// able to vote (protocol version); incapable seats count as yes.
    pub fn reset_request(
        &mut self,
        name: &str,
        can_vote: [bool; MAX_SEATS],
    ) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        if self.reset_vote.is_some() {
            return Err(Deny::VoteInProgress);
        }
        if !self.phase.is_active() && self.phase != Phase::Over {
            return Err(Deny::WrongPhase);
        }
        let humans = self.humans_seated();
        let robots = self
            .seats
            .iter()
            .filter(|seat| seat.occupant.is_robot())
            .count();
        if humans < 2 && robots == 0 {
            return Err(Deny::ResetRefused);
        }
        self.touch(s);
        self.start_requester = Some(name.to_string());
        let by = SeatIndex(s as u8);
        let mut out = vec![Outbound::All(ServerMessage::ResetRequested {
            game: self.name.clone(),
            by,
        })];
        if humans < 2 {
            out.extend(self.perform_reset());
            return Ok(out);
        }

        let slots = std::array::from_fn(|i| {
            if i == s || !self.seats[i].occupant.is_human() {
                VoteSlot::NotAsked
            } else if can_vote[i] {
                VoteSlot::Pending
            } else {
                VoteSlot::Voted(true)
            }
        });
        let vote = ResetVote {
            requester: by,
            slots,
        };
        if vote.settled() {
            // Every other human was vote-incapable: unanimous by default.
            out.extend(self.perform_reset());
        } else {
            self.reset_vote = Some(vote);
        }
        Ok(out)
    }

    /// Record one seat's vote.
    pub fn record_reset_vote(&mut self, name: &str, yes: bool) -> Result<Outbox, Deny> {
        let s = self.acting_seat(name)?;
        let Some(vote) = self.reset_vote.as_mut() else {
            return Err(Deny::NoVoteInProgress);
        };
        if vote.slots[s] != VoteSlot::Pending {
            return Err(Deny::NoPendingVote);
        }
        vote.slots[s] = VoteSlot::Voted(yes);
        let settled = vote.settled();
        self.touch(s);
        let mut out = vec![Outbound::All(ServerMessage::ResetVoteRecorded {
            game: self.name.clone(),
            seat: SeatIndex(s as u8),
            yes,
        })];
        if !yes {
            self.reset_vote = None;
            out.push(Outbound::All(ServerMessage::ResetResult {
                game: self.name.clone(),
                accepted: false,
            }));
        } else if settled {
            out.extend(self.perform_reset());
        }
        Ok(out)
    }

    /// Count a stalled or departing seat as "no" so a pending vote cannot
    /// wait forever. No-op when the seat has no vote outstanding.
    pub(crate) fn fabricate_reset_no(&mut self, seat: SeatIndex) -> Outbox {
        let Some(vote) = self.reset_vote.as_ref() else {
            return Vec::new();
        };
        let s = seat.idx();
        let involved = vote.requester == seat || vote.slots[s] == VoteSlot::Pending;
        if !involved {
            return Vec::new();
        }
        self.reset_vote = None;
        vec![
            Outbound::All(ServerMessage::ResetVoteRecorded {
                game: self.name.clone(),
                seat,
                yes: false,
            }),
            Outbound::All(ServerMessage::ResetResult {
                game: self.name.clone(),
                accepted: false,
            }),
        ]
    }

    /// Reconstruct the game: same name, human roster kept, robot seats
    /// vacated for re-recruitment, all play state discarded. Leaves the
    /// game in `Ready`; the caller re-runs seat-fill and begins with a
    /// fresh layout.
    fn perform_reset(&mut self) -> Outbox {
        info!("game {:?} reset accepted, reconstructing", self.name);
        self.reset_vote = None;
        self.pending_trade = None;
        self.round = NegotiationRound::default();
        self.placement_order.clear();
        self.placement_idx = 0;
        self.placement_round2 = false;
        self.special_builder = None;
        self.terminating = false;
        self.current = 0;
        self.join_requests.clear();

        for seat in &mut self.seats {
            if seat.occupant.is_robot() {
                seat.occupant = Occupant::Vacant;
            }
            seat.hand = ResourceSet::EMPTY;
            seat.offer = None;
            seat.needs_discard = false;
            seat.dev_card_in_flight = false;
            seat.points = 0;
            seat.mid_placement = false;
            seat.last_built = None;
        }
        // Robots disconnect and come back through seat-fill. They are about
        // to drop out of the member list, so the result is addressed to
        // them directly; the membership broadcast no longer reaches them.
        let mut out: Outbox = self
            .members
            .iter()
            .filter(|m| m.is_robot)
            .map(|m| {
                Outbound::To(
                    m.name.clone(),
                    ServerMessage::ResetResult {
                        game: self.name.clone(),
                        accepted: true,
                    },
                )
            })
            .collect();
        self.members.retain(|m| !m.is_robot);
        self.phase = Phase::Ready;
        self.touch_game(std::time::Instant::now());

        out.push(Outbound::All(ServerMessage::ResetResult {
            game: self.name.clone(),
            accepted: true,
        }));
        out
    }
}

#[cfg(test)]
mod tests {
    use quarry_protocol::types::PieceType;

    use super::super::testutil::{set_hand, started_game, to_play_phase};
    use super::*;

    const ALL_VOTERS: [bool; MAX_SEATS] = [true; MAX_SEATS];

    fn mixed_game() -> Game {
        started_game(&[
            Some(("Alice", false)),
            Some(("Bot1", true)),
            Some(("Bot2", true)),
            Some(("Bot3", true)),
        ])
    }

    #[test]
    fn lone_human_with_robots_resets_immediately() {
        let mut game = mixed_game();
        set_hand(&mut game, 0, ResourceSet::new(3, 0, 0, 0, 0));

        let out = game.reset_request("Alice", ALL_VOTERS).unwrap();
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::ResetResult { accepted: true, .. })
        )));
        assert_eq!(game.phase, Phase::Ready);
        // Robots are gone; Alice stays, stripped of play state.
        assert!(game.seats[1].occupant.is_vacant());
        assert!(game.seats[2].occupant.is_vacant());
        assert_eq!(game.seat_of("Alice"), Some(0));
        assert!(game.seats[0].hand.is_empty());
        assert_eq!(game.seats[0].points, 0);
        assert!(!game.is_member("Bot1"));
        assert!(game.is_member("Alice"));
    }

    #[test]
    fn lone_human_without_robots_is_refused() {
        let mut game = started_game(&[Some(("Alice", false)), Some(("Bob", false)), None, None]);
        let _ = game.leave("Bob");
        assert_eq!(
            game.reset_request("Alice", ALL_VOTERS),
            Err(Deny::ResetRefused)
        );
    }

    #[test]
    fn unanimous_yes_reconstructs() {
        let mut game = started_game(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            Some(("Carol", false)),
            None,
        ]);
        to_play_phase(&mut game);
        game.seats[1].points = 5;

        let out = game.reset_request("Alice", ALL_VOTERS).unwrap();
        assert!(game.reset_vote.is_some());
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::ResetRequested {
                by: SeatIndex(0),
                ..
            })
        )));

        game.record_reset_vote("Bob", true).unwrap();
        assert!(game.reset_vote.is_some()); // Carol still pending
        let out = game.record_reset_vote("Carol", true).unwrap();
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::ResetResult { accepted: true, .. })
        )));
        assert_eq!(game.phase, Phase::Ready);
        assert!(game.ready_to_begin()); // no robots to recruit
        assert_eq!(game.seats[1].points, 0);
        // Humans keep their seats across the reset.
        assert_eq!(game.seat_of("Bob"), Some(1));
    }

    #[test]
    fn single_no_aborts() {
        let mut game = started_game(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            Some(("Carol", false)),
            None,
        ]);
        to_play_phase(&mut game);
        game.reset_request("Alice", ALL_VOTERS).unwrap();
        let out = game.record_reset_vote("Bob", false).unwrap();
        assert!(game.reset_vote.is_none());
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::ResetResult {
                accepted: false,
                ..
            })
        )));
        // The game continues unchanged.
        assert_eq!(game.phase, Phase::Play);
        // Carol's vote is now moot.
        assert_eq!(
            game.record_reset_vote("Carol", true),
            Err(Deny::NoVoteInProgress)
        );
    }

    #[test]
    fn vote_incapable_seats_count_as_yes() {
        let mut game = started_game(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            None,
            None,
        ]);
        to_play_phase(&mut game);
        // Bob's client cannot vote: unanimity is immediate.
        let out = game
            .reset_request("Alice", [true, false, true, true])
            .unwrap();
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::ResetResult { accepted: true, .. })
        )));
        assert!(game.reset_vote.is_none());
    }

    #[test]
    fn second_request_blocked_while_voting() {
        let mut game = started_game(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            Some(("Carol", false)),
            None,
        ]);
        to_play_phase(&mut game);
        game.reset_request("Alice", ALL_VOTERS).unwrap();
        assert_eq!(
            game.reset_request("Bob", ALL_VOTERS),
            Err(Deny::VoteInProgress)
        );
    }

    #[test]
    fn departing_voter_counts_as_no() {
        let mut game = started_game(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            Some(("Carol", false)),
            None,
        ]);
        to_play_phase(&mut game);
        game.reset_request("Alice", ALL_VOTERS).unwrap();

        let out = game.leave("Carol");
        assert!(game.reset_vote.is_none());
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::ResetResult {
                accepted: false,
                ..
            })
        )));
    }

    #[test]
    fn forced_termination_fabricates_no() {
        let mut game = started_game(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            Some(("Carol", false)),
            None,
        ]);
        to_play_phase(&mut game);
        game.reset_request("Alice", ALL_VOTERS).unwrap();

        // Bob stalls mid-vote; the supervisor forces his seat.
        let out = game.force_end_turn(SeatIndex(1));
        assert!(game.reset_vote.is_none());
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::All(ServerMessage::ResetVoteRecorded {
                seat: SeatIndex(1),
                yes: false,
                ..
            })
        )));
    }

    #[test]
    fn reset_denied_before_start() {
        let mut game = super::super::testutil::game_with_seats(&[
            Some(("Alice", false)),
            Some(("Bob", false)),
            None,
            None,
        ]);
        assert_eq!(
            game.reset_request("Alice", ALL_VOTERS),
            Err(Deny::WrongPhase)
        );
    }

    #[test]
    fn watcher_cannot_request_reset() {
        let mut game = mixed_game();
        let _ = game.join("Watcher", false);
        assert_eq!(
            game.reset_request("Watcher", ALL_VOTERS),
            Err(Deny::NotSeated)
        );
    }

    #[test]
    fn placement_state_cleared_on_reset() {
        let mut game = mixed_game();
        to_play_phase(&mut game);
        game.seats[0].last_built = Some(PieceType::Road);
        let _ = game.reset_request("Alice", ALL_VOTERS).unwrap();
        assert!(game.seats[0].last_built.is_none());
        assert!(game.placement_order.is_empty());
    }
}
