// Core value types for the game protocol.
//
// These are lightweight types used by both `message.rs` (protocol messages)
// and the server's game state (`quarry_server::game`). Seat numbers are
// compact indices into a game's fixed seat array, not account identifiers —
// the server maps connection names to seats per game.

use serde::{Deserialize, Serialize};

/// Number of seats in every game.
pub const MAX_SEATS: usize = 4;

/// Index of one of a game's fixed seats (0..MAX_SEATS).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatIndex(pub u8);

impl SeatIndex {
    /// The seat number as a usize, for indexing seat arrays.
    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    /// True if this is a valid seat number.
    pub const fn in_range(self) -> bool {
        (self.0 as usize) < MAX_SEATS
    }
}

/// A bundle of resource-card counts. Used for hands, trade give/get sets,
/// and discards. Arithmetic never wraps: `checked_sub` refuses to go
/// negative, which is how trade legality is enforced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    pub brick: u8,
    pub wood: u8,
    pub ore: u8,
    pub grain: u8,
    pub wool: u8,
}

impl ResourceSet {
    pub const EMPTY: ResourceSet = ResourceSet {
        brick: 0,
        wood: 0,
        ore: 0,
        grain: 0,
        wool: 0,
    };

    pub fn new(brick: u8, wood: u8, ore: u8, grain: u8, wool: u8) -> Self {
        Self {
            brick,
            wood,
            ore,
            grain,
            wool,
        }
    }

    /// Total number of cards in the set.
    pub fn total(&self) -> u32 {
        u32::from(self.brick)
            + u32::from(self.wood)
            + u32::from(self.ore)
            + u32::from(self.grain)
            + u32::from(self.wool)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// True if every count in `other` is covered by this set.
    pub fn contains(&self, other: &ResourceSet) -> bool {
        self.brick >= other.brick
            && self.wood >= other.wood
            && self.ore >= other.ore
            && self.grain >= other.grain
            && self.wool >= other.wool
    }

    /// Add `other` into this set. Saturates rather than wrapping; hands in a
    /// real game never approach u8::MAX.
    pub fn add(&mut self, other: &ResourceSet) {
        self.brick = self.brick.saturating_add(other.brick);
        self.wood = self.wood.saturating_add(other.wood);
        self.ore = self.ore.saturating_add(other.ore);
        self.grain = self.grain.saturating_add(other.grain);
        self.wool = self.wool.saturating_add(other.wool);
    }

    /// Subtract `other` from this set, or return `None` if any count would
    /// go negative.
    #[must_use]
    pub fn checked_sub(&self, other: &ResourceSet) -> Option<ResourceSet> {
        Some(ResourceSet {
            brick: self.brick.checked_sub(other.brick)?,
            wood: self.wood.checked_sub(other.wood)?,
            ore: self.ore.checked_sub(other.ore)?,
            grain: self.grain.checked_sub(other.grain)?,
            wool: self.wool.checked_sub(other.wool)?,
        })
    }
}

/// Buildable piece kinds. Placement legality on the board itself is the
/// board collaborator's concern; the server only tracks costs and points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PieceType {
    Road,
    Settlement,
    City,
}

/// A proposed resource exchange: the offering seat gives `give` and wants
/// `get`, addressed to the seats whose bit is set in `to`.
///
/// Offers are immutable once made — a new offer from the same seat
/// supersedes the old one rather than mutating it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    pub from: SeatIndex,
    pub to: [bool; MAX_SEATS],
    pub give: ResourceSet,
    pub get: ResourceSet,
}

/// One seat's stance toward an outstanding offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseKind {
    Accept,
    Reject,
    /// The seat declines to engage (distinct from reject: it never counters).
    NoResponse,
    /// Fabricated by the stall supervisor on behalf of an unresponsive seat.
    Forced,
}

/// Turn/phase of a game's state machine. `Over` is terminal; a game leaves
/// it only by being destroyed (or reconstructed by a unanimous board reset).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Created, seats filling, not yet asked to start.
    New,
    /// Start requested; waiting for recruited robots to sit down.
    Ready,
    /// Initial placement, first round: settlement.
    Placement1A,
    /// Initial placement, first round: road.
    Placement1B,
    /// Initial placement, second round (reverse order): settlement.
    Placement2A,
    /// Initial placement, second round: road.
    Placement2B,
    /// Current player must roll.
    Roll,
    /// A 7 was rolled; flagged seats must discard.
    DiscardWait,
    /// Current player must move the robber.
    Robber,
    /// Main phase: trade, build, play development cards, end turn.
    Play,
    /// Six-player-variant build window for a non-current seat.
    SpecialBuild,
    Over,
}

impl Phase {
    /// True for the initial-placement sub-phases.
    pub fn is_placement(self) -> bool {
        matches!(
            self,
            Phase::Placement1A | Phase::Placement1B | Phase::Placement2A | Phase::Placement2B
        )
    }

    /// True once the game has started and not yet ended.
    pub fn is_active(self) -> bool {
        !matches!(self, Phase::New | Phase::Ready | Phase::Over)
    }
}

/// Public snapshot of one seat, sent in game-join snapshots and listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatInfo {
    pub occupant: Option<String>,
    pub is_robot: bool,
    pub locked: bool,
}

/// Summary of one game for the lobby listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub name: String,
    pub seats_taken: u8,
    pub phase: Phase,
}
