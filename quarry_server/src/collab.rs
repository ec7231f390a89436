// External collaborator interfaces.
//
// Persistence, authentication, and board-layout generation are not part of
// the coordination core; they are invoked synchronously through these narrow
// traits. Failure policy: a collaborator error never interrupts gameplay —
// it is logged and swallowed — except authentication, whose failure blocks
// the handshake and is surfaced to the connecting client.
//
// Default implementations (`NullEventSink`, `OpenAuthenticator`,
// `FlatBoard`) make the server fully functional standalone; deployments
// plug in real databases and account stores through `Collaborators`.

use quarry_protocol::types::{PieceType, ResourceSet, SeatIndex};
use thiserror::Error;

/// A recoverable collaborator failure. Carries only a message; the caller
/// decides whether it blocks progress (auth) or is logged and ignored
/// (persistence, board source).
#[derive(Debug, Error)]
#[error("collaborator failure: {0}")]
pub struct CollabError(pub String);

/// Receives gameplay events for persistence.
pub trait EventSink: Send + Sync {
    fn trade_event(
        &self,
        game: &str,
        offering: SeatIndex,
        accepting: SeatIndex,
        give: &ResourceSet,
        get: &ResourceSet,
    ) -> Result<(), CollabError>;

    fn build_event(&self, game: &str, seat: SeatIndex, piece: PieceType)
    -> Result<(), CollabError>;
}

/// Validates a name/password pair at handshake time.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, name: &str, password: &str) -> Result<bool, CollabError>;
}

/// Produces board layouts. The payload is opaque to the server and relayed
/// verbatim to clients in `GameStarted`.
pub trait BoardSource: Send + Sync {
    fn load_layout(&self, game: &str) -> Result<String, CollabError>;
}

/// The full collaborator bundle handed to `start_server`.
pub struct Collaborators {
    pub events: Box<dyn EventSink>,
    pub auth: Box<dyn Authenticator>,
    pub board: Box<dyn BoardSource>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            events: Box::new(NullEventSink),
            auth: Box::new(OpenAuthenticator),
            board: Box::new(FlatBoard),
        }
    }
}

/// Discards all events.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn trade_event(
        &self,
        _game: &str,
        _offering: SeatIndex,
        _accepting: SeatIndex,
        _give: &ResourceSet,
        _get: &ResourceSet,
    ) -> Result<(), CollabError> {
        Ok(())
    }

    fn build_event(
        &self,
        _game: &str,
        _seat: SeatIndex,
        _piece: PieceType,
    ) -> Result<(), CollabError> {
        Ok(())
    }
}

/// Accepts any name/password pair.
pub struct OpenAuthenticator;

impl Authenticator for OpenAuthenticator {
    fn authenticate(&self, _name: &str, _password: &str) -> Result<bool, CollabError> {
        Ok(true)
    }
}

/// Serves a single fixed layout.
pub struct FlatBoard;

impl BoardSource for FlatBoard {
    fn load_layout(&self, _game: &str) -> Result<String, CollabError> {
        Ok(r#"{"layout":"standard"}"#.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let collab = Collaborators::default();
        assert!(collab.auth.authenticate("Alice", "pw").unwrap());
        assert!(collab.board.load_layout("harbor").unwrap().contains("layout"));
        collab
            .events
            .build_event("harbor", SeatIndex(0), PieceType::Road)
            .unwrap();
    }
}
