// WAMP module
// Minimal WAMP v2 router (dealer role only) over WebSocket with JSON serialization

pub mod message;
pub mod router;
pub mod server;
pub mod session;

pub use message::Message;
pub use router::{RegistrationId, Router, SessionId};
pub use session::{Flow, Session, SessionState};

use regex::Regex;
use std::sync::OnceLock;

/// WebSocket subprotocol for JSON-serialized WAMP
pub const SUBPROTOCOL: &str = "wamp.2.json";

/// Loose URI check: dot separated, non-empty components without whitespace or `#`
pub fn is_valid_uri(uri: &str) -> bool {
    static LOOSE_URI: OnceLock<Option<Regex>> = OnceLock::new();
    LOOSE_URI
        .get_or_init(|| Regex::new(r"^([^\s.#]+\.)*([^\s.#]+)$").ok())
        .as_ref()
        .map(|re| re.is_match(uri))
        .unwrap_or(false)
}
