// Coordinator core for the two-party relay: presence, message ledger,
// and call signaling, driven one event at a time with no IO of its own.

pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod presence;
pub mod signaling;

pub use coordinator::{Coordinator, CoreConfig, Outbound};
pub use error::{AuthError, CallError, PayloadError};
pub use ledger::MessageLedger;
pub use presence::{ConnId, Presence, PresenceRegistry};
pub use signaling::{CallSession, CallSignaling, CallState};
