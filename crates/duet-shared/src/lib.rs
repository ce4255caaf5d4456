// Wire protocol and identity types shared between the relay server and clients.

pub mod constants;
pub mod protocol;
pub mod types;

pub use protocol::{Attachment, ClientEvent, Message, PeerStatus, ServerEvent};
pub use types::{CallKind, Identity, Roster, RosterError};
