use thiserror::Error;

use duet_shared::Identity;

/// Login failures. `Display` strings are sent verbatim as the
/// `login-failed` reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username")]
    UnknownIdentity(String),

    #[error("User already logged in")]
    AlreadyConnected(Identity),

    #[error("Connection already logged in")]
    ConnectionInUse,
}

/// Call signaling failures. Surfaced as `call-failed` when the sender
/// is a participant of the current session (or is trying to start
/// one), silently dropped otherwise.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("unknown call target: {0}")]
    UnknownTarget(String),

    #[error("cannot call yourself")]
    SelfCall,

    #[error("{0} is not connected")]
    RecipientUnavailable(Identity),

    #[error("already negotiating")]
    AlreadyNegotiating,

    #[error("no active call")]
    NoSession,

    #[error("not a participant of the current call")]
    NotParticipant,

    #[error("call is not in a state that allows this")]
    WrongState,

    #[error("call timed out ringing")]
    RingTimeout,
}

impl CallError {
    /// Stale or foreign events are expected after a terminal
    /// transition and must not be surfaced back to the sender.
    pub fn is_silent(&self) -> bool {
        matches!(self, CallError::NoSession | CallError::NotParticipant)
    }
}

/// Boundary rejections of oversized or mis-attributed payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("profile image too large: {size} bytes (max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("invalid sender: {0}")]
    InvalidSender(String),
}
