//! The single-session call signaling state machine.
//!
//! At most one [`CallSession`] exists system-wide. It is created by
//! `call-user`, walks `Ringing → Negotiating → Active`, and is
//! destroyed by end, reject, ring timeout, or either participant
//! disconnecting. Offers, answers, and ICE candidates are opaque
//! payloads; this module only decides who receives them and when.
//!
//! Sans-IO: every transition returns the `(recipient, event)` relays
//! it produced, and the ringing clock is driven from outside via
//! [`CallSignaling::next_deadline`] and [`CallSignaling::expire`].

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};

use duet_shared::{CallKind, Identity, ServerEvent};

use crate::error::CallError;

/// Signaling state of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Offer relayed, awaiting accept or reject.
    Ringing,
    /// Accepted; offer/answer/candidates are being exchanged.
    Negotiating,
    /// Answer applied; media flows peer-to-peer from here.
    Active,
}

#[derive(Debug)]
pub struct CallSession {
    pub initiator: Identity,
    pub responder: Identity,
    pub kind: CallKind,
    pub state: CallState,
    pub offer: Value,
    pub answer: Option<Value>,
    /// Candidates for the responder, buffered while it has not yet
    /// accepted (it has no peer handle before then).
    pending_candidates: Vec<Value>,
    ringing_deadline: DateTime<Utc>,
}

impl CallSession {
    fn participant(&self, identity: &Identity) -> bool {
        self.initiator == *identity || self.responder == *identity
    }

    fn other(&self, identity: &Identity) -> Identity {
        if self.initiator == *identity {
            self.responder.clone()
        } else {
            self.initiator.clone()
        }
    }
}

/// A relay the state machine wants delivered, addressed by identity.
pub type Relay = (Identity, ServerEvent);

#[derive(Debug)]
pub struct CallSignaling {
    session: Option<CallSession>,
    ring_timeout: Duration,
}

impl CallSignaling {
    pub fn new(ring_timeout: Duration) -> Self {
        Self {
            session: None,
            ring_timeout,
        }
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    /// Idle → Ringing. `from_label` is what the responder's
    /// `incoming-call.from` field carries (the caller's advertised
    /// peer address, or its name).
    ///
    /// A second `call-user` while any session exists — including the
    /// glare case where both sides dial at once — loses to the first
    /// arrival and fails with `already negotiating`.
    pub fn initiate(
        &mut self,
        from: Identity,
        from_label: String,
        to: Identity,
        kind: CallKind,
        offer: Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<Relay>, CallError> {
        if self.session.is_some() {
            return Err(CallError::AlreadyNegotiating);
        }

        info!(from = %from, to = %to, ?kind, "Call initiated, ringing");
        let incoming = ServerEvent::IncomingCall {
            from: from_label,
            from_identity: from.clone(),
            kind,
            offer: offer.clone(),
        };
        self.session = Some(CallSession {
            initiator: from,
            responder: to.clone(),
            kind,
            state: CallState::Ringing,
            offer,
            answer: None,
            pending_candidates: Vec::new(),
            ringing_deadline: now + self.ring_timeout,
        });
        Ok(vec![(to, incoming)])
    }

    /// Ringing → Negotiating. Only the responder may accept. Any
    /// candidates buffered during ringing are flushed to it, in order,
    /// right behind the `call-accepted` relay to the initiator.
    pub fn accept(&mut self, sender: &Identity) -> Result<Vec<Relay>, CallError> {
        let session = self.session_mut_for(sender)?;
        if session.responder != *sender || session.state != CallState::Ringing {
            return Err(CallError::WrongState);
        }

        session.state = CallState::Negotiating;
        info!(responder = %sender, "Call accepted, negotiating");

        let mut relays = vec![(session.initiator.clone(), ServerEvent::CallAccepted)];
        for candidate in session.pending_candidates.drain(..) {
            relays.push((sender.clone(), ServerEvent::IceCandidate { candidate }));
        }
        Ok(relays)
    }

    /// Ringing → Idle. Only the responder may reject; the initiator
    /// withdraws with `end-call` instead.
    pub fn reject(&mut self, sender: &Identity) -> Result<Vec<Relay>, CallError> {
        {
            let session = self.session_mut_for(sender)?;
            if session.responder != *sender || session.state != CallState::Ringing {
                return Err(CallError::WrongState);
            }
        }
        let Some(session) = self.session.take() else {
            return Err(CallError::NoSession);
        };
        info!(responder = %sender, "Call rejected");
        Ok(vec![(session.initiator, ServerEvent::CallRejected)])
    }

    /// Negotiating → Active. Only the responder carries the answer.
    pub fn answer(&mut self, sender: &Identity, answer: Value) -> Result<Vec<Relay>, CallError> {
        let session = self.session_mut_for(sender)?;
        if session.responder != *sender || session.state != CallState::Negotiating {
            return Err(CallError::WrongState);
        }

        session.state = CallState::Active;
        session.answer = Some(answer.clone());
        info!(responder = %sender, "Answer applied, call active");
        Ok(vec![(
            session.initiator.clone(),
            ServerEvent::CallAnswered { answer },
        )])
    }

    /// Relay an ICE candidate to the other participant, buffering
    /// toward a responder that has not yet accepted.
    pub fn candidate(
        &mut self,
        sender: &Identity,
        candidate: Value,
    ) -> Result<Vec<Relay>, CallError> {
        let session = self.session_mut_for(sender)?;
        let target = session.other(sender);

        if session.state == CallState::Ringing && target == session.responder {
            debug!(target = %target, "Buffering candidate until accept");
            session.pending_candidates.push(candidate);
            return Ok(Vec::new());
        }
        Ok(vec![(target, ServerEvent::IceCandidate { candidate })])
    }

    /// Any state → Idle, requested by either participant.
    pub fn end(&mut self, sender: &Identity) -> Result<Vec<Relay>, CallError> {
        {
            let _ = self.session_mut_for(sender)?;
        }
        let Some(session) = self.session.take() else {
            return Err(CallError::NoSession);
        };
        info!(by = %sender, "Call ended");
        Ok(vec![(session.other(sender), ServerEvent::CallEnded)])
    }

    /// Unconditional teardown when a participant disconnects. Returns
    /// the remaining party so the coordinator can notify it (if still
    /// connected); `None` if the identity was not in a session.
    pub fn disconnect(&mut self, identity: &Identity) -> Option<Identity> {
        match &self.session {
            Some(session) if session.participant(identity) => {
                let session = self.session.take()?;
                info!(identity = %identity, "Participant disconnected, call torn down");
                Some(session.other(identity))
            }
            _ => None,
        }
    }

    /// Deadline the caller must wake us at, while a call is ringing.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        match &self.session {
            Some(session) if session.state == CallState::Ringing => {
                Some(session.ringing_deadline)
            }
            _ => None,
        }
    }

    /// Tear down a call that rang past its deadline. The initiator
    /// learns why; the responder just stops ringing.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<Relay> {
        let expired = matches!(
            &self.session,
            Some(session)
                if session.state == CallState::Ringing && session.ringing_deadline <= now
        );
        if !expired {
            return Vec::new();
        }
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        info!(initiator = %session.initiator, "Ringing timed out, call torn down");
        vec![
            (
                session.initiator,
                ServerEvent::CallFailed {
                    reason: CallError::RingTimeout.to_string(),
                },
            ),
            (session.responder, ServerEvent::CallEnded),
        ]
    }

    /// Session access guarded on the sender actually participating.
    fn session_mut_for(&mut self, sender: &Identity) -> Result<&mut CallSession, CallError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CallError::NoSession);
        };
        if !session.participant(sender) {
            return Err(CallError::NotParticipant);
        }
        Ok(session)
    }
}
