//! Single-entry dispatch tying presence, ledger, and signaling together.
//!
//! The coordinator owns all mutable state and consumes one inbound
//! event at a time to completion; the outbound events it returns are
//! ordered relative to the mutations that produced them. Callers (the
//! server's hub task, or a test) deliver them and keep no state of
//! their own beyond the connection map.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use duet_shared::{constants, Attachment, CallKind, ClientEvent, Identity, Roster, ServerEvent};

use crate::error::{CallError, PayloadError};
use crate::ledger::MessageLedger;
use crate::presence::{ConnId, PresenceRegistry};
use crate::signaling::{CallSignaling, Relay};

/// An outbound event with its delivery scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// To one connection handle.
    Direct { to: ConnId, event: ServerEvent },
    /// To every open connection, logged in or not.
    Broadcast { event: ServerEvent },
}

impl Outbound {
    fn direct(to: ConnId, event: ServerEvent) -> Self {
        Outbound::Direct { to, event }
    }

    fn broadcast(event: ServerEvent) -> Self {
        Outbound::Broadcast { event }
    }
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub roster: Roster,
    pub max_attachment_bytes: usize,
    pub max_profile_image_bytes: usize,
    pub ring_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            roster: Roster::default(),
            max_attachment_bytes: constants::MAX_ATTACHMENT_SIZE,
            max_profile_image_bytes: constants::MAX_PROFILE_IMAGE_SIZE,
            ring_timeout: Duration::seconds(constants::DEFAULT_RING_TIMEOUT_SECS as i64),
        }
    }
}

#[derive(Debug)]
pub struct Coordinator {
    registry: PresenceRegistry,
    ledger: MessageLedger,
    signaling: CallSignaling,
    max_profile_image: usize,
}

impl Coordinator {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            registry: PresenceRegistry::new(config.roster.clone()),
            ledger: MessageLedger::new(config.roster, config.max_attachment_bytes),
            signaling: CallSignaling::new(config.ring_timeout),
            max_profile_image: config.max_profile_image_bytes,
        }
    }

    /// Dispatch one inbound event to completion.
    pub fn handle_event(
        &mut self,
        conn: ConnId,
        event: ClientEvent,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        match event {
            ClientEvent::Login { identity } => self.on_login(conn, &identity),
            ClientEvent::PeerAddress { address } => self.on_peer_address(conn, address),
            ClientEvent::Message {
                sender,
                text,
                attachment,
                attachment_name,
            } => self.on_message(&sender, text, attachment, attachment_name, now),
            ClientEvent::DeleteMessage { id } => {
                if self.ledger.delete(id) {
                    vec![Outbound::broadcast(ServerEvent::MessagesUpdated(
                        self.ledger.snapshot().to_vec(),
                    ))]
                } else {
                    Vec::new()
                }
            }
            ClientEvent::CallUser { to, kind, offer } => {
                self.on_call_user(conn, &to, kind, offer, now)
            }
            ClientEvent::AcceptCall { .. } => {
                self.call_control(conn, |signaling, sender| signaling.accept(sender))
            }
            ClientEvent::RejectCall { .. } => {
                self.call_control(conn, |signaling, sender| signaling.reject(sender))
            }
            ClientEvent::CallAnswer { answer, .. } => {
                self.call_control(conn, |signaling, sender| signaling.answer(sender, answer))
            }
            ClientEvent::IceCandidate { candidate, .. } => self.call_control(conn, |signaling, sender| {
                signaling.candidate(sender, candidate)
            }),
            ClientEvent::EndCall { .. } => {
                self.call_control(conn, |signaling, sender| signaling.end(sender))
            }
            ClientEvent::ProfilePic { identity, image } => self.on_profile_pic(&identity, image),
        }
    }

    /// Transport-level close: revert presence and tear down any call
    /// the identity was part of. The only cancellation path.
    pub fn handle_disconnect(&mut self, conn: ConnId) -> Vec<Outbound> {
        let Some(identity) = self.registry.disconnect(conn) else {
            return Vec::new();
        };

        let mut out = vec![Outbound::broadcast(ServerEvent::UserStatus(
            self.registry.status_snapshot(),
        ))];
        if let Some(remaining) = self.signaling.disconnect(&identity) {
            if let Some(conn) = self.registry.conn_of(&remaining) {
                out.push(Outbound::direct(conn, ServerEvent::CallEnded));
            }
        }
        out
    }

    /// When the server must next call [`Coordinator::expire`].
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.signaling.next_deadline()
    }

    /// Tear down a call that rang past its deadline.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<Outbound> {
        let relays = self.signaling.expire(now);
        self.route(relays)
    }

    fn on_login(&mut self, conn: ConnId, name: &str) -> Vec<Outbound> {
        match self.registry.login(name, conn) {
            Ok(identity) => vec![
                Outbound::direct(
                    conn,
                    ServerEvent::LoginSuccess {
                        identity,
                        messages: self.ledger.snapshot().to_vec(),
                        profile_pics: self.registry.profile_pics(),
                    },
                ),
                Outbound::broadcast(ServerEvent::UserStatus(self.registry.status_snapshot())),
            ],
            Err(err) => {
                warn!(name, conn = %conn, error = %err, "Login rejected");
                vec![Outbound::direct(
                    conn,
                    ServerEvent::LoginFailed {
                        reason: err.to_string(),
                    },
                )]
            }
        }
    }

    fn on_peer_address(&mut self, conn: ConnId, address: String) -> Vec<Outbound> {
        let Some(identity) = self.registry.identity_of(conn) else {
            debug!(conn = %conn, "Peer address from unbound connection, dropped");
            return Vec::new();
        };
        self.registry.set_peer_address(&identity, address);
        vec![Outbound::broadcast(ServerEvent::UserStatus(
            self.registry.status_snapshot(),
        ))]
    }

    fn on_message(
        &mut self,
        sender: &str,
        text: Option<String>,
        attachment: Option<Vec<u8>>,
        attachment_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        let attachment = attachment.map(|data| Attachment {
            name: attachment_name.unwrap_or_else(|| "attachment".to_string()),
            data,
        });
        match self.ledger.append(sender, text, attachment, now) {
            Ok(message) => vec![Outbound::broadcast(ServerEvent::Message(message))],
            Err(err) => {
                warn!(sender, error = %err, "Message rejected");
                Vec::new()
            }
        }
    }

    fn on_call_user(
        &mut self,
        conn: ConnId,
        to: &str,
        kind: CallKind,
        offer: Value,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        let Some(sender) = self.registry.identity_of(conn) else {
            debug!(conn = %conn, "call-user from unbound connection, dropped");
            return Vec::new();
        };

        let result = self.resolve_callee(&sender, to).and_then(|callee| {
            let from_label = self
                .registry
                .resolve(&sender)
                .and_then(|record| record.peer_address.clone())
                .unwrap_or_else(|| sender.to_string());
            self.signaling
                .initiate(sender.clone(), from_label, callee, kind, offer, now)
        });

        match result {
            Ok(relays) => self.route(relays),
            Err(err) => self.call_failure(conn, &sender, err),
        }
    }

    fn resolve_callee(&self, sender: &Identity, target: &str) -> Result<Identity, CallError> {
        let Some(callee) = self.registry.resolve_target(target) else {
            return Err(CallError::UnknownTarget(target.to_string()));
        };
        if callee == *sender {
            return Err(CallError::SelfCall);
        }
        let connected = self
            .registry
            .resolve(&callee)
            .is_some_and(|record| record.connected());
        if !connected {
            return Err(CallError::RecipientUnavailable(callee));
        }
        Ok(callee)
    }

    /// Common shape of accept/reject/answer/candidate/end handling:
    /// the sender is whoever owns the connection, never the `to`
    /// field, and failures surface only to current participants.
    fn call_control<F>(&mut self, conn: ConnId, op: F) -> Vec<Outbound>
    where
        F: FnOnce(&mut CallSignaling, &Identity) -> Result<Vec<Relay>, CallError>,
    {
        let Some(sender) = self.registry.identity_of(conn) else {
            debug!(conn = %conn, "Call event from unbound connection, dropped");
            return Vec::new();
        };
        match op(&mut self.signaling, &sender) {
            Ok(relays) => self.route(relays),
            Err(err) => self.call_failure(conn, &sender, err),
        }
    }

    fn call_failure(&self, conn: ConnId, sender: &Identity, err: CallError) -> Vec<Outbound> {
        if err.is_silent() {
            debug!(sender = %sender, error = %err, "Stale call event dropped");
            return Vec::new();
        }
        warn!(sender = %sender, error = %err, "Call event failed");
        vec![Outbound::direct(
            conn,
            ServerEvent::CallFailed {
                reason: err.to_string(),
            },
        )]
    }

    fn on_profile_pic(&mut self, name: &str, image: String) -> Vec<Outbound> {
        let Some(identity) = self.registry.roster().resolve(name).cloned() else {
            let err = PayloadError::InvalidSender(name.to_string());
            warn!(name, error = %err, "Profile picture rejected");
            return Vec::new();
        };
        if image.len() > self.max_profile_image {
            let err = PayloadError::ImageTooLarge {
                size: image.len(),
                max: self.max_profile_image,
            };
            warn!(identity = %identity, error = %err, "Profile picture rejected");
            return Vec::new();
        }
        self.registry.set_profile_pic(&identity, image.clone());
        vec![Outbound::broadcast(ServerEvent::ProfilePicUpdated {
            identity,
            image,
        })]
    }

    /// Map identity-addressed relays to connection handles, dropping
    /// any party that is no longer connected.
    fn route(&self, relays: Vec<Relay>) -> Vec<Outbound> {
        relays
            .into_iter()
            .filter_map(|(identity, event)| match self.registry.conn_of(&identity) {
                Some(conn) => Some(Outbound::direct(conn, event)),
                None => {
                    debug!(identity = %identity, "Relay target offline, dropped");
                    None
                }
            })
            .collect()
    }
}
