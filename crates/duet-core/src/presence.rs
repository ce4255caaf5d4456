//! Connection state for the two fixed identities.
//!
//! One record per identity, created when the registry is built and
//! never removed; login and disconnect only toggle it. The registry is
//! the single place that turns names, connection handles, and
//! advertised peer addresses back into canonical [`Identity`] values.

use std::collections::BTreeMap;

use tracing::{debug, info};

use duet_shared::{Identity, PeerStatus, Roster};

use crate::error::AuthError;

/// Opaque handle to a live transport connection, minted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live state of one identity.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    /// Set while the identity has a logged-in connection.
    pub conn: Option<ConnId>,
    /// Transient call-reachable address advertised post-login.
    pub peer_address: Option<String>,
    /// Latest profile picture, retained across reconnects for replay.
    pub profile_pic: Option<String>,
}

impl Presence {
    pub fn connected(&self) -> bool {
        self.conn.is_some()
    }
}

#[derive(Debug)]
pub struct PresenceRegistry {
    roster: Roster,
    records: BTreeMap<Identity, Presence>,
}

impl PresenceRegistry {
    pub fn new(roster: Roster) -> Self {
        let records = roster
            .identities()
            .iter()
            .cloned()
            .map(|id| (id, Presence::default()))
            .collect();
        Self { roster, records }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Bind a connection to an identity.
    ///
    /// Fails if the name is not in the roster, the identity is already
    /// connected elsewhere, or this connection already holds an
    /// identity.
    pub fn login(&mut self, name: &str, conn: ConnId) -> Result<Identity, AuthError> {
        let Some(identity) = self.roster.resolve(name).cloned() else {
            return Err(AuthError::UnknownIdentity(name.to_string()));
        };
        if self.identity_of(conn).is_some() {
            return Err(AuthError::ConnectionInUse);
        }
        let Some(record) = self.records.get_mut(&identity) else {
            return Err(AuthError::UnknownIdentity(name.to_string()));
        };
        if record.connected() {
            return Err(AuthError::AlreadyConnected(identity));
        }
        record.conn = Some(conn);
        info!(identity = %identity, conn = %conn, "Identity logged in");
        Ok(identity)
    }

    /// Record the address callers may use to reach this identity.
    pub fn set_peer_address(&mut self, identity: &Identity, address: String) {
        if let Some(record) = self.records.get_mut(identity) {
            debug!(identity = %identity, address = %address, "Registered peer address");
            record.peer_address = Some(address);
        }
    }

    pub fn set_profile_pic(&mut self, identity: &Identity, image: String) {
        if let Some(record) = self.records.get_mut(identity) {
            record.profile_pic = Some(image);
        }
    }

    /// Identity currently bound to this connection, if any.
    pub fn identity_of(&self, conn: ConnId) -> Option<Identity> {
        self.records
            .iter()
            .find(|(_, record)| record.conn == Some(conn))
            .map(|(identity, _)| identity.clone())
    }

    /// Drop the identity owning this connection (at most one), clearing
    /// its handle and peer address. Returns the identity that went
    /// offline, or `None` for connections that never logged in.
    pub fn disconnect(&mut self, conn: ConnId) -> Option<Identity> {
        let identity = self.identity_of(conn)?;
        if let Some(record) = self.records.get_mut(&identity) {
            record.conn = None;
            record.peer_address = None;
        }
        info!(identity = %identity, conn = %conn, "Identity disconnected");
        Some(identity)
    }

    pub fn resolve(&self, identity: &Identity) -> Option<&Presence> {
        self.records.get(identity)
    }

    /// Resolve either addressing scheme a client may use — identity
    /// name or advertised peer address — to the canonical identity.
    pub fn resolve_target(&self, target: &str) -> Option<Identity> {
        if let Some(identity) = self.roster.resolve(target) {
            return Some(identity.clone());
        }
        self.records
            .iter()
            .find(|(_, record)| record.peer_address.as_deref() == Some(target))
            .map(|(identity, _)| identity.clone())
    }

    pub fn conn_of(&self, identity: &Identity) -> Option<ConnId> {
        self.records.get(identity).and_then(|record| record.conn)
    }

    /// Full presence snapshot of both identities, for `user-status`.
    pub fn status_snapshot(&self) -> BTreeMap<Identity, PeerStatus> {
        self.records
            .iter()
            .map(|(identity, record)| {
                (
                    identity.clone(),
                    PeerStatus {
                        connected: record.connected(),
                    },
                )
            })
            .collect()
    }

    /// Latest profile pictures, replayed in `login-success`.
    pub fn profile_pics(&self) -> BTreeMap<Identity, String> {
        self.records
            .iter()
            .filter_map(|(identity, record)| {
                record
                    .profile_pic
                    .clone()
                    .map(|image| (identity.clone(), image))
            })
            .collect()
    }
}
