use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{CallKind, Identity};

/// A chat message as held in the ledger and replayed at login.
///
/// Immutable once created; the only mutation the system knows is
/// removal from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub sender: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub timestamp: DateTime<Utc>,
}

/// A file carried inside a message. Bytes travel base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Online/offline state of one identity, as broadcast in `user-status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerStatus {
    pub connected: bool,
}

/// Everything a client may send to the coordinator.
///
/// One JSON object per WebSocket text frame, tagged by event name.
/// Payload identities are raw strings here; the registry resolves
/// them to canonical [`Identity`] values before anything else runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Login {
        identity: String,
    },
    /// Advertise the transient address callers may use to reach us.
    PeerAddress {
        address: String,
    },
    Message {
        sender: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(
            default,
            with = "opt_base64_bytes",
            skip_serializing_if = "Option::is_none"
        )]
        attachment: Option<Vec<u8>>,
        #[serde(
            default,
            rename = "attachmentName",
            skip_serializing_if = "Option::is_none"
        )]
        attachment_name: Option<String>,
    },
    DeleteMessage {
        id: Uuid,
    },
    /// Start a call. `to` may be an identity name or a previously
    /// advertised peer address.
    CallUser {
        to: String,
        kind: CallKind,
        offer: Value,
    },
    AcceptCall {
        to: String,
    },
    RejectCall {
        to: String,
    },
    CallAnswer {
        to: String,
        answer: Value,
    },
    IceCandidate {
        to: String,
        candidate: Value,
    },
    EndCall {
        to: String,
    },
    ProfilePic {
        identity: String,
        image: String,
    },
}

/// Everything the coordinator may send to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    LoginSuccess {
        identity: Identity,
        messages: Vec<Message>,
        #[serde(
            default,
            rename = "profilePics",
            skip_serializing_if = "BTreeMap::is_empty"
        )]
        profile_pics: BTreeMap<Identity, String>,
    },
    LoginFailed {
        reason: String,
    },
    UserStatus(BTreeMap<Identity, PeerStatus>),
    Message(Message),
    /// Full-snapshot re-sync after a deletion, never a delta.
    MessagesUpdated(Vec<Message>),
    IncomingCall {
        /// Caller's advertised peer address, or its identity name if
        /// none was registered. Echoed back in `accept-call`.
        from: String,
        #[serde(rename = "fromIdentity")]
        from_identity: Identity,
        kind: CallKind,
        offer: Value,
    },
    CallAccepted,
    CallRejected,
    CallAnswered {
        answer: Value,
    },
    IceCandidate {
        candidate: Value,
    },
    CallEnded,
    CallFailed {
        reason: String,
    },
    ProfilePicUpdated {
        identity: Identity,
        image: String,
    },
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod opt_base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(data) => serializer.serialize_some(&STANDARD.encode(data)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_roundtrip() {
        let event = ClientEvent::CallUser {
            to: "Mon".to_string(),
            kind: CallKind::Video,
            offer: json!({"type": "offer", "sdp": "v=0"}),
        };
        let text = serde_json::to_string(&event).unwrap();
        let restored: ClientEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn test_event_tags_use_wire_names() {
        let accepted = serde_json::to_value(&ServerEvent::CallAccepted).unwrap();
        assert_eq!(accepted, json!({"event": "call-accepted"}));

        let login = serde_json::to_value(&ClientEvent::Login {
            identity: "Rav".to_string(),
        })
        .unwrap();
        assert_eq!(login, json!({"event": "login", "data": {"identity": "Rav"}}));

        let failed = serde_json::to_value(&ServerEvent::CallFailed {
            reason: "already negotiating".to_string(),
        })
        .unwrap();
        assert_eq!(
            failed,
            json!({"event": "call-failed", "data": {"reason": "already negotiating"}})
        );
    }

    #[test]
    fn test_message_event_attachment_is_base64() {
        let event = ClientEvent::Message {
            sender: "Rav".to_string(),
            text: None,
            attachment: Some(vec![1, 2, 3, 255]),
            attachment_name: Some("pic.png".to_string()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["attachment"], json!("AQID/w=="));
        assert_eq!(value["data"]["attachmentName"], json!("pic.png"));

        let restored: ClientEvent = serde_json::from_value(value).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn test_message_event_without_attachment_omits_fields() {
        let event = ClientEvent::Message {
            sender: "Mon".to_string(),
            text: Some("hi".to_string()),
            attachment: None,
            attachment_name: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"], json!({"sender": "Mon", "text": "hi"}));
    }

    #[test]
    fn test_user_status_payload_shape() {
        let mut status = BTreeMap::new();
        status.insert(Identity::new("Mon"), PeerStatus { connected: false });
        status.insert(Identity::new("Rav"), PeerStatus { connected: true });
        let value = serde_json::to_value(&ServerEvent::UserStatus(status)).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "user-status",
                "data": {
                    "Mon": {"connected": false},
                    "Rav": {"connected": true}
                }
            })
        );
    }

    #[test]
    fn test_stored_message_roundtrip() {
        let message = Message {
            id: Uuid::new_v4(),
            sender: Identity::new("Rav"),
            text: Some("see attached".to_string()),
            attachment: Some(Attachment {
                name: "notes.txt".to_string(),
                data: b"hello".to_vec(),
            }),
            timestamp: Utc::now(),
        };
        let text = serde_json::to_string(&message).unwrap();
        let restored: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(message, restored);
    }
}
