//! Append-only message ledger owned by the coordinator.
//!
//! Order is append order; deletion removes a single entry without
//! reordering the rest. Nothing here persists across restarts.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use duet_shared::{Attachment, Message, Roster};

use crate::error::PayloadError;

#[derive(Debug)]
pub struct MessageLedger {
    roster: Roster,
    messages: Vec<Message>,
    max_attachment: usize,
}

impl MessageLedger {
    pub fn new(roster: Roster, max_attachment: usize) -> Self {
        Self {
            roster,
            messages: Vec::new(),
            max_attachment,
        }
    }

    /// Append a message, assigning its id and timestamp.
    ///
    /// Rejects senders outside the roster and attachments above the
    /// size ceiling (the client checks too; the core re-checks
    /// regardless).
    pub fn append(
        &mut self,
        sender: &str,
        text: Option<String>,
        attachment: Option<Attachment>,
        now: DateTime<Utc>,
    ) -> Result<Message, PayloadError> {
        let Some(sender) = self.roster.resolve(sender).cloned() else {
            return Err(PayloadError::InvalidSender(sender.to_string()));
        };
        if let Some(ref attachment) = attachment {
            if attachment.data.len() > self.max_attachment {
                return Err(PayloadError::AttachmentTooLarge {
                    size: attachment.data.len(),
                    max: self.max_attachment,
                });
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            sender,
            text,
            attachment,
            timestamp: now,
        };
        debug!(id = %message.id, sender = %message.sender, "Message appended");
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Remove a message by id. Idempotent: deleting an absent id is a
    /// no-op and reports `false`.
    pub fn delete(&mut self, id: Uuid) -> bool {
        let before = self.messages.len();
        self.messages.retain(|message| message.id != id);
        let removed = self.messages.len() != before;
        if removed {
            debug!(id = %id, "Message deleted");
        }
        removed
    }

    /// Ordered history, replayed to a client at login.
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }
}
