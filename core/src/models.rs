//! Data models for the IISPPR console

use crate::delivery::DeliveryState;
use crate::error::{Error, Result};
use crate::ticket::TicketStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Conversation
// ============================================================================

/// Identifies a conversation room. Direct keys store the two participants in
/// sorted order so both sides derive the same room id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKey {
    Direct { a: String, b: String },
    Ticket { ticket_id: String },
}

impl ConversationKey {
    pub fn direct(me: &str, peer: &str) -> Self {
        let (a, b) = if me <= peer { (me, peer) } else { (peer, me) };
        Self::Direct {
            a: a.to_string(),
            b: b.to_string(),
        }
    }

    pub fn ticket(ticket_id: &str) -> Self {
        Self::Ticket {
            ticket_id: ticket_id.to_string(),
        }
    }

    pub fn room_id(&self) -> String {
        match self {
            Self::Direct { a, b } => format!("{}_{}", a, b),
            Self::Ticket { ticket_id } => ticket_id.clone(),
        }
    }

    /// The other participant of a direct conversation.
    pub fn peer_of(&self, me: &str) -> Option<&str> {
        match self {
            Self::Direct { a, b } if a == me => Some(b),
            Self::Direct { a, b } if b == me => Some(a),
            _ => None,
        }
    }

    pub fn is_ticket(&self) -> bool {
        matches!(self, Self::Ticket { .. })
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { .. } => write!(f, "chat:{}", self.room_id()),
            Self::Ticket { ticket_id } => write!(f, "ticket:{}", ticket_id),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id; `None` until the send is confirmed.
    pub id: Option<String>,
    pub conversation: ConversationKey,
    pub sender: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub delivery: DeliveryState,
}

impl Message {
    pub fn optimistic(
        conversation: ConversationKey,
        sender: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            conversation,
            sender: sender.to_string(),
            content: content.to_string(),
            created_at,
            delivery: DeliveryState::Sent,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }

    pub fn delivered(&self) -> bool {
        self.delivery.is_delivered()
    }

    pub fn seen(&self) -> bool {
        self.delivery.is_seen()
    }
}

/// A user reference as the backend sends it: either a bare id or a
/// populated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    Populated {
        #[serde(rename = "_id", alias = "id")]
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Populated { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageDto {
    #[serde(rename = "_id", alias = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender: UserRef,
    pub receiver: UserRef,
    #[serde(default)]
    pub content: String,
    #[serde(alias = "timestamp", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub seen: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMessageDto {
    #[serde(rename = "_id", alias = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub ticket_id: String,
    #[serde(alias = "sender")]
    pub sender_id: UserRef,
    #[serde(alias = "content", default)]
    pub text: String,
    #[serde(alias = "createdAt", default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub seen: bool,
}

fn validate(id: &Option<String>, sender: &str, content: &str) -> Result<()> {
    if id.as_deref().map(str::is_empty).unwrap_or(false) {
        return Err(Error::InvalidResponse("message has an empty id".into()));
    }
    if sender.is_empty() {
        return Err(Error::InvalidResponse("message has no sender".into()));
    }
    if content.trim().is_empty() {
        return Err(Error::InvalidResponse("message has no content".into()));
    }
    Ok(())
}

impl TryFrom<ChatMessageDto> for Message {
    type Error = Error;

    fn try_from(dto: ChatMessageDto) -> Result<Self> {
        validate(&dto.id, dto.sender.id(), &dto.content)?;
        let created_at = dto
            .created_at
            .ok_or_else(|| Error::InvalidResponse("message has no createdAt".into()))?;

        Ok(Message {
            conversation: ConversationKey::direct(dto.sender.id(), dto.receiver.id()),
            sender: dto.sender.id().to_string(),
            id: dto.id,
            content: dto.content,
            created_at,
            delivery: DeliveryState::from_flags(dto.delivered, dto.seen),
        })
    }
}

impl TryFrom<TicketMessageDto> for Message {
    type Error = Error;

    fn try_from(dto: TicketMessageDto) -> Result<Self> {
        validate(&dto.id, dto.sender_id.id(), &dto.text)?;
        if dto.ticket_id.is_empty() {
            return Err(Error::InvalidResponse("ticket message has no ticketId".into()));
        }
        let created_at = dto
            .timestamp
            .ok_or_else(|| Error::InvalidResponse("ticket message has no timestamp".into()))?;

        Ok(Message {
            conversation: ConversationKey::ticket(&dto.ticket_id),
            sender: dto.sender_id.id().to_string(),
            id: dto.id,
            content: dto.text,
            created_at,
            delivery: DeliveryState::from_flags(dto.delivered, dto.seen),
        })
    }
}

// ============================================================================
// Tickets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TicketStatus,
    pub raised_by: UserRef,
    #[serde(default)]
    pub assigned_to: Option<UserRef>,
}

impl Ticket {
    pub fn raised_by_id(&self) -> &str {
        self.raised_by.id()
    }

    pub fn assignee_id(&self) -> Option<&str> {
        self.assigned_to.as_ref().map(UserRef::id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_key_is_order_independent() {
        let k1 = ConversationKey::direct("bob", "alice");
        let k2 = ConversationKey::direct("alice", "bob");
        assert_eq!(k1, k2);
        assert_eq!(k1.room_id(), "alice_bob");
        assert_eq!(k1.peer_of("alice"), Some("bob"));
        assert_eq!(k1.peer_of("bob"), Some("alice"));
        assert_eq!(k1.peer_of("carol"), None);
        assert_eq!(ConversationKey::ticket("t1").room_id(), "t1");
    }

    #[test]
    fn test_chat_dto_with_populated_sender() {
        let dto: ChatMessageDto = serde_json::from_value(json!({
            "_id": "m1",
            "sender": { "_id": "alice", "name": "Alice" },
            "receiver": "bob",
            "content": "hello",
            "createdAt": "2024-03-01T10:00:00.000Z",
            "delivered": true
        }))
        .unwrap();

        let msg = Message::try_from(dto).unwrap();
        assert_eq!(msg.id.as_deref(), Some("m1"));
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.conversation, ConversationKey::direct("alice", "bob"));
        assert_eq!(msg.delivery, DeliveryState::Delivered);
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        let no_content: ChatMessageDto = serde_json::from_value(json!({
            "_id": "m2",
            "sender": "alice",
            "receiver": "bob",
            "content": "   ",
            "createdAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert!(matches!(
            Message::try_from(no_content),
            Err(Error::InvalidResponse(_))
        ));

        let no_time: ChatMessageDto = serde_json::from_value(json!({
            "_id": "m3",
            "sender": "alice",
            "receiver": "bob",
            "content": "hi"
        }))
        .unwrap();
        assert!(matches!(Message::try_from(no_time), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn test_ticket_dto_accepts_aliases() {
        let dto: TicketMessageDto = serde_json::from_value(json!({
            "_id": "tm1",
            "ticketId": "t9",
            "sender": "hr1",
            "content": "looking into it",
            "createdAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        let msg = Message::try_from(dto).unwrap();
        assert_eq!(msg.conversation, ConversationKey::ticket("t9"));
        assert_eq!(msg.sender, "hr1");
        assert_eq!(msg.content, "looking into it");
    }

    #[test]
    fn test_ticket_parses_status_strings() {
        let ticket: Ticket = serde_json::from_value(json!({
            "_id": "t1",
            "title": "Laptop",
            "status": "Pending Confirmation",
            "raisedBy": { "_id": "intern1", "name": "Ira" },
            "assignedTo": "hr1"
        }))
        .unwrap();
        assert_eq!(ticket.status, TicketStatus::PendingConfirmation);
        assert_eq!(ticket.raised_by_id(), "intern1");
        assert_eq!(ticket.assignee_id(), Some("hr1"));
    }
}
