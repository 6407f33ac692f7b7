//! Socket.IO over Engine.IO v4 text frames, and the chat/ticket event set
//! carried on top of them.
//!
//! Frame layout: one Engine.IO type digit, then for `4` (message) one
//! Socket.IO type digit, an optional `/namespace,`, an optional ack id and
//! an optional JSON body. Events are `42["name", payload]`.

use crate::error::{Error, Result};
use crate::models::{ChatMessageDto, ConversationKey, Message, TicketMessageDto};
use crate::typing::TypingSignal;
use serde::Deserialize;
use serde_json::{json, Value};

pub const PONG: &str = "3";
pub const CONNECT: &str = "40";
pub const DEFAULT_PING_INTERVAL: u64 = 25_000;
pub const DEFAULT_PING_TIMEOUT: u64 = 20_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Upgrade,
    Noop,
    Connect { sid: Option<String> },
    Disconnect,
    ConnectError(String),
    Event {
        name: String,
        data: Value,
        ack: Option<u64>,
    },
    Ack { id: u64, data: Value },
}

pub fn decode(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| Error::Protocol("empty frame".into()))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let handshake: Handshake = serde_json::from_str(rest)
                .map_err(|e| Error::Protocol(format!("bad open packet: {}", e)))?;
            Ok(Frame::Open(handshake))
        }
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping(rest.to_string())),
        '3' => Ok(Frame::Pong(rest.to_string())),
        '4' => decode_socket_packet(rest),
        '5' => Ok(Frame::Upgrade),
        '6' => Ok(Frame::Noop),
        other => Err(Error::Protocol(format!("unknown engine packet type {:?}", other))),
    }
}

fn decode_socket_packet(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| Error::Protocol("empty socket packet".into()))?;
    let mut rest = chars.as_str();

    // Namespace prefix, e.g. "/admin,".
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let ack = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let body = &rest[digits..];

    let json_body = || -> Result<Value> {
        if body.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(body)
                .map_err(|e| Error::Protocol(format!("bad packet body: {}", e)))
        }
    };

    match kind {
        '0' => {
            let data = json_body()?;
            Ok(Frame::Connect {
                sid: data["sid"].as_str().map(str::to_string),
            })
        }
        '1' => Ok(Frame::Disconnect),
        '2' => {
            let mut items = match json_body()? {
                Value::Array(items) => items.into_iter(),
                _ => return Err(Error::Protocol("event body is not an array".into())),
            };
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => return Err(Error::Protocol("event without a name".into())),
            };
            let data = items.next().unwrap_or(Value::Null);
            Ok(Frame::Event { name, data, ack })
        }
        '3' => {
            let id = ack.ok_or_else(|| Error::Protocol("ack without id".into()))?;
            Ok(Frame::Ack {
                id,
                data: json_body()?,
            })
        }
        '4' => {
            let data = json_body()?;
            let message = data["message"]
                .as_str()
                .map(str::to_string)
                .or_else(|| data.as_str().map(str::to_string))
                .unwrap_or_else(|| "connection refused".to_string());
            Ok(Frame::ConnectError(message))
        }
        other => Err(Error::Protocol(format!(
            "unsupported socket packet type {:?}",
            other
        ))),
    }
}

pub fn encode_event(name: &str, data: &Value) -> String {
    format!("42{}", json!([name, data]))
}

pub fn encode_pong(ping: &str) -> String {
    format!("{}{}", PONG, ping)
}

// ============================================================================
// Server -> client events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewMessage(ChatMessageDto),
    NewTicketMessage(TicketMessageDto),
    Typing(TypingNotice),
    StopTyping(TypingNotice),
    MessageDelivered { message_ids: Vec<String> },
    MessageSeen { message_ids: Vec<String> },
    Unknown(String),
}

impl ServerEvent {
    pub fn parse(name: &str, data: Value) -> Result<Self> {
        match name {
            "newMessage" | "receiveMessage" => {
                Ok(ServerEvent::NewMessage(serde_json::from_value(unwrap_message(data))?))
            }
            "newTicketMessage" => Ok(ServerEvent::NewTicketMessage(serde_json::from_value(
                unwrap_message(data),
            )?)),
            "typing" => Ok(ServerEvent::Typing(TypingNotice::parse(&data)?)),
            "stopTyping" => Ok(ServerEvent::StopTyping(TypingNotice::parse(&data)?)),
            "messageDelivered" => Ok(ServerEvent::MessageDelivered {
                message_ids: message_ids(&data)?,
            }),
            "messageSeen" => Ok(ServerEvent::MessageSeen {
                message_ids: message_ids(&data)?,
            }),
            other => Ok(ServerEvent::Unknown(other.to_string())),
        }
    }

    /// Converts a pushed message into the domain type.
    pub fn into_message(self) -> Option<Result<Message>> {
        match self {
            ServerEvent::NewMessage(dto) => Some(Message::try_from(dto)),
            ServerEvent::NewTicketMessage(dto) => Some(Message::try_from(dto)),
            _ => None,
        }
    }
}

fn unwrap_message(data: Value) -> Value {
    match data {
        Value::Object(mut map) if map.get("message").map(Value::is_object).unwrap_or(false) => {
            map.remove("message").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// A `typing`/`stopTyping` push: who is typing and, when the server says,
/// to whom or in which ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingNotice {
    pub from: String,
    pub receiver: Option<String>,
    pub ticket_id: Option<String>,
}

impl TypingNotice {
    pub fn new(from: &str) -> Self {
        Self {
            from: from.to_string(),
            receiver: None,
            ticket_id: None,
        }
    }

    fn parse(data: &Value) -> Result<Self> {
        if let Some(id) = data.as_str() {
            return Ok(Self::new(id));
        }
        let from = ["senderId", "userId", "sender"]
            .iter()
            .find_map(|key| data[*key].as_str())
            .ok_or_else(|| Error::Protocol("typing event without a sender".into()))?;

        Ok(Self {
            from: from.to_string(),
            receiver: data["receiverId"].as_str().map(str::to_string),
            ticket_id: data["ticketId"].as_str().map(str::to_string),
        })
    }

    /// Whether this notice is about `key` as seen by `me`. A missing target
    /// is trusted to the room the server delivered it in.
    pub fn concerns(&self, key: &ConversationKey, me: &str) -> bool {
        if self.from == me {
            return false;
        }
        match key {
            ConversationKey::Direct { .. } => {
                key.peer_of(me) == Some(self.from.as_str())
                    && self.receiver.as_deref().map_or(true, |to| to == me)
            }
            ConversationKey::Ticket { ticket_id } => {
                self.ticket_id.as_deref().map_or(true, |id| id == ticket_id)
            }
        }
    }
}

fn message_ids(data: &Value) -> Result<Vec<String>> {
    if let Some(id) = data.as_str() {
        return Ok(vec![id.to_string()]);
    }
    if let Some(ids) = data["messageIds"].as_array() {
        return Ok(ids
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect());
    }
    ["messageId", "_id", "id"]
        .iter()
        .find_map(|key| data[*key].as_str())
        .map(|id| vec![id.to_string()])
        .ok_or_else(|| Error::Protocol("receipt without a message id".into()))
}

// ============================================================================
// Client -> server events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub name: &'static str,
    pub payload: Value,
}

impl ClientEvent {
    /// Room join emitted after every (re)connect.
    pub fn join(key: &ConversationKey, me: &str) -> Self {
        match key {
            ConversationKey::Direct { .. } => Self {
                name: "joinRoom",
                payload: json!({
                    "senderId": me,
                    "receiverId": key.peer_of(me).unwrap_or_default(),
                }),
            },
            ConversationKey::Ticket { ticket_id } => Self {
                name: "joinTicketRoom",
                payload: json!({ "ticketId": ticket_id, "userId": me }),
            },
        }
    }

    /// Real-time fan-out of a message the server has already persisted.
    pub fn send_message(message: &Message, me: &str) -> Self {
        let created_at = message.created_at.to_rfc3339();
        match &message.conversation {
            key @ ConversationKey::Direct { .. } => Self {
                name: "sendMessage",
                payload: json!({
                    "_id": message.id,
                    "sender": message.sender,
                    "receiver": key.peer_of(me).unwrap_or_default(),
                    "content": message.content,
                    "createdAt": created_at,
                }),
            },
            ConversationKey::Ticket { ticket_id } => Self {
                name: "sendTicketMessage",
                payload: json!({
                    "_id": message.id,
                    "ticketId": ticket_id,
                    "senderId": message.sender,
                    "text": message.content,
                    "timestamp": created_at,
                }),
            },
        }
    }

    pub fn typing(key: &ConversationKey, me: &str, signal: TypingSignal) -> Self {
        let name = match signal {
            TypingSignal::Typing => "typing",
            TypingSignal::StopTyping => "stopTyping",
        };
        let payload = match key {
            ConversationKey::Direct { .. } => json!({
                "senderId": me,
                "receiverId": key.peer_of(me).unwrap_or_default(),
            }),
            ConversationKey::Ticket { ticket_id } => json!({
                "ticketId": ticket_id,
                "senderId": me,
            }),
        };
        Self { name, payload }
    }

    pub fn encode(&self) -> String {
        encode_event(self.name, &self.payload)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_engine_frames() {
        let open = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
        let open = decode(open).unwrap();
        match open {
            Frame::Open(h) => {
                assert_eq!(h.sid, "abc");
                assert_eq!(h.ping_interval, 25000);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(decode("2").unwrap(), Frame::Ping(String::new()));
        assert_eq!(decode("2hb").unwrap(), Frame::Ping("hb".into()));
        assert_eq!(decode("1").unwrap(), Frame::Close);
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
    }

    #[test]
    fn test_decode_socket_packets() {
        assert_eq!(
            decode(r#"40{"sid":"s1"}"#).unwrap(),
            Frame::Connect {
                sid: Some("s1".into())
            }
        );
        assert_eq!(decode("40").unwrap(), Frame::Connect { sid: None });
        assert_eq!(
            decode(r#"44{"message":"not authorized"}"#).unwrap(),
            Frame::ConnectError("not authorized".into())
        );

        match decode(r#"42["typing",{"senderId":"bob"}]"#).unwrap() {
            Frame::Event { name, data, ack } => {
                assert_eq!(name, "typing");
                assert_eq!(data["senderId"], "bob");
                assert_eq!(ack, None);
            }
            other => panic!("unexpected {:?}", other),
        }

        match decode(r#"42/chat,17["stopTyping","bob"]"#).unwrap() {
            Frame::Event { name, data, ack } => {
                assert_eq!(name, "stopTyping");
                assert_eq!(data, json!("bob"));
                assert_eq!(ack, Some(17));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(decode(r#"42{"not":"an array"}"#).is_err());
    }

    #[test]
    fn test_encode_event() {
        let frame = encode_event("joinRoom", &json!({"senderId": "a", "receiverId": "b"}));
        assert!(frame.starts_with("42[\"joinRoom\","));
        match decode(&frame).unwrap() {
            Frame::Event { name, data, .. } => {
                assert_eq!(name, "joinRoom");
                assert_eq!(data["receiverId"], "b");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(encode_pong("hb"), "3hb");
    }

    #[test]
    fn test_parse_server_events() {
        let event = ServerEvent::parse(
            "newMessage",
            json!({
                "message": {
                    "_id": "m1",
                    "sender": "alice",
                    "receiver": "bob",
                    "content": "hello",
                    "createdAt": "2024-03-01T10:00:00Z"
                }
            }),
        )
        .unwrap();
        let message = event.into_message().unwrap().unwrap();
        assert_eq!(message.content, "hello");

        assert_eq!(
            ServerEvent::parse("typing", json!({"userId": "bob"})).unwrap(),
            ServerEvent::Typing(TypingNotice::new("bob"))
        );
        assert_eq!(
            ServerEvent::parse("messageSeen", json!({"messageIds": ["m1", "m2"]})).unwrap(),
            ServerEvent::MessageSeen {
                message_ids: vec!["m1".into(), "m2".into()]
            }
        );
        assert_eq!(
            ServerEvent::parse("messageDelivered", json!("m3")).unwrap(),
            ServerEvent::MessageDelivered {
                message_ids: vec!["m3".into()]
            }
        );
        assert!(ServerEvent::parse("messageSeen", json!({})).is_err());
        assert_eq!(
            ServerEvent::parse("userOnline", Value::Null).unwrap(),
            ServerEvent::Unknown("userOnline".into())
        );
    }

    #[test]
    fn test_typing_notice_scope() {
        let direct = ConversationKey::direct("alice", "bob");
        let parse = |data: Value| match ServerEvent::parse("typing", data).unwrap() {
            ServerEvent::Typing(notice) => notice,
            other => panic!("unexpected event: {other:?}"),
        };

        let notice = parse(json!({"senderId": "bob", "receiverId": "alice"}));
        assert_eq!(notice.receiver.as_deref(), Some("alice"));
        assert!(notice.concerns(&direct, "alice"));
        assert!(parse(json!({"senderId": "bob"})).concerns(&direct, "alice"));
        let carol = parse(json!({"senderId": "carol", "receiverId": "alice"}));
        assert!(!carol.concerns(&direct, "alice"));
        let to_dave = parse(json!({"senderId": "bob", "receiverId": "dave"}));
        assert!(!to_dave.concerns(&direct, "alice"));
        assert!(!parse(json!({"senderId": "alice"})).concerns(&direct, "alice"));

        let ticket = ConversationKey::ticket("t1");
        assert!(parse(json!({"senderId": "hr1", "ticketId": "t1"})).concerns(&ticket, "alice"));
        assert!(parse(json!({"senderId": "hr1"})).concerns(&ticket, "alice"));
        assert!(!parse(json!({"senderId": "hr1", "ticketId": "t2"})).concerns(&ticket, "alice"));
    }

    #[test]
    fn test_client_event_payloads() {
        let direct = ConversationKey::direct("bob", "alice");
        let join = ClientEvent::join(&direct, "alice");
        assert_eq!(join.name, "joinRoom");
        assert_eq!(join.payload, json!({"senderId": "alice", "receiverId": "bob"}));

        let ticket = ConversationKey::ticket("t1");
        let join = ClientEvent::join(&ticket, "intern1");
        assert_eq!(join.name, "joinTicketRoom");
        assert_eq!(join.payload["ticketId"], "t1");

        let stop = ClientEvent::typing(&direct, "alice", TypingSignal::StopTyping);
        assert_eq!(stop.name, "stopTyping");
        assert_eq!(stop.payload["receiverId"], "bob");
    }
}
