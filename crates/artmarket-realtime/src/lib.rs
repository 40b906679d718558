//! Artmarket Realtime - Room-Scoped Event Fan-Out
//!
//! This crate provides the realtime messaging layer: typed rooms, the tagged
//! wire protocol, and a broadcast hub that every WebSocket connection
//! subscribes to.
//!
//! # Protocol
//!
//! Clients send JSON messages to manage their room set:
//!
//! ```json
//! {"type": "join_room", "room": "auction_4f9c..."}
//! {"type": "typing_start", "conversation_id": "7ab1..."}
//! ```
//!
//! The server pushes tagged events:
//!
//! ```json
//! {"type": "new_bid", "item_id": "4f9c...", "amount": "150", ...}
//! ```
//!
//! # Delivery model
//!
//! One global broadcast channel carries every [`Envelope`]; each connection
//! filters on its joined room set. Publishing is fire-and-forget: events are
//! at-most-once, never persisted, and a lagging receiver drops events and
//! reconciles over REST. A write always commits to its store before the
//! matching event is published.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use artmarket_chat::{ChatMessage, Message, OfferStatus};
use artmarket_types::{ConversationId, ItemId, MessageId, UserId};

/// Default capacity of the broadcast channel
pub const DEFAULT_FANOUT_CAPACITY: usize = 1024;

/// Default maximum rooms one connection may join
pub const DEFAULT_MAX_ROOMS: usize = 50;

/// Realtime protocol errors
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Invalid room: {0}")]
    InvalidRoom(String),

    #[error("Room limit exceeded")]
    RoomLimitExceeded,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// ============================================================================
// Rooms
// ============================================================================

/// Delivery scope of an event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Personal room: user_{id}
    User(UserId),
    /// Conversation room: conversation_{id}
    Conversation(ConversationId),
    /// Auction room: auction_{item_id}
    Auction(ItemId),
}

impl Room {
    /// Parse a room string from a client join request
    pub fn parse(s: &str) -> RealtimeResult<Self> {
        let invalid = || RealtimeError::InvalidRoom(s.to_string());
        if let Some(rest) = s.strip_prefix("user_") {
            return UserId::parse(rest).map(Room::User).map_err(|_| invalid());
        }
        if let Some(rest) = s.strip_prefix("conversation_") {
            return ConversationId::parse(rest)
                .map(Room::Conversation)
                .map_err(|_| invalid());
        }
        if let Some(rest) = s.strip_prefix("auction_") {
            return ItemId::parse(rest).map(Room::Auction).map_err(|_| invalid());
        }
        Err(invalid())
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Room::User(id) => write!(f, "user_{}", id),
            Room::Conversation(id) => write!(f, "conversation_{}", id),
            Room::Auction(id) => write!(f, "auction_{}", id),
        }
    }
}

// ============================================================================
// Wire Protocol
// ============================================================================

/// Client message types
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    JoinRoom { room: String },
    /// Leave a room
    LeaveRoom { room: String },
    /// Start typing in a conversation
    TypingStart { conversation_id: ConversationId },
    /// Stop typing in a conversation
    TypingStop { conversation_id: ConversationId },
}

/// Server event types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A bid was admitted on an auction
    NewBid {
        item_id: ItemId,
        bidder_name: String,
        amount: Decimal,
        current_bid: Decimal,
        participant_count: usize,
    },
    /// A conversation message was sent
    NewMessage {
        conversation_id: ConversationId,
        message: Message,
    },
    /// An auction chat message was posted
    AuctionMessage {
        item_id: ItemId,
        message: ChatMessage,
    },
    /// A buyer joined an auction room
    UserJoined {
        item_id: ItemId,
        username: String,
    },
    /// An auction went live
    AuctionStarted {
        item_id: ItemId,
        title: String,
        starting_price: Decimal,
        end_time: DateTime<Utc>,
    },
    /// An auction closed
    AuctionEnded {
        item_id: ItemId,
        winner_name: Option<String>,
        final_bid: Decimal,
    },
    /// An inline offer changed status
    AuctionUpdate {
        conversation_id: ConversationId,
        message_id: MessageId,
        status: OfferStatus,
    },
    /// Typing indicator; never persisted
    UserTyping {
        conversation_id: ConversationId,
        user_id: UserId,
        username: String,
        typing: bool,
    },
    /// Error pushed to one client
    Error { code: String, message: String },
}

/// One published event with its delivery scope
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room: Room,
    pub event: ServerEvent,
}

// ============================================================================
// Fan-Out Hub
// ============================================================================

/// Global broadcast hub. Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct FanoutHub {
    tx: broadcast::Sender<Envelope>,
}

impl FanoutHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to a room. Fire-and-forget: a send with no active
    /// receivers is not an error.
    pub fn publish(&self, room: Room, event: ServerEvent) {
        let _ = self.tx.send(Envelope { room, event });
    }

    /// Subscribe a new connection to the full stream; the connection filters
    /// on its own room set.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Active receiver count, for diagnostics
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT_CAPACITY)
    }
}

// ============================================================================
// Connection Room Set
// ============================================================================

/// Per-connection joined rooms. Every connection auto-joins its personal
/// room at handshake time.
pub struct ConnectionRooms {
    rooms: HashSet<Room>,
    max: usize,
}

impl ConnectionRooms {
    /// New room set seeded with the user's personal room
    pub fn new(user: UserId, max: usize) -> Self {
        let mut rooms = HashSet::new();
        rooms.insert(Room::User(user));
        Self { rooms, max }
    }

    pub fn join(&mut self, room: Room) -> RealtimeResult<bool> {
        if self.rooms.len() >= self.max && !self.rooms.contains(&room) {
            return Err(RealtimeError::RoomLimitExceeded);
        }
        Ok(self.rooms.insert(room))
    }

    pub fn leave(&mut self, room: &Room) -> bool {
        self.rooms.remove(room)
    }

    /// Whether an envelope should be delivered to this connection
    pub fn wants(&self, envelope: &Envelope) -> bool {
        self.rooms.contains(&envelope.room)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_room_parse_round_trip() {
        for room in [
            Room::User(UserId::new()),
            Room::Conversation(ConversationId::new()),
            Room::Auction(ItemId::new()),
        ] {
            assert_eq!(Room::parse(&room.to_string()).unwrap(), room);
        }
    }

    #[test]
    fn test_room_parse_rejects_garbage() {
        assert!(Room::parse("lobby").is_err());
        assert!(Room::parse("auction_not-a-uuid").is_err());
        assert!(Room::parse("").is_err());
    }

    #[test]
    fn test_client_message_deserialize() {
        let json = r#"{"type": "join_room", "room": "auction_6f00a348-9f3e-4f5a-8c63-0c9d1a36e3b1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::JoinRoom { room } if room.starts_with("auction_")));
    }

    #[test]
    fn test_server_event_serialize_tag() {
        let event = ServerEvent::NewBid {
            item_id: ItemId::new(),
            bidder_name: "Ben".to_string(),
            amount: dec!(150),
            current_bid: dec!(150),
            participant_count: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"new_bid""#));
        assert!(json.contains(r#""bidder_name":"Ben""#));
    }

    #[test]
    fn test_connection_rooms_seeded_with_personal_room() {
        let user = UserId::new();
        let mut rooms = ConnectionRooms::new(user.clone(), 3);
        assert!(rooms.wants(&Envelope {
            room: Room::User(user),
            event: ServerEvent::Error {
                code: "X".to_string(),
                message: "x".to_string(),
            },
        }));

        let auction = Room::Auction(ItemId::new());
        assert!(rooms.join(auction.clone()).unwrap());
        // Joining again is a no-op, not an error
        assert!(!rooms.join(auction.clone()).unwrap());

        assert!(rooms.join(Room::Auction(ItemId::new())).unwrap());
        let err = rooms.join(Room::Auction(ItemId::new())).unwrap_err();
        assert!(matches!(err, RealtimeError::RoomLimitExceeded));

        assert!(rooms.leave(&auction));
        assert!(!rooms.leave(&auction));
    }

    #[tokio::test]
    async fn test_hub_delivers_to_subscribers() {
        let hub = FanoutHub::new(16);
        let mut rx = hub.subscribe();

        let item = ItemId::new();
        hub.publish(
            Room::Auction(item.clone()),
            ServerEvent::AuctionEnded {
                item_id: item.clone(),
                winner_name: Some("Ben".to_string()),
                final_bid: dec!(200),
            },
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.room, Room::Auction(item));
        assert!(matches!(envelope.event, ServerEvent::AuctionEnded { .. }));
    }

    #[tokio::test]
    async fn test_publish_without_receivers_is_silent() {
        let hub = FanoutHub::new(16);
        assert_eq!(hub.receiver_count(), 0);
        // Must not panic or error
        hub.publish(
            Room::User(UserId::new()),
            ServerEvent::Error {
                code: "NOOP".to_string(),
                message: "dropped".to_string(),
            },
        );
    }

    #[tokio::test]
    async fn test_room_filtering() {
        let hub = FanoutHub::new(16);
        let user = UserId::new();
        let rooms = ConnectionRooms::new(user.clone(), 10);
        let mut rx = hub.subscribe();

        hub.publish(
            Room::User(UserId::new()),
            ServerEvent::Error {
                code: "OTHER".to_string(),
                message: "not ours".to_string(),
            },
        );
        hub.publish(
            Room::User(user),
            ServerEvent::Error {
                code: "MINE".to_string(),
                message: "ours".to_string(),
            },
        );

        let first = rx.recv().await.unwrap();
        assert!(!rooms.wants(&first));
        let second = rx.recv().await.unwrap();
        assert!(rooms.wants(&second));
    }
}
