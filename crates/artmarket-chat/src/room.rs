//! Per-auction chat rooms.
//!
//! Each auctioned item owns at most one room. The room keeps a participant
//! roster (join is an idempotent upsert) and an append-only message log where
//! human messages and lifecycle markers (`bid_placed`, `auction_started`,
//! `auction_ended`, `system`) share one tagged shape.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use artmarket_types::{ChatRoomId, ItemId, MarketError, MarketResult, Role, UserId};

/// Hard cap on auction chat message length
pub const MAX_CHAT_MESSAGE_LEN: usize = 500;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageType {
    Text,
    BidPlaced,
    AuctionStarted,
    AuctionEnded,
    System,
}

/// One entry of the room's append-only log. Lifecycle markers carry no
/// sender id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_id: Option<UserId>,
    pub sender_name: String,
    pub content: String,
    pub message_type: ChatMessageType,
    pub bid_amount: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn system(content: impl Into<String>, message_type: ChatMessageType) -> Self {
        Self {
            sender_id: None,
            sender_name: "system".to_string(),
            content: content.into(),
            message_type,
            bid_amount: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Chat room bound to one auctioned item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionChat {
    pub id: ChatRoomId,
    pub item_id: ItemId,
    pub artist_id: UserId,
    pub participants: Vec<Participant>,
    pub messages: Vec<ChatMessage>,
    pub is_active: bool,
    pub last_activity: DateTime<Utc>,
}

impl AuctionChat {
    fn active_participant(&self, user: &UserId) -> bool {
        self.participants
            .iter()
            .any(|p| &p.user_id == user && p.is_active)
    }
}

// ============================================================================
// Store
// ============================================================================

/// In-memory auction chat rooms, one per item
#[derive(Default)]
pub struct AuctionChatStore {
    rooms: DashMap<ItemId, AuctionChat>,
}

impl AuctionChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the room for a freshly started auction, seeding the artist as
    /// the first participant and an `auction_started` marker. One room per
    /// item; a leftover room from an earlier auction is replaced.
    pub fn create(
        &self,
        item: &ItemId,
        artist: &UserId,
        artist_name: &str,
        starting_price: Decimal,
    ) -> ChatRoomId {
        let now = Utc::now();
        let room = AuctionChat {
            id: ChatRoomId::new(),
            item_id: item.clone(),
            artist_id: artist.clone(),
            participants: vec![Participant {
                user_id: artist.clone(),
                username: artist_name.to_string(),
                role: Role::Artist,
                joined_at: now,
                is_active: true,
            }],
            messages: vec![ChatMessage::system(
                format!("Auction started at {}", starting_price),
                ChatMessageType::AuctionStarted,
            )],
            is_active: true,
            last_activity: now,
        };
        let id = room.id.clone();
        self.rooms.insert(item.clone(), room);
        info!(item = %item, room = %id, "auction chat created");
        id
    }

    pub fn get(&self, item: &ItemId) -> MarketResult<AuctionChat> {
        self.rooms
            .get(item)
            .map(|e| e.value().clone())
            .ok_or_else(|| MarketError::not_found("Auction chat"))
    }

    /// Room id without cloning the whole log
    pub fn room_id(&self, item: &ItemId) -> Option<ChatRoomId> {
        self.rooms.get(item).map(|e| e.value().id.clone())
    }

    /// Idempotent participant upsert. Re-joining refreshes `joined_at` and
    /// reactivates the entry; a first join also appends a system marker.
    pub fn join(&self, item: &ItemId, user: &UserId, username: &str, role: Role) -> MarketResult<ChatRoomId> {
        let mut entry = self
            .rooms
            .get_mut(item)
            .ok_or_else(|| MarketError::not_found("Auction chat"))?;
        let room = entry.value_mut();
        if !room.is_active {
            return Err(MarketError::conflict("Auction chat is closed"));
        }

        let now = Utc::now();
        match room.participants.iter_mut().find(|p| &p.user_id == user) {
            Some(existing) => {
                existing.is_active = true;
                existing.joined_at = now;
            }
            None => {
                room.participants.push(Participant {
                    user_id: user.clone(),
                    username: username.to_string(),
                    role,
                    joined_at: now,
                    is_active: true,
                });
                room.messages.push(ChatMessage::system(
                    format!("{} joined the auction", username),
                    ChatMessageType::System,
                ));
            }
        }
        room.last_activity = now;
        Ok(room.id.clone())
    }

    /// Append a human message; active participants only
    pub fn post(
        &self,
        item: &ItemId,
        sender: &UserId,
        sender_name: &str,
        content: &str,
    ) -> MarketResult<ChatMessage> {
        let content = content.trim();
        if content.is_empty() || content.len() > MAX_CHAT_MESSAGE_LEN {
            return Err(MarketError::validation(format!(
                "Message must be between 1 and {} characters",
                MAX_CHAT_MESSAGE_LEN
            )));
        }

        let mut entry = self
            .rooms
            .get_mut(item)
            .ok_or_else(|| MarketError::not_found("Auction chat"))?;
        let room = entry.value_mut();
        if !room.is_active {
            return Err(MarketError::conflict("Auction chat is closed"));
        }
        if !room.active_participant(sender) {
            return Err(MarketError::forbidden(
                "Join the auction before sending messages",
            ));
        }

        let message = ChatMessage {
            sender_id: Some(sender.clone()),
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            message_type: ChatMessageType::Text,
            bid_amount: None,
            timestamp: Utc::now(),
        };
        room.messages.push(message.clone());
        room.last_activity = message.timestamp;
        Ok(message)
    }

    /// Append the `bid_placed` marker for an admitted bid
    pub fn record_bid(
        &self,
        item: &ItemId,
        bidder: &UserId,
        bidder_name: &str,
        amount: Decimal,
    ) -> MarketResult<()> {
        let mut entry = self
            .rooms
            .get_mut(item)
            .ok_or_else(|| MarketError::not_found("Auction chat"))?;
        let room = entry.value_mut();
        let message = ChatMessage {
            sender_id: Some(bidder.clone()),
            sender_name: bidder_name.to_string(),
            content: format!("{} bid {}", bidder_name, amount),
            message_type: ChatMessageType::BidPlaced,
            bid_amount: Some(amount),
            timestamp: Utc::now(),
        };
        room.last_activity = message.timestamp;
        room.messages.push(message);
        Ok(())
    }

    /// Close the room with an `auction_ended` summary marker
    pub fn close(&self, item: &ItemId, summary: &str) -> MarketResult<()> {
        let mut entry = self
            .rooms
            .get_mut(item)
            .ok_or_else(|| MarketError::not_found("Auction chat"))?;
        let room = entry.value_mut();
        room.messages.push(ChatMessage::system(
            summary.to_string(),
            ChatMessageType::AuctionEnded,
        ));
        room.is_active = false;
        room.last_activity = Utc::now();
        Ok(())
    }

    /// The newest `limit` messages in chronological order. Insertion order is
    /// preserved under timestamp ties.
    pub fn recent_messages(&self, item: &ItemId, limit: usize) -> MarketResult<Vec<ChatMessage>> {
        let room = self
            .rooms
            .get(item)
            .ok_or_else(|| MarketError::not_found("Auction chat"))?;
        let log = &room.value().messages;
        let start = log.len().saturating_sub(limit.max(1));
        Ok(log[start..].to_vec())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn room(store: &AuctionChatStore) -> (ItemId, UserId) {
        let item = ItemId::new();
        let artist = UserId::new();
        store.create(&item, &artist, "Vera", dec!(100));
        (item, artist)
    }

    #[test]
    fn test_create_seeds_artist_and_start_marker() {
        let store = AuctionChatStore::new();
        let (item, artist) = room(&store);

        let chat = store.get(&item).unwrap();
        assert!(chat.is_active);
        assert_eq!(chat.participants.len(), 1);
        assert_eq!(chat.participants[0].user_id, artist);
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].message_type, ChatMessageType::AuctionStarted);
        assert!(chat.messages[0].sender_id.is_none());
    }

    #[test]
    fn test_join_is_idempotent_upsert() {
        let store = AuctionChatStore::new();
        let (item, _) = room(&store);
        let buyer = UserId::new();

        store.join(&item, &buyer, "Ben", Role::Buyer).unwrap();
        let first_join = store
            .get(&item)
            .unwrap()
            .participants
            .iter()
            .find(|p| p.user_id == buyer)
            .unwrap()
            .joined_at;

        // Re-join: no duplicate roster entry, no duplicate system message
        store.join(&item, &buyer, "Ben", Role::Buyer).unwrap();
        let chat = store.get(&item).unwrap();
        assert_eq!(
            chat.participants.iter().filter(|p| p.user_id == buyer).count(),
            1
        );
        assert_eq!(
            chat.messages
                .iter()
                .filter(|m| m.message_type == ChatMessageType::System)
                .count(),
            1
        );
        let rejoined = chat
            .participants
            .iter()
            .find(|p| p.user_id == buyer)
            .unwrap();
        assert!(rejoined.is_active);
        assert!(rejoined.joined_at >= first_join);
    }

    #[test]
    fn test_post_requires_active_participant() {
        let store = AuctionChatStore::new();
        let (item, _) = room(&store);
        let stranger = UserId::new();

        let err = store.post(&item, &stranger, "Ben", "hello").unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));

        store.join(&item, &stranger, "Ben", Role::Buyer).unwrap();
        let message = store.post(&item, &stranger, "Ben", "hello").unwrap();
        assert_eq!(message.message_type, ChatMessageType::Text);
        assert_eq!(message.sender_id, Some(stranger));
    }

    #[test]
    fn test_post_length_bounds() {
        let store = AuctionChatStore::new();
        let (item, artist) = room(&store);

        let err = store.post(&item, &artist, "Vera", "  ").unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        let long = "x".repeat(MAX_CHAT_MESSAGE_LEN + 1);
        let err = store.post(&item, &artist, "Vera", &long).unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[test]
    fn test_close_appends_summary_and_rejects_further_posts() {
        let store = AuctionChatStore::new();
        let (item, artist) = room(&store);

        store.close(&item, "Sold to Ben for 200").unwrap();
        let chat = store.get(&item).unwrap();
        assert!(!chat.is_active);
        assert_eq!(
            chat.messages.last().unwrap().message_type,
            ChatMessageType::AuctionEnded
        );

        let err = store.post(&item, &artist, "Vera", "too late").unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));
        let err = store
            .join(&item, &UserId::new(), "Late", Role::Buyer)
            .unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));
    }

    #[test]
    fn test_record_bid_marker() {
        let store = AuctionChatStore::new();
        let (item, _) = room(&store);
        let buyer = UserId::new();

        store.record_bid(&item, &buyer, "Ben", dec!(150)).unwrap();
        let chat = store.get(&item).unwrap();
        let marker = chat.messages.last().unwrap();
        assert_eq!(marker.message_type, ChatMessageType::BidPlaced);
        assert_eq!(marker.bid_amount, Some(dec!(150)));
        assert_eq!(marker.sender_id, Some(buyer));
    }

    #[test]
    fn test_recent_messages_window_is_chronological() {
        let store = AuctionChatStore::new();
        let (item, artist) = room(&store);
        for i in 0..5 {
            store.post(&item, &artist, "Vera", &format!("m{}", i)).unwrap();
        }

        let window = store.recent_messages(&item, 3).unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].content, "m2");
        assert_eq!(window[2].content, "m4");

        // A limit larger than the log returns everything, marker included
        let all = store.recent_messages(&item, 100).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].message_type, ChatMessageType::AuctionStarted);
    }

    #[test]
    fn test_new_auction_replaces_old_room() {
        let store = AuctionChatStore::new();
        let (item, artist) = room(&store);
        store.close(&item, "no bids").unwrap();

        let new_id = store.create(&item, &artist, "Vera", dec!(50));
        let chat = store.get(&item).unwrap();
        assert_eq!(chat.id, new_id);
        assert!(chat.is_active);
        assert_eq!(chat.messages.len(), 1);
    }
}
