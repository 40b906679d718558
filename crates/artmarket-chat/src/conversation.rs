//! Private buyer/artist conversations.
//!
//! A conversation is unique per (buyer, artist, item) triple; opening an
//! existing one returns it instead of creating a duplicate. Messages carry an
//! optional offer payload whose status only the receiver may change, and only
//! while it is still pending. Reading a message page marks the requester's
//! inbound messages read and zeroes their unread counter.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use artmarket_types::{
    ConversationId, ItemId, MarketError, MarketResult, MessageId, Role, UserId,
};

/// Hard cap on conversation message length
pub const MAX_MESSAGE_LEN: usize = 1000;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
    Blocked,
}

/// A buyer/artist thread about one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub buyer_id: UserId,
    pub artist_id: UserId,
    pub item_id: ItemId,
    pub status: ConversationStatus,
    /// Preview of the latest message
    pub last_message: Option<String>,
    pub last_message_at: DateTime<Utc>,
    pub unread_buyer: usize,
    pub unread_artist: usize,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether `user` is one of the two parties
    pub fn is_member(&self, user: &UserId) -> bool {
        &self.buyer_id == user || &self.artist_id == user
    }

    /// The other party of the thread
    pub fn counterpart(&self, user: &UserId) -> UserId {
        if &self.buyer_id == user {
            self.artist_id.clone()
        } else {
            self.buyer_id.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Offer,
    OfferAccept,
    OfferDecline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

/// Inline offer payload carried by an `Offer` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferDetails {
    pub offer_price: Decimal,
    pub offer_description: Option<String>,
    pub status: OfferStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub offer_details: Option<OfferDetails>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One chronological window of a conversation's messages
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: usize,
    pub total: usize,
}

// ============================================================================
// Store
// ============================================================================

/// In-memory conversation and message store
#[derive(Default)]
pub struct ConversationStore {
    conversations: DashMap<ConversationId, Conversation>,
    /// Uniqueness index for the (buyer, artist, item) triple
    by_triple: DashMap<(UserId, UserId, ItemId), ConversationId>,
    /// Messages per conversation, in insertion (chronological) order
    messages: DashMap<ConversationId, Vec<Message>>,
    /// Reverse lookup for the offer-response endpoint
    message_index: DashMap<MessageId, ConversationId>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or return the existing) conversation between a buyer and an
    /// artist about one item. Returns `(conversation, created)`.
    pub fn open(
        &self,
        buyer: &UserId,
        role: Role,
        artist: &UserId,
        item: &ItemId,
    ) -> MarketResult<(Conversation, bool)> {
        if role != Role::Buyer {
            return Err(MarketError::forbidden(
                "Only buyers can start conversations",
            ));
        }
        if buyer == artist {
            return Err(MarketError::validation(
                "Cannot open a conversation with yourself",
            ));
        }

        // The triple's entry lock serializes racing opens: creation happens
        // inside the vacant arm, so two concurrent calls cannot both see
        // "absent" and mint two threads for one triple
        let key = (buyer.clone(), artist.clone(), item.clone());
        match self.by_triple.entry(key) {
            Entry::Occupied(existing) => {
                let conversation = self
                    .conversations
                    .get(existing.get())
                    .map(|e| e.value().clone())
                    .ok_or_else(|| MarketError::not_found("Conversation"))?;
                Ok((conversation, false))
            }
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let conversation = Conversation {
                    id: ConversationId::new(),
                    buyer_id: buyer.clone(),
                    artist_id: artist.clone(),
                    item_id: item.clone(),
                    status: ConversationStatus::Active,
                    last_message: None,
                    last_message_at: now,
                    unread_buyer: 0,
                    unread_artist: 0,
                    created_at: now,
                };
                self.conversations
                    .insert(conversation.id.clone(), conversation.clone());
                self.messages.insert(conversation.id.clone(), Vec::new());
                slot.insert(conversation.id.clone());
                info!(conversation = %conversation.id, "conversation opened");
                Ok((conversation, true))
            }
        }
    }

    pub fn get(&self, id: &ConversationId) -> MarketResult<Conversation> {
        self.conversations
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MarketError::not_found("Conversation"))
    }

    /// All conversations the user belongs to, most recently active first
    pub fn list_for_user(&self, user: &UserId) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|e| e.value().is_member(user))
            .map(|e| e.value().clone())
            .collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        list
    }

    /// Append a message. The sender must be a member; the receiver is the
    /// other party. Bumps the thread's last-message preview and the
    /// receiver's unread counter.
    pub fn send(
        &self,
        sender: &UserId,
        conversation_id: &ConversationId,
        content: &str,
        message_type: MessageType,
        offer_details: Option<OfferDetails>,
    ) -> MarketResult<Message> {
        let content = content.trim();
        if content.is_empty() || content.len() > MAX_MESSAGE_LEN {
            return Err(MarketError::validation(format!(
                "Message must be between 1 and {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let mut entry = self
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| MarketError::not_found("Conversation"))?;
        let conversation = entry.value_mut();
        if !conversation.is_member(sender) {
            return Err(MarketError::forbidden(
                "You are not part of this conversation",
            ));
        }

        let receiver = conversation.counterpart(sender);
        let message = Message {
            id: MessageId::new(),
            conversation_id: conversation_id.clone(),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            content: content.to_string(),
            message_type,
            offer_details,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };

        conversation.last_message = Some(message.content.clone());
        conversation.last_message_at = message.created_at;
        if receiver == conversation.buyer_id {
            conversation.unread_buyer += 1;
        } else {
            conversation.unread_artist += 1;
        }

        // Append while still holding the conversation entry so racing sends
        // land in the log in timestamp order
        self.message_index
            .insert(message.id.clone(), conversation_id.clone());
        self.messages
            .entry(conversation_id.clone())
            .or_default()
            .push(message.clone());
        drop(entry);
        Ok(message)
    }

    /// One page of messages, newest page first but each page in chronological
    /// order. As a side effect marks the requester's inbound messages read
    /// and zeroes their unread counter.
    pub fn messages(
        &self,
        conversation_id: &ConversationId,
        requester: &UserId,
        page: usize,
        limit: usize,
    ) -> MarketResult<MessagePage> {
        let conversation = self.get(conversation_id)?;
        if !conversation.is_member(requester) {
            return Err(MarketError::forbidden(
                "You are not part of this conversation",
            ));
        }

        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let window = {
            let mut entry = self
                .messages
                .get_mut(conversation_id)
                .ok_or_else(|| MarketError::not_found("Conversation"))?;
            let log = entry.value_mut();

            let now = Utc::now();
            for message in log.iter_mut() {
                if &message.receiver_id == requester && !message.is_read {
                    message.is_read = true;
                    message.read_at = Some(now);
                }
            }

            let total = log.len();
            // Page 1 is the newest window; reverse back to chronological
            let end = total.saturating_sub((page - 1) * limit);
            let start = end.saturating_sub(limit);
            MessagePage {
                messages: log[start..end].to_vec(),
                page,
                total,
            }
        };

        if let Some(mut entry) = self.conversations.get_mut(conversation_id) {
            let conversation = entry.value_mut();
            if &conversation.buyer_id == requester {
                conversation.unread_buyer = 0;
            } else {
                conversation.unread_artist = 0;
            }
        }
        Ok(window)
    }

    /// Accept or decline a pending offer message. Receiver-only; the message
    /// must be an offer still in `Pending` state.
    pub fn respond_to_offer(
        &self,
        message_id: &MessageId,
        requester: &UserId,
        accept: bool,
    ) -> MarketResult<Message> {
        let conversation_id = self
            .message_index
            .get(message_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MarketError::not_found("Message"))?;

        let mut entry = self
            .messages
            .get_mut(&conversation_id)
            .ok_or_else(|| MarketError::not_found("Conversation"))?;
        let message = entry
            .value_mut()
            .iter_mut()
            .find(|m| &m.id == message_id)
            .ok_or_else(|| MarketError::not_found("Message"))?;

        if &message.receiver_id != requester {
            return Err(MarketError::forbidden(
                "Only the offer recipient can respond",
            ));
        }
        let details = match message.offer_details.as_mut() {
            Some(d) if message.message_type == MessageType::Offer => d,
            _ => return Err(MarketError::conflict("Message is not an offer")),
        };
        if details.status != OfferStatus::Pending {
            return Err(MarketError::conflict("Offer is no longer pending"));
        }

        details.status = if accept {
            OfferStatus::Accepted
        } else {
            OfferStatus::Declined
        };
        Ok(message.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn opened(store: &ConversationStore) -> (UserId, UserId, Conversation) {
        let buyer = UserId::new();
        let artist = UserId::new();
        let (conversation, created) = store
            .open(&buyer, Role::Buyer, &artist, &ItemId::new())
            .unwrap();
        assert!(created);
        (buyer, artist, conversation)
    }

    #[test]
    fn test_open_is_idempotent_per_triple() {
        let store = ConversationStore::new();
        let buyer = UserId::new();
        let artist = UserId::new();
        let item = ItemId::new();

        let (first, created) = store.open(&buyer, Role::Buyer, &artist, &item).unwrap();
        assert!(created);
        let (second, created) = store.open(&buyer, Role::Buyer, &artist, &item).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        // Same pair, different item: a new thread
        let (third, created) = store
            .open(&buyer, Role::Buyer, &artist, &ItemId::new())
            .unwrap();
        assert!(created);
        assert_ne!(first.id, third.id);
    }

    #[test]
    fn test_open_requires_buyer_role() {
        let store = ConversationStore::new();
        let err = store
            .open(&UserId::new(), Role::Artist, &UserId::new(), &ItemId::new())
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));
    }

    #[test]
    fn test_send_updates_preview_and_unread() {
        let store = ConversationStore::new();
        let (buyer, artist, conversation) = opened(&store);

        let message = store
            .send(&buyer, &conversation.id, "Is this still available?", MessageType::Text, None)
            .unwrap();
        assert_eq!(message.receiver_id, artist);
        assert!(!message.is_read);

        let refreshed = store.get(&conversation.id).unwrap();
        assert_eq!(
            refreshed.last_message.as_deref(),
            Some("Is this still available?")
        );
        assert_eq!(refreshed.unread_artist, 1);
        assert_eq!(refreshed.unread_buyer, 0);
    }

    #[test]
    fn test_send_rejects_non_members_and_empty_content() {
        let store = ConversationStore::new();
        let (buyer, _, conversation) = opened(&store);

        let err = store
            .send(&UserId::new(), &conversation.id, "hi", MessageType::Text, None)
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));

        let err = store
            .send(&buyer, &conversation.id, "   ", MessageType::Text, None)
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        let err = store
            .send(&buyer, &conversation.id, &long, MessageType::Text, None)
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[test]
    fn test_reading_marks_inbound_read_and_zeroes_counter() {
        let store = ConversationStore::new();
        let (buyer, artist, conversation) = opened(&store);
        store
            .send(&buyer, &conversation.id, "one", MessageType::Text, None)
            .unwrap();
        store
            .send(&buyer, &conversation.id, "two", MessageType::Text, None)
            .unwrap();
        assert_eq!(store.get(&conversation.id).unwrap().unread_artist, 2);

        let page = store.messages(&conversation.id, &artist, 1, 50).unwrap();
        assert_eq!(page.total, 2);
        assert!(page.messages.iter().all(|m| m.is_read));
        // Chronological order within the page
        assert_eq!(page.messages[0].content, "one");
        assert_eq!(page.messages[1].content, "two");
        assert_eq!(store.get(&conversation.id).unwrap().unread_artist, 0);

        // The buyer reading does not touch their own outbound messages
        let page = store.messages(&conversation.id, &buyer, 1, 50).unwrap();
        assert!(page.messages.iter().all(|m| m.is_read));
    }

    #[test]
    fn test_message_paging_newest_window_first() {
        let store = ConversationStore::new();
        let (buyer, artist, conversation) = opened(&store);
        for i in 0..5 {
            store
                .send(&buyer, &conversation.id, &format!("m{}", i), MessageType::Text, None)
                .unwrap();
        }

        let newest = store.messages(&conversation.id, &artist, 1, 2).unwrap();
        assert_eq!(newest.messages[0].content, "m3");
        assert_eq!(newest.messages[1].content, "m4");

        let older = store.messages(&conversation.id, &artist, 2, 2).unwrap();
        assert_eq!(older.messages[0].content, "m1");
        assert_eq!(older.messages[1].content, "m2");

        let oldest = store.messages(&conversation.id, &artist, 3, 2).unwrap();
        assert_eq!(oldest.messages.len(), 1);
        assert_eq!(oldest.messages[0].content, "m0");
    }

    #[test]
    fn test_offer_response_receiver_only_and_pending_only() {
        let store = ConversationStore::new();
        let (buyer, artist, conversation) = opened(&store);

        let offer = store
            .send(
                &buyer,
                &conversation.id,
                "Would you take 450?",
                MessageType::Offer,
                Some(OfferDetails {
                    offer_price: dec!(450),
                    offer_description: None,
                    status: OfferStatus::Pending,
                }),
            )
            .unwrap();

        // Sender cannot respond to their own offer
        let err = store.respond_to_offer(&offer.id, &buyer, true).unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));

        let updated = store.respond_to_offer(&offer.id, &artist, true).unwrap();
        assert_eq!(
            updated.offer_details.unwrap().status,
            OfferStatus::Accepted
        );

        // Second response is a conflict
        let err = store.respond_to_offer(&offer.id, &artist, false).unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));
    }

    #[test]
    fn test_offer_response_rejects_plain_text() {
        let store = ConversationStore::new();
        let (buyer, artist, conversation) = opened(&store);
        let message = store
            .send(&buyer, &conversation.id, "hello", MessageType::Text, None)
            .unwrap();
        let err = store.respond_to_offer(&message.id, &artist, true).unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));
    }

    #[test]
    fn test_concurrent_opens_yield_one_conversation() {
        use std::sync::{Arc, Barrier};

        let store = Arc::new(ConversationStore::new());
        let buyer = UserId::new();
        let artist = UserId::new();
        let item = ItemId::new();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                let buyer = buyer.clone();
                let artist = artist.clone();
                let item = item.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.open(&buyer, Role::Buyer, &artist, &item).unwrap()
                })
            })
            .collect();

        let results: Vec<(Conversation, bool)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Exactly one creation; everyone else got the same existing thread
        let created = results.iter().filter(|(_, created)| *created).count();
        assert_eq!(created, 1);
        let first_id = &results[0].0.id;
        assert!(results.iter().all(|(c, _)| &c.id == first_id));
        assert_eq!(store.list_for_user(&buyer).len(), 1);
    }

    #[test]
    fn test_concurrent_sends_keep_log_chronological() {
        use std::sync::{Arc, Barrier};

        let store = Arc::new(ConversationStore::new());
        let (buyer, artist, conversation) = opened(&store);

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let store = Arc::clone(&store);
                let sender = if i % 2 == 0 { buyer.clone() } else { artist.clone() };
                let conversation_id = conversation.id.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for j in 0..50 {
                        store
                            .send(
                                &sender,
                                &conversation_id,
                                &format!("t{}m{}", i, j),
                                MessageType::Text,
                                None,
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let page = store
            .messages(&conversation.id, &artist, 1, 100)
            .unwrap();
        assert_eq!(page.total, threads * 50);
        // Append order never runs backwards against the timestamps
        assert!(page
            .messages
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn test_list_for_user_sorted_by_activity() {
        let store = ConversationStore::new();
        let buyer = UserId::new();
        let a1 = UserId::new();
        let a2 = UserId::new();
        let (c1, _) = store.open(&buyer, Role::Buyer, &a1, &ItemId::new()).unwrap();
        let (c2, _) = store.open(&buyer, Role::Buyer, &a2, &ItemId::new()).unwrap();

        store.send(&buyer, &c1.id, "ping", MessageType::Text, None).unwrap();

        let list = store.list_for_user(&buyer);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, c1.id);

        // The artist only sees their own thread
        assert_eq!(store.list_for_user(&a2).len(), 1);
        assert_eq!(store.list_for_user(&a2)[0].id, c2.id);
    }
}
