//! Artmarket Auction - Auction State Machine and Bid Ledger
//!
//! This crate implements the bidding core of the marketplace: the item
//! aggregate with its embedded auction sub-record, the append-only bid
//! ledger, the timed-auction state machine (`no_auction -> active -> ended`)
//! and the direct-sale offer path that reuses the same ledger shape.
//!
//! # Consistency
//!
//! The item and its live auction form one aggregate. Every mutation goes
//! through [`ItemStore::update`], which runs the caller's closure under the
//! per-item entry lock — a single atomic read-modify-write. Two bidders
//! racing on the same item are serialized there: admission re-reads
//! `current_bid` under the lock, so an admitted bid always strictly
//! increases it and no update is lost.
//!
//! Auction expiry is lazy. `end_time` is the authoritative truth; bid, join
//! and end calls re-derive expiry on every access instead of relying on a
//! background sweeper, so an auction whose deadline has passed rejects bids
//! even while `is_active` still reads true in storage.
//!
//! # Example
//!
//! ```ignore
//! use artmarket_auction::{AuctionHouse, StartAuction};
//!
//! let house = AuctionHouse::new();
//! let item = house.create_item(artist, "Vera", Role::Artist, "Dusk", dec!(500))?;
//! house.start_auction(artist, Role::Artist, &item.id, StartAuction {
//!     duration_hours: 1.0,
//!     starting_price: Some(dec!(100)),
//!     bid_increment: None,
//! })?;
//! let receipt = house.place_bid(buyer, "Ben", Role::Buyer, &item.id, dec!(120))?;
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use artmarket_types::{
    BidId, ItemId, ItemStatus, MarketError, MarketResult, OrderId, Role, SaleType, UserId,
};

/// Default minimum step between successive highest bids, advertised to
/// clients when the artist does not supply one.
pub fn default_bid_increment() -> Decimal {
    Decimal::from(10)
}

// ============================================================================
// Aggregate Types
// ============================================================================

/// A single bid or direct-sale offer. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub bidder: UserId,
    /// Denormalized display name, captured at admission time
    pub bidder_name: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Auction sub-record embedded in an item.
///
/// Also used, with `is_active = false` and no start/end times, as the plain
/// offer ledger of a direct-sale item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionState {
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub starting_price: Decimal,
    pub bid_increment: Decimal,
    pub current_bid: Decimal,
    /// Append-only; insertion order is chronological order
    pub bids: Vec<Bid>,
    /// Set exactly once, at auction end or offer acceptance
    pub winner: Option<UserId>,
    /// Number of distinct bidders across `bids`
    pub participant_count: usize,
}

impl AuctionState {
    /// Fresh state for a starting auction
    fn start(
        now: DateTime<Utc>,
        end: DateTime<Utc>,
        starting_price: Decimal,
        bid_increment: Decimal,
    ) -> Self {
        Self {
            is_active: true,
            start_time: Some(now),
            end_time: Some(end),
            starting_price,
            bid_increment,
            current_bid: Decimal::ZERO,
            bids: Vec::new(),
            winner: None,
            participant_count: 0,
        }
    }

    /// Inactive ledger for direct-sale offers
    fn offer_ledger() -> Self {
        Self {
            is_active: false,
            start_time: None,
            end_time: None,
            starting_price: Decimal::ZERO,
            bid_increment: default_bid_increment(),
            current_bid: Decimal::ZERO,
            bids: Vec::new(),
            winner: None,
            participant_count: 0,
        }
    }

    fn recount_participants(&mut self) {
        let distinct: HashSet<&UserId> = self.bids.iter().map(|b| &b.bidder).collect();
        self.participant_count = distinct.len();
    }
}

/// A sellable item (painting) with optional live auction state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub artist_id: UserId,
    pub artist_name: String,
    pub title: String,
    /// Listing price; fixed to the final amount once sold
    pub price: Decimal,
    pub sale_type: SaleType,
    pub status: ItemStatus,
    pub auction: Option<AuctionState>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Milliseconds until the auction deadline, clamped at zero.
    /// Zero when no auction is active.
    pub fn time_remaining_ms(&self) -> i64 {
        match &self.auction {
            Some(a) if a.is_active => match a.end_time {
                Some(end) => (end - Utc::now()).num_milliseconds().max(0),
                None => 0,
            },
            _ => 0,
        }
    }

    /// Whether an active auction has passed its deadline
    pub fn is_auction_expired(&self) -> bool {
        match &self.auction {
            Some(a) if a.is_active => match a.end_time {
                Some(end) => Utc::now() > end,
                None => false,
            },
            _ => false,
        }
    }
}

/// Durable proof of a completed sale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub buyer: UserId,
    pub artist: UserId,
    pub item: ItemId,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Operation Inputs / Outputs
// ============================================================================

/// Parameters for starting an auction
#[derive(Debug, Clone, Deserialize)]
pub struct StartAuction {
    /// Auction duration in hours; must be positive
    pub duration_hours: f64,
    /// Floor for the first bid; defaults to the item's listing price
    pub starting_price: Option<Decimal>,
    /// Suggested minimum step; defaults to [`default_bid_increment`]
    pub bid_increment: Option<Decimal>,
}

/// Result of an admitted bid
#[derive(Debug, Clone, Serialize)]
pub struct BidReceipt {
    pub bid_id: BidId,
    pub current_bid: Decimal,
    pub bid_count: usize,
    pub participant_count: usize,
    pub time_remaining_ms: i64,
}

/// Result of ending an auction
#[derive(Debug, Clone, Serialize)]
pub struct AuctionOutcome {
    pub winner: Option<UserId>,
    pub winner_name: Option<String>,
    pub final_bid: Decimal,
}

/// Read-only view of an item's auction for the details endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AuctionSnapshot {
    pub auction: AuctionState,
    pub time_remaining_ms: i64,
    pub is_expired: bool,
}

/// Result of an accepted direct-sale offer
#[derive(Debug, Clone, Serialize)]
pub struct OfferReceipt {
    pub bid_id: BidId,
    pub current_bid: Decimal,
    pub offer_count: usize,
}

/// Result of the artist accepting an offer
#[derive(Debug, Clone, Serialize)]
pub struct OfferResolution {
    pub order: Order,
    pub buyer: UserId,
    pub amount: Decimal,
}

// ============================================================================
// Stores
// ============================================================================

/// In-memory item document store.
///
/// The DashMap entry lock is the serialization point the state machine
/// relies on: [`ItemStore::update`] holds it for the whole read-modify-write.
#[derive(Default)]
pub struct ItemStore {
    items: DashMap<ItemId, Item>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: Item) {
        self.items.insert(item.id.clone(), item);
    }

    /// Snapshot of one item
    pub fn get(&self, id: &ItemId) -> MarketResult<Item> {
        self.items
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MarketError::not_found("Item"))
    }

    /// Run `f` on the item under its entry lock
    pub fn update<T>(
        &self,
        id: &ItemId,
        f: impl FnOnce(&mut Item) -> MarketResult<T>,
    ) -> MarketResult<T> {
        let mut entry = self
            .items
            .get_mut(id)
            .ok_or_else(|| MarketError::not_found("Item"))?;
        f(entry.value_mut())
    }

    /// All items, newest first
    pub fn list(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }
}

/// Completed sale orders
#[derive(Default)]
pub struct OrderStore {
    orders: DashMap<OrderId, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn get(&self, id: &OrderId) -> MarketResult<Order> {
        self.orders
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MarketError::not_found("Order"))
    }
}

// ============================================================================
// AuctionHouse
// ============================================================================

/// Facade over the item and order stores implementing the auction state
/// machine and the direct-sale offer path.
#[derive(Default)]
pub struct AuctionHouse {
    items: ItemStore,
    orders: OrderStore,
}

impl AuctionHouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn orders(&self) -> &OrderStore {
        &self.orders
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Create a direct-sale listing
    pub fn create_item(
        &self,
        artist: UserId,
        artist_name: &str,
        role: Role,
        title: &str,
        price: Decimal,
    ) -> MarketResult<Item> {
        if role != Role::Artist {
            return Err(MarketError::forbidden("Only artists can list items"));
        }
        let title = title.trim();
        if title.is_empty() || title.len() > 100 {
            return Err(MarketError::validation(
                "Title is required and cannot exceed 100 characters",
            ));
        }
        if price < Decimal::ZERO {
            return Err(MarketError::validation("Price must be positive"));
        }

        let item = Item {
            id: ItemId::new(),
            artist_id: artist,
            artist_name: artist_name.to_string(),
            title: title.to_string(),
            price,
            sale_type: SaleType::DirectSale,
            status: ItemStatus::Available,
            auction: None,
            created_at: Utc::now(),
        };
        self.items.insert(item.clone());
        Ok(item)
    }

    // ========================================================================
    // Auction State Machine
    // ========================================================================

    /// Transition `no_auction -> active`.
    ///
    /// Owner-only; the item must be available. The auction sub-record is
    /// created on first use and reset on every subsequent start.
    pub fn start_auction(
        &self,
        artist: &UserId,
        role: Role,
        item_id: &ItemId,
        params: StartAuction,
    ) -> MarketResult<Item> {
        if role != Role::Artist {
            return Err(MarketError::forbidden("Only artists can start auctions"));
        }
        if params.duration_hours <= 0.0 {
            return Err(MarketError::validation("Auction duration must be positive"));
        }
        let duration = Duration::milliseconds((params.duration_hours * 3_600_000.0) as i64);

        let item = self.items.update(item_id, |item| {
            if &item.artist_id != artist {
                return Err(MarketError::forbidden(
                    "You can only auction your own items",
                ));
            }
            if item.status != ItemStatus::Available {
                return Err(MarketError::conflict("Item is not available for auction"));
            }

            let now = Utc::now();
            let starting_price = params.starting_price.unwrap_or(item.price);
            let bid_increment = params.bid_increment.unwrap_or_else(default_bid_increment);
            if starting_price < Decimal::ZERO || bid_increment <= Decimal::ZERO {
                return Err(MarketError::validation(
                    "Starting price and bid increment must be positive",
                ));
            }

            item.sale_type = SaleType::Auction;
            item.status = ItemStatus::InAuction;
            item.auction = Some(AuctionState::start(
                now,
                now + duration,
                starting_price,
                bid_increment,
            ));
            Ok(item.clone())
        })?;

        info!(item = %item.id, "auction started");
        Ok(item)
    }

    /// Admit a bid on an active auction.
    ///
    /// Admission requires strictly `amount > current_bid` and
    /// `amount >= starting_price`. The advertised `bid_increment` is the
    /// suggested step only and is deliberately not enforced. The whole
    /// check-append-recount runs under the item entry lock, so concurrent
    /// bidders serialize and `current_bid` is monotonically non-decreasing.
    pub fn place_bid(
        &self,
        bidder: &UserId,
        bidder_name: &str,
        role: Role,
        item_id: &ItemId,
        amount: Decimal,
    ) -> MarketResult<BidReceipt> {
        if role != Role::Buyer {
            return Err(MarketError::forbidden("Only buyers can place bids"));
        }

        let receipt = self.items.update(item_id, |item| {
            if item.is_auction_expired() {
                return Err(MarketError::AuctionExpired);
            }
            let time_remaining_ms = item.time_remaining_ms();
            let auction = match item.auction.as_mut() {
                Some(a) if a.is_active => a,
                _ => return Err(MarketError::conflict("Auction is not active")),
            };

            if amount <= auction.current_bid || amount < auction.starting_price {
                return Err(MarketError::BidTooLow {
                    current_bid: auction.current_bid,
                    starting_price: auction.starting_price,
                });
            }

            let bid = Bid {
                id: BidId::new(),
                bidder: bidder.clone(),
                bidder_name: bidder_name.to_string(),
                amount,
                timestamp: Utc::now(),
            };
            let bid_id = bid.id.clone();
            auction.bids.push(bid);
            auction.current_bid = amount;
            auction.recount_participants();

            Ok(BidReceipt {
                bid_id,
                current_bid: auction.current_bid,
                bid_count: auction.bids.len(),
                participant_count: auction.participant_count,
                time_remaining_ms,
            })
        })?;

        info!(item = %item_id, amount = %amount, "bid admitted");
        Ok(receipt)
    }

    /// Validate that a buyer may join the auction room; returns the time
    /// remaining. Joining does not by itself admit a bid.
    pub fn check_joinable(&self, role: Role, item_id: &ItemId) -> MarketResult<i64> {
        if role != Role::Buyer {
            return Err(MarketError::forbidden("Only buyers can join auctions"));
        }
        let item = self.items.get(item_id)?;
        match &item.auction {
            Some(a) if a.is_active => {
                if item.is_auction_expired() {
                    Err(MarketError::AuctionExpired)
                } else {
                    Ok(item.time_remaining_ms())
                }
            }
            _ => Err(MarketError::conflict("No active auction for this item")),
        }
    }

    /// Transition `active -> ended`.
    ///
    /// The owning artist may end at any time; any other caller only once the
    /// deadline has passed (the system path for expired auctions). With at
    /// least one bid the item is sold to the last bidder at the final bid;
    /// otherwise it returns to the available pool. Ending an already-ended
    /// auction is a conflict.
    pub fn end_auction(
        &self,
        caller: &UserId,
        role: Role,
        item_id: &ItemId,
    ) -> MarketResult<AuctionOutcome> {
        let outcome = self.items.update(item_id, |item| {
            let expired = item.is_auction_expired();
            let is_owner = role == Role::Artist && &item.artist_id == caller;
            if !is_owner && !expired {
                return Err(MarketError::forbidden("You can only end your own auctions"));
            }

            let auction = match item.auction.as_mut() {
                Some(a) if a.is_active => a,
                _ => return Err(MarketError::conflict("No active auction to end")),
            };

            auction.is_active = false;
            let outcome = match auction.bids.last() {
                Some(last) => {
                    auction.winner = Some(last.bidder.clone());
                    AuctionOutcome {
                        winner: Some(last.bidder.clone()),
                        winner_name: Some(last.bidder_name.clone()),
                        final_bid: auction.current_bid,
                    }
                }
                None => AuctionOutcome {
                    winner: None,
                    winner_name: None,
                    final_bid: auction.current_bid,
                },
            };

            if outcome.winner.is_some() {
                item.status = ItemStatus::Sold;
                item.price = outcome.final_bid;
            } else {
                item.status = ItemStatus::Available;
            }
            Ok(outcome)
        })?;

        info!(item = %item_id, final_bid = %outcome.final_bid, "auction ended");
        Ok(outcome)
    }

    /// Auction details for the read endpoint
    pub fn snapshot(&self, item_id: &ItemId) -> MarketResult<AuctionSnapshot> {
        let item = self.items.get(item_id)?;
        let is_expired = item.is_auction_expired();
        let time_remaining_ms = item.time_remaining_ms();
        match item.auction {
            Some(auction) => Ok(AuctionSnapshot {
                auction,
                time_remaining_ms,
                is_expired,
            }),
            None => Err(MarketError::not_found("Auction")),
        }
    }

    // ========================================================================
    // Direct-Sale Offers
    // ========================================================================

    /// Submit an offer on a direct-sale item.
    ///
    /// Offers share the ledger shape with auction bids: they land in the
    /// item's (inactive) auction sub-record, `current_bid` tracks the
    /// highest offer seen, and the participant count stays derived.
    pub fn submit_offer(
        &self,
        bidder: &UserId,
        bidder_name: &str,
        role: Role,
        item_id: &ItemId,
        amount: Decimal,
    ) -> MarketResult<OfferReceipt> {
        if role != Role::Buyer {
            return Err(MarketError::forbidden("Only buyers can make offers"));
        }

        self.items.update(item_id, |item| {
            if item.sale_type != SaleType::DirectSale {
                return Err(MarketError::conflict("This item is not open to offers"));
            }
            if item.status == ItemStatus::Sold {
                return Err(MarketError::conflict("Item has already been sold"));
            }
            if amount < item.price {
                return Err(MarketError::validation(format!(
                    "Offer must be at least {}",
                    item.price
                )));
            }

            let ledger = item.auction.get_or_insert_with(AuctionState::offer_ledger);
            let bid = Bid {
                id: BidId::new(),
                bidder: bidder.clone(),
                bidder_name: bidder_name.to_string(),
                amount,
                timestamp: Utc::now(),
            };
            let bid_id = bid.id.clone();
            ledger.bids.push(bid);
            ledger.current_bid = ledger.current_bid.max(amount);
            ledger.recount_participants();

            Ok(OfferReceipt {
                bid_id,
                current_bid: ledger.current_bid,
                offer_count: ledger.bids.len(),
            })
        })
    }

    /// Pending offers on an item; owner-only view
    pub fn list_offers(&self, caller: &UserId, item_id: &ItemId) -> MarketResult<Vec<Bid>> {
        let item = self.items.get(item_id)?;
        if &item.artist_id != caller {
            return Err(MarketError::forbidden(
                "Only the artist can view offers for this item",
            ));
        }
        Ok(item.auction.map(|a| a.bids).unwrap_or_default())
    }

    /// Accept exactly one offer: sets the winner, marks the item sold at the
    /// accepted amount and writes the durable order record. The only
    /// mutation permitted after the item is sold is none — further offers
    /// and accepts fail with a conflict.
    pub fn accept_offer(
        &self,
        artist: &UserId,
        item_id: &ItemId,
        bid_id: &BidId,
    ) -> MarketResult<OfferResolution> {
        let (buyer, amount) = self.items.update(item_id, |item| {
            if &item.artist_id != artist {
                return Err(MarketError::forbidden("Only the artist can accept a bid"));
            }
            if item.status == ItemStatus::Sold {
                return Err(MarketError::conflict("Item has already been sold"));
            }
            let ledger = item
                .auction
                .as_mut()
                .ok_or_else(|| MarketError::not_found("Bid"))?;
            let bid = ledger
                .bids
                .iter()
                .find(|b| &b.id == bid_id)
                .cloned()
                .ok_or_else(|| MarketError::not_found("Bid"))?;

            ledger.winner = Some(bid.bidder.clone());
            item.status = ItemStatus::Sold;
            item.price = bid.amount;
            Ok((bid.bidder, bid.amount))
        })?;

        let order = Order {
            id: OrderId::new(),
            buyer: buyer.clone(),
            artist: artist.clone(),
            item: item_id.clone(),
            price: amount,
            created_at: Utc::now(),
        };
        self.orders.insert(order.clone());
        info!(item = %item_id, order = %order.id, "offer accepted");

        Ok(OfferResolution {
            order,
            buyer,
            amount,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
