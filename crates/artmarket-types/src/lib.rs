//! Artmarket Types - Canonical domain types for the art marketplace
//!
//! This crate contains the foundational types for artmarket with zero
//! dependencies on other artmarket crates:
//!
//! - Identity types (UserId, ItemId, ConversationId, etc.)
//! - Role and sale lifecycle enums
//! - The shared error taxonomy with HTTP mappings
//!
//! # Architectural Invariants
//!
//! These types support the core marketplace invariants:
//!
//! 1. An item's `current_bid` only increases while its auction is active
//! 2. The bid ledger is append-only; bids are immutable once admitted
//! 3. `status == InAuction` implies an active auction sub-record
//! 4. At most one open conversation per (buyer, artist, item) triple

pub mod error;
pub mod identity;

pub use error::*;
pub use identity::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role bound to a bearer credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sells items, starts and ends auctions
    Artist,
    /// Browses, bids, makes offers, opens conversations
    Buyer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Artist => write!(f, "artist"),
            Role::Buyer => write!(f, "buyer"),
        }
    }
}

/// How an item is being sold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleType {
    /// Fixed listing price, buyers submit offers
    DirectSale,
    /// Timed competitive bidding
    Auction,
}

/// Mutually exclusive lifecycle stage of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    Reserved,
    InAuction,
    Sold,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Available => "available",
            ItemStatus::Reserved => "reserved",
            ItemStatus::InAuction => "in_auction",
            ItemStatus::Sold => "sold",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_round_trip() {
        let json = serde_json::to_string(&Role::Artist).unwrap();
        assert_eq!(json, "\"artist\"");
        let role: Role = serde_json::from_str("\"buyer\"").unwrap();
        assert_eq!(role, Role::Buyer);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ItemStatus::InAuction).unwrap(),
            "\"in_auction\""
        );
        assert_eq!(ItemStatus::InAuction.to_string(), "in_auction");
    }
}
