//! Marketplace error taxonomy
//!
//! One shared error enum for the auction, chat and offer layers. Errors are
//! designed to be:
//! - Informative for logging/debugging
//! - Safe for external exposure (no internal state leakage)
//! - Convertible to HTTP status codes

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for marketplace operations
pub type MarketResult<T> = Result<T, MarketError>;

/// Marketplace error types
#[derive(Debug, Clone, Error)]
pub enum MarketError {
    /// Missing or invalid bearer credential
    #[error("Authentication required")]
    Unauthorized,

    /// Role or ownership mismatch
    #[error("{0}")]
    Forbidden(String),

    /// Unknown item/conversation/message/bid id
    #[error("{0} not found")]
    NotFound(String),

    /// State-machine violation (auction on a non-available item, ending an
    /// already-ended auction, bidding on a sold item)
    #[error("{0}")]
    Conflict(String),

    /// Malformed or out-of-range input
    #[error("{0}")]
    Validation(String),

    /// Bid rejected by the admission rule
    #[error("Bid must be higher than the current bid of {current_bid} and at least the starting price of {starting_price}")]
    BidTooLow {
        current_bid: Decimal,
        starting_price: Decimal,
    },

    /// Bid or join arrived at or after the auction deadline
    #[error("Auction has ended")]
    AuctionExpired,
}

impl MarketError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Validation(_) | Self::BidTooLow { .. } | Self::AuctionExpired => 400,
        }
    }

    /// Get a machine-readable error code (safe to expose)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "STATE_CONFLICT",
            Self::Validation(_) => "VALIDATION",
            Self::BidTooLow { .. } => "BID_TOO_LOW",
            Self::AuctionExpired => "AUCTION_EXPIRED",
        }
    }

    /// Shorthand for a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Shorthand for a not-found error naming the missing entity
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound(entity.into())
    }

    /// Shorthand for a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Shorthand for a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Error response body for API clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always false
    pub success: bool,
    /// Error code (machine-readable)
    pub code: String,
    /// Error message (human-readable)
    pub message: String,
}

impl From<&MarketError> for ErrorBody {
    fn from(error: &MarketError) -> Self {
        Self {
            success: false,
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}
