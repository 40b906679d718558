//! Artmarket Chat - Messaging stores for the marketplace
//!
//! Two messaging surfaces share this crate:
//!
//! - [`conversation`] - private buyer/artist threads attached to an item,
//!   with per-role unread counters and inline offer negotiation
//! - [`room`] - public per-auction chat rooms with a participant roster and
//!   an append-only tagged message log
//!
//! Both stores are in-memory and keyed with DashMap; all mutations run under
//! the per-entry lock so counter updates and roster upserts never race.

pub mod conversation;
pub mod room;

pub use conversation::*;
pub use room::*;
