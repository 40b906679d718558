//! Artmarket Authentication Layer
//!
//! Bearer-token authentication for the marketplace:
//!
//! - **JWT issuing/validation**: HS256 tokens carrying the user id, display
//!   name and role
//! - **Request extraction**: an [`AuthUser`] axum extractor reading the
//!   `Authorization: Bearer` header
//!
//! The user registry itself lives outside this system; a token is the whole
//! identity. WebSocket handshakes validate the same token from the `?token=`
//! query parameter before the upgrade completes.

pub mod error;
pub mod extract;
pub mod jwt;

pub use error::{AuthError, AuthResult};
pub use extract::AuthUser;
pub use jwt::{Claims, JwtService};
