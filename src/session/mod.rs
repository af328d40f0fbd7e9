//! Session issuance
//!
//! Sessions are stateless: an HS256-signed token carried in an HTTP-only
//! cookie, valid for a short absolute lifetime and never refreshed.
//!
//! - [`token`] - signing and verifying session tokens
//! - [`cookie`] - the session cookie contract

pub mod cookie;
pub mod token;

pub use cookie::SessionCookieFactory;
pub use token::{IssuedSession, SessionClaims, SessionError, SessionIssuer};
