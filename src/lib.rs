#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the talentgate application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod candidates;
pub mod handlers;
pub mod login;
pub mod models;
pub mod oauth;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod state;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use handlers::{current_session, login, logout, oauth_callback, ping};
pub use login::{LoginError, LoginService, RedirectPolicy};
pub use session::{SessionCookieFactory, SessionIssuer};
pub use settings::TalentgateSettings;
