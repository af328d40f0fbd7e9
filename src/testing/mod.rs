//! Shared testing utilities
//!
//! - [`fixtures`] - signing keys, provider profiles, candidates and settings
//! - [`mock`] - test doubles for the provider, key set and candidate store
//! - [`builders`] - a login service wired to those doubles
//!
//! ```rust,ignore
//! use talentgate::testing::builders::TestLoginBuilder;
//!
//! let login = TestLoginBuilder::new().build();
//! let url = login.service.begin(Some("/jobs/42")).await?;
//! ```

pub mod builders;
pub mod fixtures;
pub mod mock;

pub use builders::{TestLogin, TestLoginBuilder};
pub use mock::{FlakyCandidateStore, MockProviderClient, StaticKeySource};
