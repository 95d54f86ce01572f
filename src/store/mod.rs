//! Credential store — SQLite table of OAuth token pairs keyed by user id.

pub mod db;
pub mod refresh;

pub use db::{CredentialRecord, CredentialStore};
pub use refresh::fresh_credentials;
