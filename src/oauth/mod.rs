//! OAuth2 helper: provider seam, Google implementation, and the credential flow.

pub mod flow;
mod google;
mod provider;

pub use flow::{CredentialFlow, SCOPES};
pub use google::GoogleProvider;
pub use provider::{OAuthProvider, TokenSet, UserInfo};
