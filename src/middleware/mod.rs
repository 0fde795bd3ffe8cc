//! Tower middleware for the HTTP surface

pub mod identity;

pub use identity::{CallerIdentity, IdentityLayer};
