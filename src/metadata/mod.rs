//! Metadata module for long-poll change watching
//!
//! A [`MetadataClient`] holds the shared HTTP transport; each watched key
//! gets its own [`KeyClient`] that owns the key's change token.

mod client;
mod error;
mod types;

pub use client::{KeyWatch, MetadataClient};
pub use error::MetadataError;
pub use types::{ChangeToken, WatchKey, WatchOutcome};

#[cfg(test)]
pub(crate) use client::fake;
