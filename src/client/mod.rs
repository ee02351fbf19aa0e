//! Client Module - hydration controller (v0.1)
//!
//! Mirrors the server's container tree on a live document: probes each
//! container for its type token, swaps in fragments when the token changes,
//! and binds links, request elements and paginating loaders.
//!
//! The browser is abstracted away: the controller owns an arena
//! [`Document`](crate::html::Document), the host reports viewport and click
//! events, and every server call goes through a [`Transport`].
//!
//! Key types:
//! - `Controller`: the hydration state machine
//! - `Transport`: `HttpTransport` (reqwest) or `LocalTransport` (in process)
//! - `MemoCache`: memoized fetches with in-flight de-duplication

mod cache;
mod hydrate;
mod tracker;
mod transport;

use thiserror::Error;

pub use cache::MemoCache;
pub use hydrate::{Binding, Controller, HistoryEntry, Location, Trigger};
pub use tracker::{FileValue, TrackerPayload};
pub use transport::{HttpTransport, LocalTransport, Transport};

/// Failure of one hydration step; the controller stays usable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("[NULLS-050] Could not load tracker '{name}'")]
    MissingTracker { name: String },

    #[error("[NULLS-051] Request to '{path}' failed: {reason}")]
    Transport { path: String, reason: String },

    #[error("[NULLS-052] Client script failed: {0}")]
    Script(String),

    #[error("[NULLS-053] Container '{address}' has no known type")]
    MissingType { address: String },

    #[error("[NULLS-054] Invalid link target '{href}'")]
    InvalidHref { href: String },
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
