//! # punchsync-sync
//!
//! Everything between a device fetch and the remote collector: duplicate
//! suppression, the persisted sync cursor, and batched delivery over HTTP.
//!
//! The poll loop in `punchsync-daemon` composes these pieces; nothing here
//! knows about scheduling.

pub mod client;
pub mod cursor_store;
pub mod dedup;
pub mod error;
pub mod wire;

pub use client::{
    BatchFailure, BatchOutcome, BatchResult, ClientSettings, HttpResponse, HttpTransport,
    SyncClient, Transport, TransportError,
};
pub use cursor_store::{CursorStore, FileCursorStore};
pub use dedup::{dedupe, dedupe_from};
pub use error::SyncError;
