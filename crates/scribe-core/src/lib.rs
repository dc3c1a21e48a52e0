//! scribe-core: keeps a locally-edited document in sync with a
//! compare-and-swap versioned file store while an external actor appends
//! proposed edits and threaded comments to a sidecar next to it.
//!
//! This crate provides the core functionality for:
//! - Locating and applying anchor-based proposed edits
//! - The sidecar record (pending edits + comment threads)
//! - The VersionedStore contract and an in-memory test double
//! - The per-document sync session: load, debounced autosave, background
//!   sidecar polling, accept/reject, comment mutation
//!
//! Rendering, input, and the transport behind the store live outside this
//! crate; they talk to it through `DocumentSession` (or `SessionHandle`)
//! and observe it through `SessionEvent`s.

pub mod document;
pub mod driver;
pub mod events;
pub mod meta;
pub mod patch;
pub mod session;
pub mod store;
pub mod threads;

pub use document::Document;
pub use driver::{Command, SessionHandle};
pub use events::{EventBus, SessionEvent, Subscription};
pub use meta::{Comment, MetaDocument};
pub use patch::{Anchor, Edit, EditKind, PatchError};
pub use session::{DocumentSession, SessionConfig, SessionError, SessionState};
pub use store::{InMemoryStore, Revision, StoreError, Version, VersionedStore};
