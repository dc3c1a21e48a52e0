//! DocumentSession: the lifecycle of one open document against the store.
//!
//! Three independent writers share the store's compare-and-swap primitive:
//! the local user (debounced autosave), the background poller (sidecar
//! refresh), and proposed-edit acceptance (document + sidecar). The session
//! is a single logical actor — the driver serializes all calls, so the two
//! timer-driven activities interleave with commands only at store awaits,
//! never during synchronous mutation.
//!
//! Invariants the session maintains:
//! - a rejected compare-and-swap leaves content and the dirty flag untouched
//! - polling never touches document content, only the sidecar
//! - the document and its sidecar are separate token state machines; either
//!   write may fail while the other succeeded, and the result is always
//!   diagnosable (see `accept_edit`)

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::document::{self, Document};
use crate::events::{EventBus, SessionEvent};
use crate::meta::{Comment, MetaDocument};
use crate::patch::{self, Anchor, Edit, PatchError};
use crate::store::{StoreError, Version, VersionedStore};
use crate::threads::{AnchorCache, CommentThread};

/// Debounce window between the last keystroke and the autosave write.
pub const AUTOSAVE_DELAY: Duration = Duration::from_secs(2);
/// Cadence of the background sidecar poll.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Quiet period after any successful write before polling resumes.
pub const POLL_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error("version conflict on {path}: remote changed since the last load")]
    Conflict { path: String },

    #[error("store failure on {path}: {message}")]
    Transport { path: String, message: String },

    /// The targeted edit cannot be applied (stale or ambiguous anchor, or a
    /// malformed edit record). Data for the UI, never a session incident.
    #[error("edit not applicable: {0}")]
    NotApplicable(#[from] PatchError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No path selected.
    Empty,
    Loading,
    /// Loaded, no unsaved changes.
    Ready,
    /// Local content diverges from the last stored revision.
    Dirty,
    Saving,
    /// The last operation failed; the next successful one returns to Ready.
    Errored,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local actor identity stamped on new comments.
    pub author: String,
    pub autosave_delay: Duration,
    pub poll_interval: Duration,
    pub poll_cooldown: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            author: "human".to_string(),
            autosave_delay: AUTOSAVE_DELAY,
            poll_interval: POLL_INTERVAL,
            poll_cooldown: POLL_COOLDOWN,
        }
    }
}

/// Sync engine for the currently open document.
pub struct DocumentSession<S: VersionedStore> {
    store: S,
    config: SessionConfig,
    events: Arc<EventBus>,
    state: SessionState,
    document: Option<Document>,
    meta: MetaDocument,
    meta_version: Option<Version>,
    dirty: bool,
    autosave_deadline: Option<Instant>,
    last_write: Option<Instant>,
    last_error: Option<SessionError>,
    anchors: AnchorCache,
}

impl<S: VersionedStore> DocumentSession<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, SessionConfig::default())
    }

    pub fn with_config(store: S, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            events: Arc::new(EventBus::new()),
            state: SessionState::Empty,
            document: None,
            meta: MetaDocument::default(),
            meta_version: None,
            dirty: false,
            autosave_deadline: None,
            last_write: None,
            last_error: None,
            anchors: AnchorCache::new(),
        }
    }

    /// Open (or reload) a document, discarding in-memory state.
    ///
    /// A dirty buffer on a *different* path is flushed first, best effort;
    /// reloading the same path deliberately discards local changes — that is
    /// the recovery action the UI offers after a conflict.
    pub async fn open(&mut self, path: &str) -> Result<()> {
        if self.dirty && self.document.as_ref().is_some_and(|d| d.path != path) {
            if let Err(err) = self.save().await {
                warn!(error = %err, "flush before switch failed; unsaved edit dropped");
            }
        }

        self.autosave_deadline = None;
        self.dirty = false;
        self.meta = MetaDocument::default();
        self.meta_version = None;
        self.anchors.invalidate();
        self.document = Some(Document::empty(path));
        self.set_state(SessionState::Loading);
        debug!(path, "loading document");

        let doc_revision = match self.store.get(&document::doc_path(path)).await {
            Ok(revision) => revision,
            Err(err) => return Err(self.fail(path, err)),
        };
        let meta_revision = match self.store.get(&document::meta_path(path)).await {
            Ok(revision) => revision,
            Err(err) => return Err(self.fail(path, err)),
        };

        if let Some(revision) = doc_revision {
            self.document = Some(Document {
                path: path.to_string(),
                content: String::from_utf8_lossy(&revision.content).into_owned(),
                version: Some(revision.version),
            });
        }

        if let Some(revision) = meta_revision {
            match MetaDocument::from_json(&revision.content) {
                Ok(meta) => {
                    self.meta = meta;
                    self.meta_version = Some(revision.version);
                }
                Err(err) => {
                    let err = SessionError::Transport {
                        path: path.to_string(),
                        message: format!("malformed sidecar: {err}"),
                    };
                    self.last_error = Some(err.clone());
                    self.set_state(SessionState::Errored);
                    return Err(err);
                }
            }
        }

        self.last_error = None;
        self.set_state(SessionState::Ready);
        self.events.emit(SessionEvent::Loaded {
            path: path.to_string(),
        });
        Ok(())
    }

    /// Replace content from the editor. Synchronous, so the visible editor
    /// state is never behind the user's keystrokes; re-arms the autosave
    /// debounce so only the latest edit in the window produces a save.
    pub fn edit(&mut self, new_content: impl Into<String>) {
        let Some(doc) = self.document.as_mut() else {
            return;
        };
        doc.content = new_content.into();
        self.dirty = true;
        self.autosave_deadline = Some(Instant::now() + self.config.autosave_delay);
        self.set_state(SessionState::Dirty);
    }

    /// Compare-and-swap write of the document content. No-op unless dirty.
    ///
    /// On conflict the local edit is preserved — content and the dirty flag
    /// are untouched — forcing an explicit reload decision rather than a
    /// silent overwrite.
    pub async fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(doc) = self.document.as_ref() else {
            return Ok(());
        };

        // Captured at trigger time; edits landing while the put is in
        // flight re-arm the debounce and produce a subsequent save.
        let path = doc.path.clone();
        let content = doc.content.clone();
        let expected = doc.version.clone();
        self.autosave_deadline = None;
        self.set_state(SessionState::Saving);
        debug!(path, "saving document");

        let result = self
            .store
            .put(
                &document::doc_path(&path),
                content.as_bytes(),
                &format!("[editor] Human edit: {path}"),
                expected.as_ref(),
            )
            .await;

        match result {
            Ok(version) => {
                if let Some(doc) = self.document.as_mut() {
                    doc.version = Some(version.clone());
                    if doc.content == content {
                        self.dirty = false;
                    }
                }
                self.last_write = Some(Instant::now());
                self.last_error = None;
                self.set_state(if self.dirty {
                    SessionState::Dirty
                } else {
                    SessionState::Ready
                });
                self.events.emit(SessionEvent::Saved {
                    path,
                    version: version.to_string(),
                });
                Ok(())
            }
            Err(err) => Err(self.fail(&path, err)),
        }
    }

    /// Apply a proposed edit and persist both the document and the sidecar,
    /// each under its own version token.
    ///
    /// The two writes are not atomic. Document first: if it fails, nothing
    /// has moved. If it succeeds and the sidecar write then fails, content
    /// and document version are already advanced and the edit stays in
    /// `pending_edits` — the next render re-runs locate and legitimately
    /// reports it stale. Degraded, diagnosable, no data corruption.
    pub async fn accept_edit(&mut self, edit: &Edit) -> Result<()> {
        let Some(doc) = self.document.as_ref() else {
            return Ok(());
        };

        // Patch failures are data for the stale-edit list, not incidents;
        // they are returned without touching the session error.
        let new_content = patch::apply(&doc.content, edit)?;
        let new_meta = self.meta.remove_edit(&edit.id);
        let path = doc.path.clone();
        let expected = doc.version.clone();
        let message = format!("[editor] Accept edit: {path} - {}", edit.id);
        self.set_state(SessionState::Saving);
        debug!(path, edit = %edit.id, "accepting proposed edit");

        let version = match self
            .store
            .put(
                &document::doc_path(&path),
                new_content.as_bytes(),
                &message,
                expected.as_ref(),
            )
            .await
        {
            Ok(version) => version,
            Err(err) => return Err(self.fail(&path, err)),
        };

        if let Some(doc) = self.document.as_mut() {
            doc.content = new_content;
            doc.version = Some(version);
        }
        // The write persisted exactly this content, so the buffer is clean
        // and any armed autosave would be a redundant rewrite.
        self.dirty = false;
        self.autosave_deadline = None;
        self.last_write = Some(Instant::now());

        self.write_meta(new_meta, message).await
    }

    /// Discard a proposed edit: sidecar-only write with the edit removed.
    pub async fn reject_edit(&mut self, edit_id: &str) -> Result<()> {
        let Some(doc) = self.document.as_ref() else {
            return Ok(());
        };
        let path = doc.path.clone();
        let new_meta = self.meta.remove_edit(edit_id);
        self.set_state(SessionState::Saving);
        debug!(path, edit = edit_id, "rejecting proposed edit");
        self.write_meta(new_meta, format!("[editor] Reject edit: {path} - {edit_id}"))
            .await
    }

    /// Append a comment (or a reply when `parent_id` is given) and persist
    /// the sidecar. Anchor findability is not validated; staleness resolves
    /// lazily at render time.
    pub async fn add_comment(
        &mut self,
        anchor: &str,
        text: &str,
        parent_id: Option<&str>,
    ) -> Result<Comment> {
        let Some(doc) = self.document.as_ref() else {
            return Err(SessionError::Transport {
                path: String::new(),
                message: "no document open".to_string(),
            });
        };
        let path = doc.path.clone();
        let author = self.config.author.clone();
        let (new_meta, comment) = self.meta.add_comment(&author, anchor, text, parent_id);
        self.set_state(SessionState::Saving);
        self.write_meta(new_meta, format!("[editor] Comment: {path} - added by {author}"))
            .await?;
        Ok(comment)
    }

    /// Mark a comment resolved and persist the sidecar. Unknown ids no-op
    /// on the record but still write; replies are not cascaded.
    pub async fn resolve_comment(&mut self, comment_id: &str) -> Result<()> {
        let Some(doc) = self.document.as_ref() else {
            return Ok(());
        };
        let path = doc.path.clone();
        let new_meta = self.meta.resolve_comment(comment_id);
        self.set_state(SessionState::Saving);
        self.write_meta(
            new_meta,
            format!("[editor] Resolve comment: {path} - {comment_id}"),
        )
        .await
    }

    /// Background sidecar refresh. Never touches document content — that is
    /// the invariant keeping in-progress typing safe from the poller.
    ///
    /// The cycle is skipped entirely while a write is in flight or within
    /// the cooldown window after the last successful write; failures are
    /// swallowed (best-effort refresh, not a user action).
    pub async fn poll(&mut self) {
        let Some(doc) = self.document.as_ref() else {
            return;
        };
        if matches!(self.state, SessionState::Saving | SessionState::Loading) {
            debug!("poll skipped: operation in flight");
            return;
        }
        if let Some(last) = self.last_write {
            if last.elapsed() < self.config.poll_cooldown {
                debug!("poll skipped: within write cooldown");
                return;
            }
        }

        let path = doc.path.clone();
        match self.store.get(&document::meta_path(&path)).await {
            Ok(Some(revision)) => {
                if self.meta_version.as_ref() == Some(&revision.version) {
                    return;
                }
                match MetaDocument::from_json(&revision.content) {
                    Ok(meta) => {
                        self.meta = meta;
                        self.meta_version = Some(revision.version);
                        self.anchors.invalidate();
                        debug!(path, "sidecar refreshed from poll");
                        self.events.emit(SessionEvent::MetaChanged { path });
                    }
                    Err(err) => debug!(path, error = %err, "poll ignored malformed sidecar"),
                }
            }
            Ok(None) => {}
            Err(err) => debug!(path, error = %err, "poll failed; ignoring"),
        }
    }

    // ---- render helpers -------------------------------------------------

    /// Pending edits whose anchor no longer locates, for the stale panel.
    pub fn stale_edits(&self) -> Vec<&Edit> {
        patch::stale_edits(self.content(), &self.meta.pending_edits)
    }

    /// Every pending edit with its resolved anchor, for inline widgets.
    pub fn edit_positions(&self) -> Vec<(&Edit, Anchor)> {
        patch::edit_positions(self.content(), &self.meta.pending_edits)
    }

    /// Comment threads in render order (see `threads`).
    pub fn comment_threads(&mut self) -> Vec<CommentThread<'_>> {
        let Self {
            document,
            meta,
            anchors,
            ..
        } = self;
        let content = document.as_ref().map(|d| d.content.as_str()).unwrap_or("");
        crate::threads::thread_layout(content, &meta.comments, anchors)
    }

    // ---- accessors ------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> Option<&str> {
        self.document.as_ref().map(|d| d.path.as_str())
    }

    pub fn content(&self) -> &str {
        self.document.as_ref().map(|d| d.content.as_str()).unwrap_or("")
    }

    pub fn version(&self) -> Option<&Version> {
        self.document.as_ref().and_then(|d| d.version.as_ref())
    }

    pub fn meta(&self) -> &MetaDocument {
        &self.meta
    }

    pub fn meta_version(&self) -> Option<&Version> {
        self.meta_version.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// When the armed autosave debounce elapses, if any.
    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.autosave_deadline
    }

    /// Bus the embedding UI subscribes to.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    // ---- internals ------------------------------------------------------

    /// Sidecar compare-and-swap write; on success the new record replaces
    /// the in-memory one and the anchor cache resets.
    async fn write_meta(&mut self, new_meta: MetaDocument, message: String) -> Result<()> {
        let Some(doc) = self.document.as_ref() else {
            return Ok(());
        };
        let path = doc.path.clone();

        let result = self
            .store
            .put(
                &document::meta_path(&path),
                &new_meta.to_json_bytes(),
                &message,
                self.meta_version.as_ref(),
            )
            .await;

        match result {
            Ok(version) => {
                self.meta = new_meta;
                self.meta_version = Some(version);
                self.anchors.invalidate();
                self.last_write = Some(Instant::now());
                self.last_error = None;
                self.set_state(if self.dirty {
                    SessionState::Dirty
                } else {
                    SessionState::Ready
                });
                self.events.emit(SessionEvent::MetaChanged { path });
                Ok(())
            }
            Err(err) => Err(self.fail(&path, err)),
        }
    }

    /// Record a store failure as the session's current error and surface it.
    fn fail(&mut self, path: &str, err: StoreError) -> SessionError {
        let err = match err {
            StoreError::Conflict => {
                warn!(path, "compare-and-swap write rejected");
                self.events.emit(SessionEvent::Conflict {
                    path: path.to_string(),
                });
                SessionError::Conflict {
                    path: path.to_string(),
                }
            }
            StoreError::Transport(message) => {
                warn!(path, error = %message, "store operation failed");
                SessionError::Transport {
                    path: path.to_string(),
                    message,
                }
            }
        };
        self.last_error = Some(err.clone());
        self.set_state(SessionState::Errored);
        err
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.events.emit(SessionEvent::StateChanged { state });
        }
    }
}
