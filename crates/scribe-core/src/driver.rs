//! Timer loop that drives a session.
//!
//! The session itself has no background activity; this loop multiplexes UI
//! commands, the autosave debounce deadline, and the poll interval over one
//! `select!`, so the session stays a single logical actor and the two timers
//! are explicit scheduled tasks. Missed poll ticks are skipped, never
//! queued. Dropping the handle (or calling `shutdown`) cancels the loop and
//! both timers with it.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::events::EventBus;
use crate::patch::Edit;
use crate::session::DocumentSession;
use crate::store::VersionedStore;

/// UI-originated commands accepted by the loop.
#[derive(Debug)]
pub enum Command {
    Open(String),
    Edit(String),
    Save,
    AcceptEdit(Edit),
    RejectEdit(String),
    AddComment {
        anchor: String,
        text: String,
        parent_id: Option<String>,
    },
    ResolveComment(String),
}

/// Handle to a spawned session loop.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventBus>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn the loop, taking ownership of the session.
    pub fn spawn<S: VersionedStore + 'static>(session: DocumentSession<S>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let events = session.events();
        let task = tokio::spawn(run(session, command_rx));
        Self {
            commands,
            events,
            task,
        }
    }

    /// Bus the embedding UI subscribes to for session events.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("session loop is gone; command dropped");
        }
    }

    pub fn open(&self, path: impl Into<String>) {
        self.send(Command::Open(path.into()));
    }

    pub fn edit(&self, content: impl Into<String>) {
        self.send(Command::Edit(content.into()));
    }

    pub fn save(&self) {
        self.send(Command::Save);
    }

    pub fn accept_edit(&self, edit: Edit) {
        self.send(Command::AcceptEdit(edit));
    }

    pub fn reject_edit(&self, edit_id: impl Into<String>) {
        self.send(Command::RejectEdit(edit_id.into()));
    }

    pub fn add_comment(
        &self,
        anchor: impl Into<String>,
        text: impl Into<String>,
        parent_id: Option<String>,
    ) {
        self.send(Command::AddComment {
            anchor: anchor.into(),
            text: text.into(),
            parent_id,
        });
    }

    pub fn resolve_comment(&self, comment_id: impl Into<String>) {
        self.send(Command::ResolveComment(comment_id.into()));
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) {
        let SessionHandle {
            commands,
            events: _,
            task,
        } = self;
        drop(commands);
        let _ = task.await;
    }
}

async fn run<S: VersionedStore>(
    mut session: DocumentSession<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut poll = time::interval(session.config().poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let autosave = session.autosave_deadline();
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => dispatch(&mut session, command).await,
                    None => break,
                }
            }

            _ = time::sleep_until(autosave.unwrap_or_else(Instant::now)),
                if autosave.is_some() =>
            {
                if let Err(err) = session.save().await {
                    debug!(error = %err, "autosave failed; session holds the error");
                }
            }

            _ = poll.tick() => {
                session.poll().await;
            }
        }
    }
}

/// Run one command to completion. Errors are already recorded on the
/// session (or, for patch failures, are render data) — here they only get a
/// log line.
async fn dispatch<S: VersionedStore>(session: &mut DocumentSession<S>, command: Command) {
    let result = match command {
        Command::Open(path) => session.open(&path).await,
        Command::Edit(content) => {
            session.edit(content);
            Ok(())
        }
        Command::Save => session.save().await,
        Command::AcceptEdit(edit) => session.accept_edit(&edit).await,
        Command::RejectEdit(edit_id) => session.reject_edit(&edit_id).await,
        Command::AddComment {
            anchor,
            text,
            parent_id,
        } => session
            .add_comment(&anchor, &text, parent_id.as_deref())
            .await
            .map(|_| ()),
        Command::ResolveComment(comment_id) => session.resolve_comment(&comment_id).await,
    };

    if let Err(err) = result {
        debug!(error = %err, "command failed");
    }
}
