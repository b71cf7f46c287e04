//! Live sessions by id
//!
//! Entries are inserted by the accept loop and removed by the session task
//! when its connection ends. Lookups from `Server` handles treat a missing
//! entry as an already closed session.

use std::collections::HashMap;
use std::sync::Arc;

use nodelink_protocol::SessionState;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connection::Command;
use crate::SessionId;

#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) state: watch::Receiver<SessionState>,
    pub(crate) task: JoinHandle<()>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Registry {
    sessions: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
}

impl Registry {
    /// Inserts the handle built by `spawn` while holding the lock
    ///
    /// The spawned task cannot remove its own entry before it was inserted.
    pub(crate) fn insert_with(&self, id: SessionId, spawn: impl FnOnce() -> SessionHandle) {
        let mut sessions = self.sessions.lock();
        sessions.insert(id, spawn());
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.lock().remove(&id)
    }

    pub(crate) fn commands(&self, id: SessionId) -> Option<mpsc::UnboundedSender<Command>> {
        self.sessions.lock().get(&id).map(|s| s.commands.clone())
    }

    pub(crate) fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.lock().get(&id).map(|s| *s.state.borrow())
    }

    pub(crate) fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn drain(&self) -> Vec<(SessionId, SessionHandle)> {
        self.sessions.lock().drain().collect()
    }
}
