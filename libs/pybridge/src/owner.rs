// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! RAII owner handles.
//!
//! An owner is any concurrently executing unit whose liveness keeps a
//! session's refs (and its callbacks) valid. Holding an [`OwnerGuard`]
//! *is* being monitored: when the guard drops — clean return, panic
//! unwind, task abort — the owning actors get the owner-down
//! notification. No polling, no joins.

use tokio::sync::mpsc;

use crate::callback;
use crate::session;

pub struct OwnerGuard {
    owner_id: String,
    session_id: String,
    sessions: mpsc::UnboundedSender<session::Command>,
    callbacks: Option<mpsc::UnboundedSender<callback::Command>>,
    notified: bool,
}

impl OwnerGuard {
    pub(crate) fn new(
        owner_id: String,
        session_id: String,
        sessions: mpsc::UnboundedSender<session::Command>,
    ) -> Self {
        Self {
            owner_id,
            session_id,
            sessions,
            callbacks: None,
            notified: false,
        }
    }

    /// Also deliver this owner's termination to the callback registry, so
    /// callbacks registered under the owner die with it.
    pub(crate) fn watch_callbacks(
        mut self,
        callbacks: mpsc::UnboundedSender<callback::Command>,
    ) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Deliberate termination. Same notification path as a drop; the flag
    /// only changes how telemetry reads.
    pub fn release(mut self) {
        self.notify(true);
    }

    fn notify(&mut self, deliberate: bool) {
        if self.notified {
            return;
        }
        self.notified = true;
        let _ = self.sessions.send(session::Command::OwnerDown {
            session_id: self.session_id.clone(),
            owner_id: self.owner_id.clone(),
            deliberate,
        });
        if let Some(callbacks) = &self.callbacks {
            let _ = callbacks.send(callback::Command::OwnerDown {
                owner_id: self.owner_id.clone(),
            });
        }
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        self.notify(false);
    }
}
