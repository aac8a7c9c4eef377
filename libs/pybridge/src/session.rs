// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session lifecycle manager.
//!
//! One tokio task owns the session table; everything reaches it through
//! commands on an unbounded channel, so register/unregister/owner-death
//! cannot race each other for the same session. Owner liveness arrives as
//! [`Command::OwnerDown`] notifications sent by [`OwnerGuard`] drops —
//! normal return, panic unwind, and task abort all fire it.
//!
//! Teardown always completes locally before it is considered finished;
//! the remote release it triggers is spawned fire-and-forget and its
//! failures are telemetry only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::error::{BridgeError, Result};
use crate::owner::OwnerGuard;
use crate::transport::Transport;
use pybridge_wire::Ref;

/// Per-session limits, accepted at creation. `max_refs` is enforced here;
/// `ttl` is carried for the external session store and never enforced by
/// this manager.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub max_refs: Option<usize>,
    pub ttl: Option<Duration>,
}

/// Why a session was torn down, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    /// Explicit `release_session`.
    Manual,
    /// The last owner terminated.
    OwnerDied,
    /// `unregister_session`: local bookkeeping only, no remote release.
    Unregistered,
}

impl CleanupReason {
    fn as_str(self) -> &'static str {
        match self {
            CleanupReason::Manual => "manual",
            CleanupReason::OwnerDied => "owner_died",
            CleanupReason::Unregistered => "unregistered",
        }
    }
}

/// Observability snapshot of one session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub owners: usize,
    pub refs: usize,
    pub age: Duration,
}

pub(crate) enum Command {
    Create {
        session_id: String,
        options: SessionOptions,
        reply: oneshot::Sender<()>,
    },
    RegisterOwner {
        session_id: String,
        owner_id: String,
        options: SessionOptions,
        reply: oneshot::Sender<()>,
    },
    RegisterRef {
        session_id: String,
        reference: Ref,
        /// Absent for the decoder's best-effort path, where failures are
        /// logged instead of reported.
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Release {
        session_id: String,
        reply: oneshot::Sender<bool>,
    },
    Unregister {
        session_id: String,
        reply: oneshot::Sender<bool>,
    },
    OwnerDown {
        session_id: String,
        owner_id: String,
        deliberate: bool,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
}

struct SessionEntry {
    owners: HashSet<String>,
    /// Distinguishes "created ownerless" (alive until released) from
    /// "all owners died" (torn down).
    had_owner: bool,
    refs: HashMap<String, Ref>,
    created_at: Instant,
    options: SessionOptions,
}

impl SessionEntry {
    fn new(options: SessionOptions) -> Self {
        Self {
            owners: HashSet::new(),
            had_owner: false,
            refs: HashMap::new(),
            created_at: Instant::now(),
            options,
        }
    }
}

/// Cloneable handle to the session actor.
#[derive(Clone)]
pub struct SessionManager {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionManager {
    pub fn spawn(transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, transport));
        Self { tx }
    }

    /// Creates the session if unknown. A session created this way has no
    /// owners and stays alive until explicitly released.
    pub async fn create_session(&self, session_id: &str, options: SessionOptions) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Create {
            session_id: session_id.to_string(),
            options,
            reply,
        })?;
        rx.await.map_err(|_| unavailable())
    }

    /// Registers a new owner of the session (creating the session if
    /// needed) and returns the guard whose drop is the owner-down signal.
    /// Idempotent per `(session, owner)` — re-sending the same owner id is
    /// harmless, which the returned guard never does anyway.
    pub async fn register_session(
        &self,
        session_id: &str,
        options: SessionOptions,
    ) -> Result<OwnerGuard> {
        let owner_id = cuid2::create_id();
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterOwner {
            session_id: session_id.to_string(),
            owner_id: owner_id.clone(),
            options,
            reply,
        })?;
        rx.await.map_err(|_| unavailable())?;
        Ok(OwnerGuard::new(owner_id, session_id.to_string(), self.tx.clone()))
    }

    pub async fn register_ref(&self, session_id: &str, reference: Ref) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterRef {
            session_id: session_id.to_string(),
            reference,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| unavailable())?
    }

    /// Decoder path: record the ref if its session is known, log otherwise.
    /// Never fails — ref tracking is best-effort from the codec's point of
    /// view.
    pub fn register_ref_best_effort(&self, reference: &Ref) {
        let _ = self.tx.send(Command::RegisterRef {
            session_id: reference.session_id.clone(),
            reference: reference.clone(),
            reply: None,
        });
    }

    /// Immediate teardown regardless of remaining owners. Returns whether
    /// the session existed.
    pub async fn release_session(&self, session_id: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Release {
            session_id: session_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| unavailable())
    }

    /// Removes local bookkeeping without asking the remote side to release
    /// anything — for callers that already did the remote cleanup.
    pub async fn unregister_session(&self, session_id: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unregister {
            session_id: session_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| unavailable())
    }

    pub async fn snapshot(&self) -> Result<Vec<SessionInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| unavailable())
    }

    pub async fn session_count(&self) -> Result<usize> {
        Ok(self.snapshot().await?.len())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| unavailable())
    }
}

fn unavailable() -> BridgeError {
    BridgeError::Runtime("session manager is not running".into())
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, transport: Arc<dyn Transport>) {
    let mut sessions: HashMap<String, SessionEntry> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Create { session_id, options, reply } => {
                sessions
                    .entry(session_id.clone())
                    .or_insert_with(|| {
                        tracing::debug!(%session_id, "session created");
                        SessionEntry::new(options)
                    });
                let _ = reply.send(());
            }
            Command::RegisterOwner { session_id, owner_id, options, reply } => {
                let entry = sessions
                    .entry(session_id.clone())
                    .or_insert_with(|| SessionEntry::new(options));
                if entry.owners.insert(owner_id.clone()) {
                    entry.had_owner = true;
                    tracing::debug!(%session_id, %owner_id, owners = entry.owners.len(), "owner registered");
                }
                let _ = reply.send(());
            }
            Command::RegisterRef { session_id, reference, reply } => {
                let result = register_ref(&mut sessions, &session_id, reference);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            tracing::debug!(%session_id, %err, "best-effort ref registration skipped");
                        }
                    }
                }
            }
            Command::Release { session_id, reply } => {
                let existed = teardown(&mut sessions, &session_id, CleanupReason::Manual, &transport);
                let _ = reply.send(existed);
            }
            Command::Unregister { session_id, reply } => {
                let existed =
                    teardown(&mut sessions, &session_id, CleanupReason::Unregistered, &transport);
                let _ = reply.send(existed);
            }
            Command::OwnerDown { session_id, owner_id, deliberate } => {
                let Some(entry) = sessions.get_mut(&session_id) else {
                    // Session already gone; late guard drops are expected
                    // after a manual release.
                    continue;
                };
                if !entry.owners.remove(&owner_id) {
                    continue;
                }
                tracing::debug!(
                    session_id,
                    owner_id,
                    deliberate,
                    remaining = entry.owners.len(),
                    "owner terminated"
                );
                if entry.owners.is_empty() && entry.had_owner {
                    teardown(&mut sessions, &session_id, CleanupReason::OwnerDied, &transport);
                }
            }
            Command::Snapshot { reply } => {
                let infos = sessions
                    .iter()
                    .map(|(id, entry)| SessionInfo {
                        session_id: id.clone(),
                        owners: entry.owners.len(),
                        refs: entry.refs.len(),
                        age: entry.created_at.elapsed(),
                    })
                    .collect();
                let _ = reply.send(infos);
            }
        }
    }
}

fn register_ref(
    sessions: &mut HashMap<String, SessionEntry>,
    session_id: &str,
    reference: Ref,
) -> Result<()> {
    let entry = sessions
        .get_mut(session_id)
        .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
    if let Some(max_refs) = entry.options.max_refs {
        if entry.refs.len() >= max_refs && !entry.refs.contains_key(&reference.id) {
            return Err(BridgeError::RefLimitExceeded {
                session_id: session_id.to_string(),
                max_refs,
            });
        }
    }
    entry.refs.insert(reference.id.clone(), reference);
    Ok(())
}

/// Removes the session and, except for `Unregistered`, spawns the
/// best-effort remote release. Returns whether the session existed.
fn teardown(
    sessions: &mut HashMap<String, SessionEntry>,
    session_id: &str,
    reason: CleanupReason,
    transport: &Arc<dyn Transport>,
) -> bool {
    let Some(entry) = sessions.remove(session_id) else {
        return false;
    };
    tracing::info!(
        session_id,
        reason = reason.as_str(),
        owners = entry.owners.len(),
        refs = entry.refs.len(),
        "session torn down"
    );
    if reason != CleanupReason::Unregistered {
        let transport = Arc::clone(transport);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = transport.release_session(&session_id).await {
                tracing::warn!(%session_id, %err, "remote session release failed");
            }
        });
    }
    true
}
