//! Relay router: owns the set of live signaling channels and forwards frames between them.
//!
//! The channel set is only ever touched by the router task. Connects, disconnects and
//! forwards are commands on one queue, so a forward always sees a consistent snapshot
//! and a channel removed by an earlier disconnect can never be a target.
//!
//! Two addressing scopes exist:
//! - [`Scope::Global`]: broadcast to every other channel in the global scope.
//! - [`Scope::Session`]: an explicit session holding at most two channels; frames go
//!   to the other member only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use vrcast_common::{Error, RelayNotice, Result};

/// Maximum members of a paired session.
pub const SESSION_CAPACITY: usize = 2;

pub type ChannelId = u64;

/// Text frames queued for one socket's writer task.
pub type Outbox = mpsc::Sender<Arc<str>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Session(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub active_channels: usize,
    pub active_sessions: usize,
}

struct Member {
    scope: Scope,
    outbox: Outbox,
}

/// The router's state. Synchronous so it can be exercised without a runtime.
#[derive(Default)]
pub struct RouterState {
    channels: HashMap<ChannelId, Member>,
    sessions: HashMap<String, Vec<ChannelId>>,
    next_id: ChannelId,
}

impl RouterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel to the live set. Paired sessions refuse a third member.
    pub fn connect(&mut self, scope: Scope, outbox: Outbox) -> Result<ChannelId> {
        if let Scope::Session(session) = &scope {
            let members = self.sessions.get(session).map_or(0, Vec::len);
            if members >= SESSION_CAPACITY {
                return Err(Error::SessionFull(session.clone()));
            }
        }

        self.next_id += 1;
        let id = self.next_id;

        if let Scope::Session(session) = &scope {
            let members = self.sessions.entry(session.clone()).or_default();
            let existing = members.clone();
            members.push(id);
            if !existing.is_empty() {
                // Both sides learn the pair is complete.
                self.notify(&existing, &RelayNotice::PeerJoined);
                send_notice(&outbox, &RelayNotice::PeerJoined);
            }
        }

        self.channels.insert(id, Member { scope, outbox });
        Ok(id)
    }

    /// Removes a channel. Unknown ids are ignored.
    pub fn disconnect(&mut self, id: ChannelId) {
        let Some(member) = self.channels.remove(&id) else {
            return;
        };

        if let Scope::Session(session) = member.scope {
            if let Some(members) = self.sessions.get_mut(&session) {
                members.retain(|m| *m != id);
                if members.is_empty() {
                    self.sessions.remove(&session);
                } else {
                    let remaining = members.clone();
                    self.notify(&remaining, &RelayNotice::PeerLeft);
                }
            }
        }
    }

    /// Forwards `frame` to every other channel in the sender's scope.
    ///
    /// Returns how many outboxes accepted the frame. Closed or full targets are skipped.
    pub fn forward(&self, from: ChannelId, frame: &Arc<str>) -> usize {
        let Some(sender) = self.channels.get(&from) else {
            debug!("forward from unknown channel {} dropped", from);
            return 0;
        };

        let targets = self.targets(from, &sender.scope);
        let mut delivered = 0;
        for target in targets {
            let Some(member) = self.channels.get(&target) else {
                continue;
            };
            match member.outbox.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("outbox full for channel {}, dropping frame", target)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("channel {} closed before forward", target)
                }
            }
        }
        delivered
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            active_channels: self.channels.len(),
            active_sessions: self.sessions.len(),
        }
    }

    fn targets(&self, from: ChannelId, scope: &Scope) -> Vec<ChannelId> {
        match scope {
            Scope::Global => self
                .channels
                .iter()
                .filter(|(id, member)| **id != from && member.scope == Scope::Global)
                .map(|(id, _)| *id)
                .collect(),
            Scope::Session(session) => self
                .sessions
                .get(session)
                .map(|members| members.iter().copied().filter(|id| *id != from).collect())
                .unwrap_or_default(),
        }
    }

    fn notify(&self, ids: &[ChannelId], notice: &RelayNotice) {
        for id in ids {
            if let Some(member) = self.channels.get(id) {
                send_notice(&member.outbox, notice);
            }
        }
    }
}

fn send_notice(outbox: &Outbox, notice: &RelayNotice) {
    match notice.to_json() {
        Ok(json) => {
            let _ = outbox.try_send(Arc::from(json));
        }
        Err(err) => warn!("failed to encode relay notice: {}", err),
    }
}

enum Command {
    Connect {
        scope: Scope,
        outbox: Outbox,
        reply: oneshot::Sender<Result<ChannelId>>,
    },
    Disconnect {
        id: ChannelId,
    },
    Forward {
        from: ChannelId,
        frame: Arc<str>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
}

/// Cloneable handle to the router task.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl RouterHandle {
    /// Spawns the router task on the current runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        tokio::spawn(async move {
            let mut state = RouterState::new();
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Connect {
                        scope,
                        outbox,
                        reply,
                    } => {
                        let result = state.connect(scope.clone(), outbox);
                        match &result {
                            Ok(id) => info!("channel {} connected ({:?})", id, scope),
                            Err(err) => info!("channel rejected ({:?}): {}", scope, err),
                        }
                        if let Ok(id) = &result {
                            let id = *id;
                            if reply.send(result).is_err() {
                                // Caller gave up before we answered.
                                state.disconnect(id);
                            }
                        } else {
                            let _ = reply.send(result);
                        }
                    }
                    Command::Disconnect { id } => {
                        state.disconnect(id);
                        info!("channel {} disconnected", id);
                    }
                    Command::Forward { from, frame } => {
                        let delivered = state.forward(from, &frame);
                        debug!("forwarded frame from {} to {} channel(s)", from, delivered);
                    }
                    Command::Stats { reply } => {
                        let _ = reply.send(state.stats());
                    }
                }
            }
            debug!("router task stopped");
        });

        Self { tx }
    }

    pub async fn connect(&self, scope: Scope, outbox: Outbox) -> Result<ChannelId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Connect {
                scope,
                outbox,
                reply,
            })
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    pub fn disconnect(&self, id: ChannelId) {
        let _ = self.tx.send(Command::Disconnect { id });
    }

    pub fn forward(&self, from: ChannelId, frame: Arc<str>) {
        let _ = self.tx.send(Command::Forward { from, frame });
    }

    pub async fn stats(&self) -> RouterStats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Stats { reply }).is_err() {
            return RouterStats::default();
        }
        rx.await.unwrap_or_default()
    }
}
