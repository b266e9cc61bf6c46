//! Negotiation driver: one task per client that owns the state machine.
//!
//! The task admits one input at a time (relay message, media event, user command,
//! deadline), runs it through [`Negotiation::handle`] and performs the resulting
//! effects to completion before looking at the next input. That makes "is the remote
//! description set?" and the flush that follows it a single step relative to any
//! candidate arrival.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vrcast_common::{Error, RelayNotice, Result};

use crate::media::{MediaEvent, MediaSession};
use crate::negotiation::{Effect, Event, Negotiation, Phase, Role};
use crate::signaling::{ChannelEvent, SignalingChannel};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub negotiation_timeout: Duration,
    /// Paired sessions: hold a requested begin until the relay reports `peer-joined`.
    /// The relay does not queue for late joiners, so an early offer would be lost.
    pub wait_for_peer: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            wait_for_peer: false,
        }
    }
}

enum Command {
    Begin,
    Shutdown,
}

/// Handle to a running negotiation.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<Phase>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Starts sharing. Only meaningful for the streamer.
    pub fn begin(&self) -> Result<()> {
        self.commands
            .send(Command::Begin)
            .map_err(|_| Error::ChannelClosed)
    }

    pub fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    /// A receiver that observes every phase change, for the UI layer.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Waits until negotiation connects or fails.
    pub async fn wait_settled(&mut self) -> Result<()> {
        let phase = self
            .phase
            .wait_for(Phase::is_terminal)
            .await
            .map_err(|_| Error::ChannelClosed)?
            .clone();
        match phase {
            Phase::Failed(reason) => Err(reason.to_error()),
            _ => Ok(()),
        }
    }

    /// Stops the driver and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

/// Spawns the driver for one client.
///
/// `inbound` is the receiver paired with `channel`; `media_events` comes from the
/// media session's constructor.
pub fn spawn_session<M>(
    role: Role,
    media: M,
    media_events: mpsc::Receiver<MediaEvent>,
    channel: SignalingChannel,
    inbound: mpsc::Receiver<ChannelEvent>,
    options: SessionOptions,
) -> SessionHandle
where
    M: MediaSession + 'static,
{
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (phase_tx, phase) = watch::channel(Phase::Idle);

    let driver = Driver {
        machine: Negotiation::new(role),
        media,
        media_events,
        channel,
        inbound,
        commands,
        phase_tx,
        negotiation_timeout: options.negotiation_timeout,
        wait_for_peer: options.wait_for_peer,
        peer_present: false,
        begin_requested: false,
        deadline: None,
    };
    let task = tokio::spawn(driver.run());

    SessionHandle {
        commands: commands_tx,
        phase,
        task,
    }
}

struct Driver<M> {
    machine: Negotiation,
    media: M,
    media_events: mpsc::Receiver<MediaEvent>,
    channel: SignalingChannel,
    inbound: mpsc::Receiver<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    phase_tx: watch::Sender<Phase>,
    negotiation_timeout: Duration,
    wait_for_peer: bool,
    peer_present: bool,
    begin_requested: bool,
    deadline: Option<Instant>,
}

impl<M: MediaSession> Driver<M> {
    async fn run(mut self) {
        let role = self.machine.role();
        info!("negotiation driver started as {:?}", role);

        let mut inbound_open = true;
        let mut media_open = true;

        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Begin) if self.wait_for_peer && !self.peer_present => {
                        info!("begin requested, waiting for a peer to join");
                        self.begin_requested = true;
                        continue;
                    }
                    Some(Command::Begin) => Event::Begin,
                    Some(Command::Shutdown) | None => break,
                },
                inbound = self.inbound.recv(), if inbound_open => match inbound {
                    Some(ChannelEvent::Signal(message)) => {
                        debug!("received {}", message.event_name());
                        Event::Remote(message)
                    }
                    Some(ChannelEvent::Notice(RelayNotice::PeerLeft)) => {
                        info!("peer left the session");
                        self.peer_present = false;
                        if self.wait_for_peer && *self.machine.phase() == Phase::Idle {
                            // Nothing negotiated yet; keep waiting for the next peer.
                            continue;
                        }
                        Event::PeerLost
                    }
                    Some(ChannelEvent::Notice(RelayNotice::PeerJoined)) => {
                        info!("peer joined the session");
                        self.peer_present = true;
                        if !std::mem::take(&mut self.begin_requested) {
                            continue;
                        }
                        Event::Begin
                    }
                    Some(ChannelEvent::Notice(RelayNotice::SessionFull { session })) => {
                        warn!("session {} already has two members", session);
                        continue;
                    }
                    Some(ChannelEvent::Closed) | None => {
                        inbound_open = false;
                        info!("signaling channel closed");
                        Event::PeerLost
                    }
                },
                media = self.media_events.recv(), if media_open => match media {
                    Some(MediaEvent::LocalCandidate(candidate)) => Event::LocalCandidate(candidate),
                    Some(MediaEvent::Connected) => Event::MediaConnected,
                    Some(MediaEvent::Failed(reason)) => Event::AdapterFailed(reason),
                    Some(MediaEvent::Disconnected) => {
                        // Reconnection after an established drop is not attempted.
                        warn!("media connection dropped");
                        continue;
                    }
                    Some(MediaEvent::RemoteTrack(track)) => {
                        info!("receiving {} track {}", track.kind, track.id);
                        continue;
                    }
                    None => {
                        media_open = false;
                        continue;
                    }
                },
                _ = timer => {
                    self.deadline = None;
                    warn!("negotiation timed out after {:?}", self.negotiation_timeout);
                    Event::TimedOut
                }
            };

            self.dispatch(event).await;
            if self.machine.phase().is_failed() {
                break;
            }
        }

        self.channel.close();
        info!("negotiation driver stopped in phase {:?}", self.machine.phase());
    }

    /// Runs `event` and every follow-up event its effects produce.
    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let effects = match self.machine.handle(event) {
                Ok(effects) => effects,
                Err(err) => {
                    warn!("discarded: {}", err);
                    continue;
                }
            };

            for effect in effects {
                match self.apply(effect).await {
                    Ok(Some(follow_up)) => queue.push_back(follow_up),
                    Ok(None) => {}
                    Err(err) => {
                        error!("media session rejected negotiation step: {}", err);
                        queue.clear();
                        queue.push_back(Event::AdapterFailed(err.to_string()));
                        break;
                    }
                }
            }

            self.publish();
        }
    }

    async fn apply(&mut self, effect: Effect) -> Result<Option<Event>> {
        match effect {
            Effect::ArmTimeout => {
                self.deadline = Some(Instant::now() + self.negotiation_timeout);
            }
            Effect::CreateOffer => {
                let sdp = self.media.create_offer().await?;
                return Ok(Some(Event::LocalOfferCreated(sdp)));
            }
            Effect::CreateAnswer => {
                let sdp = self.media.create_answer().await?;
                return Ok(Some(Event::LocalAnswerCreated(sdp)));
            }
            Effect::SetLocalDescription(description) => {
                self.media.set_local_description(&description).await?;
            }
            Effect::SetRemoteDescription(description) => {
                self.media.set_remote_description(&description).await?;
            }
            Effect::AddCandidate(candidate) => {
                self.media.add_ice_candidate(&candidate).await?;
            }
            Effect::Send(message) => {
                if let Err(err) = self.channel.send(&message) {
                    warn!("could not send {}: {}", message.event_name(), err);
                }
            }
            Effect::Teardown => {
                self.deadline = None;
                if let Err(err) = self.media.close().await {
                    warn!("media session close failed: {}", err);
                }
            }
        }
        Ok(None)
    }

    fn publish(&mut self) {
        let phase = self.machine.phase().clone();
        if phase.is_terminal() {
            self.deadline = None;
        }
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            info!("negotiation phase {:?} -> {:?}", current, phase);
            *current = phase;
            true
        });
    }
}
