//! Negotiation state machine.
//!
//! Sequences the offer/answer exchange against asynchronously discovered candidates:
//! - Streamer: `Idle -> LocalOfferPending -> LocalOfferSet -> Connected`
//! - Viewer:   `Idle -> RemoteOfferReceived -> LocalAnswerSet -> Connected`
//! - `Failed` from any non-terminal phase
//!
//! [`Negotiation::handle`] is pure: it takes one event and returns the effects the
//! driver must perform, in order. Nothing here touches the network or the media engine.

use vrcast_common::{Error, IceCandidate, Result, SessionDescription, SignalMessage};

use crate::candidate::CandidateBuffer;

/// Which side of the exchange this client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Shares a display and sends the offer.
    Streamer,
    /// Receives the offer and renders the stream.
    Viewer,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        matches!(self, Role::Streamer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The peer, or our own signaling channel, went away mid-negotiation.
    PeerLost,
    /// The media engine rejected a description or candidate.
    Negotiation(String),
    /// Negotiation did not finish within the configured bound.
    Timeout,
}

impl FailureReason {
    pub fn to_error(&self) -> Error {
        match self {
            FailureReason::PeerLost => Error::PeerLost,
            FailureReason::Negotiation(reason) => Error::NegotiationFailed(reason.clone()),
            FailureReason::Timeout => Error::timeout("negotiation did not complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Streamer asked the engine for an offer.
    LocalOfferPending,
    /// Offer applied locally and sent; waiting for the answer.
    LocalOfferSet,
    /// Viewer applied the remote offer and is producing an answer.
    RemoteOfferReceived,
    /// Answer applied locally and sent; waiting for connectivity.
    LocalAnswerSet,
    Connected,
    Failed(FailureReason),
}

impl Phase {
    pub fn is_failed(&self) -> bool {
        matches!(self, Phase::Failed(_))
    }

    /// Connected and Failed end negotiation; nothing moves the machine back out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Connected | Phase::Failed(_))
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Local user started sharing (streamer only).
    Begin,
    LocalOfferCreated(String),
    LocalAnswerCreated(String),
    /// A message from the peer, via the relay.
    Remote(SignalMessage),
    /// The media engine discovered a local candidate.
    LocalCandidate(IceCandidate),
    /// The media engine reports an established connection.
    MediaConnected,
    /// A media engine call failed.
    AdapterFailed(String),
    PeerLost,
    TimedOut,
}

/// Work the driver performs on behalf of the machine, in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start the negotiation deadline.
    ArmTimeout,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddCandidate(IceCandidate),
    Send(SignalMessage),
    /// Release the media session after a failure.
    Teardown,
}

/// Per-client negotiation state. Never shared between clients.
#[derive(Debug)]
pub struct Negotiation {
    role: Role,
    phase: Phase,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending: CandidateBuffer,
}

impl Negotiation {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: Phase::Idle,
            local_description: None,
            remote_description: None,
            pending: CandidateBuffer::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Applies one event.
    ///
    /// `Err(ProtocolViolation)` means the event was discarded and nothing changed.
    /// Once failed, every event is ignored.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>> {
        if self.phase.is_failed() {
            return Ok(Vec::new());
        }

        match event {
            Event::Begin => self.begin(),
            Event::LocalOfferCreated(sdp) => self.local_offer_created(sdp),
            Event::LocalAnswerCreated(sdp) => self.local_answer_created(sdp),
            Event::Remote(message) => {
                message.validate()?;
                match message {
                    SignalMessage::Offer(offer) => self.remote_offer(offer),
                    SignalMessage::Answer(answer) => self.remote_answer(answer),
                    SignalMessage::Candidate(candidate) => Ok(self.remote_candidate(candidate)),
                }
            }
            Event::LocalCandidate(candidate) => {
                Ok(vec![Effect::Send(SignalMessage::Candidate(candidate))])
            }
            Event::MediaConnected => {
                if self.phase == Phase::LocalAnswerSet {
                    self.phase = Phase::Connected;
                }
                Ok(Vec::new())
            }
            Event::AdapterFailed(reason) => Ok(self.fail(FailureReason::Negotiation(reason))),
            Event::PeerLost => Ok(self.fail_unless_connected(FailureReason::PeerLost)),
            Event::TimedOut => Ok(self.fail_unless_connected(FailureReason::Timeout)),
        }
    }

    fn begin(&mut self) -> Result<Vec<Effect>> {
        if !self.role.is_initiator() {
            return Err(Error::protocol("only the streamer begins negotiation"));
        }
        if self.phase != Phase::Idle {
            return Err(self.unexpected("begin"));
        }
        self.phase = Phase::LocalOfferPending;
        Ok(vec![Effect::ArmTimeout, Effect::CreateOffer])
    }

    fn local_offer_created(&mut self, sdp: String) -> Result<Vec<Effect>> {
        if self.phase != Phase::LocalOfferPending {
            return Err(self.unexpected("local offer"));
        }
        let offer = SessionDescription::offer(sdp);
        self.local_description = Some(offer.clone());
        self.phase = Phase::LocalOfferSet;
        Ok(vec![
            Effect::SetLocalDescription(offer.clone()),
            Effect::Send(SignalMessage::Offer(offer)),
        ])
    }

    fn remote_answer(&mut self, answer: SessionDescription) -> Result<Vec<Effect>> {
        if self.phase != Phase::LocalOfferSet {
            return Err(self.unexpected("answer"));
        }
        let effects = self.set_remote(answer);
        self.phase = Phase::Connected;
        Ok(effects)
    }

    fn remote_offer(&mut self, offer: SessionDescription) -> Result<Vec<Effect>> {
        if self.role.is_initiator() || self.phase != Phase::Idle {
            return Err(self.unexpected("offer"));
        }
        let mut effects = vec![Effect::ArmTimeout];
        effects.extend(self.set_remote(offer));
        self.phase = Phase::RemoteOfferReceived;
        effects.push(Effect::CreateAnswer);
        Ok(effects)
    }

    fn local_answer_created(&mut self, sdp: String) -> Result<Vec<Effect>> {
        if self.phase != Phase::RemoteOfferReceived {
            return Err(self.unexpected("local answer"));
        }
        let answer = SessionDescription::answer(sdp);
        self.local_description = Some(answer.clone());
        self.phase = Phase::LocalAnswerSet;
        Ok(vec![
            Effect::SetLocalDescription(answer.clone()),
            Effect::Send(SignalMessage::Answer(answer)),
        ])
    }

    fn remote_candidate(&mut self, candidate: IceCandidate) -> Vec<Effect> {
        if self.remote_description.is_some() {
            vec![Effect::AddCandidate(candidate)]
        } else {
            self.pending.enqueue(candidate);
            Vec::new()
        }
    }

    /// Records the remote description and flushes early candidates right behind it.
    fn set_remote(&mut self, description: SessionDescription) -> Vec<Effect> {
        self.remote_description = Some(description.clone());
        let mut effects = vec![Effect::SetRemoteDescription(description)];
        self.pending
            .flush_into(|candidate| effects.push(Effect::AddCandidate(candidate)));
        effects
    }

    fn fail(&mut self, reason: FailureReason) -> Vec<Effect> {
        self.pending.discard();
        self.phase = Phase::Failed(reason);
        vec![Effect::Teardown]
    }

    fn fail_unless_connected(&mut self, reason: FailureReason) -> Vec<Effect> {
        if self.phase == Phase::Connected {
            return Vec::new();
        }
        self.fail(reason)
    }

    fn unexpected(&self, what: &str) -> Error {
        Error::protocol(format!(
            "{what} not expected by {:?} in phase {:?}",
            self.role, self.phase
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(
            format!("candidate:{n} 1 udp 1 10.0.0.{n} 9 typ host"),
            Some("0".into()),
            Some(0),
        )
    }

    fn remote_candidate(n: u32) -> Event {
        Event::Remote(SignalMessage::Candidate(candidate(n)))
    }

    fn applied(effects: &[Effect]) -> Vec<IceCandidate> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn streamer_awaiting_answer() -> Negotiation {
        let mut n = Negotiation::new(Role::Streamer);
        n.handle(Event::Begin).unwrap();
        n.handle(Event::LocalOfferCreated("o1".into())).unwrap();
        assert_eq!(n.phase(), &Phase::LocalOfferSet);
        n
    }

    #[test]
    fn test_streamer_happy_path() {
        let mut n = Negotiation::new(Role::Streamer);

        let effects = n.handle(Event::Begin).unwrap();
        assert_eq!(effects, vec![Effect::ArmTimeout, Effect::CreateOffer]);
        assert_eq!(n.phase(), &Phase::LocalOfferPending);

        let effects = n.handle(Event::LocalOfferCreated("o1".into())).unwrap();
        let offer = SessionDescription::offer("o1");
        assert_eq!(
            effects,
            vec![
                Effect::SetLocalDescription(offer.clone()),
                Effect::Send(SignalMessage::Offer(offer)),
            ]
        );
        assert_eq!(n.local_description(), Some(&SessionDescription::offer("o1")));
        assert_eq!(n.remote_description(), None);

        let effects = n
            .handle(Event::Remote(SignalMessage::Answer(SessionDescription::answer("a1"))))
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::SetRemoteDescription(SessionDescription::answer("a1"))]
        );
        assert_eq!(n.phase(), &Phase::Connected);
    }

    #[test]
    fn test_viewer_happy_path() {
        let mut n = Negotiation::new(Role::Viewer);

        let effects = n
            .handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o1"))))
            .unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::ArmTimeout,
                Effect::SetRemoteDescription(SessionDescription::offer("o1")),
                Effect::CreateAnswer,
            ]
        );
        assert_eq!(n.phase(), &Phase::RemoteOfferReceived);

        let effects = n.handle(Event::LocalAnswerCreated("a1".into())).unwrap();
        let answer = SessionDescription::answer("a1");
        assert_eq!(
            effects,
            vec![
                Effect::SetLocalDescription(answer.clone()),
                Effect::Send(SignalMessage::Answer(answer)),
            ]
        );
        assert_eq!(n.phase(), &Phase::LocalAnswerSet);

        n.handle(Event::MediaConnected).unwrap();
        assert_eq!(n.phase(), &Phase::Connected);
    }

    #[test]
    fn test_viewer_buffers_candidates_until_offer() {
        let mut n = Negotiation::new(Role::Viewer);
        assert!(n.handle(remote_candidate(1)).unwrap().is_empty());
        assert!(n.handle(remote_candidate(2)).unwrap().is_empty());
        assert_eq!(n.buffered_candidates(), 2);

        let effects = n
            .handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o1"))))
            .unwrap();
        // Remote description first, then the early candidates in arrival order, then the answer.
        assert_eq!(effects[1], Effect::SetRemoteDescription(SessionDescription::offer("o1")));
        assert_eq!(applied(&effects), vec![candidate(1), candidate(2)]);
        assert_eq!(effects.last(), Some(&Effect::CreateAnswer));
        assert_eq!(n.buffered_candidates(), 0);

        // Later candidates go straight through.
        assert_eq!(
            n.handle(remote_candidate(3)).unwrap(),
            vec![Effect::AddCandidate(candidate(3))]
        );
    }

    #[test]
    fn test_streamer_buffers_candidates_until_answer() {
        let mut n = streamer_awaiting_answer();
        n.handle(remote_candidate(7)).unwrap();
        n.handle(remote_candidate(8)).unwrap();

        let effects = n
            .handle(Event::Remote(SignalMessage::Answer(SessionDescription::answer("a1"))))
            .unwrap();
        assert_eq!(effects[0], Effect::SetRemoteDescription(SessionDescription::answer("a1")));
        assert_eq!(applied(&effects), vec![candidate(7), candidate(8)]);
    }

    #[test]
    fn test_candidate_order_for_every_interleaving() {
        // Remote description lands after k of the n candidates, for every k.
        let total = 6;
        for k in 0..=total {
            let mut n = Negotiation::new(Role::Viewer);
            let mut seen = Vec::new();
            for i in 0..k {
                seen.extend(applied(&n.handle(remote_candidate(i)).unwrap()));
            }
            seen.extend(applied(
                &n.handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o"))))
                    .unwrap(),
            ));
            for i in k..total {
                seen.extend(applied(&n.handle(remote_candidate(i)).unwrap()));
            }
            assert_eq!(seen, (0..total).map(candidate).collect::<Vec<_>>(), "k = {k}");
        }
    }

    #[test]
    fn test_answer_outside_local_offer_set_is_discarded() {
        let answer = || Event::Remote(SignalMessage::Answer(SessionDescription::answer("late")));

        let mut idle = Negotiation::new(Role::Streamer);
        assert!(matches!(idle.handle(answer()), Err(Error::ProtocolViolation(_))));
        assert_eq!(idle.phase(), &Phase::Idle);
        assert!(idle.remote_description().is_none());

        let mut pending = Negotiation::new(Role::Streamer);
        pending.handle(Event::Begin).unwrap();
        assert!(pending.handle(answer()).is_err());
        assert_eq!(pending.phase(), &Phase::LocalOfferPending);
        assert!(pending.remote_description().is_none());

        let mut connected = streamer_awaiting_answer();
        connected
            .handle(Event::Remote(SignalMessage::Answer(SessionDescription::answer("a1"))))
            .unwrap();
        assert!(connected.handle(answer()).is_err());
        assert_eq!(
            connected.remote_description(),
            Some(&SessionDescription::answer("a1"))
        );

        let mut viewer = Negotiation::new(Role::Viewer);
        assert!(viewer.handle(answer()).is_err());
        assert_eq!(viewer.phase(), &Phase::Idle);
    }

    #[test]
    fn test_second_offer_is_discarded() {
        let mut n = Negotiation::new(Role::Viewer);
        n.handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o1"))))
            .unwrap();
        let err = n
            .handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o2"))))
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(n.remote_description(), Some(&SessionDescription::offer("o1")));
    }

    #[test]
    fn test_streamer_rejects_offer_and_viewer_rejects_begin() {
        let mut streamer = Negotiation::new(Role::Streamer);
        assert!(streamer
            .handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o"))))
            .is_err());
        assert_eq!(streamer.phase(), &Phase::Idle);

        let mut viewer = Negotiation::new(Role::Viewer);
        assert!(viewer.handle(Event::Begin).is_err());
        assert_eq!(viewer.phase(), &Phase::Idle);
    }

    #[test]
    fn test_malformed_candidate_is_discarded() {
        let mut n = Negotiation::new(Role::Viewer);
        let bad = Event::Remote(SignalMessage::Candidate(IceCandidate::new("", None, None)));
        assert!(n.handle(bad).is_err());
        assert_eq!(n.buffered_candidates(), 0);
    }

    #[test]
    fn test_local_candidates_are_sent_immediately_in_any_phase() {
        let mut n = Negotiation::new(Role::Streamer);
        assert_eq!(
            n.handle(Event::LocalCandidate(candidate(1))).unwrap(),
            vec![Effect::Send(SignalMessage::Candidate(candidate(1)))]
        );
        n.handle(Event::Begin).unwrap();
        assert_eq!(
            n.handle(Event::LocalCandidate(candidate(2))).unwrap(),
            vec![Effect::Send(SignalMessage::Candidate(candidate(2)))]
        );
    }

    #[test]
    fn test_peer_lost_discards_buffer() {
        let mut n = Negotiation::new(Role::Viewer);
        n.handle(remote_candidate(1)).unwrap();
        let effects = n.handle(Event::PeerLost).unwrap();
        assert_eq!(effects, vec![Effect::Teardown]);
        assert_eq!(n.phase(), &Phase::Failed(FailureReason::PeerLost));
        assert_eq!(n.buffered_candidates(), 0);

        // Failed is terminal.
        assert!(n
            .handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o"))))
            .unwrap()
            .is_empty());
        assert!(n.handle(Event::LocalCandidate(candidate(2))).unwrap().is_empty());
        assert_eq!(n.phase(), &Phase::Failed(FailureReason::PeerLost));
    }

    #[test]
    fn test_peer_lost_and_timeout_ignored_once_connected() {
        let mut n = streamer_awaiting_answer();
        n.handle(Event::Remote(SignalMessage::Answer(SessionDescription::answer("a"))))
            .unwrap();
        assert!(n.handle(Event::PeerLost).unwrap().is_empty());
        assert!(n.handle(Event::TimedOut).unwrap().is_empty());
        assert_eq!(n.phase(), &Phase::Connected);
    }

    #[test]
    fn test_timeout_fails_pending_negotiation() {
        let mut n = streamer_awaiting_answer();
        assert_eq!(n.handle(Event::TimedOut).unwrap(), vec![Effect::Teardown]);
        assert_eq!(n.phase(), &Phase::Failed(FailureReason::Timeout));
    }

    #[test]
    fn test_adapter_failure_fails_negotiation() {
        let mut n = Negotiation::new(Role::Viewer);
        n.handle(Event::Remote(SignalMessage::Offer(SessionDescription::offer("o"))))
            .unwrap();
        n.handle(Event::AdapterFailed("bad sdp".into())).unwrap();
        assert_eq!(
            n.phase(),
            &Phase::Failed(FailureReason::Negotiation("bad sdp".into()))
        );
        assert!(matches!(
            FailureReason::Negotiation("x".into()).to_error(),
            Error::NegotiationFailed(_)
        ));
    }
}
