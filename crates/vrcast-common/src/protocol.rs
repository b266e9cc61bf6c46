//! Signaling wire protocol.
//!
//! Every WebSocket text frame carries one JSON envelope of the form
//! `{"event": <name>, "data": <payload>}`. Clients exchange the three
//! negotiation events (`offer`, `answer`, `ice-candidate`); the relay itself
//! only ever originates [`RelayNotice`] frames, and only on paired sessions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const EVENT_OFFER: &str = "offer";
pub const EVENT_ANSWER: &str = "answer";
pub const EVENT_ICE_CANDIDATE: &str = "ice-candidate";
pub const EVENT_PEER_JOINED: &str = "peer-joined";
pub const EVENT_PEER_LEFT: &str = "peer-left";
pub const EVENT_SESSION_FULL: &str = "session-full";

/// Upper bound for an SDP blob carried in an offer or answer.
pub const MAX_SIGNAL_SDP_BYTES: usize = 32 * 1024;
/// Upper bound for a single candidate line.
pub const MAX_SIGNAL_CANDIDATE_BYTES: usize = 4096;

/// Which side of the exchange a session description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An opaque session description. The relay never looks inside `sdp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One discovered connectivity candidate, in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
        }
    }

    /// An empty candidate line with a media section is the end-of-candidates marker.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty() && (self.sdp_mid.is_some() || self.sdp_mline_index.is_some())
    }
}

/// A negotiation message produced by one party and consumed by the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalMessage {
    #[serde(rename = "offer")]
    Offer(SessionDescription),
    #[serde(rename = "answer")]
    Answer(SessionDescription),
    #[serde(rename = "ice-candidate")]
    Candidate(IceCandidate),
}

impl SignalMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalMessage::Offer(_) => EVENT_OFFER,
            SignalMessage::Answer(_) => EVENT_ANSWER,
            SignalMessage::Candidate(_) => EVENT_ICE_CANDIDATE,
        }
    }

    /// Checks the payload is internally consistent. Does not interpret SDP.
    pub fn validate(&self) -> Result<()> {
        match self {
            SignalMessage::Offer(desc) => validate_description(desc, SdpKind::Offer),
            SignalMessage::Answer(desc) => validate_description(desc, SdpKind::Answer),
            SignalMessage::Candidate(candidate) => {
                if candidate.candidate.len() > MAX_SIGNAL_CANDIDATE_BYTES {
                    return Err(Error::protocol("candidate exceeds size limit"));
                }
                if candidate.candidate.is_empty() && !candidate.is_end_of_candidates() {
                    return Err(Error::protocol(
                        "candidate has neither a candidate line nor a media section",
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn validate_description(desc: &SessionDescription, expected: SdpKind) -> Result<()> {
    if desc.kind != expected {
        return Err(Error::protocol(format!(
            "description type {:?} does not match event {:?}",
            desc.kind, expected
        )));
    }
    if desc.sdp.len() > MAX_SIGNAL_SDP_BYTES {
        return Err(Error::protocol("sdp exceeds size limit"));
    }
    Ok(())
}

/// Lifecycle notifications emitted by the relay on paired sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RelayNotice {
    PeerJoined,
    PeerLeft,
    SessionFull { session: String },
}

impl RelayNotice {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The only field the relay reads from a frame.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: String,
}

/// The event names a client is allowed to send through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Offer,
    Answer,
    IceCandidate,
}

impl ClientEvent {
    /// Reads just the envelope's event name, leaving the payload untouched.
    pub fn peek(text: &str) -> Result<Self> {
        let envelope: RawEnvelope = serde_json::from_str(text)?;
        match envelope.event.as_str() {
            EVENT_OFFER => Ok(ClientEvent::Offer),
            EVENT_ANSWER => Ok(ClientEvent::Answer),
            EVENT_ICE_CANDIDATE => Ok(ClientEvent::IceCandidate),
            other => Err(Error::protocol(format!("unknown event {other:?}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientEvent::Offer => EVENT_OFFER,
            ClientEvent::Answer => EVENT_ANSWER,
            ClientEvent::IceCandidate => EVENT_ICE_CANDIDATE,
        }
    }
}

/// Anything a client can receive from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Signal(SignalMessage),
    Notice(RelayNotice),
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: RawEnvelope = serde_json::from_str(text)?;
        match envelope.event.as_str() {
            EVENT_OFFER | EVENT_ANSWER | EVENT_ICE_CANDIDATE => {
                Ok(Inbound::Signal(serde_json::from_str(text)?))
            }
            EVENT_PEER_JOINED | EVENT_PEER_LEFT | EVENT_SESSION_FULL => {
                Ok(Inbound::Notice(serde_json::from_str(text)?))
            }
            other => Err(Error::protocol(format!("unknown event {other:?}"))),
        }
    }
}

/// Session identifiers travel in the URL path; both ends check the same rule.
pub fn is_valid_session_id(id: &str) -> bool {
    (1..=64).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
