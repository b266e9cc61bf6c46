//! vrcast client - negotiates a WebRTC session between a streamer and a viewer.
//!
//! [`negotiation`] is the pure offer/answer state machine with its candidate
//! buffer; [`session`] drives it against a [`media::MediaSession`] and a
//! [`signaling::SignalingChannel`].

#![forbid(unsafe_code)]

pub mod candidate;
pub mod config;
pub mod media;
pub mod negotiation;
pub mod session;
pub mod signaling;
pub mod webrtc_session;

pub use candidate::CandidateBuffer;
pub use config::ClientConfig;
pub use media::{MediaEvent, MediaSession, TrackInfo};
pub use negotiation::{Effect, Event, FailureReason, Negotiation, Phase, Role};
pub use session::{spawn_session, SessionHandle, SessionOptions};
pub use signaling::{ChannelEvent, SignalingChannel};
pub use webrtc_session::WebRtcSession;
