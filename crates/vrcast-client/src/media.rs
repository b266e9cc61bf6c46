//! Seam between negotiation and the real-time media engine.

use async_trait::async_trait;
use vrcast_common::{IceCandidate, Result, SessionDescription};

/// A media engine instance, configured by the negotiation driver.
///
/// Every call may fail; the driver turns a failure into a failed negotiation.
#[async_trait]
pub trait MediaSession: Send {
    /// Produces a local offer SDP without applying it.
    async fn create_offer(&mut self) -> Result<String>;

    /// Produces a local answer SDP for the applied remote offer without applying it.
    async fn create_answer(&mut self) -> Result<String>;

    async fn set_local_description(&mut self, description: &SessionDescription) -> Result<()>;

    async fn set_remote_description(&mut self, description: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Describes a remote track once the engine starts receiving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: String,
}

/// Things the engine reports on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LocalCandidate(IceCandidate),
    Connected,
    Disconnected,
    Failed(String),
    RemoteTrack(TrackInfo),
}
