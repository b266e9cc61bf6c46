use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vrcast_common::{Error, IceCandidate, Result, SdpKind, SessionDescription};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::media::{MediaEvent, MediaSession, TrackInfo};
use crate::negotiation::Role;

const MEDIA_EVENT_CAPACITY: usize = 64;

/// webrtc-rs backed [`MediaSession`].
///
/// The streamer publishes one H.264 video track that capture code feeds through
/// [`WebRtcSession::write_sample`]. The viewer hands incoming tracks to whoever took
/// [`WebRtcSession::take_remote_tracks`].
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    video_track: Option<Arc<TrackLocalStaticSample>>,
    remote_tracks: Option<mpsc::UnboundedReceiver<Arc<TrackRemote>>>,
}

impl WebRtcSession {
    /// Builds a peer connection using `ice_servers` as the candidate-gathering assist servers.
    pub async fn new(
        role: Role,
        ice_servers: &[String],
    ) -> Result<(Self, mpsc::Receiver<MediaEvent>)> {
        if ice_servers.is_empty() {
            return Err(Error::config("at least one ICE server is required"));
        }

        let mut m = MediaEngine::default();
        m.register_default_codecs().map_err(Error::negotiation)?;
        let api = APIBuilder::new().with_media_engine(m).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(Error::negotiation)?,
        );

        let (events_tx, events_rx) = mpsc::channel(MEDIA_EVENT_CAPACITY);
        let (tracks_tx, tracks_rx) = mpsc::unbounded_channel();

        let video_track = match role {
            Role::Streamer => {
                let track = Arc::new(TrackLocalStaticSample::new(
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_H264.to_string(),
                        ..Default::default()
                    },
                    "video".to_string(),
                    "vrcast-screen".to_string(),
                ));
                pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(Error::negotiation)?;
                Some(track)
            }
            Role::Viewer => None,
        };

        let candidate_tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |c| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = c else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx
                            .send(MediaEvent::LocalCandidate(IceCandidate::new(
                                init.candidate,
                                init.sdp_mid,
                                init.sdp_mline_index,
                            )))
                            .await;
                    }
                    Err(err) => warn!("failed to serialize local candidate: {}", err),
                }
            })
        }));

        let state_tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                info!("peer connection state: {}", state);
                let event = match state {
                    RTCPeerConnectionState::Connected => Some(MediaEvent::Connected),
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        Some(MediaEvent::Disconnected)
                    }
                    RTCPeerConnectionState::Failed => {
                        Some(MediaEvent::Failed("ICE connectivity failed".into()))
                    }
                    _ => None,
                };
                if let Some(event) = event {
                    let _ = tx.send(event).await;
                }
            })
        }));

        let track_events_tx = events_tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events_tx.clone();
            let tracks = tracks_tx.clone();
            Box::pin(async move {
                let info = TrackInfo {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind: track.kind().to_string(),
                };
                info!("remote track {} ({})", info.id, info.kind);
                let _ = events.send(MediaEvent::RemoteTrack(info)).await;
                let _ = tracks.send(track);
            })
        }));

        Ok((
            Self {
                pc,
                video_track,
                remote_tracks: Some(tracks_rx),
            },
            events_rx,
        ))
    }

    /// Incoming tracks for the renderer. Only the first call returns `Some`.
    pub fn take_remote_tracks(&mut self) -> Option<mpsc::UnboundedReceiver<Arc<TrackRemote>>> {
        self.remote_tracks.take()
    }

    /// The local video track, present on the streamer only.
    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video_track.clone()
    }

    /// Pushes one encoded frame onto the streamer's video track.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        write_video_sample(self.video_track.as_ref(), data, duration).await
    }
}

/// Writes an encoded frame to `track`, for capture code holding a cloned track handle.
pub async fn write_video_sample(
    track: Option<&Arc<TrackLocalStaticSample>>,
    data: Bytes,
    duration: Duration,
) -> Result<()> {
    let Some(track) = track else {
        return Err(Error::config("viewer sessions have no local video track"));
    };
    track
        .write_sample(&Sample {
            data,
            duration,
            ..Default::default()
        })
        .await
        .map_err(Error::negotiation)
}

fn to_rtc(description: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp.clone();
    let rtc = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
    };
    rtc.map_err(Error::negotiation)
}

#[async_trait]
impl MediaSession for WebRtcSession {
    async fn create_offer(&mut self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(Error::negotiation)?;
        Ok(offer.sdp)
    }

    async fn create_answer(&mut self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(Error::negotiation)?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&mut self, description: &SessionDescription) -> Result<()> {
        let rtc = to_rtc(description)?;
        self.pc
            .set_local_description(rtc)
            .await
            .map_err(Error::negotiation)
    }

    async fn set_remote_description(&mut self, description: &SessionDescription) -> Result<()> {
        let rtc = to_rtc(description)?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(Error::negotiation)
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(Error::negotiation)
    }

    async fn close(&mut self) -> Result<()> {
        self.pc.close().await.map_err(Error::negotiation)
    }
}
