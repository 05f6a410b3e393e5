//! `webrtc` crate backend

use super::backend::{
    LinkEvent, LinkState, PeerLink, RemoteTrack, RtcBackend, SdpKind, SessionDescription,
};
use crate::config::IceServer;
use crate::media::{LocalMediaStream, TrackKind};
use crate::quality::LinkStats;
use crate::signaling::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::ice::candidate::CandidatePairState;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Backend creating real peer connections
///
/// The media engine registers the default codecs (Opus, VP8, VP9, H.264)
/// and the default interceptors (NACK, RTCP reports, TWCC).
pub struct WebRtcBackend {
    api: API,
}

impl WebRtcBackend {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnectionError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::PeerConnectionError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self { api })
    }
}

#[async_trait]
impl RtcBackend for WebRtcBackend {
    #[instrument(skip(self, ice_servers, events), fields(peer_id = %peer_id))]
    async fn create_link(
        &self,
        peer_id: &str,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>> {
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(LinkEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_m_line_index: init.sdp_mline_index,
                            sdp_mid: init.sdp_mid,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let track_tx = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let _ = tx.send(LinkEvent::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                    handle: Some(track),
                }));
            })
        }));

        let state_tx = events;
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::New => LinkState::New,
                    RTCPeerConnectionState::Connecting => LinkState::Connecting,
                    RTCPeerConnectionState::Connected => LinkState::Connected,
                    RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
                    RTCPeerConnectionState::Failed => LinkState::Failed,
                    RTCPeerConnectionState::Closed => LinkState::Closed,
                    _ => return,
                };
                let _ = tx.send(LinkEvent::StateChanged(state));
            })
        }));

        info!("Created peer connection for {}", peer_id);

        let link: Arc<dyn PeerLink> = Arc::new(RtcLink {
            peer_id: peer_id.to_string(),
            pc,
            senders: Mutex::new(Vec::new()),
        });
        Ok(link)
    }
}

/// A published local track and the sender carrying it
struct LocalSender {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    sender: Arc<RTCRtpSender>,
}

/// One `RTCPeerConnection`
pub struct RtcLink {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<LocalSender>>,
}

impl RtcLink {
    async fn local_sdp(&self, kind: &str) -> Result<String> {
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::SdpError(format!("No local description after setting {}", kind)))
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn add_local_stream(&self, stream: &Arc<LocalMediaStream>) -> Result<()> {
        let mut senders = self.senders.lock().await;

        for track in stream.tracks() {
            let Some(rtc) = track.rtc_track() else {
                debug!("Skipping local track {} without transport binding", track.id());
                continue;
            };

            if senders.iter().any(|s| Arc::ptr_eq(&s.track, rtc)) {
                continue;
            }

            let sender = self
                .pc
                .add_track(Arc::clone(rtc) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| {
                    Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e))
                })?;

            // RTCP must be drained for interceptors to run
            let rtcp_sender = Arc::clone(&sender);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while let Ok((_, _)) = rtcp_sender.read(&mut buf).await {}
            });

            senders.push(LocalSender {
                kind: track.kind(),
                track: Arc::clone(rtc),
                sender,
            });
        }

        debug!(
            "Peer {} publishing {} local tracks",
            self.peer_id,
            senders.len()
        );
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_sdp("offer").await
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_sdp("answer").await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let desc = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| Error::SdpError(format!("Failed to parse remote description: {}", e)))?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn stats(&self) -> Result<LinkStats> {
        let report = self.pc.get_stats().await;

        let mut stats = LinkStats::default();
        let mut audio_remote: Option<(Option<f64>, i64)> = None;
        let mut video_remote: Option<(Option<f64>, i64)> = None;
        let mut pair_rtt_ms: Option<f64> = None;

        for stat in report.reports.values() {
            match stat {
                StatsReportType::RemoteInboundRTP(remote) => {
                    let rtt_ms = remote.round_trip_time.map(|rtt| rtt * 1000.0);
                    let sample = Some((rtt_ms, remote.packets_lost));
                    if remote.kind == "video" {
                        video_remote = sample;
                    } else if remote.kind == "audio" {
                        audio_remote = sample;
                    }
                }
                StatsReportType::OutboundRTP(outbound) => {
                    stats.bytes_sent += outbound.bytes_sent;
                }
                StatsReportType::InboundRTP(inbound) => {
                    stats.bytes_received += inbound.bytes_received;
                }
                StatsReportType::CandidatePair(pair)
                    if pair.state == CandidatePairState::Succeeded =>
                {
                    if pair.nominated || pair_rtt_ms.is_none() {
                        pair_rtt_ms = Some(pair.current_round_trip_time * 1000.0);
                    }
                }
                _ => {}
            }
        }

        let remote = video_remote.or(audio_remote);
        if let Some((_, lost)) = remote {
            stats.packets_lost = lost.max(0) as u64;
        }
        stats.round_trip_time_ms = round_trip_ms(remote.and_then(|(rtt, _)| rtt), pair_rtt_ms);

        Ok(stats)
    }

    async fn set_outbound_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()> {
        let senders = self.senders.lock().await;

        for local in senders.iter().filter(|s| s.kind == kind) {
            let track = enabled.then(|| Arc::clone(&local.track) as Arc<dyn TrackLocal + Send + Sync>);
            local.sender.replace_track(track).await.map_err(|e| {
                Error::MediaTrackError(format!("Failed to update {} sender: {}", kind, e))
            })?;
        }

        debug!(
            "Peer {} outbound {} {}",
            self.peer_id,
            kind,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);

        self.pc.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

/// RTT from receiver reports, else from the selected candidate pair
fn round_trip_ms(remote_ms: Option<f64>, pair_ms: Option<f64>) -> f64 {
    remote_ms
        .filter(|rtt| *rtt > 0.0)
        .or(pair_ms)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_falls_back_to_candidate_pair() {
        assert_eq!(round_trip_ms(Some(120.0), Some(40.0)), 120.0);
        assert_eq!(round_trip_ms(None, Some(40.0)), 40.0);
        assert_eq!(round_trip_ms(Some(0.0), Some(40.0)), 40.0);
        assert_eq!(round_trip_ms(None, None), 0.0);
    }

    #[tokio::test]
    async fn test_backend_creates_link() {
        let backend = WebRtcBackend::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let servers = vec![IceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            ..Default::default()
        }];

        let link = backend.create_link("peer-b", &servers, tx).await.unwrap();
        assert!(link.stats().await.is_ok());
        assert!(link.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_offer_after_adding_stream() {
        use crate::media::{MediaConstraints, MediaDevices, SampleCaptureDevice};

        let backend = WebRtcBackend::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = backend.create_link("peer-b", &[], tx).await.unwrap();

        let stream = Arc::new(
            SampleCaptureDevice::new()
                .get_user_media(&MediaConstraints::default())
                .await
                .unwrap(),
        );
        link.add_local_stream(&stream).await.unwrap();

        let sdp = link.create_offer().await.unwrap();
        assert!(sdp.contains("m=audio"));
        assert!(sdp.contains("m=video"));

        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_remote_description_is_sdp_error() {
        let backend = WebRtcBackend::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = backend.create_link("peer-b", &[], tx).await.unwrap();

        let err = link
            .set_remote_description(SessionDescription::answer("not sdp"))
            .await
            .unwrap_err();
        assert!(err.is_negotiation_error());

        link.close().await.unwrap();
    }
}
