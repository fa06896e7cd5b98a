//! WebRTC-backed peer engine.
//!
//! Implements the narrow [`PeerFactory`]/[`PeerHandle`] contract over the
//! `webrtc` crate. Native callbacks never touch orchestrator state; they
//! forward [`PeerEvent`]s into the channel handed to [`PeerFactory::create`].
//!
//! Local tracks are sample-fed: [`StaticMediaSource`] hands out Opus/VP8
//! [`RtcLocalTrack`]s and the embedder pushes captured frames through
//! [`RtcLocalTrack::write_sample`]. Actual device capture stays outside
//! this crate.

use async_trait::async_trait;
use log::debug;
use std::any::Any;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::error::CallError;
use crate::ice::IceServer;
use crate::media::{
    LocalMediaStream, LocalTrack, MediaConstraints, MediaSource, RemoteTrack, TrackKind, random_id,
};
use crate::peer::{PeerEvent, PeerFactory, PeerHandle};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

fn peer_err(e: impl std::fmt::Display) -> CallError {
    CallError::Peer(e.to_string())
}

/// A sample-fed local track bound to the rtc engine.
pub struct RtcLocalTrack {
    id: String,
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
    enabled: AtomicBool,
}

impl RtcLocalTrack {
    fn audio(stream_id: &str) -> Self {
        Self::with_codec(
            TrackKind::Audio,
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            stream_id,
        )
    }

    fn video(stream_id: &str) -> Self {
        Self::with_codec(
            TrackKind::Video,
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            stream_id,
        )
    }

    fn with_codec(kind: TrackKind, codec: RTCRtpCodecCapability, stream_id: &str) -> Self {
        let id = random_id(kind.as_str());
        let track = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_string(),
        ));
        Self {
            id,
            kind,
            track,
            stopped: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Feed one captured, encoded sample into the track. Disabled tracks
    /// drop the sample silently; stopped tracks reject it.
    pub async fn write_sample(&self, sample: &Sample) -> Result<(), CallError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CallError::Media("track is stopped".into()));
        }
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.track
            .write_sample(sample)
            .await
            .map_err(|e| CallError::Media(e.to_string()))
    }
}

impl LocalTrack for RtcLocalTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A remote track as surfaced by the engine. Holds the underlying RTP
/// track so consumers can read media from it.
pub struct RtcRemoteTrack {
    id: String,
    kind: TrackKind,
    inner: Arc<TrackRemote>,
}

impl RtcRemoteTrack {
    pub fn rtp_track(&self) -> &Arc<TrackRemote> {
        &self.inner
    }
}

impl RemoteTrack for RtcRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }
}

/// Sample-fed media source for the rtc engine.
#[derive(Debug, Clone, Default)]
pub struct StaticMediaSource;

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, CallError> {
        let stream_id = random_id("stream");
        let mut tracks: Vec<Arc<dyn LocalTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(RtcLocalTrack::audio(&stream_id)));
        }
        if constraints.video {
            tracks.push(Arc::new(RtcLocalTrack::video(&stream_id)));
        }
        Ok(LocalMediaStream::new(stream_id, tracks))
    }
}

/// Production [`PeerFactory`] over `webrtc`.
#[derive(Debug, Clone, Default)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_err)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(peer_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        #[allow(clippy::needless_update)]
        let rtc_servers: Vec<RTCIceServer> = ice_servers
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                username: server.username.unwrap_or_default(),
                credential: server.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: rtc_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| CallError::Peer(format!("failed to create peer connection: {}", e)))?,
        );

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                if let Some(c) = candidate
                    && let Ok(json) = c.to_json()
                {
                    let _ = candidate_tx.send(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: json.candidate,
                        sdp_mid: json.sdp_mid,
                        sdp_mline_index: json.sdp_mline_index,
                    }));
                }
            })
        }));

        let track_tx = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_tx = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                debug!("remote {} track {} received", kind, track.id());
                let _ = track_tx.send(PeerEvent::RemoteTrack(Arc::new(RtcRemoteTrack {
                    id: track.id(),
                    kind,
                    inner: track,
                })));
            })
        }));

        Ok(Arc::new(RtcPeer {
            pc,
            senders: StdMutex::new(Vec::new()),
        }))
    }
}

/// One live native peer connection.
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    senders: StdMutex<Vec<Arc<dyn LocalTrack>>>,
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, CallError> {
    match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(peer_err)
}

#[async_trait]
impl PeerHandle for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self.pc.create_offer(None).await.map_err(peer_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        let answer = self.pc.create_answer(None).await.map_err(peer_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        let desc = to_rtc_description(desc)?;
        self.pc.set_local_description(desc).await.map_err(peer_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        let desc = to_rtc_description(desc)?;
        self.pc.set_remote_description(desc).await.map_err(peer_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(peer_err)
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<(), CallError> {
        let Some(rtc_track) = track.as_any().downcast_ref::<RtcLocalTrack>() else {
            return Err(CallError::Peer(
                "track was not produced by the rtc engine".into(),
            ));
        };
        let local: Arc<dyn TrackLocal + Send + Sync> = rtc_track.sample_track();
        self.pc.add_track(local).await.map_err(peer_err)?;
        self.senders.lock().unwrap().push(track);
        Ok(())
    }

    fn sender_tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.senders.lock().unwrap().clone()
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!("peer close failed (ignored): {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_honors_constraints() {
        let source = StaticMediaSource;
        let audio_only = source
            .acquire(MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();
        assert_eq!(audio_only.tracks().len(), 1);
        assert_eq!(audio_only.tracks()[0].kind(), TrackKind::Audio);

        let both = source
            .acquire(MediaConstraints {
                audio: true,
                video: true,
            })
            .await
            .unwrap();
        assert_eq!(both.tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_stopped_track_rejects_samples() {
        let track = RtcLocalTrack::audio("stream-test");
        track.set_enabled(false);
        assert!(!track.is_enabled());
        // Disabled tracks drop the sample without error.
        track.write_sample(&Sample::default()).await.unwrap();

        track.stop();
        assert!(track.is_stopped());
        assert!(track.write_sample(&Sample::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_engine_creates_offers_offline() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = RtcPeerFactory.create(Vec::new(), tx).await.unwrap();
        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("v=0"));
        peer.close().await;
        // Closing twice must be harmless.
        peer.close().await;
    }
}
