//! Media stream abstractions.
//!
//! Device capture and frame production are the embedder's concern; the
//! orchestrator only needs tracks it can attach, disable, and stop. The
//! [`MediaSource`] trait is the seam, [`crate::rtc::StaticMediaSource`] the
//! production implementation, [`crate::testing::FakeMediaSource`] the test
//! double.

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::CallError;
use crate::types::CallMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally captured track attached to the peer connection.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// Permanently stop the track, releasing the underlying capture.
    fn stop(&self);
    fn is_stopped(&self) -> bool;
    /// Soft-toggle used by mute/camera-off. Stopped tracks stay stopped.
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// A track received from the remote peer.
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
}

/// What to request from the media source. Audio is always captured; video
/// only for video-mode calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn for_mode(mode: CallMode) -> Self {
        Self {
            audio: true,
            video: mode.wants_video(),
        }
    }
}

/// The local media stream owned by the active session.
#[derive(Clone)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<Arc<dyn LocalTrack>>,
}

impl LocalMediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for LocalMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// The accumulating container for remote tracks.
///
/// One instance persists for the whole session so consuming UIs keep a
/// stable handle; cleanup swaps in a fresh empty instance instead of
/// mutating this one back to empty.
pub struct RemoteMediaStream {
    id: String,
    tracks: Mutex<Vec<Arc<dyn RemoteTrack>>>,
}

impl RemoteMediaStream {
    pub fn new() -> Self {
        Self {
            id: random_id("remote"),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a track unless one with the same id is already present.
    /// Returns whether the track was added.
    pub fn add_track(&self, track: Arc<dyn RemoteTrack>) -> bool {
        let mut tracks = self.tracks.lock().unwrap();
        if tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        tracks.push(track);
        true
    }

    pub fn tracks(&self) -> Vec<Arc<dyn RemoteTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().unwrap().is_empty()
    }
}

impl Default for RemoteMediaStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RemoteMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.lock().unwrap().len())
            .finish()
    }
}

/// Acquires local capture for a call attempt.
///
/// Permission and device errors propagate to the caller unmodified; the
/// orchestrator cleans up and rethrows rather than retrying.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, CallError>;
}

pub(crate) fn random_id(prefix: &str) -> String {
    format!("{}-{:016x}", prefix, rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemoteTrack;

    #[test]
    fn test_constraints_follow_mode() {
        let audio = MediaConstraints::for_mode(CallMode::Audio);
        assert!(audio.audio);
        assert!(!audio.video);

        let video = MediaConstraints::for_mode(CallMode::Video);
        assert!(video.audio);
        assert!(video.video);
    }

    #[test]
    fn test_remote_stream_accumulates_idempotently() {
        let stream = RemoteMediaStream::new();
        assert!(stream.add_track(Arc::new(FakeRemoteTrack::new("t1", TrackKind::Audio))));
        assert!(stream.add_track(Arc::new(FakeRemoteTrack::new("t2", TrackKind::Video))));
        assert!(!stream.add_track(Arc::new(FakeRemoteTrack::new("t1", TrackKind::Audio))));
        assert_eq!(stream.tracks().len(), 2);
    }
}
