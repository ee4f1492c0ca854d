//! Источник локального медиа (камера, фронтальная/тыльная, экран).
//!
//! Движок согласования никогда не захватывает медиа сам: ему передают
//! уже полученный `MediaStream`.

use crate::error::CaptureError;
use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Front,
    Back,
    Screen,
    None,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Front => "front",
            SourceKind::Back => "back",
            SourceKind::Screen => "screen",
            SourceKind::None => "none",
        }
    }
}

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Отзываемый поток: освобождается ровно один раз (явно или при drop)
pub struct MediaStream {
    id: String,
    kind: SourceKind,
    tracks: Vec<LocalTrack>,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl MediaStream {
    pub fn new(kind: SourceKind, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: random_id(),
            kind,
            tracks,
            on_release: None,
        }
    }

    /// Колбэк, который вызовется при освобождении (останавливает устройство)
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn release(mut self) {
        self.release_tracks();
    }

    fn release_tracks(&mut self) {
        if let Some(hook) = self.on_release.take() {
            debug!(stream = %self.id, kind = self.kind.as_str(), "releasing media stream");
            hook();
        }
        self.tracks.clear();
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.release_tracks();
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

pub trait CaptureProvider: Send {
    /// Освобождает предыдущий поток и захватывает новый. `None` только освобождает.
    fn acquire(&mut self, kind: SourceKind) -> Result<Option<&MediaStream>, CaptureError>;

    fn current(&self) -> Option<&MediaStream>;

    fn release(&mut self);
}

/// Провайдер с синтетическими VP8-треками; реальные устройства подключаются снаружи
pub struct SyntheticCapture {
    current: Option<MediaStream>,
    available: Vec<SourceKind>,
    live: Arc<AtomicUsize>,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::with_sources(vec![SourceKind::Front, SourceKind::Back, SourceKind::Screen])
    }

    pub fn with_sources(available: Vec<SourceKind>) -> Self {
        Self {
            current: None,
            available,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Сколько потоков сейчас захвачено (должно быть 0 или 1)
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureProvider for SyntheticCapture {
    fn acquire(&mut self, kind: SourceKind) -> Result<Option<&MediaStream>, CaptureError> {
        self.release();
        if kind == SourceKind::None {
            return Ok(None);
        }
        if !self.available.contains(&kind) {
            return Err(CaptureError::Unavailable(kind.as_str().into()));
        }

        let stream_id = format!("stagecast-{}", kind.as_str());
        let track: LocalTrack = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            format!("video-{}", kind.as_str()),
            stream_id,
        ));

        let live = self.live.clone();
        live.fetch_add(1, Ordering::SeqCst);
        let stream = MediaStream::new(kind, vec![track]).with_release_hook(move || {
            live.fetch_sub(1, Ordering::SeqCst);
        });
        info!(stream = %stream.id(), kind = kind.as_str(), "capture acquired");
        self.current = Some(stream);
        Ok(self.current.as_ref())
    }

    fn current(&self) -> Option<&MediaStream> {
        self.current.as_ref()
    }

    fn release(&mut self) {
        if let Some(stream) = self.current.take() {
            stream.release();
        }
    }
}
