pub mod connection;
pub mod ice;
pub mod state;
pub mod types;

use crate::capture::MediaStream;
use crate::error::NegotiationError;
use crate::model::SessionDescription;
use async_trait::async_trait;
use std::sync::Arc;

pub use connection::{RtcPeerFactory, RtcPeerLink};
pub use state::{NegotiationState, NegotiationStatus, StatusBoard, GRACE_PERIOD};
pub use types::{LinkStatus, RemoteTrack, ServerConfig, VideoSink};

/// Одно живое RTC-соединение. Принадлежит ровно одному движку.
///
/// `create_offer` и `create_answer` возвращают описание только после того,
/// как сбор ICE перешёл в `complete`.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> &str;

    async fn add_tracks(&self, media: &MediaStream) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// remote = offer, затем локальный answer
    async fn create_answer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError>;

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), NegotiationError>;

    fn status(&self) -> LinkStatus;

    async fn close(&self);
}

/// Создаёт новые соединения; `sink` получает входящие треки
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn open(
        &self,
        sink: Option<Arc<dyn VideoSink>>,
    ) -> Result<Arc<dyn PeerLink>, NegotiationError>;
}
