use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Состояние живого соединения, как его видит транспорт
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Входящий медиатрек
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: String,
    pub inner: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Куда проектор выводит входящее видео
pub trait VideoSink: Send + Sync {
    fn bind(&self, track: RemoteTrack);
}
