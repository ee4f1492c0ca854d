use thiserror::Error;

/// Ошибки захвата локального медиа
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture source {0} is unavailable")]
    Unavailable(String),
    #[error("capture permission denied for {0}")]
    PermissionDenied(String),
}

/// Ошибки согласования (offer/answer + ICE)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("engine is closed")]
    Closed,
    #[error("no local offer to pair the answer with")]
    NoOffer,
    #[error("ICE gathering did not complete within {0} ms")]
    GatheringTimeout(u64),
    #[error("peer connection failed")]
    ConnectionFailed,
    #[error("session description rejected: {0}")]
    Sdp(String),
    #[error("peer connection error: {0}")]
    Peer(String),
    #[error("signaling store: {0}")]
    Store(#[from] StoreError),
}

/// Ошибки хранилища сигналинга и эндпоинта агрегата
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("offer changed before the answer was stored")]
    Conflict,
    #[error("request is not authorized")]
    Unauthorized,
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Ошибки канала push-уведомлений
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("event stream connect failed: {0}")]
    Connect(String),
    #[error("event stream dropped: {0}")]
    Dropped(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<webrtc::Error> for NegotiationError {
    fn from(e: webrtc::Error) -> Self {
        NegotiationError::Peer(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Network(e.to_string())
        } else if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            StoreError::Status(status.as_u16())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}
