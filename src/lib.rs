pub mod capture;
pub mod config;
pub mod error;
pub mod logger;
pub mod model;
pub mod negotiation;
pub mod notifier;
pub mod peer;
pub mod server;
pub mod session;
pub mod store;
pub mod sync;
pub mod utils;

pub use capture::{CaptureProvider, MediaStream, SourceKind, SyntheticCapture};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use model::{
    DisplayAggregateState, DisplayContent, OrganizationId, PresentationSettings, Role,
    SessionDescription, SignalingRecord,
};
pub use negotiation::{ReceiverEngine, SenderEngine};
pub use peer::{NegotiationState, NegotiationStatus};
pub use session::{DisplaySink, ProjectorSession, SenderSession};
pub use store::{AuthContext, StoreClient};
pub use sync::{StateSynchronizer, Subscription, SyncOptions};
