use crate::capture::MediaStream;
use crate::error::NegotiationError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::model::{SdpType, SessionDescription};
use crate::peer::ice::wait_for_gathering;
use crate::peer::state::GRACE_PERIOD;
use crate::peer::types::{LinkStatus, RemoteTrack, ServerConfig, VideoSink};
use crate::peer::{PeerFactory, PeerLink};
use crate::utils::{add_ice_url_scheme, random_id};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::{
    api::APIBuilder,
    ice_transport::{ice_candidate::RTCIceCandidate, ice_server::RTCIceServer},
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Фабрика соединений поверх `webrtc`
#[derive(Clone)]
pub struct RtcPeerFactory {
    ice_servers: Vec<ServerConfig>,
    gathering_timeout: Duration,
}

impl RtcPeerFactory {
    pub fn new(ice_servers: Vec<ServerConfig>, gathering_timeout: Duration) -> Self {
        Self {
            ice_servers,
            gathering_timeout,
        }
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn open(
        &self,
        sink: Option<Arc<dyn VideoSink>>,
    ) -> Result<Arc<dyn PeerLink>, NegotiationError> {
        let link = new_peer(&self.ice_servers, self.gathering_timeout, sink).await?;
        Ok(Arc::new(link))
    }
}

pub struct RtcPeerLink {
    id: String,
    pc: Arc<RTCPeerConnection>,
    status: Arc<watch::Sender<LinkStatus>>,
    disconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    gathering_timeout: Duration,
}

/// создаём Peer со всеми обработчиками
pub async fn new_peer(
    ice_servers: &[ServerConfig],
    gathering_timeout: Duration,
    sink: Option<Arc<dyn VideoSink>>,
) -> Result<RtcPeerLink, NegotiationError> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
    let id = random_id();
    let (status_tx, _) = watch::channel(LinkStatus::New);
    let status = Arc::new(status_tx);
    let disconnect_task: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));

    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => dump_candidate("LOCAL", &c),
            None => debug!("ICE candidate gathering finished (null candidate)"),
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    {
        // слабая ссылка: обработчик живёт внутри самого pc
        let pc_weak = Arc::downgrade(&pc);
        let status = status.clone();
        let disconnect_task = disconnect_task.clone();
        let link_id = id.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(link = %link_id, state = ?st, "peer connection state changed");
            match st {
                RTCPeerConnectionState::Connecting => {
                    status.send_replace(LinkStatus::Connecting);
                }
                RTCPeerConnectionState::Connected => {
                    // отменяем отложенный disconnect, если он был
                    if let Some(handle) = disconnect_task.lock().take() {
                        handle.abort();
                    }
                    status.send_replace(LinkStatus::Connected);
                    if let Some(pc) = pc_weak.upgrade() {
                        tokio::spawn(async move {
                            dump_selected_pair(&pc, "CONNECTED").await;
                        });
                    }
                }
                RTCPeerConnectionState::Disconnected => {
                    status.send_replace(LinkStatus::Disconnected);
                    let mut pending = disconnect_task.lock();
                    if pending.is_none() {
                        let status = status.clone();
                        let pc_weak = pc_weak.clone();
                        *pending = Some(tokio::spawn(async move {
                            sleep(GRACE_PERIOD).await;
                            let recovered = pc_weak
                                .upgrade()
                                .map(|pc| pc.connection_state() == RTCPeerConnectionState::Connected)
                                .unwrap_or(false);
                            if !recovered {
                                warn!("connection did not recover within grace period");
                                status.send_replace(LinkStatus::Failed);
                            }
                        }));
                    }
                }
                RTCPeerConnectionState::Failed => {
                    status.send_replace(LinkStatus::Failed);
                }
                RTCPeerConnectionState::Closed => {
                    if let Some(handle) = disconnect_task.lock().take() {
                        handle.abort();
                    }
                    status.send_replace(LinkStatus::Closed);
                }
                _ => {}
            }
            Box::pin(async {})
        }));
    }

    if let Some(sink) = sink {
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let remote = RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind: track.kind().to_string(),
                inner: Some(track),
            };
            info!(track = %remote.id, kind = %remote.kind, "remote track arrived");
            sink.bind(remote);
            Box::pin(async {})
        }));
    }

    Ok(RtcPeerLink {
        id,
        pc,
        status,
        disconnect_task,
        gathering_timeout,
    })
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = if servers.is_empty() {
        vec![RTCIceServer {
            urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            ..Default::default()
        }]
    } else {
        get_user_ice_servers(servers)
    };

    RTCConfiguration {
        ice_servers,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let converted = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    converted.map_err(|e| NegotiationError::Sdp(e.to_string()))
}

impl RtcPeerLink {
    async fn local_description(&self, kind: SdpType) -> Result<SessionDescription, NegotiationError> {
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| NegotiationError::Peer("local description missing".into()))?;
        Ok(SessionDescription {
            kind,
            sdp: local.sdp,
        })
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add_tracks(&self, media: &MediaStream) -> Result<(), NegotiationError> {
        for track in media.tracks() {
            let sender = self.pc.add_track(track.clone()).await?;
            // RTCP нужно вычитывать, иначе интерсепторы не работают
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        debug!(link = %self.id, tracks = media.tracks().len(), "local tracks attached");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await?;
        let gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        wait_for_gathering(&self.pc, gather_complete, self.gathering_timeout).await?;
        self.local_description(SdpType::Offer).await
    }

    async fn create_answer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.pc.set_remote_description(to_rtc(offer)?).await?;
        let answer = self.pc.create_answer(None).await?;
        let gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        wait_for_gathering(&self.pc, gather_complete, self.gathering_timeout).await?;
        self.local_description(SdpType::Answer).await
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), NegotiationError> {
        self.pc.set_remote_description(to_rtc(answer)?).await?;
        Ok(())
    }

    fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    async fn close(&self) {
        if let Some(handle) = self.disconnect_task.lock().take() {
            handle.abort();
        }
        if let Err(e) = self.pc.close().await {
            warn!(link = %self.id, error = %e, "peer connection close failed");
        }
        self.status.send_replace(LinkStatus::Closed);
    }
}
