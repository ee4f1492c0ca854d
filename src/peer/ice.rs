use crate::error::NegotiationError;
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::{
    api::APIBuilder,
    ice_transport::{
        ice_gatherer_state::RTCIceGathererState, ice_gathering_state::RTCIceGatheringState,
        ice_server::RTCIceServer,
    },
    peer_connection::{configuration::RTCConfiguration, RTCPeerConnection},
};

/// Ждём, пока сбор ICE перейдёт в `complete`.
///
/// Промис нужно взять до `set_local_description`, иначе можно пропустить
/// переход; поэтому функция принимает уже взятый приёмник.
pub async fn wait_for_gathering(
    pc: &RTCPeerConnection,
    mut gather_complete: mpsc::Receiver<()>,
    limit: Duration,
) -> Result<(), NegotiationError> {
    if pc.ice_gathering_state() == RTCIceGatheringState::Complete {
        return Ok(());
    }
    debug!(limit_ms = limit.as_millis() as u64, "waiting for ICE gathering to complete");
    match timeout(limit, gather_complete.recv()).await {
        // закрытие канала тоже означает complete
        Ok(_) => {
            debug!("ICE gathering complete");
            Ok(())
        }
        Err(_) => {
            warn!(state = ?pc.ice_gathering_state(), "ICE gathering timed out");
            Err(NegotiationError::GatheringTimeout(limit.as_millis() as u64))
        }
    }
}

/// Проверка доступности STUN/TURN сервера: ждём srflx/relay кандидата.
/// Ограничена таймаутом, при любой проблеме возвращает false.
pub async fn probe_ice_server(config: &ServerConfig, limit: Duration) -> bool {
    let url = add_ice_url_scheme(config);
    info!(server = %config.id, %url, kind = %config.r#type, "probing ICE server");

    let rtc_config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![url],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        }],
        ..Default::default()
    };

    let api = APIBuilder::new().build();
    match api.new_peer_connection(rtc_config).await {
        Ok(pc) => check_via_ice_gathering(Arc::new(pc), &config.r#type, limit).await,
        Err(e) => {
            warn!(error = %e, "failed to create probe peer connection");
            false
        }
    }
}

async fn check_via_ice_gathering(
    peer_connection: Arc<RTCPeerConnection>,
    server_type: &str,
    limit: Duration,
) -> bool {
    let (state_tx, mut state_rx) = mpsc::channel(10);
    peer_connection.on_ice_gathering_state_change(Box::new(move |state| {
        let tx = state_tx.clone();
        Box::pin(async move {
            let _ = tx.send(state).await;
        })
    }));

    // для STUN ищем srflx, для TURN relay
    let wanted = if server_type == "turn" { "relay" } else { "srflx" };
    let (candidate_tx, mut candidate_rx) = mpsc::channel(10);
    peer_connection.on_ice_candidate(Box::new(move |candidate| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            if let Some(c) = candidate {
                let matched = c
                    .to_json()
                    .map(|json| json.candidate.contains(wanted))
                    .unwrap_or(false);
                if matched {
                    let _ = tx.send(()).await;
                }
            }
        })
    }));

    // data channel + offer, чтобы запустить сбор
    if let Err(e) = peer_connection.create_data_channel("probe", None).await {
        warn!(error = %e, "failed to create probe data channel");
        let _ = peer_connection.close().await;
        return false;
    }
    let started = match peer_connection.create_offer(None).await {
        Ok(offer) => peer_connection.set_local_description(offer).await.is_ok(),
        Err(_) => false,
    };
    if !started {
        warn!("failed to start ICE gathering for probe");
        let _ = peer_connection.close().await;
        return false;
    }

    let reachable = tokio::select! {
        found = timeout(limit, candidate_rx.recv()) => matches!(found, Ok(Some(()))),
        _ = async {
            while let Some(state) = state_rx.recv().await {
                if state == RTCIceGathererState::Complete {
                    break;
                }
            }
        } => false,
    };
    info!(reachable, "ICE server probe finished");
    let _ = peer_connection.close().await;
    reachable
}
