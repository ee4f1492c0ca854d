use crate::capture::MediaStream;
use crate::error::NegotiationError;
use crate::model::{SessionDescription, SignalingRecord};
use crate::peer::{LinkStatus, NegotiationState, NegotiationStatus, PeerFactory, PeerLink, StatusBoard};
use crate::store::StoreClient;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Автомат отправителя (камера → проектор).
///
/// `Uninitialized → OfferPublished → Connected`, `stop()` из любого состояния
/// ведёт в `Closed`. Новый `start_streaming` разрешён и из `Closed`.
pub struct SenderEngine {
    store: Arc<dyn StoreClient>,
    factory: Arc<dyn PeerFactory>,
    status: StatusBoard,
    link: Option<Arc<dyn PeerLink>>,
    offer: Option<SessionDescription>,
    applied_answer: Option<SessionDescription>,
}

impl SenderEngine {
    pub fn new(store: Arc<dyn StoreClient>, factory: Arc<dyn PeerFactory>) -> Self {
        Self {
            store,
            factory,
            status: StatusBoard::new("sender"),
            link: None,
            offer: None,
            applied_answer: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.status.state()
    }

    pub fn status(&self) -> NegotiationStatus {
        self.status.snapshot()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<NegotiationStatus> {
        self.status.subscribe()
    }

    pub fn offer(&self) -> Option<&SessionDescription> {
        self.offer.as_ref()
    }

    pub fn link(&self) -> Option<&Arc<dyn PeerLink>> {
        self.link.as_ref()
    }

    /// Новый offer по переданному потоку; публикуется только полностью собранный.
    pub async fn start_streaming(
        &mut self,
        media: &MediaStream,
    ) -> Result<SessionDescription, NegotiationError> {
        // прошлое соединение не переиспользуем
        self.release_link().await;

        let link = match self.factory.open(None).await {
            Ok(link) => link,
            Err(e) => return Err(self.fail(e).await),
        };
        info!(link = %link.id(), stream = %media.id(), "starting stream negotiation");
        self.link = Some(link.clone());

        if let Err(e) = link.add_tracks(media).await {
            return Err(self.fail(e).await);
        }
        let offer = match link.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(e).await),
        };

        // фоновых повторов нет, повторяет пользователь
        if let Err(e) = self.store.publish_offer(&offer).await {
            return Err(self.fail(e.into()).await);
        }

        info!(offer = %offer.fingerprint(), "offer published");
        self.offer = Some(offer.clone());
        self.status.emit_state(NegotiationState::OfferPublished);
        Ok(offer)
    }

    /// Вызывается на каждом тике синхронизатора
    pub async fn observe(&mut self, record: &SignalingRecord) -> Result<(), NegotiationError> {
        self.check_link().await?;

        match self.state() {
            NegotiationState::OfferPublished | NegotiationState::Connected => {}
            _ => return Ok(()),
        }
        let Some(offer) = self.offer.as_ref() else {
            return Ok(());
        };
        if record.offer.as_ref() != Some(offer) {
            // чужой или устаревший снимок, соединение не трогаем
            debug!(version = record.version, "record does not carry our offer, ignoring");
            return Ok(());
        }
        match record.answer_for(offer).cloned() {
            Some(answer) => self.apply_remote_answer(&answer).await,
            None => Ok(()),
        }
    }

    /// Идемпотентно: повтор того же answer в `Connected` ничего не делает
    pub async fn apply_remote_answer(
        &mut self,
        answer: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        match self.state() {
            NegotiationState::Closed => Err(NegotiationError::Closed),
            NegotiationState::Uninitialized => Err(NegotiationError::NoOffer),
            NegotiationState::Connected => {
                if self.applied_answer.as_ref() != Some(answer) {
                    warn!(answer = %answer.fingerprint(), "different answer while connected, ignoring");
                }
                Ok(())
            }
            NegotiationState::OfferPublished => {
                let Some(link) = self.link.clone() else {
                    return Err(NegotiationError::NoOffer);
                };
                if let Err(e) = link.apply_answer(answer).await {
                    return Err(self.fail(e).await);
                }
                info!(answer = %answer.fingerprint(), "remote answer applied");
                self.applied_answer = Some(answer.clone());
                self.status.emit_state(NegotiationState::Connected);
                Ok(())
            }
        }
    }

    /// Закрывает соединение и очищает общую запись. Единственный путь очистки.
    pub async fn stop(&mut self) -> Result<(), NegotiationError> {
        self.release_link().await;
        self.status.emit_state(NegotiationState::Closed);
        self.store.clear().await?;
        info!("streaming stopped, signaling cleared");
        Ok(())
    }

    /// Закрытие без очистки записи (страница уходит, но эфир не остановлен явно)
    pub async fn close(&mut self) {
        self.release_link().await;
        self.status.emit_state(NegotiationState::Closed);
    }

    /// Упавшее соединение закрывается, движок уходит в `Closed` с ошибкой
    pub async fn check_link(&mut self) -> Result<(), NegotiationError> {
        let failed = self
            .link
            .as_ref()
            .is_some_and(|link| link.status() == LinkStatus::Failed);
        if failed {
            return Err(self.fail(NegotiationError::ConnectionFailed).await);
        }
        Ok(())
    }

    async fn release_link(&mut self) {
        if let Some(link) = self.link.take() {
            debug!(link = %link.id(), "closing sender peer connection");
            link.close().await;
        }
        self.offer = None;
        self.applied_answer = None;
    }

    async fn fail(&mut self, error: NegotiationError) -> NegotiationError {
        self.release_link().await;
        self.status
            .emit_failed(NegotiationState::Closed, error.clone());
        error
    }
}
