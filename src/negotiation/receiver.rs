use crate::error::{NegotiationError, StoreError};
use crate::model::{AnswerSubmission, SessionDescription, SignalingRecord};
use crate::peer::{
    LinkStatus, NegotiationState, NegotiationStatus, PeerFactory, PeerLink, StatusBoard, VideoSink,
};
use crate::store::StoreClient;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Автомат приёмника (проектор). Решение принимается по наблюдаемой записи;
/// «новый offer» определяется сравнением по значению, а не по времени прихода.
pub struct ReceiverEngine {
    store: Arc<dyn StoreClient>,
    factory: Arc<dyn PeerFactory>,
    sink: Option<Arc<dyn VideoSink>>,
    status: StatusBoard,
    link: Option<Arc<dyn PeerLink>>,
    last_offer: Option<SessionDescription>,
    answer: Option<SessionDescription>,
}

impl ReceiverEngine {
    pub fn new(store: Arc<dyn StoreClient>, factory: Arc<dyn PeerFactory>) -> Self {
        Self {
            store,
            factory,
            sink: None,
            status: StatusBoard::new("receiver"),
            link: None,
            last_offer: None,
            answer: None,
        }
    }

    /// Входящие треки будут привязаны к этому приёмнику видео
    pub fn with_video_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
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

    pub fn link(&self) -> Option<&Arc<dyn PeerLink>> {
        self.link.as_ref()
    }

    pub async fn observe(&mut self, record: &SignalingRecord) -> Result<(), NegotiationError> {
        if let Err(e) = self.check_link().await {
            debug!(error = %e, "link dropped, evaluating record from scratch");
        }

        match (&record.offer, &record.answer) {
            (Some(offer), None) if self.last_offer.as_ref() != Some(offer) => {
                self.negotiate(offer.clone()).await
            }
            (Some(_), Some(answer)) if self.answer.as_ref() == Some(answer) => {
                // наш answer в хранилище (в т.ч. если ответ на PUT потерялся)
                trace!("steady state");
                self.status.emit_state(NegotiationState::Connected);
                Ok(())
            }
            (None, _) => {
                // запись очищена отправителем: просто закрываемся, это не ошибка
                if self.link.is_some() {
                    info!("signaling cleared by sender, closing peer connection");
                }
                self.release_link().await;
                self.last_offer = None;
                self.status.emit_state(NegotiationState::Uninitialized);
                Ok(())
            }
            (Some(offer), None) => {
                // тот же offer уже отвечен: answer потерян или offer переопубликован
                match self.answer.clone() {
                    Some(answer) => self.publish_answer(offer.clone(), answer).await,
                    None => Ok(()),
                }
            }
            (Some(offer), Some(answer)) => {
                trace!(
                    offer = %offer.fingerprint(),
                    answer = %answer.fingerprint(),
                    "record answered elsewhere, ignoring"
                );
                Ok(())
            }
        }
    }

    /// Ручной перезапуск: следующий тик заново согласует текущий offer
    pub async fn restart(&mut self) {
        self.release_link().await;
        self.last_offer = None;
        self.status.emit_state(NegotiationState::Uninitialized);
    }

    /// Читает текущую запись и сразу применяет её, не дожидаясь изменения
    pub async fn resync(&mut self) -> Result<(), NegotiationError> {
        let record = self.store.fetch_record().await?;
        self.observe(&record).await
    }

    pub async fn close(&mut self) {
        self.release_link().await;
        self.status.emit_state(NegotiationState::Closed);
    }

    async fn negotiate(&mut self, offer: SessionDescription) -> Result<(), NegotiationError> {
        self.release_link().await;
        // запоминаем сразу: при неудаче не зацикливаемся на том же offer
        self.last_offer = Some(offer.clone());
        info!(offer = %offer.fingerprint(), "new offer observed, answering");

        let link = match self.factory.open(self.sink.clone()).await {
            Ok(link) => link,
            Err(e) => return Err(self.fail(e).await),
        };
        self.link = Some(link.clone());

        let answer = match link.create_answer(&offer).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(e).await),
        };
        self.answer = Some(answer.clone());
        self.publish_answer(offer, answer).await
    }

    async fn publish_answer(
        &mut self,
        offer: SessionDescription,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let fingerprint = answer.fingerprint();
        match self.store.publish_answer(&AnswerSubmission { offer, answer }).await {
            Ok(_) => {
                info!(answer = %fingerprint, "answer published");
                // оптимистично: медиа пойдёт, когда ICE соединится
                self.status.emit_state(NegotiationState::Connected);
                Ok(())
            }
            Err(StoreError::Conflict) => Err(self.fail(StoreError::Conflict.into()).await),
            Err(e) => {
                // соединение и answer держим, следующий тик опубликует снова
                warn!(error = %e, "answer publish failed, will retry on next tick");
                let state = self.state();
                self.status.emit_failed(state, e.clone().into());
                Err(e.into())
            }
        }
    }

    /// Упавшее соединение закрывается, движок уходит в `Uninitialized` с ошибкой
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
            debug!(link = %link.id(), "closing receiver peer connection");
            link.close().await;
        }
        self.answer = None;
    }

    async fn fail(&mut self, error: NegotiationError) -> NegotiationError {
        self.release_link().await;
        self.status
            .emit_failed(NegotiationState::Uninitialized, error.clone());
        error
    }
}
