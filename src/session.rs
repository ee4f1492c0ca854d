//! «Экраны» отправителя и проектора: связывают захват, движок и синхронизатор.
//!
//! Порядок при размонтировании: поток событий → таймер опроса → соединение.

use crate::capture::{CaptureProvider, SourceKind};
use crate::error::{CaptureError, Error};
use crate::model::{DisplayAggregateState, DisplayContent, PresentationSettings, Role, SessionDescription};
use crate::negotiation::{ReceiverEngine, SenderEngine};
use crate::peer::NegotiationStatus;
use crate::sync::{AggregateHandler, StateSynchronizer, Subscription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Вывод текста/медиа на проекторе
pub trait DisplaySink: Send + Sync {
    fn render(&self, content: &DisplayContent, settings: &PresentationSettings);
}

struct ProjectorHandler {
    engine: Arc<Mutex<ReceiverEngine>>,
    display: Option<Arc<dyn DisplaySink>>,
}

#[async_trait]
impl AggregateHandler for ProjectorHandler {
    async fn on_aggregate(&mut self, state: &DisplayAggregateState) -> Result<(), Error> {
        if let Some(display) = &self.display {
            display.render(&state.content, &state.settings);
        }
        self.engine.lock().await.observe(&state.signaling).await?;
        Ok(())
    }

    async fn on_delivery(&mut self) -> Result<(), Error> {
        self.engine.lock().await.check_link().await?;
        Ok(())
    }
}

pub struct ProjectorSession {
    engine: Arc<Mutex<ReceiverEngine>>,
    subscription: Option<Subscription>,
}

impl ProjectorSession {
    pub fn mount(
        sync: &StateSynchronizer,
        engine: ReceiverEngine,
        display: Option<Arc<dyn DisplaySink>>,
    ) -> Self {
        let engine = Arc::new(Mutex::new(engine));
        let handler = ProjectorHandler {
            engine: engine.clone(),
            display,
        };
        let subscription = sync.subscribe(Role::Projector, handler);
        info!("projector mounted");
        Self {
            engine,
            subscription: Some(subscription),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<ReceiverEngine>> {
        &self.engine
    }

    pub async fn status(&self) -> NegotiationStatus {
        self.engine.lock().await.status()
    }

    /// Ручной перезапуск после ошибки согласования
    pub async fn restart(&self) -> Result<(), Error> {
        let mut engine = self.engine.lock().await;
        engine.restart().await;
        // синхронизатор повторно не доставит неизменившийся снимок
        engine.resync().await?;
        Ok(())
    }

    pub async fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
        self.engine.lock().await.close().await;
        info!("projector unmounted");
    }
}

impl Drop for ProjectorSession {
    fn drop(&mut self) {
        // unmount не вызывали: отменяем подписку и закрываем соединение в фоне
        if let Some(subscription) = self.subscription.take() {
            drop(subscription);
            if let Ok(handle) = Handle::try_current() {
                let engine = self.engine.clone();
                handle.spawn(async move {
                    engine.lock().await.close().await;
                });
            }
        }
    }
}

struct SenderHandler {
    engine: Arc<Mutex<SenderEngine>>,
}

#[async_trait]
impl AggregateHandler for SenderHandler {
    async fn on_aggregate(&mut self, state: &DisplayAggregateState) -> Result<(), Error> {
        self.engine.lock().await.observe(&state.signaling).await?;
        Ok(())
    }

    async fn on_delivery(&mut self) -> Result<(), Error> {
        self.engine.lock().await.check_link().await?;
        Ok(())
    }
}

pub struct SenderSession<C: CaptureProvider> {
    capture: C,
    engine: Arc<Mutex<SenderEngine>>,
    subscription: Option<Subscription>,
}

impl<C: CaptureProvider> SenderSession<C> {
    pub fn mount(sync: &StateSynchronizer, engine: SenderEngine, capture: C) -> Self {
        let engine = Arc::new(Mutex::new(engine));
        let subscription = sync.subscribe(
            Role::Sender,
            SenderHandler {
                engine: engine.clone(),
            },
        );
        info!("sender mounted");
        Self {
            capture,
            engine,
            subscription: Some(subscription),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<SenderEngine>> {
        &self.engine
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub async fn status(&self) -> NegotiationStatus {
        self.engine.lock().await.status()
    }

    /// Захват и публикация offer. Без медиа offer не публикуется.
    pub async fn go_live(&mut self, kind: SourceKind) -> Result<SessionDescription, Error> {
        let stream = self
            .capture
            .acquire(kind)?
            .ok_or_else(|| CaptureError::Unavailable(kind.as_str().into()))?;
        let started = self.engine.lock().await.start_streaming(stream).await;
        match started {
            Ok(offer) => Ok(offer),
            Err(e) => {
                self.capture.release();
                Err(e.into())
            }
        }
    }

    /// Остановка эфира: соединение закрыто, запись очищена, камера освобождена
    pub async fn stop(&mut self) -> Result<(), Error> {
        let stopped = self.engine.lock().await.stop().await;
        self.capture.release();
        stopped?;
        Ok(())
    }

    pub async fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
        self.engine.lock().await.close().await;
        self.capture.release();
        debug!("sender unmounted");
    }
}

impl<C: CaptureProvider> Drop for SenderSession<C> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            drop(subscription);
            if let Ok(handle) = Handle::try_current() {
                let engine = self.engine.clone();
                handle.spawn(async move {
                    engine.lock().await.close().await;
                });
            }
        }
        self.capture.release();
    }
}
