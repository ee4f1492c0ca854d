use crate::error::NegotiationError;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Локальное состояние движка согласования
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Uninitialized,
    /// offer опубликован, ждём answer
    OfferPublished,
    Connected,
    Closed,
}

/// Наблюдаемый статус: состояние и последняя ошибка (для кнопки «перезапустить»)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationStatus {
    pub state: NegotiationState,
    pub last_error: Option<NegotiationError>,
}

/// Канал статуса движка. Каждый движок владеет своим экземпляром.
pub struct StatusBoard {
    label: &'static str,
    tx: watch::Sender<NegotiationStatus>,
}

impl StatusBoard {
    pub fn new(label: &'static str) -> Self {
        let (tx, _) = watch::channel(NegotiationStatus {
            state: NegotiationState::Uninitialized,
            last_error: None,
        });
        Self { label, tx }
    }

    pub fn state(&self) -> NegotiationState {
        self.tx.borrow().state
    }

    pub fn snapshot(&self) -> NegotiationStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationStatus> {
        self.tx.subscribe()
    }

    /// Переход без ошибки; прошлая ошибка сбрасывается
    pub fn emit_state(&self, state: NegotiationState) {
        let label = self.label;
        self.tx.send_if_modified(|status| {
            let changed = status.state != state || status.last_error.is_some();
            if status.state != state {
                info!(engine = label, from = ?status.state, to = ?state, "negotiation state changed");
            }
            status.state = state;
            status.last_error = None;
            changed
        });
    }

    pub fn emit_failed(&self, state: NegotiationState, error: NegotiationError) {
        warn!(engine = self.label, to = ?state, %error, "negotiation failed");
        self.tx.send_replace(NegotiationStatus {
            state,
            last_error: Some(error),
        });
    }
}

/// Период ожидания перед тем, как считать разорванное соединение потерянным
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);
