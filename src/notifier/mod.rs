//! Канал push-уведомлений: одна тема на организацию, событие без полезной нагрузки.
//!
//! Сервер держит `ChangeNotifier`; клиенты открывают `ChangeFeed` и на каждое
//! событие сами перечитывают агрегат. Потеря потока не фатальна: остаётся опрос.

pub mod sse;

use crate::error::FeedError;
use crate::model::{OrganizationId, Role};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace};

pub use sse::HttpChangeFeed;

/// Имя SSE-события на проводе
pub const CHANGED_EVENT: &str = "changed";

const TOPIC_CAPACITY: usize = 16;

/// Поток «что-то изменилось»; `Err` означает, что поток оборвался
pub type ChangeStream = BoxStream<'static, Result<(), FeedError>>;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn open(&self, role: Role) -> Result<ChangeStream, FeedError>;
}

/// Серверная сторона: темы по организациям
#[derive(Default)]
pub struct ChangeNotifier {
    topics: Mutex<HashMap<OrganizationId, broadcast::Sender<()>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, org: &OrganizationId) {
        let topics = self.topics.lock();
        if let Some(tx) = topics.get(org) {
            // ошибка только если подписчиков нет
            let receivers = tx.send(()).unwrap_or(0);
            trace!(%org, receivers, "change notified");
        }
    }

    pub fn subscribe(&self, org: &OrganizationId, role: Role) -> broadcast::Receiver<()> {
        let mut topics = self.topics.lock();
        let tx = topics
            .entry(org.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        debug!(%org, %role, subscribers = tx.receiver_count() + 1, "change subscriber joined");
        tx.subscribe()
    }

    pub fn subscriber_count(&self, org: &OrganizationId) -> usize {
        self.topics
            .lock()
            .get(org)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// Поток изменений из `broadcast`; отставание (Lagged) тоже значит «изменилось»
pub fn change_stream(rx: broadcast::Receiver<()>) -> ChangeStream {
    BroadcastStream::new(rx).map(|_| Ok(())).boxed()
}

/// Внутрипроцессный канал: напрямую из `ChangeNotifier`
#[derive(Clone)]
pub struct LocalChangeFeed {
    notifier: Arc<ChangeNotifier>,
    org: OrganizationId,
}

impl LocalChangeFeed {
    pub fn new(notifier: Arc<ChangeNotifier>, org: OrganizationId) -> Self {
        Self { notifier, org }
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn open(&self, role: Role) -> Result<ChangeStream, FeedError> {
        Ok(change_stream(self.notifier.subscribe(&self.org, role)))
    }
}
