//! Синхронизатор состояния дисплея.
//!
//! Два производителя (push по событиям и периодический опрос) кладут снимки
//! агрегата в одну очередь; единственный потребитель отбрасывает снимки,
//! равные последнему доставленному, и вызывает обработчик. Все три задачи
//! останавливаются одним `CancellationToken`.

use crate::error::Error;
use crate::model::{DisplayAggregateState, Role};
use crate::notifier::ChangeFeed;
use crate::store::StoreClient;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const QUEUE_DEPTH: usize = 32;

/// Потребитель снимков. `Err` значит, что снимок не обработан: такой же снимок будет
/// доставлен повторно на следующем тике.
#[async_trait]
pub trait AggregateHandler: Send + 'static {
    async fn on_aggregate(&mut self, state: &DisplayAggregateState) -> Result<(), Error>;

    /// Вызывается на каждой доставке до дедупликации, в том числе для дубликатов.
    /// Здесь проверяется то, что меняется без изменения агрегата (живость соединения).
    async fn on_delivery(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    Push,
    Poll,
}

#[derive(Debug)]
struct Delivery {
    source: DeliverySource,
    state: DisplayAggregateState,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// `None`: без опроса, только push
    pub poll_interval: Option<Duration>,
    pub push_retry: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: Some(Duration::from_millis(500)),
            push_retry: Duration::from_secs(3),
        }
    }
}

impl From<&crate::config::SyncSection> for SyncOptions {
    fn from(section: &crate::config::SyncSection) -> Self {
        Self {
            poll_interval: section.poll_interval(),
            push_retry: section.push_retry(),
        }
    }
}

pub struct StateSynchronizer {
    store: Arc<dyn StoreClient>,
    feed: Option<Arc<dyn ChangeFeed>>,
    options: SyncOptions,
}

impl StateSynchronizer {
    pub fn new(
        store: Arc<dyn StoreClient>,
        feed: Option<Arc<dyn ChangeFeed>>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            feed,
            options,
        }
    }

    /// Запускает доставку в `handler`. Организация задана клиентами хранилища и канала.
    pub fn subscribe<H: AggregateHandler>(&self, role: Role, handler: H) -> Subscription {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);

        let push = self.feed.clone().map(|feed| {
            tokio::spawn(run_push(
                feed,
                self.store.clone(),
                tx.clone(),
                token.clone(),
                role,
                self.options.push_retry,
            ))
        });
        // нулевой период означает «без опроса», как и в конфиге
        let period = self.options.poll_interval.filter(|period| !period.is_zero());
        let poll = period.map(|period| {
            tokio::spawn(run_poll(self.store.clone(), tx.clone(), token.clone(), period))
        });
        drop(tx);
        let consumer = tokio::spawn(run_consumer(rx, handler, token.clone()));

        info!(%role, push = push.is_some(), poll = ?period, "state sync subscribed");
        Subscription {
            token,
            push,
            poll,
            consumer: Some(consumer),
        }
    }
}

/// Подписка; отмена гарантирована и при `unsubscribe`, и при drop
pub struct Subscription {
    token: CancellationToken,
    push: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Закрывает поток событий, затем таймер опроса, затем потребителя
    pub async fn unsubscribe(mut self) {
        self.shutdown().await;
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    async fn shutdown(&mut self) {
        self.token.cancel();
        for (name, handle) in [
            ("push", self.push.take()),
            ("poll", self.poll.take()),
            ("consumer", self.consumer.take()),
        ] {
            if let Some(handle) = handle {
                // паника одной задачи не мешает остановить остальные
                if let Err(e) = handle.await {
                    warn!(task = name, error = %e, "sync task ended abnormally");
                }
            }
        }
        debug!("state sync unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn fetch_and_enqueue(
    store: &Arc<dyn StoreClient>,
    tx: &mpsc::Sender<Delivery>,
    token: &CancellationToken,
    source: DeliverySource,
) {
    let fetched = tokio::select! {
        _ = token.cancelled() => return,
        fetched = store.fetch_aggregate() => fetched,
    };
    match fetched {
        Ok(state) => {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tx.send(Delivery { source, state }) => {}
            }
        }
        // не повторяем сразу: следующий тик или событие
        Err(e) => warn!(?source, error = %e, "aggregate fetch failed"),
    }
}

async fn run_push(
    feed: Arc<dyn ChangeFeed>,
    store: Arc<dyn StoreClient>,
    tx: mpsc::Sender<Delivery>,
    token: CancellationToken,
    role: Role,
    retry: Duration,
) {
    loop {
        let opened = tokio::select! {
            _ = token.cancelled() => return,
            opened = feed.open(role) => opened,
        };
        match opened {
            Ok(mut changes) => {
                debug!(%role, "change feed open");
                // догоняем то, что могли пропустить, пока потока не было
                fetch_and_enqueue(&store, &tx, &token, DeliverySource::Push).await;
                loop {
                    let next = tokio::select! {
                        _ = token.cancelled() => return,
                        next = changes.next() => next,
                    };
                    match next {
                        Some(Ok(())) => {
                            fetch_and_enqueue(&store, &tx, &token, DeliverySource::Push).await
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "change feed dropped, falling back to poll");
                            break;
                        }
                        None => {
                            info!("change feed closed by server, falling back to poll");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "change feed unavailable, relying on poll"),
        }
        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep(retry) => {}
        }
    }
}

async fn run_poll(
    store: Arc<dyn StoreClient>,
    tx: mpsc::Sender<Delivery>,
    token: CancellationToken,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        fetch_and_enqueue(&store, &tx, &token, DeliverySource::Poll).await;
    }
}

async fn run_consumer<H: AggregateHandler>(
    mut rx: mpsc::Receiver<Delivery>,
    mut handler: H,
    token: CancellationToken,
) {
    let mut last: Option<DisplayAggregateState> = None;
    loop {
        let delivery = tokio::select! {
            _ = token.cancelled() => break,
            delivery = rx.recv() => delivery,
        };
        let Some(Delivery { source, state }) = delivery else {
            break;
        };
        let checked = tokio::select! {
            _ = token.cancelled() => break,
            checked = handler.on_delivery() => checked,
        };
        if let Err(e) = checked {
            warn!(?source, error = %e, "delivery check failed");
        }
        if last.as_ref() == Some(&state) {
            trace!(?source, "duplicate aggregate skipped");
            continue;
        }
        // отмена прерывает и незавершённое согласование (например, сбор ICE)
        let handled = tokio::select! {
            _ = token.cancelled() => break,
            handled = handler.on_aggregate(&state) => handled,
        };
        match handled {
            Ok(()) => last = Some(state),
            Err(e) => {
                warn!(?source, error = %e, "aggregate handler failed, will retry on next delivery");
                last = None;
            }
        }
    }
}
