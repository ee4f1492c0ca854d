#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use stagecast_lib::capture::MediaStream;
use stagecast_lib::error::{NegotiationError, StoreError};
use stagecast_lib::model::{
    AnswerSubmission, DisplayAggregateState, OrganizationId, SessionDescription, SignalingRecord,
};
use stagecast_lib::notifier::{ChangeFeed, ChangeNotifier, LocalChangeFeed};
use stagecast_lib::peer::{
    LinkStatus, NegotiationState, NegotiationStatus, PeerFactory, PeerLink, VideoSink,
};
use stagecast_lib::store::{LocalStore, SignalingHub, StoreClient};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub fn hub() -> (Arc<SignalingHub>, OrganizationId) {
    (
        Arc::new(SignalingHub::new(Arc::new(ChangeNotifier::new()))),
        OrganizationId::new("grace-chapel"),
    )
}

pub fn local_feed(hub: &Arc<SignalingHub>, org: &OrganizationId) -> Arc<dyn ChangeFeed> {
    Arc::new(LocalChangeFeed::new(hub.notifier().clone(), org.clone()))
}

/// Соединение-заглушка: SDP детерминирован, статус управляется тестом
pub struct FakeLink {
    id: String,
    status: Mutex<LinkStatus>,
    closed: AtomicBool,
    tracks: AtomicUsize,
    applied: Mutex<Vec<SessionDescription>>,
    stall_gathering: bool,
}

impl FakeLink {
    fn new(id: String, stall_gathering: bool) -> Self {
        Self {
            id,
            stall_gathering,
            status: Mutex::new(LinkStatus::New),
            closed: AtomicBool::new(false),
            tracks: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> Vec<SessionDescription> {
        self.applied.lock().clone()
    }

    pub fn set_status(&self, status: LinkStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add_tracks(&self, media: &MediaStream) -> Result<(), NegotiationError> {
        self.tracks.fetch_add(media.tracks().len(), Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer(format!("offer-from-{}", self.id)))
    }

    async fn create_answer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        if self.stall_gathering {
            // сбор ICE никогда не завершается
            std::future::pending::<()>().await;
        }
        Ok(SessionDescription::answer(format!("answer-from-{}-to-{}", self.id, offer.sdp)))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), NegotiationError> {
        self.applied.lock().push(answer.clone());
        *self.status.lock() = LinkStatus::Connected;
        Ok(())
    }

    fn status(&self) -> LinkStatus {
        if self.is_closed() {
            LinkStatus::Closed
        } else {
            *self.status.lock()
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Фабрика заглушек; хранит все открытые соединения для проверок
pub struct FakePeerFactory {
    prefix: &'static str,
    links: Mutex<Vec<Arc<FakeLink>>>,
    fail_open: AtomicBool,
    stall_gathering: AtomicBool,
}

impl FakePeerFactory {
    pub fn new(prefix: &'static str) -> Arc<Self> {
        Arc::new(Self {
            prefix,
            links: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
            stall_gathering: AtomicBool::new(false),
        })
    }

    pub fn opened(&self) -> usize {
        self.links.lock().len()
    }

    pub fn live(&self) -> usize {
        self.links.lock().iter().filter(|l| !l.is_closed()).count()
    }

    pub fn link(&self, index: usize) -> Arc<FakeLink> {
        self.links.lock()[index].clone()
    }

    pub fn last(&self) -> Arc<FakeLink> {
        self.links.lock().last().cloned().expect("no link opened")
    }

    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn stall_gathering(&self) {
        self.stall_gathering.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn open(
        &self,
        _sink: Option<Arc<dyn VideoSink>>,
    ) -> Result<Arc<dyn PeerLink>, NegotiationError> {
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(NegotiationError::GatheringTimeout(10_000));
        }
        let mut links = self.links.lock();
        let link = Arc::new(FakeLink::new(
            format!("{}{}", self.prefix, links.len() + 1),
            self.stall_gathering.load(Ordering::SeqCst),
        ));
        links.push(link.clone());
        Ok(link)
    }
}

/// Обёртка над локальным хранилищем: считает чтения, умеет имитировать сбои сети
pub struct ScriptedStore {
    inner: LocalStore,
    fetches: AtomicUsize,
    fail_offer: AtomicBool,
    fail_answer: AtomicBool,
    fail_fetch: AtomicBool,
}

impl ScriptedStore {
    pub fn new(hub: Arc<SignalingHub>, org: OrganizationId) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalStore::new(hub, org),
            fetches: AtomicUsize::new(0),
            fail_offer: AtomicBool::new(false),
            fail_answer: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_offers(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    pub fn fail_answers(&self, fail: bool) {
        self.fail_answer.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    fn read_failure(&self) -> Result<(), StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Network("request timed out".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for ScriptedStore {
    async fn fetch_record(&self) -> Result<SignalingRecord, StoreError> {
        self.read_failure()?;
        self.inner.fetch_record().await
    }

    async fn publish_offer(&self, offer: &SessionDescription) -> Result<SignalingRecord, StoreError> {
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(StoreError::Network("connection reset".into()));
        }
        self.inner.publish_offer(offer).await
    }

    async fn publish_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<SignalingRecord, StoreError> {
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(StoreError::Network("connection reset".into()));
        }
        self.inner.publish_answer(submission).await
    }

    async fn clear(&self) -> Result<SignalingRecord, StoreError> {
        self.inner.clear().await
    }

    async fn fetch_aggregate(&self) -> Result<DisplayAggregateState, StoreError> {
        self.read_failure()?;
        self.inner.fetch_aggregate().await
    }
}

/// Ждёт нужного состояния движка (время в тестах обычно на паузе)
pub async fn wait_for_state(rx: &mut watch::Receiver<NegotiationStatus>, state: NegotiationState) {
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
        .expect("status channel closed");
}

/// Опрос условия с шагом 10 мс
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}
