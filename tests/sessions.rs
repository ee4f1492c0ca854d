mod common;

use common::{eventually, hub, local_feed, wait_for_state, FakePeerFactory, ScriptedStore};
use parking_lot::Mutex;
use stagecast_lib::capture::{CaptureProvider, SourceKind, SyntheticCapture};
use stagecast_lib::error::{CaptureError, Error};
use stagecast_lib::model::{DisplayContent, PresentationSettings, SessionDescription};
use stagecast_lib::error::NegotiationError;
use stagecast_lib::peer::{LinkStatus, NegotiationState};
use stagecast_lib::{
    DisplaySink, ProjectorSession, ReceiverEngine, SenderEngine, SenderSession, StateSynchronizer,
    SyncOptions,
};
use std::sync::Arc;
use std::time::Duration;

fn options(poll_ms: Option<u64>) -> SyncOptions {
    SyncOptions {
        poll_interval: poll_ms.map(Duration::from_millis),
        push_retry: Duration::from_secs(3),
    }
}

#[derive(Default)]
struct Screen(Mutex<Vec<DisplayContent>>);

impl DisplaySink for Screen {
    fn render(&self, content: &DisplayContent, _settings: &PresentationSettings) {
        self.0.lock().push(content.clone());
    }
}

#[tokio::test(start_paused = true)]
async fn live_feed_reaches_the_projector_and_stop_tears_it_down() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), Some(local_feed(&hub, &org)), options(Some(500)));
    let sender_peers = FakePeerFactory::new("s");
    let receiver_peers = FakePeerFactory::new("r");

    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), receiver_peers.clone()),
        None,
    );
    let mut projector_status = projector.engine().lock().await.subscribe_status();
    let mut sender = SenderSession::mount(
        &sync,
        SenderEngine::new(store.clone(), sender_peers.clone()),
        SyntheticCapture::new(),
    );
    let mut sender_status = sender.engine().lock().await.subscribe_status();

    sender.go_live(SourceKind::Front).await.unwrap();
    wait_for_state(&mut projector_status, NegotiationState::Connected).await;
    wait_for_state(&mut sender_status, NegotiationState::Connected).await;
    assert_eq!(receiver_peers.opened(), 1);
    assert_eq!(sender.capture().live_streams(), 1);

    sender.stop().await.unwrap();
    assert_eq!(sender.capture().live_streams(), 0);
    assert!(hub.record(&org).is_empty());
    wait_for_state(&mut projector_status, NegotiationState::Uninitialized).await;
    assert_eq!(receiver_peers.live(), 0);
    assert_eq!(sender_peers.live(), 0);

    sender.unmount().await;
    projector.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn push_and_poll_duplicates_open_a_single_link() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), Some(local_feed(&hub, &org)), options(Some(100)));
    let receiver_peers = FakePeerFactory::new("r");
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), receiver_peers.clone()),
        None,
    );
    let mut status = projector.engine().lock().await.subscribe_status();

    hub.put_offer(&org, SessionDescription::offer("o1"));
    wait_for_state(&mut status, NegotiationState::Connected).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(receiver_peers.opened(), 1);
    assert!(store.fetches() > 10);
    assert!(hub.record(&org).answer.is_some());
    projector.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn push_alone_keeps_the_projector_in_sync() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), Some(local_feed(&hub, &org)), options(None));
    let screen = Arc::new(Screen::default());
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), FakePeerFactory::new("r")),
        Some(screen.clone() as Arc<dyn DisplaySink>),
    );
    let mut status = projector.engine().lock().await.subscribe_status();

    hub.set_content(&org, DisplayContent::LiveFeed);
    hub.put_offer(&org, SessionDescription::offer("o1"));
    wait_for_state(&mut status, NegotiationState::Connected).await;
    eventually("live feed rendered", || {
        screen.0.lock().last() == Some(&DisplayContent::LiveFeed)
    })
    .await;
    projector.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn poll_alone_recovers_without_a_change_feed() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), None, options(Some(200)));
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), FakePeerFactory::new("r")),
        None,
    );
    let mut status = projector.engine().lock().await.subscribe_status();

    hub.put_offer(&org, SessionDescription::offer("o1"));
    wait_for_state(&mut status, NegotiationState::Connected).await;
    assert_eq!(hub.notifier().subscriber_count(&org), 0);
    projector.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn unmount_releases_feed_timer_and_link() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), Some(local_feed(&hub, &org)), options(Some(100)));
    let receiver_peers = FakePeerFactory::new("r");
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), receiver_peers.clone()),
        None,
    );
    let mut status = projector.engine().lock().await.subscribe_status();

    hub.put_offer(&org, SessionDescription::offer("o1"));
    wait_for_state(&mut status, NegotiationState::Connected).await;
    assert_eq!(hub.notifier().subscriber_count(&org), 1);
    assert_eq!(receiver_peers.live(), 1);

    projector.unmount().await;

    assert_eq!(hub.notifier().subscriber_count(&org), 0);
    let fetches = store.fetches();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.fetches(), fetches);
    assert_eq!(receiver_peers.live(), 0);
    assert_eq!(status.borrow().state, NegotiationState::Closed);
}

#[tokio::test(start_paused = true)]
async fn unmount_during_gathering_releases_everything() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), Some(local_feed(&hub, &org)), options(Some(100)));
    let receiver_peers = FakePeerFactory::new("r");
    receiver_peers.stall_gathering();
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), receiver_peers.clone()),
        None,
    );

    hub.put_offer(&org, SessionDescription::offer("o1"));
    eventually("receiver link opened", || receiver_peers.opened() == 1).await;
    assert_eq!(hub.notifier().subscriber_count(&org), 1);

    tokio::time::timeout(Duration::from_secs(1), projector.unmount())
        .await
        .expect("unmount must not wait for ICE gathering");

    assert_eq!(hub.notifier().subscriber_count(&org), 0);
    let fetches = store.fetches();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.fetches(), fetches);
    assert!(receiver_peers.link(0).is_closed());
    assert_eq!(hub.record(&org).answer, None);
}

#[tokio::test(start_paused = true)]
async fn capture_failure_publishes_nothing() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), None, options(Some(500)));
    let sender_peers = FakePeerFactory::new("s");
    let mut sender = SenderSession::mount(
        &sync,
        SenderEngine::new(store.clone(), sender_peers.clone()),
        SyntheticCapture::with_sources(vec![SourceKind::Front]),
    );

    let err = sender.go_live(SourceKind::Screen).await.unwrap_err();
    assert!(matches!(err, Error::Capture(CaptureError::Unavailable(_))));
    assert!(hub.record(&org).is_empty());
    assert_eq!(sender_peers.opened(), 0);
    assert!(sender.capture().current().is_none());
    assert_eq!(sender.status().await.state, NegotiationState::Uninitialized);
    sender.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn failed_negotiation_releases_the_camera() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), None, options(Some(500)));
    let sender_peers = FakePeerFactory::new("s");
    let mut sender = SenderSession::mount(
        &sync,
        SenderEngine::new(store.clone(), sender_peers.clone()),
        SyntheticCapture::new(),
    );

    store.fail_offers(true);
    let err = sender.go_live(SourceKind::Back).await.unwrap_err();
    assert!(matches!(err, Error::Negotiation(_)));
    assert_eq!(sender.capture().live_streams(), 0);
    assert_eq!(sender.status().await.state, NegotiationState::Closed);
    assert!(hub.record(&org).is_empty());
    sender.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn link_failure_in_steady_state_closes_both_sides() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), Some(local_feed(&hub, &org)), options(Some(500)));
    let sender_peers = FakePeerFactory::new("s");
    let receiver_peers = FakePeerFactory::new("r");
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), receiver_peers.clone()),
        None,
    );
    let mut projector_status = projector.engine().lock().await.subscribe_status();
    let mut sender = SenderSession::mount(
        &sync,
        SenderEngine::new(store.clone(), sender_peers.clone()),
        SyntheticCapture::new(),
    );
    let mut sender_status = sender.engine().lock().await.subscribe_status();

    sender.go_live(SourceKind::Front).await.unwrap();
    wait_for_state(&mut projector_status, NegotiationState::Connected).await;
    wait_for_state(&mut sender_status, NegotiationState::Connected).await;

    // запись не меняется, падает только транспорт
    let version = hub.record(&org).version;
    sender_peers.last().set_status(LinkStatus::Failed);
    receiver_peers.last().set_status(LinkStatus::Failed);

    wait_for_state(&mut sender_status, NegotiationState::Closed).await;
    wait_for_state(&mut projector_status, NegotiationState::Uninitialized).await;
    assert_eq!(
        sender.status().await.last_error,
        Some(NegotiationError::ConnectionFailed)
    );
    assert_eq!(
        projector.status().await.last_error,
        Some(NegotiationError::ConnectionFailed)
    );
    assert_eq!(sender_peers.live(), 0);
    assert_eq!(receiver_peers.live(), 0);
    assert_eq!(hub.record(&org).version, version);

    sender.unmount().await;
    projector.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn projector_recovers_once_fetches_succeed_again() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), None, options(Some(200)));
    let receiver_peers = FakePeerFactory::new("r");
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), receiver_peers.clone()),
        None,
    );
    let mut status = projector.engine().lock().await.subscribe_status();

    store.fail_fetches(true);
    hub.put_offer(&org, SessionDescription::offer("o1"));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(store.fetches() >= 5);
    assert_eq!(receiver_peers.opened(), 0);
    assert_eq!(status.borrow().state, NegotiationState::Uninitialized);

    store.fail_fetches(false);
    wait_for_state(&mut status, NegotiationState::Connected).await;
    assert_eq!(receiver_peers.opened(), 1);
    assert!(hub.record(&org).answer.is_some());
    projector.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn gathering_failure_waits_for_a_manual_restart() {
    let (hub, org) = hub();
    let store = ScriptedStore::new(hub.clone(), org.clone());
    let sync = StateSynchronizer::new(store.clone(), Some(local_feed(&hub, &org)), options(Some(200)));
    let receiver_peers = FakePeerFactory::new("r");
    receiver_peers.fail_next_open();
    let projector = ProjectorSession::mount(
        &sync,
        ReceiverEngine::new(store.clone(), receiver_peers.clone()),
        None,
    );
    let mut status = projector.engine().lock().await.subscribe_status();

    hub.put_offer(&org, SessionDescription::offer("o1"));
    tokio::time::timeout(
        Duration::from_secs(30),
        status.wait_for(|s| s.last_error.is_some()),
    )
    .await
    .expect("gathering failure never reported")
    .unwrap();
    assert_eq!(
        status.borrow().last_error,
        Some(NegotiationError::GatheringTimeout(10_000))
    );

    // тот же offer повторно не согласуется сам по себе
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(receiver_peers.opened(), 0);
    assert_eq!(hub.record(&org).answer, None);

    projector.restart().await.unwrap();
    wait_for_state(&mut status, NegotiationState::Connected).await;
    assert_eq!(receiver_peers.opened(), 1);
    projector.unmount().await;
}
