use futures::StreamExt;
use stagecast_lib::error::StoreError;
use stagecast_lib::model::{AnswerSubmission, DisplayContent, OrganizationId, Role, SessionDescription};
use stagecast_lib::notifier::{ChangeFeed, ChangeNotifier, HttpChangeFeed};
use stagecast_lib::server::{serve_on, AppState};
use stagecast_lib::store::{AuthContext, Connectivity, HttpStoreClient, SignalingHub, StoreClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "projector-secret";

struct TestServer {
    base_url: String,
    hub: Arc<SignalingHub>,
    org: OrganizationId,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let hub = Arc::new(SignalingHub::new(Arc::new(ChangeNotifier::new())));
        let org = OrganizationId::new("grace-chapel");
        let tokens = HashMap::from([(TOKEN.to_string(), org.clone())]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(serve_on(
            listener,
            AppState::new(hub.clone(), tokens),
            async move { stop.cancelled().await },
        ));
        Self {
            base_url: format!("http://{addr}"),
            hub,
            org,
            shutdown,
        }
    }

    fn client(&self, token: &str) -> HttpStoreClient {
        HttpStoreClient::new(
            self.base_url.clone(),
            AuthContext::new(self.org.clone(), token),
            Duration::from_secs(2),
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test]
async fn signaling_round_trip_over_http() {
    let server = TestServer::start().await;
    let client = server.client(TOKEN);
    assert_eq!(client.probe().await, Connectivity::Connected);
    assert!(client.fetch_record().await.unwrap().is_empty());

    let o1 = SessionDescription::offer("v=0 o1");
    let record = client.publish_offer(&o1).await.unwrap();
    assert_eq!(record.offer, Some(o1.clone()));
    assert_eq!(record.version, 1);
    assert!(record.updated_at.is_some());

    let a1 = SessionDescription::answer("v=0 a1");
    client
        .publish_answer(&AnswerSubmission {
            offer: o1.clone(),
            answer: a1.clone(),
        })
        .await
        .unwrap();
    let aggregate = client.fetch_aggregate().await.unwrap();
    assert_eq!(aggregate.signaling.answer_for(&o1), Some(&a1));
    assert_eq!(server.hub.record(&server.org).answer, Some(a1));

    assert!(client.clear().await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_answer_is_rejected_with_conflict() {
    let server = TestServer::start().await;
    let client = server.client(TOKEN);
    client.publish_offer(&SessionDescription::offer("o1")).await.unwrap();
    client.publish_offer(&SessionDescription::offer("o2")).await.unwrap();

    let err = client
        .publish_answer(&AnswerSubmission {
            offer: SessionDescription::offer("o1"),
            answer: SessionDescription::answer("a1"),
        })
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::Conflict);
}

#[tokio::test]
async fn unknown_token_is_unauthorized() {
    let server = TestServer::start().await;
    let client = server.client("guess");
    assert_eq!(client.fetch_record().await.unwrap_err(), StoreError::Unauthorized);
    // проверка связи не требует токена
    assert_eq!(client.probe().await, Connectivity::Connected);
}

#[tokio::test]
async fn unreachable_server_probes_as_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = HttpStoreClient::new(
        format!("http://{addr}"),
        AuthContext::new(OrganizationId::new("org"), TOKEN),
        Duration::from_millis(200),
    );
    assert_eq!(client.probe().await, Connectivity::Disconnected);
    assert!(matches!(client.fetch_record().await, Err(StoreError::Network(_))));
}

#[tokio::test]
async fn descriptions_of_the_wrong_kind_are_rejected() {
    let server = TestServer::start().await;
    let client = server.client(TOKEN);
    let o1 = SessionDescription::offer("v=0 o1");
    client.publish_offer(&o1).await.unwrap();

    let err = client
        .publish_answer(&AnswerSubmission {
            offer: o1.clone(),
            answer: SessionDescription::offer("v=0 not-an-answer"),
        })
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::Status(422));
    let err = client
        .publish_offer(&SessionDescription::answer("v=0 a1"))
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::Status(422));

    let record = server.hub.record(&server.org);
    assert_eq!(record.offer, Some(o1));
    assert_eq!(record.answer, None);
    assert_eq!(record.version, 1);
}

#[tokio::test]
async fn silent_server_fails_within_the_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // принимает соединения и молчит
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let client = HttpStoreClient::new(
        format!("http://{addr}"),
        AuthContext::new(OrganizationId::new("org"), TOKEN),
        Duration::from_millis(200),
    )
    .with_request_timeout(Duration::from_millis(300));

    let fetched = tokio::time::timeout(Duration::from_secs(3), client.fetch_aggregate())
        .await
        .expect("request outlived its timeout");
    assert!(matches!(fetched, Err(StoreError::Network(_))));
    let published = tokio::time::timeout(
        Duration::from_secs(3),
        client.publish_offer(&SessionDescription::offer("o1")),
    )
    .await
    .expect("request outlived its timeout");
    assert!(matches!(published, Err(StoreError::Network(_))));
}

#[tokio::test]
async fn event_stream_outlives_the_connect_timeout() {
    let server = TestServer::start().await;
    let feed = HttpChangeFeed::new(
        server.base_url.clone(),
        AuthContext::new(server.org.clone(), TOKEN),
    )
    .with_connect_timeout(Duration::from_millis(200));
    let mut changes = feed.open(Role::Projector).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    server.hub.set_content(&server.org, DisplayContent::LiveFeed);
    let next = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .expect("no event within 5s");
    assert!(matches!(next, Some(Ok(()))));
}

#[tokio::test]
async fn event_stream_announces_every_mutation() {
    let server = TestServer::start().await;
    let feed = HttpChangeFeed::new(
        server.base_url.clone(),
        AuthContext::new(server.org.clone(), TOKEN),
    );
    let mut changes = feed.open(Role::Projector).await.unwrap();
    assert_eq!(server.hub.notifier().subscriber_count(&server.org), 1);

    server.hub.set_content(&server.org, DisplayContent::LiveFeed);
    server.hub.put_offer(&server.org, SessionDescription::offer("o1"));

    for _ in 0..2 {
        let next = tokio::time::timeout(Duration::from_secs(5), changes.next())
            .await
            .expect("no event within 5s");
        assert!(matches!(next, Some(Ok(()))));
    }
}

#[tokio::test]
async fn event_stream_requires_a_known_token() {
    let server = TestServer::start().await;
    let feed = HttpChangeFeed::new(
        server.base_url.clone(),
        AuthContext::new(server.org.clone(), "guess"),
    );
    assert!(feed.open(Role::Operator).await.is_err());
}
