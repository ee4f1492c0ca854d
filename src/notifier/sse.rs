//! Server-Sent Events: разбор потока и HTTP-клиент канала изменений.

use super::{ChangeFeed, ChangeStream, CHANGED_EVENT};
use crate::error::FeedError;
use crate::model::Role;
use crate::store::AuthContext;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// Ограничено только подключение: сам поток живёт сколько угодно
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Одно SSE-событие
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Построчный декодер; пустая строка завершает событие
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.finish();
        }
        if line.starts_with(':') {
            // комментарий / keep-alive
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                let data = self.data.get_or_insert_with(String::new);
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value);
            }
            // id:, retry: не используем
            _ => {}
        }
        None
    }

    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_none() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: self.data.take().unwrap_or_default(),
        })
    }
}

/// Превращает поток байтов в поток SSE-событий
pub fn sse_events<S, E>(bytes: S) -> BoxStream<'static, Result<SseEvent, FeedError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let byte_stream = bytes.map(|result| result.map_err(std::io::Error::other));
    let lines = BufReader::new(StreamReader::new(byte_stream)).lines();

    stream::unfold(
        Some((lines, SseDecoder::default())),
        |state| async move {
            let (mut lines, mut decoder) = state?;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = decoder.push_line(&line) {
                            return Some((Ok(event), Some((lines, decoder))));
                        }
                    }
                    Ok(None) => {
                        return decoder.finish().map(|event| (Ok(event), None));
                    }
                    Err(e) => {
                        return Some((Err(FeedError::Dropped(e.to_string())), None));
                    }
                }
            }
        },
    )
    .boxed()
}

/// HTTP-канал изменений: `GET /api/events?role=...`
#[derive(Clone)]
pub struct HttpChangeFeed {
    base_url: String,
    auth: AuthContext,
    http: reqwest::Client,
}

impl HttpChangeFeed {
    pub fn new(base_url: impl Into<String>, auth: AuthContext) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            http: Self::client(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.http = Self::client(timeout);
        self
    }

    fn client(connect_timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build event stream client, using defaults");
                reqwest::Client::default()
            })
    }
}

#[async_trait]
impl ChangeFeed for HttpChangeFeed {
    async fn open(&self, role: Role) -> Result<ChangeStream, FeedError> {
        let url = format!("{}/api/events", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("role", role.as_str())])
            .bearer_auth(&self.auth.token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FeedError::Connect(format!("status {}", response.status())));
        }
        info!(org = %self.auth.organization, %role, "event stream opened");

        let changes = sse_events(response.bytes_stream().boxed()).filter_map(|item| async move {
            match item {
                Ok(event) if event.event.as_deref() == Some(CHANGED_EVENT) => Some(Ok(())),
                Ok(other) => {
                    debug!(event = ?other.event, "ignoring unknown SSE event");
                    None
                }
                Err(e) => Some(Err(e)),
            }
        });
        Ok(changes.boxed())
    }
}
