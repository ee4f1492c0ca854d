use super::StoreClient;
use crate::error::StoreError;
use crate::model::{
    AnswerSubmission, DisplayAggregateState, OrganizationId, SessionDescription, SignalingRecord,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Таймаут запроса по умолчанию: опрос не должен зависать на молчащем сервере
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Аутентификационный контекст: передаётся явно, а не читается из глобального состояния
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub organization: OrganizationId,
    pub token: String,
}

impl AuthContext {
    pub fn new(organization: OrganizationId, token: impl Into<String>) -> Self {
        Self {
            organization,
            token: token.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
}

/// HTTP-клиент хранилища сигналинга и агрегата дисплея
#[derive(Clone)]
pub struct HttpStoreClient {
    base_url: String,
    auth: AuthContext,
    http: reqwest::Client,
    probe_timeout: Duration,
    request_timeout: Duration,
}

impl HttpStoreClient {
    pub fn new(base_url: impl Into<String>, auth: AuthContext, probe_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            http: reqwest::Client::new(),
            probe_timeout,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Ограничение на весь запрос, включая чтение тела. Истечение даёт `StoreError::Network`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Проверка связи с ограниченным таймаутом; не зависает, а деградирует в Disconnected
    pub async fn probe(&self) -> Connectivity {
        let url = format!("{}/api/health", self.base_url);
        match self.http.get(&url).timeout(self.probe_timeout).send().await {
            Ok(response) if response.status().is_success() => Connectivity::Connected,
            Ok(response) => {
                warn!(status = %response.status(), "health probe returned an error status");
                Connectivity::Disconnected
            }
            Err(e) => {
                debug!(error = %e, "health probe failed");
                Connectivity::Disconnected
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unauthorized),
            StatusCode::CONFLICT => Err(StoreError::Conflict),
            status => Err(StoreError::Status(status.as_u16())),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.auth.token)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn put<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self
            .http
            .put(self.url(path))
            .bearer_auth(&self.auth.token)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        Self::read(response).await
    }
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    async fn fetch_record(&self) -> Result<SignalingRecord, StoreError> {
        self.get("signaling").await
    }

    async fn publish_offer(&self, offer: &SessionDescription) -> Result<SignalingRecord, StoreError> {
        self.put("signaling/offer", offer).await
    }

    async fn publish_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<SignalingRecord, StoreError> {
        self.put("signaling/answer", submission).await
    }

    async fn clear(&self) -> Result<SignalingRecord, StoreError> {
        self.put("signaling/clear", &serde_json::Value::Null).await
    }

    async fn fetch_aggregate(&self) -> Result<DisplayAggregateState, StoreError> {
        self.get("display").await
    }
}
