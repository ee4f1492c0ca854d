//! Хранилище сигналинга: одна запись `{offer, answer}` на организацию.
//!
//! Запись перезаписывается целиком (last-writer-wins). Ответ принимается,
//! только если offer, на который он построен, всё ещё текущий.

pub mod hub;
pub mod http;

use crate::error::StoreError;
use crate::model::{AnswerSubmission, DisplayAggregateState, SessionDescription, SignalingRecord};
use async_trait::async_trait;

pub use hub::{LocalStore, SignalingHub};
pub use http::{AuthContext, Connectivity, HttpStoreClient};

/// Клиентская сторона хранилища; организация задаётся при создании клиента
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn fetch_record(&self) -> Result<SignalingRecord, StoreError>;

    async fn publish_offer(&self, offer: &SessionDescription) -> Result<SignalingRecord, StoreError>;

    async fn publish_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<SignalingRecord, StoreError>;

    async fn clear(&self) -> Result<SignalingRecord, StoreError>;

    async fn fetch_aggregate(&self) -> Result<DisplayAggregateState, StoreError>;
}
