use super::StoreClient;
use crate::error::StoreError;
use crate::model::{
    AnswerSubmission, DisplayAggregateState, DisplayContent, OrganizationId, PresentationSettings,
    SessionDescription, SignalingRecord,
};
use crate::notifier::ChangeNotifier;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct OrgSlot {
    record: SignalingRecord,
    content: DisplayContent,
    settings: PresentationSettings,
}

/// Серверное состояние всех организаций + уведомления об изменениях
pub struct SignalingHub {
    slots: RwLock<HashMap<OrganizationId, OrgSlot>>,
    notifier: Arc<ChangeNotifier>,
}

impl SignalingHub {
    pub fn new(notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn record(&self, org: &OrganizationId) -> SignalingRecord {
        self.slots
            .read()
            .get(org)
            .map(|slot| slot.record.clone())
            .unwrap_or_default()
    }

    pub fn aggregate(&self, org: &OrganizationId) -> DisplayAggregateState {
        self.slots
            .read()
            .get(org)
            .map(|slot| DisplayAggregateState {
                content: slot.content.clone(),
                signaling: slot.record.clone(),
                settings: slot.settings.clone(),
            })
            .unwrap_or_default()
    }

    /// Новый offer заменяет пару целиком; старый answer исчезает
    pub fn put_offer(&self, org: &OrganizationId, offer: SessionDescription) -> SignalingRecord {
        let record = self.mutate(org, |slot| {
            slot.record = SignalingRecord {
                offer: Some(offer),
                answer: None,
                version: slot.record.version + 1,
                updated_at: Some(Utc::now()),
            };
            Ok(())
        });
        // mutate без ошибки не падает
        let record = record.unwrap_or_default();
        info!(%org, version = record.version, offer = ?record.offer.as_ref().map(|o| o.fingerprint()), "offer stored");
        record
    }

    pub fn put_answer(
        &self,
        org: &OrganizationId,
        submission: AnswerSubmission,
    ) -> Result<SignalingRecord, StoreError> {
        let record = self.mutate(org, |slot| {
            if slot.record.offer.as_ref() != Some(&submission.offer) {
                return Err(StoreError::Conflict);
            }
            slot.record = SignalingRecord {
                offer: Some(submission.offer.clone()),
                answer: Some(submission.answer.clone()),
                version: slot.record.version + 1,
                updated_at: Some(Utc::now()),
            };
            Ok(())
        });
        match &record {
            Ok(r) => info!(%org, version = r.version, answer = %submission.answer.fingerprint(), "answer stored"),
            Err(_) => warn!(%org, offer = %submission.offer.fingerprint(), "answer rejected: offer is no longer current"),
        }
        record
    }

    pub fn clear(&self, org: &OrganizationId) -> SignalingRecord {
        let record = self
            .mutate(org, |slot| {
                slot.record = SignalingRecord {
                    offer: None,
                    answer: None,
                    version: slot.record.version + 1,
                    updated_at: Some(Utc::now()),
                };
                Ok(())
            })
            .unwrap_or_default();
        info!(%org, version = record.version, "signaling cleared");
        record
    }

    pub fn set_content(&self, org: &OrganizationId, content: DisplayContent) -> DisplayAggregateState {
        let _ = self.mutate(org, |slot| {
            slot.content = content;
            Ok(())
        });
        self.aggregate(org)
    }

    pub fn set_settings(
        &self,
        org: &OrganizationId,
        settings: PresentationSettings,
    ) -> DisplayAggregateState {
        let _ = self.mutate(org, |slot| {
            slot.settings = settings;
            Ok(())
        });
        self.aggregate(org)
    }

    /// Изменение под блокировкой, затем уведомление (уже без блокировки)
    fn mutate(
        &self,
        org: &OrganizationId,
        apply: impl FnOnce(&mut OrgSlot) -> Result<(), StoreError>,
    ) -> Result<SignalingRecord, StoreError> {
        let record = {
            let mut slots = self.slots.write();
            let slot = slots.entry(org.clone()).or_default();
            apply(slot)?;
            slot.record.clone()
        };
        debug!(%org, version = record.version, "organization state mutated");
        self.notifier.notify(org);
        Ok(record)
    }
}

/// Клиент хранилища внутри того же процесса
#[derive(Clone)]
pub struct LocalStore {
    hub: Arc<SignalingHub>,
    org: OrganizationId,
}

impl LocalStore {
    pub fn new(hub: Arc<SignalingHub>, org: OrganizationId) -> Self {
        Self { hub, org }
    }
}

#[async_trait]
impl StoreClient for LocalStore {
    async fn fetch_record(&self) -> Result<SignalingRecord, StoreError> {
        Ok(self.hub.record(&self.org))
    }

    async fn publish_offer(&self, offer: &SessionDescription) -> Result<SignalingRecord, StoreError> {
        Ok(self.hub.put_offer(&self.org, offer.clone()))
    }

    async fn publish_answer(
        &self,
        submission: &AnswerSubmission,
    ) -> Result<SignalingRecord, StoreError> {
        self.hub.put_answer(&self.org, submission.clone())
    }

    async fn clear(&self) -> Result<SignalingRecord, StoreError> {
        Ok(self.hub.clear(&self.org))
    }

    async fn fetch_aggregate(&self) -> Result<DisplayAggregateState, StoreError> {
        Ok(self.hub.aggregate(&self.org))
    }
}
