use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Ключ организации (тенанта); все данные сигналинга разбиты по нему
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Готовое SDP-описание; создаётся только после завершения сбора ICE
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Короткий отпечаток SDP для логов (сам SDP не логируем)
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.sdp.as_bytes());
        hex::encode(&digest[..6])
    }
}

/// Запись сигналинга организации. Перезаписывается целиком при каждой публикации.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SignalingRecord {
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    /// Монотонный счётчик изменений (только для диагностики)
    #[serde(default)]
    pub version: u64,
    /// Время последней записи на сервере
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SignalingRecord {
    pub fn is_empty(&self) -> bool {
        self.offer.is_none() && self.answer.is_none()
    }

    /// Ответ, если он относится именно к этому offer
    pub fn answer_for(&self, offer: &SessionDescription) -> Option<&SessionDescription> {
        match &self.offer {
            Some(current) if current == offer => self.answer.as_ref(),
            _ => None,
        }
    }
}

/// Тело `PUT /api/signaling/answer`: ответ вместе с offer, на который он построен
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnswerSubmission {
    pub offer: SessionDescription,
    pub answer: SessionDescription,
}

/// Роль подписчика потока событий
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Projector,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Projector => "projector",
            Role::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Что сейчас показывает проектор
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayContent {
    #[default]
    None,
    Text {
        title: String,
        lines: Vec<String>,
    },
    Media {
        uri: String,
    },
    LiveFeed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PresentationSettings {
    pub font_scale: f32,
    pub background: String,
    pub show_title: bool,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            font_scale: 1.0,
            background: "#000000".into(),
            show_title: true,
        }
    }
}

/// Снимок состояния дисплея; заменяется целиком при каждом обновлении
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DisplayAggregateState {
    pub content: DisplayContent,
    pub signaling: SignalingRecord,
    pub settings: PresentationSettings,
}
