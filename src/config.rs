// Конфигурация приложения
// Уровень логирования по умолчанию зависит от режима сборки

use crate::error::ConfigError;
use crate::model::OrganizationId;
use crate::peer::types::ServerConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "stagecast_lib=debug,stagecast=debug,info"; // в отладке подробно

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info"; // в продакшене только info

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub sync: SyncSection,
    pub negotiation: NegotiationSection,
    pub ice_servers: Vec<ServerConfig>,
    pub tokens: Vec<TokenGrant>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SyncSection {
    /// Период опроса агрегата; 0 отключает опрос
    pub poll_interval_ms: u64,
    /// Пауза перед переподключением потока событий
    pub push_retry_ms: u64,
    /// Таймаут проверки связи с сервером
    pub probe_timeout_ms: u64,
    /// Таймаут одного запроса к хранилищу; у потока событий ограничено только подключение
    pub request_timeout_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            push_retry_ms: 3_000,
            probe_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl SyncSection {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    pub fn push_retry(&self) -> Duration {
        Duration::from_millis(self.push_retry_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NegotiationSection {
    pub gathering_timeout_ms: u64,
}

impl Default for NegotiationSection {
    fn default() -> Self {
        Self {
            gathering_timeout_ms: 10_000,
        }
    }
}

impl NegotiationSection {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }
}

/// Bearer-токен и организация, к которой он даёт доступ
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub organization: OrganizationId,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ice server {} has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "turn server {} requires username and credential",
                    server.id
                )));
            }
        }
        for grant in &self.tokens {
            if grant.token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "empty token for organization {}",
                    grant.organization
                )));
            }
        }
        Ok(())
    }
}
