use serde::Deserialize;
use std::env;
use super::{SettingsError, parse_env_var};
pub type Result<T> = std::result::Result<T, SettingsError>;

/// 지원하는 백엔드 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Docker,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            _ => Err(format!("지원하지 않는 백엔드: {}", s)),
        }
    }
}

/// 기동 시 백엔드 준비 상태 확인 재시도 설정
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// 최대 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 재시도 간격 (초)
    #[serde(default = "default_retry_interval")]
    pub interval: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval: default_retry_interval(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,

    /// 연결 대상. 없으면 로컬 기본값 (unix 소켓 경로 또는 `tcp://host:port`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// 요청 타임아웃 (초)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl BackendSettings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            kind: parse_env_var("CONTAINERZ_BACKEND", BackendKind::default)?,
            endpoint: env::var("CONTAINERZ_BACKEND_ENDPOINT").ok().filter(|s| !s.is_empty()),
            timeout: parse_env_var("CONTAINERZ_BACKEND_TIMEOUT", default_timeout)?,
            retry: RetrySettings {
                max_attempts: parse_env_var("CONTAINERZ_RETRY_ATTEMPTS", default_max_attempts)?,
                interval: parse_env_var("CONTAINERZ_RETRY_INTERVAL", default_retry_interval)?,
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "CONTAINERZ_BACKEND_TIMEOUT".to_string(),
                value: self.timeout.to_string(),
                reason: "타임아웃은 0보다 커야 합니다".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "CONTAINERZ_RETRY_ATTEMPTS".to_string(),
                value: self.retry.max_attempts.to_string(),
                reason: "시도 횟수는 1 이상이어야 합니다".to_string(),
            });
        }

        if let Some(endpoint) = &self.endpoint {
            let valid = match endpoint.split_once("://") {
                Some((scheme, rest)) => matches!(scheme, "unix" | "tcp" | "http") && !rest.is_empty(),
                None => endpoint.starts_with('/'),
            };
            if !valid {
                return Err(SettingsError::EnvVarInvalid {
                    var_name: "CONTAINERZ_BACKEND_ENDPOINT".to_string(),
                    value: endpoint.clone(),
                    reason: "unix 소켓 경로 또는 tcp://host:port 형식이어야 합니다".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            endpoint: None,
            timeout: default_timeout(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_timeout() -> u64 {
    120
}
