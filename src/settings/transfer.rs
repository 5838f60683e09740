use serde::Deserialize;
use super::{SettingsError, parse_env_var};

const MIN_CHUNK_SIZE: usize = 1024;
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct TransferSettings {
    /// 회수 시 한 번에 내보내는 최대 청크 크기 (바이트)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// 전송 하나의 기한 (초). 0이면 기한 없음
    #[serde(default)]
    pub timeout: u64,
}

impl TransferSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let settings = Self {
            chunk_size: parse_env_var("CONTAINERZ_CHUNK_SIZE", default_chunk_size)?,
            timeout: parse_env_var("CONTAINERZ_TRANSFER_TIMEOUT", || 0)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "CONTAINERZ_CHUNK_SIZE".to_string(),
                value: self.chunk_size.to_string(),
                reason: format!("청크 크기는 {}-{} 바이트 범위여야 합니다", MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            });
        }
        Ok(())
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            timeout: 0,
        }
    }
}

fn default_chunk_size() -> usize {
    64 * 1024
}
