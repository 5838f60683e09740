use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// 호출 단위 컨텍스트: 취소 신호와 선택적 기한
///
/// 기한 초과는 기한에 의해 발생한 취소로 취급합니다. 취소는 협조적이며
/// 청크/레코드 경계에서만 확인합니다.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel_token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// 외부에서 관리하는 토큰에 연결합니다 (예: 연결 종료 시 취소).
    pub fn with_token(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            deadline: None,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 더 이른 기한만 반영합니다.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// 같은 취소 신호를 따르는 하위 컨텍스트
    pub fn child(&self) -> Self {
        Self {
            cancel_token: self.cancel_token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// 취소 여부를 `Result`로 확인합니다. 경계 지점에서 `?`와 함께 사용합니다.
    pub fn check(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::cancelled("호출이 취소됨"));
        }
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            return Err(Error::cancelled("호출 기한 초과"));
        }
        Ok(())
    }

    /// 취소되거나 기한에 도달하면 완료됩니다.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel_token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel_token.cancelled().await,
        }
    }
}
