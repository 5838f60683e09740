use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::{Backend, BackendError};
use crate::settings::RetrySettings;

/// 재시도 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 시도 횟수
    pub max_attempts: u32,
    /// 재시도 간격
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            interval: Duration::from_secs(settings.interval),
        }
    }
}

/// 재시도 가능한 작업 특성
#[async_trait]
pub trait RetryableOperation {
    type Output;

    /// 로그에 남길 작업 이름
    fn label(&self) -> &str {
        "operation"
    }

    /// 작업 실행
    async fn execute(&self) -> Result<Self::Output, BackendError>;

    /// 재시도 여부 결정
    fn should_retry(&self, error: &BackendError) -> bool {
        error.is_retryable()
    }
}

/// 정책에 따라 작업을 반복 실행합니다.
///
/// 코어의 전송/조회 경로는 재시도하지 않습니다. 에이전트 시작 시의 백엔드
/// 준비 상태 확인처럼 호출자 정책으로 재시도가 필요한 곳에서 사용합니다.
pub async fn with_retry<T: RetryableOperation + Sync>(
    operation: T,
    policy: RetryPolicy,
) -> Result<T::Output, BackendError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation.execute().await {
            Ok(output) => {
                if attempt > 1 {
                    info!(operation = operation.label(), attempt, "재시도 후 성공");
                }
                return Ok(output);
            }
            Err(error) => error,
        };

        if !operation.should_retry(&error) {
            debug!(operation = operation.label(), attempt, error = %error, "재시도 대상이 아닌 오류");
            return Err(error);
        }
        if attempt >= max_attempts {
            error!(operation = operation.label(), attempts = attempt, error = %error, "재시도 횟수 소진");
            return Err(error);
        }

        warn!(
            operation = operation.label(),
            attempt,
            max_attempts,
            retry_in_ms = policy.interval.as_millis() as u64,
            error = %error,
            "일시적 오류, 재시도 예정"
        );
        sleep(policy.interval).await;
    }
}

/// 백엔드 준비 상태 확인
pub struct BackendProbe<'a, B: Backend + ?Sized> {
    pub backend: &'a B,
}

#[async_trait]
impl<'a, B: Backend + ?Sized> RetryableOperation for BackendProbe<'a, B> {
    type Output = ();

    fn label(&self) -> &str {
        self.backend.name()
    }

    async fn execute(&self) -> Result<Self::Output, BackendError> {
        self.backend.ping().await
    }
}
