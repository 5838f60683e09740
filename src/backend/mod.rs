//! 컨테이너 런타임 백엔드 추상화
//!
//! 코어는 [`Backend`] 트레이트에만 의존합니다. 런타임마다 구현체가 하나씩 있으며
//! 현재는 로컬 Docker 엔진용 [`DockerBackend`]가 제공됩니다.

mod docker;
mod retry;
mod types;

pub use docker::DockerBackend;
pub use retry::{with_retry, BackendProbe, RetryPolicy, RetryableOperation};
pub use types::{
    ContainerRecord, ContainerState, CreateVolumeOptions, Direction, Filter, ImageRecord, ImageRef,
    PluginRecord, PortBinding, PullCursor, PulledChunk, RemoveContainerOptions, RemoveImageOptions,
    RemoveVolumeOptions, ResourceLimits, StartOptions, StopOptions, VolumeMount, VolumeRecord,
    DEFAULT_TAG,
};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// 어댑터가 백엔드 고유 에러를 매핑하는 고정된 분류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// 백엔드에 연결할 수 없음 (일시적)
    Unavailable { context: String, reason: String },
    /// 대상이 존재하지 않음
    NotFound { resource: String },
    /// 대상이 이미 존재함
    AlreadyExists { resource: String },
    /// 그 밖의 백엔드 내부 오류
    Internal { context: String, reason: String },
}

impl BackendError {
    pub fn unavailable(context: impl Into<String>, reason: impl fmt::Display) -> Self {
        BackendError::Unavailable {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        BackendError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        BackendError::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn internal(context: impl Into<String>, reason: impl fmt::Display) -> Self {
        BackendError::Internal {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unavailable { context, reason } => {
                write!(f, "백엔드 연결 불가 ({}): {}", context, reason)
            }
            BackendError::NotFound { resource } => write!(f, "{} 없음", resource),
            BackendError::AlreadyExists { resource } => write!(f, "{} 이미 존재", resource),
            BackendError::Internal { context, reason } => {
                write!(f, "백엔드 내부 오류 ({}): {}", context, reason)
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// 백엔드 목록 조회 결과
///
/// `exact`가 true면 백엔드가 필터를 정확히 적용한 결과이므로 그대로 전달합니다.
/// false면 변환기가 정확 일치 후처리 필터를 적용합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<R> {
    pub records: Vec<R>,
    pub exact: bool,
}

impl<R> Listing<R> {
    pub fn exact(records: Vec<R>) -> Self {
        Self { records, exact: true }
    }

    pub fn unfiltered(records: Vec<R>) -> Self {
        Self { records, exact: false }
    }
}

/// 컨테이너 런타임 기능 인터페이스
///
/// 각 호출은 백엔드 입장에서 원자적이라고 가정합니다. 메서드는 호출 컨텍스트를
/// 받지 않습니다. 코어가 호출 전후의 청크/레코드 경계에서 취소를 확인하고,
/// 진행 중인 호출은 항상 끝까지 기다리므로 구현체는 호출 도중의 취소를 처리할
/// 필요가 없습니다.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), BackendError>;

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, BackendError>;

    /// 회수 스트림의 다음 청크. 스트림을 마무리하는 청크에서 `is_final`이 true입니다.
    async fn pull_chunk(&self, image: &ImageRef, cursor: &PullCursor) -> Result<PulledChunk, BackendError>;

    /// 배포 청크 하나를 받습니다. `is_final`까지 백엔드가 버퍼링/조립합니다.
    async fn push_chunk(&self, image: &ImageRef, chunk: Bytes, is_final: bool) -> Result<(), BackendError>;

    /// 중단된 배포의 부분 상태 정리
    ///
    /// 마지막 청크까지 받은 뒤 검증에 실패한 경우에도 호출되며, 이때는 이미
    /// 적재된 이미지도 되돌려야 합니다.
    async fn abort_push(&self, _image: &ImageRef) -> Result<(), BackendError> {
        Ok(())
    }

    /// 검증까지 끝난 배포를 확정합니다. 이후의 `abort_push`는 이 이미지를 지우지 않습니다.
    async fn commit_push(&self, _image: &ImageRef) -> Result<(), BackendError> {
        Ok(())
    }

    /// 중단된 회수의 부분 상태 정리
    async fn abort_pull(&self, _image: &ImageRef, _cursor: &PullCursor) -> Result<(), BackendError> {
        Ok(())
    }

    async fn list_images(&self, filter: &Filter) -> Result<Listing<ImageRecord>, BackendError>;

    async fn list_containers(&self, filter: &Filter) -> Result<Listing<ContainerRecord>, BackendError>;

    async fn list_volumes(&self, filter: &Filter) -> Result<Listing<VolumeRecord>, BackendError>;

    async fn list_plugins(&self, filter: &Filter) -> Result<Listing<PluginRecord>, BackendError>;

    /// 컨테이너를 시작하고 컨테이너 ID를 돌려줍니다.
    async fn start_container(&self, instance: &str, options: &StartOptions) -> Result<String, BackendError>;

    async fn stop_container(&self, instance: &str, options: &StopOptions) -> Result<(), BackendError>;

    async fn remove_container(&self, instance: &str, options: &RemoveContainerOptions) -> Result<(), BackendError>;

    async fn remove_image(&self, image: &ImageRef, options: &RemoveImageOptions) -> Result<(), BackendError>;

    /// 볼륨을 만들고 실제 이름을 돌려줍니다.
    async fn create_volume(&self, name: &str, options: &CreateVolumeOptions) -> Result<String, BackendError>;

    async fn remove_volume(&self, name: &str, options: &RemoveVolumeOptions) -> Result<(), BackendError>;
}
