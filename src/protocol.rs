//! 프로토콜 계층과 주고받는 메시지 형태
//!
//! 목록 응답은 엔티티 하나당 메시지 하나이며, 각 메시지는 한 개짜리 목록을
//! 담습니다. 직렬화는 필드 순서와 맵 키 순서가 고정되어 있어 같은 입력에
//! 대해 항상 같은 바이트열을 만듭니다.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::backend::{
    ContainerState, ImageRef, RemoveContainerOptions, ResourceLimits, StartOptions, StopOptions,
};
use crate::error::{Error, ErrorDetail, Result};

/// 이미지 배포 요청. 뒤따르는 청크 스트림과 함께 전달됩니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub image: ImageRef,
    /// 선언된 전체 크기
    pub total_bytes: Option<u64>,
    /// 선언된 다이제스트 (`sha256:<hex>`)
    pub digest: Option<String>,
}

impl DeployRequest {
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            total_bytes: None,
            digest: None,
        }
    }

    pub fn with_total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = Some(total_bytes);
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// 이미지 회수 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveRequest {
    pub image: ImageRef,
    pub expected_digest: Option<String>,
}

impl RetrieveRequest {
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            expected_digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

/// 전송 진행 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub bytes_transferred: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub name: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub instance_name: String,
    pub image_name: String,
    pub status: ContainerState,
    pub command: String,
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimits>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub labels: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plugin {
    pub id: String,
    pub instance_name: String,
    /// 정규화된 JSON 텍스트
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListImagesResponse {
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListContainersResponse {
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListVolumesResponse {
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListPluginsResponse {
    pub plugins: Vec<Plugin>,
}

/// 컨테이너 수명주기 작업
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerOp {
    Start(StartOptions),
    Stop(StopOptions),
    Remove(RemoveContainerOptions),
}

impl ContainerOp {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerOp::Start(_) => "start",
            ContainerOp::Stop(_) => "stop",
            ContainerOp::Remove(_) => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResponse {
    pub instance_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

/// 메시지를 전송용 바이트열로 직렬화합니다.
pub fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| Error::new(crate::error::ErrorKind::BackendInternal, e.to_string()))
}
