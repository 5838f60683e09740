use regex_lite::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const DEFAULT_TAG: &str = "latest";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // [레지스트리[:포트]/]경로(/경로)*, 경로 요소는 소문자
        Regex::new(
            r"^(?:[a-zA-Z0-9][a-zA-Z0-9.-]*(?::[0-9]+)?/)?[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$",
        )
        .expect("image name pattern")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("image tag pattern"))
}

/// 검증된 이미지 식별자 (이름, 태그)
///
/// 한 번 만들어진 `ImageRef`는 항상 올바른 형식임이 보장됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ImageRef {
    name: String,
    tag: String,
}

impl ImageRef {
    /// 이름과 태그로 생성합니다. 빈 태그는 `latest`로 취급합니다.
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut tag = tag.into();
        if tag.is_empty() {
            tag = DEFAULT_TAG.to_string();
        }

        if name.is_empty() {
            return Err(Error::invalid_request("이미지 이름이 비어있음"));
        }
        if !name_pattern().is_match(&name) {
            return Err(Error::invalid_request(format!("잘못된 이미지 이름: {}", name)));
        }
        if !tag_pattern().is_match(&tag) {
            return Err(Error::invalid_request(format!("잘못된 이미지 태그: {}", tag)));
        }

        Ok(Self { name, tag })
    }

    /// `name[:tag]` 형식의 참조를 파싱합니다.
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.contains('@') {
            return Err(Error::invalid_request(format!(
                "다이제스트 참조는 지원하지 않음: {}",
                reference
            )));
        }

        // 마지막 '/' 뒤의 ':'만 태그 구분자 (레지스트리 포트와 구분)
        let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                Self::new(&reference[..split], &reference[split + 1..])
            }
            None => Self::new(reference, DEFAULT_TAG),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 이미지 배포 (클라이언트 → 백엔드)
    Upload,
    /// 이미지 회수 (백엔드 → 클라이언트)
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// 백엔드가 회수 스트림의 위치를 식별하는 커서
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PullCursor {
    pub session: Uuid,
    pub sequence: u64,
}

impl PullCursor {
    pub fn start(session: Uuid) -> Self {
        Self { session, sequence: 0 }
    }

    pub fn advance(&self) -> Self {
        Self {
            session: self.session,
            sequence: self.sequence + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledChunk {
    pub data: bytes::Bytes,
    pub is_final: bool,
}

/// 목록 조회 필터. 두 값이 모두 없으면 전체를 뜻합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub instance_name: Option<String>,
    pub id: Option<String>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            instance_name: Some(name.into()),
            id: None,
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            instance_name: None,
            id: Some(id.into()),
        }
    }

    /// 빈 문자열은 조건이 없는 것으로 정규화합니다.
    pub fn normalized(self) -> Self {
        Self {
            instance_name: self.instance_name.filter(|s| !s.is_empty()),
            id: self.id.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instance_name.is_none() && self.id.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("instance_name", &self.instance_name), ("id", &self.id)] {
            if let Some(value) = value {
                if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
                    return Err(Error::invalid_request(format!(
                        "필터 {} 값에 허용되지 않는 문자가 있음: {:?}",
                        field, value
                    )));
                }
            }
        }
        Ok(())
    }

    /// 정확히 일치하는 경우에만 true
    pub fn matches(&self, id: &str, instance_name: &str) -> bool {
        self.instance_name.as_deref().map_or(true, |n| n == instance_name)
            && self.id.as_deref().map_or(true, |i| i == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub tag: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
    Removed,
}

impl ContainerState {
    /// 백엔드 고유의 상태 문자열을 매핑합니다.
    pub fn from_backend(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" | "restarting" | "paused" => ContainerState::Running,
            "removing" | "removed" => ContainerState::Removed,
            _ => ContainerState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub command: String,
    pub labels: BTreeMap<String, String>,
    pub limits: Option<ResourceLimits>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub labels: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// 백엔드가 제공하는 설정 원본. 코어는 내용을 해석하지 않습니다.
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub internal: u16,
    pub external: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume: String,
    pub mount_point: String,
    pub read_only: bool,
}

/// 컨테이너 시작 옵션
///
/// `image`가 주어지면 백엔드는 인스턴스 이름으로 컨테이너를 생성한 뒤 시작합니다.
/// 없으면 이미 존재하는 컨테이너를 시작합니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    pub image: Option<ImageRef>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub volumes: Vec<VolumeMount>,
    pub limits: Option<ResourceLimits>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    pub force: bool,
    /// 강제 종료 전 대기 시간
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveContainerOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveImageOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateVolumeOptions {
    pub driver: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub driver_options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveVolumeOptions {
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parse_image_reference() {
        let image = ImageRef::parse("busybox").unwrap();
        assert_eq!(image.name(), "busybox");
        assert_eq!(image.tag(), "latest");

        let image = ImageRef::parse("registry.local:5000/team/app:v1.2").unwrap();
        assert_eq!(image.name(), "registry.local:5000/team/app");
        assert_eq!(image.tag(), "v1.2");
        assert_eq!(image.to_string(), "registry.local:5000/team/app:v1.2");

        let image = ImageRef::parse("localhost:5000/app").unwrap();
        assert_eq!(image.name(), "localhost:5000/app");
        assert_eq!(image.tag(), "latest");
    }

    #[test]
    fn reject_malformed_references() {
        for reference in ["", "Busybox", "app:", "app::1", "app:-bad", "a b", "app@sha256:abc", "/app"] {
            let result = ImageRef::parse(reference);
            match result {
                Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidRequest, "{}", reference),
                Ok(image) if reference == "app:" => assert_eq!(image.tag(), "latest"),
                Ok(image) => panic!("{} parsed as {}", reference, image),
            }
        }
    }

    #[test]
    fn filter_matches_exactly() {
        let filter = Filter::by_name("web");
        assert!(filter.matches("abc", "web"));
        assert!(!filter.matches("abc", "web-1"));
        assert!(!filter.matches("abc", "we"));
        assert!(Filter::all().matches("anything", "anything"));

        let filter = Filter {
            instance_name: Some(String::new()),
            id: Some(String::new()),
        }
        .normalized();
        assert!(filter.is_empty());
        assert!(Filter::by_name("bad\nname").validate().is_err());
    }

    #[test]
    fn docker_states_are_mapped() {
        assert_eq!(ContainerState::from_backend("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_backend("exited"), ContainerState::Stopped);
        assert_eq!(ContainerState::from_backend("created"), ContainerState::Created);
        assert_eq!(ContainerState::from_backend("removing"), ContainerState::Removed);
    }
}
