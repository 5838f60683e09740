#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use containerz::backend::{
    Backend, BackendError, ContainerRecord, ContainerState, CreateVolumeOptions, Filter, ImageRecord, ImageRef,
    Listing, PluginRecord, PullCursor, PulledChunk, RemoveContainerOptions, RemoveImageOptions, RemoveVolumeOptions,
    StartOptions, StopOptions, VolumeRecord,
};
use containerz::transfer::ChunkStream;
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Default)]
pub struct MockState {
    pub images: Vec<ImageRecord>,
    pub containers: Vec<ContainerRecord>,
    pub volumes: Vec<VolumeRecord>,
    pub plugins: Vec<PluginRecord>,

    /// 회수 시 돌려줄 청크
    pub pull_chunks: Vec<Bytes>,
    /// 받은 배포 청크 (이미지, 데이터, 마지막 여부)
    pub pushed: Vec<(ImageRef, Bytes, bool)>,
    /// 마지막 청크로 적재됐지만 아직 확정되지 않은 이미지
    pub staged: Vec<ImageRef>,

    pub push_calls: usize,
    pub pull_calls: usize,
    /// 끝까지 완료된 pull 호출
    pub pulls_completed: usize,
    pub abort_push_calls: usize,
    pub abort_pull_calls: usize,
    pub ping_calls: usize,

    /// n번째 (0부터) push 호출 실패
    pub fail_push_at: Option<usize>,
    /// n번째 (0부터) pull 호출 실패
    pub fail_pull_at: Option<usize>,
    /// push 호출마다 걸리는 시간
    pub push_delay: Option<Duration>,
    /// pull 호출마다 걸리는 시간
    pub pull_delay: Option<Duration>,
    /// 처음 n번의 ping 실패
    pub ping_failures: usize,
    /// 목록 조회 실패
    pub list_error: Option<BackendError>,
    /// 백엔드가 필터를 직접 적용하는지 여부
    pub native_filter: bool,
}

/// 테스트용 백엔드. 상태는 테스트와 공유됩니다.
#[derive(Clone, Default)]
pub struct MockBackend {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_image(self, reference: &str) -> Self {
        let image = ImageRef::parse(reference).unwrap();
        self.state.lock().await.images.push(ImageRecord {
            id: format!("sha256:{}", image.name()),
            name: image.name().to_string(),
            tag: image.tag().to_string(),
            size: Some(1024),
        });
        self
    }

    pub async fn with_pull_chunks(self, chunks: &[&[u8]]) -> Self {
        self.state.lock().await.pull_chunks = chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect();
        self
    }

    pub async fn with_plugins(self, plugins: Vec<PluginRecord>) -> Self {
        self.state.lock().await.plugins = plugins;
        self
    }

    pub async fn with_containers(self, containers: Vec<ContainerRecord>) -> Self {
        self.state.lock().await.containers = containers;
        self
    }

    pub async fn push_calls(&self) -> usize {
        self.state.lock().await.push_calls
    }

    pub async fn pull_calls(&self) -> usize {
        self.state.lock().await.pull_calls
    }

    pub async fn pulls_completed(&self) -> usize {
        self.state.lock().await.pulls_completed
    }

    pub async fn abort_push_calls(&self) -> usize {
        self.state.lock().await.abort_push_calls
    }

    pub async fn abort_pull_calls(&self) -> usize {
        self.state.lock().await.abort_pull_calls
    }

    pub async fn pushed(&self) -> Vec<(ImageRef, Bytes, bool)> {
        self.state.lock().await.pushed.clone()
    }
}

fn apply_filter<R>(records: &[R], filter: &Filter, native: bool, key: impl Fn(&R) -> (&str, &str)) -> Listing<R>
where
    R: Clone,
{
    if native {
        let matched = records
            .iter()
            .filter(|r| {
                let (id, name) = key(r);
                filter.matches(id, name)
            })
            .cloned()
            .collect();
        Listing::exact(matched)
    } else {
        Listing::unfiltered(records.to_vec())
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state.ping_calls += 1;
        if state.ping_calls <= state.ping_failures {
            return Err(BackendError::unavailable("ping", "connection refused"));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, BackendError> {
        let state = self.state.lock().await;
        Ok(state
            .images
            .iter()
            .any(|i| i.name == image.name() && i.tag == image.tag()))
    }

    async fn pull_chunk(&self, _image: &ImageRef, cursor: &PullCursor) -> Result<PulledChunk, BackendError> {
        let (index, delay) = {
            let mut state = self.state.lock().await;
            let index = state.pull_calls;
            state.pull_calls += 1;
            (index, state.pull_delay)
        };
        assert_eq!(cursor.sequence as usize, index, "커서 순서가 어긋남");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.pulls_completed += 1;
        if state.fail_pull_at == Some(index) {
            return Err(BackendError::unavailable("pull_chunk", "connection reset"));
        }
        if state.pull_chunks.is_empty() {
            return Ok(PulledChunk {
                data: Bytes::new(),
                is_final: true,
            });
        }

        Ok(PulledChunk {
            data: state.pull_chunks[index].clone(),
            is_final: index + 1 == state.pull_chunks.len(),
        })
    }

    async fn push_chunk(&self, image: &ImageRef, chunk: Bytes, is_final: bool) -> Result<(), BackendError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.push_calls += 1;
            state.push_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        let index = state.push_calls - 1;
        if state.fail_push_at == Some(index) {
            return Err(BackendError::unavailable("push_chunk", "connection reset"));
        }
        state.pushed.push((image.clone(), chunk, is_final));

        if is_final {
            state.images.retain(|i| !(i.name == image.name() && i.tag == image.tag()));
            state.images.push(ImageRecord {
                id: format!("sha256:{}", image.name()),
                name: image.name().to_string(),
                tag: image.tag().to_string(),
                size: None,
            });
            state.staged.push(image.clone());
        }
        Ok(())
    }

    async fn abort_push(&self, image: &ImageRef) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state.abort_push_calls += 1;
        if let Some(pos) = state.staged.iter().position(|i| i == image) {
            state.staged.remove(pos);
            state.images.retain(|i| !(i.name == image.name() && i.tag == image.tag()));
        }
        Ok(())
    }

    async fn commit_push(&self, image: &ImageRef) -> Result<(), BackendError> {
        self.state.lock().await.staged.retain(|i| i != image);
        Ok(())
    }

    async fn abort_pull(&self, _image: &ImageRef, _cursor: &PullCursor) -> Result<(), BackendError> {
        self.state.lock().await.abort_pull_calls += 1;
        Ok(())
    }

    async fn list_images(&self, filter: &Filter) -> Result<Listing<ImageRecord>, BackendError> {
        let state = self.state.lock().await;
        if let Some(e) = &state.list_error {
            return Err(e.clone());
        }
        Ok(apply_filter(&state.images, filter, state.native_filter, |r| (r.id.as_str(), r.name.as_str())))
    }

    async fn list_containers(&self, filter: &Filter) -> Result<Listing<ContainerRecord>, BackendError> {
        let state = self.state.lock().await;
        if let Some(e) = &state.list_error {
            return Err(e.clone());
        }
        Ok(apply_filter(&state.containers, filter, state.native_filter, |r| (r.id.as_str(), r.name.as_str())))
    }

    async fn list_volumes(&self, filter: &Filter) -> Result<Listing<VolumeRecord>, BackendError> {
        let state = self.state.lock().await;
        if let Some(e) = &state.list_error {
            return Err(e.clone());
        }
        Ok(apply_filter(&state.volumes, filter, state.native_filter, |r| (r.name.as_str(), r.name.as_str())))
    }

    async fn list_plugins(&self, filter: &Filter) -> Result<Listing<PluginRecord>, BackendError> {
        let state = self.state.lock().await;
        if let Some(e) = &state.list_error {
            return Err(e.clone());
        }
        Ok(apply_filter(&state.plugins, filter, state.native_filter, |r| (r.id.as_str(), r.name.as_str())))
    }

    async fn start_container(&self, instance: &str, options: &StartOptions) -> Result<String, BackendError> {
        let mut state = self.state.lock().await;
        let id = format!("id-{}", instance);

        if let Some(image) = &options.image {
            if state.containers.iter().any(|c| c.name == instance) {
                return Err(BackendError::already_exists(format!("container {}", instance)));
            }
            state.containers.push(container(instance, &image.to_string(), ContainerState::Created));
        }

        let container = state
            .containers
            .iter_mut()
            .find(|c| c.name == instance)
            .ok_or_else(|| BackendError::not_found(format!("container {}", instance)))?;
        container.state = ContainerState::Running;
        Ok(id)
    }

    async fn stop_container(&self, instance: &str, _options: &StopOptions) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.name == instance)
            .ok_or_else(|| BackendError::not_found(format!("container {}", instance)))?;
        container.state = ContainerState::Stopped;
        Ok(())
    }

    async fn remove_container(&self, instance: &str, _options: &RemoveContainerOptions) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let before = state.containers.len();
        state.containers.retain(|c| c.name != instance);
        if state.containers.len() == before {
            return Err(BackendError::not_found(format!("container {}", instance)));
        }
        Ok(())
    }

    async fn remove_image(&self, image: &ImageRef, _options: &RemoveImageOptions) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let before = state.images.len();
        state.images.retain(|i| !(i.name == image.name() && i.tag == image.tag()));
        if state.images.len() == before {
            return Err(BackendError::not_found(format!("image {}", image)));
        }
        Ok(())
    }

    async fn create_volume(&self, name: &str, options: &CreateVolumeOptions) -> Result<String, BackendError> {
        let mut state = self.state.lock().await;
        if state.volumes.iter().any(|v| v.name == name) {
            return Err(BackendError::already_exists(format!("volume {}", name)));
        }
        state.volumes.push(VolumeRecord {
            name: name.to_string(),
            driver: options.driver.clone().unwrap_or_else(|| "local".to_string()),
            mountpoint: format!("/var/lib/volumes/{}", name),
            labels: options.labels.clone(),
            options: options.driver_options.clone(),
            created_at: None,
        });
        Ok(name.to_string())
    }

    async fn remove_volume(&self, name: &str, _options: &RemoveVolumeOptions) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let before = state.volumes.len();
        state.volumes.retain(|v| v.name != name);
        if state.volumes.len() == before {
            return Err(BackendError::not_found(format!("volume {}", name)));
        }
        Ok(())
    }
}

pub fn container(name: &str, image: &str, state: ContainerState) -> ContainerRecord {
    ContainerRecord {
        id: format!("id-{}", name),
        name: name.to_string(),
        image: image.to_string(),
        state,
        command: "/bin/sh".to_string(),
        labels: BTreeMap::new(),
        limits: None,
    }
}

pub fn plugin(name: &str) -> PluginRecord {
    PluginRecord {
        id: name.to_string(),
        name: name.to_string(),
        enabled: true,
        config: json!({ "Description": format!("{} config", name) }),
    }
}

/// 고정된 청크로 이루어진 배포 입력
pub fn source(chunks: &[&[u8]]) -> ChunkStream {
    let items: Vec<_> = chunks.iter().map(|c| Ok(Bytes::copy_from_slice(c))).collect();
    stream::iter(items).boxed()
}

/// 테스트가 청크를 하나씩 밀어 넣는 배포 입력
pub fn channel_source() -> (mpsc::Sender<containerz::Result<Bytes>>, ChunkStream) {
    let (tx, rx) = mpsc::channel(8);
    let stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed();
    (tx, stream)
}
