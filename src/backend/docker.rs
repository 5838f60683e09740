use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, ListContainersOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::{ImportImageOptions, ListImagesOptions, TagImageOptions};
use bollard::models::{ContainerSummary, HostConfig, ImageSummary, Volume};
use bollard::volume::ListVolumesOptions;
use bollard::Docker;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{Peekable, Stream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Backend, BackendError, ContainerRecord, ContainerState, CreateVolumeOptions, Filter, ImageRecord, ImageRef,
    Listing, PluginRecord, PullCursor, PulledChunk, RemoveContainerOptions, RemoveImageOptions,
    RemoveVolumeOptions, StartOptions, StopOptions, VolumeRecord,
};
use crate::settings::BackendSettings;

type ExportStream = Peekable<Pin<Box<dyn Stream<Item = Result<Bytes, bollard::errors::Error>> + Send>>>;

const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

/// bollard 에러를 어댑터 에러 분류로 매핑합니다.
fn map_docker_error(err: bollard::errors::Error, context: &str, resource: &str) -> BackendError {
    match &err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == 404 => {
            BackendError::not_found(resource)
        }
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == 409 => {
            BackendError::already_exists(resource)
        }
        bollard::errors::Error::DockerResponseServerError { status_code, message } if *status_code == 503 => {
            BackendError::unavailable(context, message)
        }
        bollard::errors::Error::IOError { .. }
        | bollard::errors::Error::RequestTimeoutError
        | bollard::errors::Error::HyperResponseError { .. } => BackendError::unavailable(context, &err),
        _ => BackendError::internal(context, &err),
    }
}

/// 로컬 Docker 엔진 어댑터
pub struct DockerBackend {
    docker: Docker,
    exports: Mutex<HashMap<Uuid, ExportStream>>,
    uploads: Mutex<HashMap<ImageRef, BytesMut>>,
    // 적재는 끝났지만 아직 확정되지 않은 이미지
    staged: Mutex<HashSet<ImageRef>>,
}

impl DockerBackend {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            exports: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashSet::new()),
        }
    }

    /// 설정에 지정된 엔드포인트로 Docker 클라이언트를 초기화합니다.
    pub fn connect(settings: &BackendSettings) -> Result<Self, BackendError> {
        let docker = match settings.endpoint.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(endpoint) if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") => {
                Docker::connect_with_http(endpoint, settings.timeout, bollard::API_DEFAULT_VERSION)
            }
            Some(endpoint) => {
                let path = endpoint.strip_prefix("unix://").unwrap_or(endpoint);
                Docker::connect_with_unix(path, settings.timeout, bollard::API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| map_docker_error(e, "Docker 클라이언트 초기화", "docker endpoint"))?;

        info!(endpoint = ?settings.endpoint, "Docker 백엔드 연결 설정 완료");
        Ok(Self::new(docker))
    }

    fn take_export(&self, cursor: &PullCursor) -> Option<ExportStream> {
        self.exports.lock().ok()?.remove(&cursor.session)
    }

    fn put_export(&self, session: Uuid, stream: ExportStream) {
        if let Ok(mut exports) = self.exports.lock() {
            exports.insert(session, stream);
        }
    }

    fn append_upload(&self, image: &ImageRef, chunk: &[u8]) -> Result<(), BackendError> {
        let mut uploads = self
            .uploads
            .lock()
            .map_err(|e| BackendError::internal("업로드 버퍼 잠금", e))?;
        uploads.entry(image.clone()).or_default().extend_from_slice(chunk);
        Ok(())
    }

    fn take_upload(&self, image: &ImageRef) -> Result<Bytes, BackendError> {
        let mut uploads = self
            .uploads
            .lock()
            .map_err(|e| BackendError::internal("업로드 버퍼 잠금", e))?;
        Ok(uploads.remove(image).map(BytesMut::freeze).unwrap_or_default())
    }

    fn stage(&self, image: &ImageRef) -> Result<(), BackendError> {
        self.staged
            .lock()
            .map_err(|e| BackendError::internal("적재 목록 잠금", e))?
            .insert(image.clone());
        Ok(())
    }

    fn unstage(&self, image: &ImageRef) -> Result<bool, BackendError> {
        Ok(self
            .staged
            .lock()
            .map_err(|e| BackendError::internal("적재 목록 잠금", e))?
            .remove(image))
    }

    /// 업로드된 아카이브를 엔진에 적재하고 요청된 이름으로 태그를 보장합니다.
    async fn load_archive(&self, image: &ImageRef, archive: Bytes) -> Result<(), BackendError> {
        let context = format!("이미지 {} 적재", image);
        let mut progress = Box::pin(
            self.docker
                .import_image(ImportImageOptions { quiet: true }, archive, None),
        );

        let mut loaded = Vec::new();
        while let Some(item) = progress.next().await {
            let info = item.map_err(|e| map_docker_error(e, &context, &image.to_string()))?;
            if let Some(error) = info.error {
                return Err(BackendError::internal(context, error));
            }
            if let Some(line) = info.stream.as_deref() {
                let line = line.trim();
                if let Some(reference) = line
                    .strip_prefix("Loaded image ID: ")
                    .or_else(|| line.strip_prefix("Loaded image: "))
                {
                    loaded.push(reference.to_string());
                }
            }
        }

        if self.image_exists(image).await? {
            return Ok(());
        }

        let source = loaded
            .first()
            .ok_or_else(|| BackendError::internal(context.clone(), "아카이브에서 적재된 이미지가 없음"))?;
        debug!(source = %source, target = %image, "적재된 이미지에 태그 지정");
        self.docker
            .tag_image(
                source,
                Some(TagImageOptions {
                    repo: image.name().to_string(),
                    tag: image.tag().to_string(),
                }),
            )
            .await
            .map_err(|e| map_docker_error(e, &context, source))
    }
}

fn split_repo_tag(repo_tag: &str) -> (String, String) {
    let last_slash = repo_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    match repo_tag[last_slash..].rfind(':') {
        Some(i) => (
            repo_tag[..last_slash + i].to_string(),
            repo_tag[last_slash + i + 1..].to_string(),
        ),
        None => (repo_tag.to_string(), String::new()),
    }
}

fn image_records(summary: ImageSummary) -> Vec<ImageRecord> {
    let size = u64::try_from(summary.size).ok();
    if summary.repo_tags.is_empty() {
        return vec![ImageRecord {
            id: summary.id,
            name: String::new(),
            tag: String::new(),
            size,
        }];
    }

    summary
        .repo_tags
        .iter()
        .map(|repo_tag| {
            let (name, tag) = split_repo_tag(repo_tag);
            ImageRecord {
                id: summary.id.clone(),
                name,
                tag,
                size,
            }
        })
        .collect()
}

fn container_record(summary: ContainerSummary) -> ContainerRecord {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    ContainerRecord {
        id: summary.id.unwrap_or_default(),
        name,
        image: summary.image.unwrap_or_default(),
        state: ContainerState::from_backend(summary.state.as_deref().unwrap_or_default()),
        command: summary.command.unwrap_or_default(),
        labels: summary.labels.unwrap_or_default().into_iter().collect(),
        limits: None,
    }
}

fn volume_record(volume: Volume) -> VolumeRecord {
    VolumeRecord {
        name: volume.name,
        driver: volume.driver,
        mountpoint: volume.mountpoint,
        labels: volume.labels.into_iter().collect(),
        options: volume.options.into_iter().collect(),
        created_at: volume.created_at,
    }
}

fn name_filters(filter: &Filter, name_key: &str) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    if let Some(name) = &filter.instance_name {
        filters.insert(name_key.to_string(), vec![name.clone()]);
    }
    if let Some(id) = &filter.id {
        filters.insert("id".to_string(), vec![id.clone()]);
    }
    filters
}

fn container_config(options: &StartOptions) -> Config<String> {
    let cmd = match &options.command {
        Some(command) => Some(std::iter::once(command.clone()).chain(options.args.iter().cloned()).collect()),
        None if !options.args.is_empty() => Some(options.args.clone()),
        None => None,
    };

    let env = (!options.env.is_empty())
        .then(|| options.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect());

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &options.ports {
        let key = format!("{}/tcp", port.internal);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![bollard::models::PortBinding {
                host_ip: None,
                host_port: Some(port.external.to_string()),
            }]),
        );
    }

    let binds: Vec<String> = options
        .volumes
        .iter()
        .map(|mount| {
            let mode = if mount.read_only { "ro" } else { "rw" };
            format!("{}:{}:{}", mount.volume, mount.mount_point, mode)
        })
        .collect();

    let limits = options.limits.clone().unwrap_or_default();
    let host_config = HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds: (!binds.is_empty()).then_some(binds),
        nano_cpus: limits.cpus.map(|cpus| (cpus * 1_000_000_000.0) as i64),
        memory: limits.memory_bytes,
        ..Default::default()
    };

    Config {
        image: options.image.as_ref().map(ToString::to_string),
        cmd,
        env,
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl Backend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| map_docker_error(e, "ping", "docker daemon"))
    }

    async fn image_exists(&self, image: &ImageRef) -> Result<bool, BackendError> {
        match self.docker.inspect_image(&image.to_string()).await {
            Ok(_) => Ok(true),
            Err(e) => match map_docker_error(e, "이미지 조회", &image.to_string()) {
                BackendError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull_chunk(&self, image: &ImageRef, cursor: &PullCursor) -> Result<PulledChunk, BackendError> {
        let context = format!("이미지 {} 내보내기", image);
        let mut stream = match self.take_export(cursor) {
            Some(stream) => stream,
            None if cursor.sequence == 0 => {
                let export: Pin<Box<dyn Stream<Item = Result<Bytes, bollard::errors::Error>> + Send>> =
                    Box::pin(self.docker.export_image(&image.to_string()));
                export.peekable()
            }
            None => {
                return Err(BackendError::internal(
                    context,
                    format!("회수 세션 {} 의 스트림이 없음", cursor.session),
                ))
            }
        };

        let data = match stream.next().await {
            Some(Ok(data)) => data,
            Some(Err(e)) => return Err(map_docker_error(e, &context, &image.to_string())),
            None => {
                return Ok(PulledChunk {
                    data: Bytes::new(),
                    is_final: true,
                })
            }
        };

        let is_final = Pin::new(&mut stream).peek().await.is_none();
        if !is_final {
            self.put_export(cursor.session, stream);
        }

        Ok(PulledChunk { data, is_final })
    }

    async fn push_chunk(&self, image: &ImageRef, chunk: Bytes, is_final: bool) -> Result<(), BackendError> {
        self.append_upload(image, &chunk)?;
        if !is_final {
            return Ok(());
        }

        let archive = self.take_upload(image)?;
        info!(image = %image, bytes = archive.len(), "이미지 아카이브 적재 시작");
        self.load_archive(image, archive).await?;
        self.stage(image)
    }

    async fn abort_push(&self, image: &ImageRef) -> Result<(), BackendError> {
        let dropped = self.take_upload(image)?;
        debug!(image = %image, bytes = dropped.len(), "부분 업로드 버퍼 폐기");

        if !self.unstage(image)? {
            return Ok(());
        }

        // 검증에 실패한 이미지는 요청된 이름으로 남기지 않음
        let options = RemoveImageOptions { force: true };
        match self.remove_image(image, &options).await {
            Ok(()) | Err(BackendError::NotFound { .. }) => {
                info!(image = %image, "검증 실패한 이미지 적재 취소");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_push(&self, image: &ImageRef) -> Result<(), BackendError> {
        self.unstage(image)?;
        Ok(())
    }

    async fn abort_pull(&self, image: &ImageRef, cursor: &PullCursor) -> Result<(), BackendError> {
        if self.take_export(cursor).is_some() {
            debug!(image = %image, session = %cursor.session, "내보내기 스트림 폐기");
        }
        Ok(())
    }

    async fn list_images(&self, filter: &Filter) -> Result<Listing<ImageRecord>, BackendError> {
        let options = ListImagesOptions::<String> {
            all: false,
            filters: name_filters(filter, "reference"),
            ..Default::default()
        };

        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| map_docker_error(e, "이미지 목록 조회", "images"))?;

        debug!(count = images.len(), "이미지 목록 조회 성공");
        Ok(Listing::unfiltered(images.into_iter().flat_map(image_records).collect()))
    }

    async fn list_containers(&self, filter: &Filter) -> Result<Listing<ContainerRecord>, BackendError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: name_filters(filter, "name"),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_docker_error(e, "컨테이너 목록 조회", "containers"))?;

        debug!(count = containers.len(), "컨테이너 목록 조회 성공");
        Ok(Listing::unfiltered(containers.into_iter().map(container_record).collect()))
    }

    async fn list_volumes(&self, filter: &Filter) -> Result<Listing<VolumeRecord>, BackendError> {
        let mut filters = HashMap::new();
        if let Some(name) = filter.instance_name.as_ref().or(filter.id.as_ref()) {
            filters.insert("name".to_string(), vec![name.clone()]);
        }

        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions::<String> { filters }))
            .await
            .map_err(|e| map_docker_error(e, "볼륨 목록 조회", "volumes"))?;

        let volumes = response.volumes.unwrap_or_default();
        debug!(count = volumes.len(), "볼륨 목록 조회 성공");
        Ok(Listing::unfiltered(volumes.into_iter().map(volume_record).collect()))
    }

    async fn list_plugins(&self, _filter: &Filter) -> Result<Listing<PluginRecord>, BackendError> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| map_docker_error(e, "플러그인 목록 조회", "plugins"))?;

        let plugins = info.plugins.unwrap_or_default();
        let categories = [
            ("volume", plugins.volume),
            ("network", plugins.network),
            ("authorization", plugins.authorization),
            ("log", plugins.log),
        ];

        let records: Vec<PluginRecord> = categories
            .into_iter()
            .flat_map(|(kind, names)| {
                names.unwrap_or_default().into_iter().map(move |name| {
                    let mut config = serde_json::Map::new();
                    config.insert("Type".to_string(), serde_json::Value::String(kind.to_string()));
                    PluginRecord {
                        id: name.clone(),
                        name,
                        enabled: true,
                        config: serde_json::Value::Object(config),
                    }
                })
            })
            .collect();

        debug!(count = records.len(), "플러그인 목록 조회 성공");
        Ok(Listing::unfiltered(records))
    }

    async fn start_container(&self, instance: &str, options: &StartOptions) -> Result<String, BackendError> {
        let context = format!("컨테이너 {} 시작", instance);

        if options.image.is_some() {
            let response = self
                .docker
                .create_container(
                    Some(CreateContainerOptions {
                        name: instance.to_string(),
                        platform: None,
                    }),
                    container_config(options),
                )
                .await
                .map_err(|e| map_docker_error(e, &context, instance))?;
            for warning in &response.warnings {
                warn!(instance = %instance, warning = %warning, "컨테이너 생성 경고");
            }
        }

        self.docker
            .start_container(instance, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_docker_error(e, &context, instance))?;

        let inspected = self
            .docker
            .inspect_container(instance, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_docker_error(e, &context, instance))?;

        Ok(inspected.id.unwrap_or_else(|| instance.to_string()))
    }

    async fn stop_container(&self, instance: &str, options: &StopOptions) -> Result<(), BackendError> {
        let context = format!("컨테이너 {} 중지", instance);
        let result = if options.force {
            self.docker
                .kill_container(instance, None::<KillContainerOptions<String>>)
                .await
        } else {
            let t = options
                .timeout
                .map(|d| d.as_secs() as i64)
                .unwrap_or(DEFAULT_STOP_TIMEOUT_SECS);
            self.docker
                .stop_container(instance, Some(StopContainerOptions { t }))
                .await
        };

        match result {
            Ok(()) => Ok(()),
            // 이미 중지된 컨테이너
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(e) => Err(map_docker_error(e, &context, instance)),
        }
    }

    async fn remove_container(&self, instance: &str, options: &RemoveContainerOptions) -> Result<(), BackendError> {
        self.docker
            .remove_container(
                instance,
                Some(bollard::container::RemoveContainerOptions {
                    force: options.force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_docker_error(e, "컨테이너 삭제", instance))
    }

    async fn remove_image(&self, image: &ImageRef, options: &RemoveImageOptions) -> Result<(), BackendError> {
        let reference = image.to_string();
        let deleted = self
            .docker
            .remove_image(
                &reference,
                Some(bollard::image::RemoveImageOptions {
                    force: options.force,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(|e| map_docker_error(e, "이미지 삭제", &reference))?;

        debug!(image = %image, items = deleted.len(), "이미지 삭제 완료");
        Ok(())
    }

    async fn create_volume(&self, name: &str, options: &CreateVolumeOptions) -> Result<String, BackendError> {
        // Docker는 같은 이름의 볼륨 생성을 성공으로 처리하므로 먼저 확인
        match self.docker.inspect_volume(name).await {
            Ok(_) => return Err(BackendError::already_exists(format!("volume {}", name))),
            Err(e) => match map_docker_error(e, "볼륨 조회", name) {
                BackendError::NotFound { .. } => {}
                other => return Err(other),
            },
        }

        let to_map = |m: &BTreeMap<String, String>| m.clone().into_iter().collect::<HashMap<_, _>>();
        let volume = self
            .docker
            .create_volume(bollard::volume::CreateVolumeOptions {
                name: name.to_string(),
                driver: options.driver.clone().unwrap_or_else(|| "local".to_string()),
                driver_opts: to_map(&options.driver_options),
                labels: to_map(&options.labels),
                ..Default::default()
            })
            .await
            .map_err(|e| map_docker_error(e, "볼륨 생성", name))?;

        Ok(volume.name)
    }

    async fn remove_volume(&self, name: &str, options: &RemoveVolumeOptions) -> Result<(), BackendError> {
        self.docker
            .remove_volume(
                name,
                Some(bollard::volume::RemoveVolumeOptions { force: options.force }),
            )
            .await
            .map_err(|e| map_docker_error(e, "볼륨 삭제", name))
    }
}
