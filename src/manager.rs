//! 프로토콜 서버가 사용하는 단일 진입점
//!
//! 전송 작업은 [`TransferManager`]로, 목록 조회는 목록 변환기로 보내고
//! 수명주기 작업은 백엔드로 그대로 전달합니다. 어떤 경로에서든 백엔드 고유
//! 에러는 이 경계를 넘기 전에 [`Error`]로 정규화됩니다.

use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{
    Backend, BackendError, CreateVolumeOptions, Filter, ImageRef, Listing, RemoveImageOptions, RemoveVolumeOptions,
};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::listing::{self, ListingRecord};
use crate::protocol::{
    ContainerOp, DeployRequest, LifecycleResponse, ListContainersResponse, ListImagesResponse, ListPluginsResponse,
    ListVolumesResponse, RetrieveRequest,
};
use crate::settings::TransferSettings;
use crate::sink::MessageSink;
use crate::transfer::{ByteStream, ChunkStream, ProgressStream, TransferManager};

pub struct Manager<B: Backend> {
    backend: Arc<B>,
    transfers: TransferManager<B>,
}

impl<B: Backend> Manager<B> {
    pub fn new(backend: Arc<B>, settings: TransferSettings) -> Self {
        info!(backend = backend.name(), chunk_size = settings.chunk_size, "Manager 생성");
        Self {
            transfers: TransferManager::new(backend.clone(), settings),
            backend,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn transfers(&self) -> &TransferManager<B> {
        &self.transfers
    }

    pub async fn ping(&self, ctx: &CallContext) -> Result<()> {
        ctx.check()?;
        Ok(self.backend.ping().await?)
    }

    /// 이미지 배포. 같은 이미지의 배포가 진행 중이면 `SessionConflict`.
    pub async fn deploy(&self, ctx: &CallContext, request: DeployRequest, source: ChunkStream) -> Result<ProgressStream> {
        ctx.check()?;
        info!(image = %request.image, total_bytes = ?request.total_bytes, "배포 요청");
        self.transfers.start_deploy(ctx.child(), request, source)
    }

    /// 이미지 회수. 백엔드에 이미지가 없으면 `NotFound`.
    pub async fn retrieve(&self, ctx: &CallContext, request: RetrieveRequest) -> Result<ByteStream> {
        ctx.check()?;
        info!(image = %request.image, "회수 요청");

        if !self.backend.image_exists(&request.image).await? {
            return Err(Error::not_found(format!("이미지 {} 을(를) 찾을 수 없음", request.image)));
        }
        self.transfers.start_retrieve(ctx.child(), request)
    }

    pub async fn list_images<S>(&self, ctx: &CallContext, filter: Filter, sink: &mut S) -> Result<()>
    where
        S: MessageSink<ListImagesResponse> + ?Sized,
    {
        let outcome = match prepare_filter(ctx, filter) {
            Ok(filter) => {
                let fetched = self.backend.list_images(&filter).await;
                forward(ctx, &filter, fetched, sink).await
            }
            Err(e) => Err(e),
        };
        conclude("images", outcome, sink).await
    }

    pub async fn list_containers<S>(&self, ctx: &CallContext, filter: Filter, sink: &mut S) -> Result<()>
    where
        S: MessageSink<ListContainersResponse> + ?Sized,
    {
        let outcome = match prepare_filter(ctx, filter) {
            Ok(filter) => {
                let fetched = self.backend.list_containers(&filter).await;
                forward(ctx, &filter, fetched, sink).await
            }
            Err(e) => Err(e),
        };
        conclude("containers", outcome, sink).await
    }

    pub async fn list_volumes<S>(&self, ctx: &CallContext, filter: Filter, sink: &mut S) -> Result<()>
    where
        S: MessageSink<ListVolumesResponse> + ?Sized,
    {
        let outcome = match prepare_filter(ctx, filter) {
            Ok(filter) => {
                let fetched = self.backend.list_volumes(&filter).await;
                forward(ctx, &filter, fetched, sink).await
            }
            Err(e) => Err(e),
        };
        conclude("volumes", outcome, sink).await
    }

    pub async fn list_plugins<S>(&self, ctx: &CallContext, filter: Filter, sink: &mut S) -> Result<()>
    where
        S: MessageSink<ListPluginsResponse> + ?Sized,
    {
        let outcome = match prepare_filter(ctx, filter) {
            Ok(filter) => {
                let fetched = self.backend.list_plugins(&filter).await;
                forward(ctx, &filter, fetched, sink).await
            }
            Err(e) => Err(e),
        };
        conclude("plugins", outcome, sink).await
    }

    /// 컨테이너 시작/중지/삭제
    pub async fn container_lifecycle(&self, ctx: &CallContext, op: ContainerOp, instance: &str) -> Result<LifecycleResponse> {
        ctx.check()?;
        validate_instance_name(instance)?;

        let result = match &op {
            ContainerOp::Start(options) => self.backend.start_container(instance, options).await.map(Some),
            ContainerOp::Stop(options) => self.backend.stop_container(instance, options).await.map(|_| None),
            ContainerOp::Remove(options) => self.backend.remove_container(instance, options).await.map(|_| None),
        };

        match result {
            Ok(container_id) => {
                info!(op = op.name(), instance, container_id = ?container_id, "컨테이너 작업 완료");
                Ok(LifecycleResponse {
                    instance_name: instance.to_string(),
                    container_id,
                })
            }
            Err(e) => {
                warn!(op = op.name(), instance, error = %e, "컨테이너 작업 실패");
                Err(e.into())
            }
        }
    }

    pub async fn remove_image(&self, ctx: &CallContext, image: &ImageRef, options: RemoveImageOptions) -> Result<()> {
        ctx.check()?;
        self.backend.remove_image(image, &options).await?;
        info!(image = %image, force = options.force, "이미지 삭제");
        Ok(())
    }

    /// 볼륨을 만들고 실제 볼륨 이름을 돌려줍니다.
    pub async fn create_volume(&self, ctx: &CallContext, name: &str, options: CreateVolumeOptions) -> Result<String> {
        ctx.check()?;
        validate_instance_name(name)?;
        let created = self.backend.create_volume(name, &options).await?;
        info!(volume = %created, driver = ?options.driver, "볼륨 생성");
        Ok(created)
    }

    pub async fn remove_volume(&self, ctx: &CallContext, name: &str, options: RemoveVolumeOptions) -> Result<()> {
        ctx.check()?;
        validate_instance_name(name)?;
        self.backend.remove_volume(name, &options).await?;
        info!(volume = name, force = options.force, "볼륨 삭제");
        Ok(())
    }
}

fn prepare_filter(ctx: &CallContext, filter: Filter) -> Result<Filter> {
    ctx.check()?;
    let filter = filter.normalized();
    filter.validate()?;
    Ok(filter)
}

async fn forward<R, S>(
    ctx: &CallContext,
    filter: &Filter,
    fetched: std::result::Result<Listing<R>, BackendError>,
    sink: &mut S,
) -> Result<usize>
where
    R: ListingRecord,
    S: MessageSink<R::Message> + ?Sized,
{
    let listing = fetched?;
    listing::translate(ctx, filter, listing, sink).await
}

/// 싱크에 종료 조건을 전달합니다. 실패는 조용히 버리지 않고 싱크와 호출자 모두에게 알립니다.
async fn conclude<M, S>(resource: &'static str, outcome: Result<usize>, sink: &mut S) -> Result<()>
where
    M: Send + 'static,
    S: MessageSink<M> + ?Sized,
{
    match outcome {
        Ok(count) => {
            info!(resource, count, "목록 조회 완료");
            sink.finish(Ok(())).await;
            Ok(())
        }
        Err(e) => {
            warn!(resource, error = %e, "목록 조회 실패");
            sink.finish(Err(e.to_detail())).await;
            Err(e)
        }
    }
}

/// 컨테이너/볼륨 이름 검증
fn validate_instance_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_request("인스턴스 이름이 비어있음"));
    }
    if name.chars().any(|c| c.is_control() || c.is_whitespace() || c == '/') {
        return Err(Error::invalid_request(format!("잘못된 인스턴스 이름: {:?}", name)));
    }
    Ok(())
}
