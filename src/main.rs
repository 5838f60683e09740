use std::process;
use std::sync::Arc;
use tracing::{error, info};

use containerz::backend::{with_retry, BackendProbe, DockerBackend, Filter, RetryPolicy};
use containerz::context::CallContext;
use containerz::manager::Manager;
use containerz::settings::{BackendKind, Settings};
use containerz::sink::VecSink;

#[tokio::main]
async fn main() {
    let settings = match Settings::load().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("설정 로드 실패: {}", e);
            process::exit(1);
        }
    };

    // 파일 출력이면 가드가 살아있어야 로그가 기록됨
    let _log_guard = match containerz::logging::init_logging(&settings.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("로깅 초기화 실패: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(settings).await {
        error!(error = %e, "에이전트 종료");
        process::exit(1);
    }
}

async fn run(settings: Settings) -> containerz::Result<()> {
    let backend = match settings.backend.kind {
        BackendKind::Docker => DockerBackend::connect(&settings.backend)?,
    };

    let policy = RetryPolicy::from(&settings.backend.retry);
    with_retry(BackendProbe { backend: &backend }, policy).await?;
    info!(backend = "docker", "백엔드 준비 완료");

    let manager = Manager::new(Arc::new(backend), settings.transfer.clone());
    let ctx = CallContext::new();
    log_inventory(&manager, &ctx).await?;

    info!("에이전트 실행 중, Ctrl-C로 종료");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| containerz::Error::new(containerz::ErrorKind::BackendInternal, e.to_string()))?;

    ctx.cancel();
    info!("종료 신호 수신");
    Ok(())
}

/// 백엔드가 관리 중인 자원 수를 기록합니다.
async fn log_inventory(manager: &Manager<DockerBackend>, ctx: &CallContext) -> containerz::Result<()> {
    let mut images = VecSink::new();
    manager.list_images(ctx, Filter::all(), &mut images).await?;

    let mut containers = VecSink::new();
    manager.list_containers(ctx, Filter::all(), &mut containers).await?;

    let mut volumes = VecSink::new();
    manager.list_volumes(ctx, Filter::all(), &mut volumes).await?;

    let mut plugins = VecSink::new();
    manager.list_plugins(ctx, Filter::all(), &mut plugins).await?;

    info!(
        backend = manager.backend_name(),
        images = images.messages.len(),
        containers = containers.messages.len(),
        volumes = volumes.messages.len(),
        plugins = plugins.messages.len(),
        "백엔드 인벤토리"
    );
    Ok(())
}
