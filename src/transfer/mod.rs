//! 이미지 전송 세션 관리
//!
//! 배포(업로드)와 회수(다운로드)를 청크 단위로 진행합니다. 진행 중인 세션의
//! 집합이 코어의 유일한 공유 가변 상태이며 (방향, 이미지) 키로 보호됩니다.

mod deploy;
mod retrieve;
mod session;

pub use session::{Digest, TransferSession};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::backend::{Backend, Direction, ImageRef};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::protocol::{DeployRequest, ProgressEvent, RetrieveRequest};
use crate::settings::TransferSettings;

/// 배포 입력: 지연 평가되는 유한한 청크 시퀀스 (재시작 불가)
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;
/// 배포 출력
pub type ProgressStream = BoxStream<'static, ProgressEvent>;
/// 회수 출력
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub direction: Direction,
    pub image: ImageRef,
}

type ActiveSet = Arc<Mutex<HashSet<SessionKey>>>;

fn lock(active: &ActiveSet) -> MutexGuard<'_, HashSet<SessionKey>> {
    // 잠금 구간에서 패닉이 날 수 있는 코드가 없으므로 오염된 잠금도 그대로 사용
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 진행 중인 세션 집합
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: ActiveSet,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// (방향, 이미지) 키를 점유합니다. 이미 점유되어 있으면 `SessionConflict`.
    pub fn acquire(&self, direction: Direction, image: &ImageRef) -> Result<SessionGuard> {
        let key = SessionKey {
            direction,
            image: image.clone(),
        };

        if !lock(&self.active).insert(key.clone()) {
            return Err(Error::session_conflict(format!(
                "이미지 {} 에 대한 {} 세션이 이미 진행 중",
                image, direction
            )));
        }

        debug!(direction = %direction, image = %image, "세션 키 점유");
        Ok(SessionGuard {
            key,
            active: self.active.clone(),
        })
    }

    pub fn is_active(&self, direction: Direction, image: &ImageRef) -> bool {
        lock(&self.active).contains(&SessionKey {
            direction,
            image: image.clone(),
        })
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }
}

/// 점유한 세션 키. 드롭되면 해제됩니다.
#[derive(Debug)]
pub struct SessionGuard {
    key: SessionKey,
    active: ActiveSet,
}

impl SessionGuard {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
        debug!(direction = %self.key.direction, image = %self.key.image, "세션 키 해제");
    }
}

/// 배포/회수 세션을 시작하는 진입점
pub struct TransferManager<B: Backend> {
    backend: Arc<B>,
    registry: SessionRegistry,
    settings: TransferSettings,
}

impl<B: Backend> TransferManager<B> {
    pub fn new(backend: Arc<B>, settings: TransferSettings) -> Self {
        Self {
            backend,
            registry: SessionRegistry::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn session_context(&self, ctx: CallContext) -> CallContext {
        match self.settings.timeout {
            0 => ctx,
            secs => ctx.with_timeout(Duration::from_secs(secs)),
        }
    }

    /// 배포 세션을 시작하고 진행 이벤트 스트림을 돌려줍니다.
    ///
    /// 스트림은 마지막에 종료 상태(succeeded/failed/cancelled) 이벤트를 정확히 한 번
    /// 내보내며, 그 이벤트가 전달되기 전에 세션 키가 해제됩니다.
    pub fn start_deploy(&self, ctx: CallContext, request: DeployRequest, source: ChunkStream) -> Result<ProgressStream> {
        let expected = request.digest.as_deref().map(Digest::parse).transpose()?;
        let guard = self.registry.acquire(Direction::Upload, &request.image)?;
        let session = TransferSession::new(Direction::Upload, request.image, request.total_bytes, expected);

        Ok(deploy::drive(
            self.backend.clone(),
            self.session_context(ctx),
            session,
            guard,
            source,
        ))
    }

    /// 회수 세션을 시작하고 청크 스트림을 돌려줍니다.
    ///
    /// 다음 청크는 이전 청크가 소비된 뒤에만 백엔드에서 가져옵니다.
    pub fn start_retrieve(&self, ctx: CallContext, request: RetrieveRequest) -> Result<ByteStream> {
        let expected = request.expected_digest.as_deref().map(Digest::parse).transpose()?;
        let guard = self.registry.acquire(Direction::Download, &request.image)?;
        let session = TransferSession::new(Direction::Download, request.image, None, expected);

        Ok(retrieve::drive(
            self.backend.clone(),
            self.session_context(ctx),
            session,
            guard,
            self.settings.chunk_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn same_key_conflicts_until_released() {
        let registry = SessionRegistry::new();
        let image = ImageRef::parse("app:v1").unwrap();

        let guard = registry.acquire(Direction::Upload, &image).unwrap();
        let err = registry.acquire(Direction::Upload, &image).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionConflict);

        // 방향이 다르면 독립
        let download = registry.acquire(Direction::Download, &image).unwrap();
        assert_eq!(registry.active_count(), 2);

        drop(guard);
        assert!(!registry.is_active(Direction::Upload, &image));
        assert!(registry.acquire(Direction::Upload, &image).is_ok());
        drop(download);
        assert_eq!(registry.active_count(), 0);
    }
}
