use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ByteStream, SessionGuard, TransferSession};
use crate::backend::{Backend, PullCursor};
use crate::context::CallContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// 백엔드에서 청크를 가져오는 중
    Pulling,
    /// 백엔드 스트림이 끝났고 버퍼에 남은 데이터만 내보냄
    Draining,
    Done,
}

struct RetrieveDriver<B: Backend> {
    backend: Arc<B>,
    ctx: CallContext,
    session: TransferSession,
    guard: Option<SessionGuard>,
    cursor: PullCursor,
    buffer: BytesMut,
    chunk_size: usize,
    stage: Stage,
}

pub(super) fn drive<B: Backend>(
    backend: Arc<B>,
    ctx: CallContext,
    session: TransferSession,
    guard: SessionGuard,
    chunk_size: usize,
) -> ByteStream {
    let driver = RetrieveDriver {
        backend,
        ctx,
        cursor: PullCursor::start(session.id()),
        session,
        guard: Some(guard),
        buffer: BytesMut::new(),
        chunk_size: chunk_size.max(1),
        stage: Stage::Pulling,
    };

    stream::unfold(driver, |mut driver| async move {
        let item = driver.next_item().await?;
        Some((item, driver))
    })
    .boxed()
}

impl<B: Backend> RetrieveDriver<B> {
    async fn next_item(&mut self) -> Option<Result<Bytes>> {
        loop {
            // 버퍼를 다 내보낸 뒤에만 다음 청크를 가져옴 (작은 청크는 합치지 않음)
            if !self.buffer.is_empty() {
                let n = self.buffer.len().min(self.chunk_size);
                return Some(Ok(self.buffer.split_to(n).freeze()));
            }

            match self.stage {
                Stage::Pulling => {
                    if let Err(e) = self.pull().await {
                        self.abort(&e).await;
                        return Some(Err(e));
                    }
                }
                Stage::Draining => return self.complete().err().map(Err),
                Stage::Done => return None,
            }
        }
    }

    /// 백엔드에서 청크 하나를 가져와 버퍼에 붙입니다.
    async fn pull(&mut self) -> Result<()> {
        self.ctx.check()?;

        // 진행 중인 호출은 끝까지 기다리고, 취소는 청크 경계에서 반영
        let pulled = self.backend.pull_chunk(self.session.image(), &self.cursor).await?;
        self.cursor = self.cursor.advance();
        self.ctx.check()?;

        self.session.record_chunk(&pulled.data)?;
        self.buffer.extend_from_slice(&pulled.data);

        if pulled.is_final {
            debug!(session = %self.session.id(), chunks = self.cursor.sequence, "백엔드 스트림 종료");
            self.stage = Stage::Draining;
        }
        Ok(())
    }

    /// 모든 데이터를 내보낸 뒤 다이제스트를 확인하고 세션을 마칩니다.
    fn complete(&mut self) -> Result<()> {
        let outcome = self.session.verify();
        match &outcome {
            Ok(()) => {
                self.session.succeed();
            }
            Err(e) => {
                self.session.fail(e);
            }
        }
        self.guard = None;
        self.stage = Stage::Done;
        outcome
    }

    async fn abort(&mut self, error: &Error) {
        if let Err(e) = self.backend.abort_pull(self.session.image(), &self.cursor).await {
            warn!(image = %self.session.image(), error = %e, "부분 회수 정리 실패");
        }
        self.session.fail(error);
        self.buffer.clear();
        self.guard = None;
        self.stage = Stage::Done;
    }
}

impl<B: Backend> Drop for RetrieveDriver<B> {
    fn drop(&mut self) {
        if self.stage == Stage::Done {
            return;
        }

        self.session.fail(&Error::cancelled("회수 스트림이 도중에 버려짐"));
        let guard = self.guard.take();

        // 백엔드 스트림을 끝까지 읽었으면 정리할 상태가 없음
        if self.stage == Stage::Draining {
            return;
        }

        let backend = self.backend.clone();
        let image = self.session.image().clone();
        let cursor = self.cursor;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.abort_pull(&image, &cursor).await {
                        warn!(image = %image, error = %e, "부분 회수 정리 실패");
                    }
                    drop(guard);
                });
            }
            Err(_) => drop(guard),
        }
    }
}
