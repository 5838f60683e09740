use bytes::Bytes;
use futures_util::stream::{self, Peekable, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

use super::{ChunkStream, ProgressStream, SessionGuard, TransferSession};
use crate::backend::Backend;
use crate::context::CallContext;
use crate::error::Error;
use crate::protocol::ProgressEvent;

enum Next {
    Chunk(Bytes, bool),
    Failed(Error),
    Cancelled(Error),
}

struct DeployDriver<B: Backend> {
    backend: Arc<B>,
    ctx: CallContext,
    source: Peekable<ChunkStream>,
    session: TransferSession,
    guard: Option<SessionGuard>,
    pending: VecDeque<ProgressEvent>,
    finished: bool,
}

pub(super) fn drive<B: Backend>(
    backend: Arc<B>,
    ctx: CallContext,
    session: TransferSession,
    guard: SessionGuard,
    source: ChunkStream,
) -> ProgressStream {
    let driver = DeployDriver {
        backend,
        ctx,
        source: source.peekable(),
        session,
        guard: Some(guard),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(driver, |mut driver| async move {
        let event = driver.next_event().await?;
        Some((event, driver))
    })
    .boxed()
}

impl<B: Backend> DeployDriver<B> {
    async fn next_event(&mut self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            self.advance().await;
        }
    }

    /// 다음 청크를 읽어 백엔드로 보내고 이벤트를 대기열에 넣습니다.
    async fn advance(&mut self) {
        let (chunk, is_final) = match self.read_chunk().await {
            Next::Chunk(chunk, is_final) => (chunk, is_final),
            Next::Failed(e) | Next::Cancelled(e) => return self.abort(e).await,
        };

        // 청크 경계: 이 시점 이후의 취소는 다음 청크 전에 반영
        if let Err(e) = self.ctx.check() {
            return self.abort(e).await;
        }

        if let Err(e) = self.session.admit_chunk(chunk.len()) {
            return self.abort(e).await;
        }

        // 백엔드가 받아들인 청크만 전송량에 반영
        if let Err(e) = self.backend.push_chunk(self.session.image(), chunk.clone(), is_final).await {
            return self.abort(e.into()).await;
        }
        if let Err(e) = self.session.record_chunk(&chunk) {
            return self.abort(e).await;
        }
        self.pending.push_back(self.session.progress());

        if is_final {
            if let Err(e) = self.session.verify() {
                return self.abort(e).await;
            }
            if let Err(e) = self.backend.commit_push(self.session.image()).await {
                return self.abort(e.into()).await;
            }
            let event = self.session.succeed();
            self.complete(event);
        }
    }

    async fn read_chunk(&mut self) -> Next {
        if let Err(e) = self.ctx.check() {
            return Next::Cancelled(e);
        }

        let item = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => return Next::Cancelled(self.cancellation()),
            item = self.source.next() => item,
        };

        let chunk = match item {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Next::Failed(e),
            // 빈 입력: 빈 마지막 청크로 백엔드에 종료를 알림
            None if self.session.sequence() == 0 => return Next::Chunk(Bytes::new(), true),
            None => return Next::Failed(Error::invalid_request("입력 스트림이 예기치 않게 끝남")),
        };

        let is_final = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => return Next::Cancelled(self.cancellation()),
            next = Pin::new(&mut self.source).peek() => next.is_none(),
        };

        Next::Chunk(chunk, is_final)
    }

    fn cancellation(&self) -> Error {
        self.ctx
            .check()
            .err()
            .unwrap_or_else(|| Error::cancelled("호출이 취소됨"))
    }

    /// 실패/취소 종료: 백엔드 부분 상태를 정리하고 종료 이벤트를 남깁니다.
    async fn abort(&mut self, error: Error) {
        if let Err(e) = self.backend.abort_push(self.session.image()).await {
            warn!(image = %self.session.image(), error = %e, "부분 업로드 정리 실패");
        }
        let event = self.session.fail(&error);
        self.complete(event);
    }

    fn complete(&mut self, event: ProgressEvent) {
        self.guard = None;
        self.finished = true;
        self.pending.push_back(event);
    }
}

impl<B: Backend> Drop for DeployDriver<B> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        // 소비자가 스트림을 도중에 버린 경우: 정리가 끝난 뒤 세션 키 해제
        let guard = self.guard.take();
        let backend = self.backend.clone();
        let image = self.session.image().clone();
        self.session.fail(&Error::cancelled("진행 스트림이 도중에 버려짐"));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.abort_push(&image).await {
                        warn!(image = %image, error = %e, "부분 업로드 정리 실패");
                    }
                    drop(guard);
                });
            }
            Err(_) => drop(guard),
        }
    }
}
