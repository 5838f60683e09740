//! 스트리밍 응답을 받는 싱크 추상화
//!
//! 프로토콜 서버는 호출마다 싱크 하나를 넘기고, Manager와 목록 변환기는
//! 메시지가 만들어지는 즉시 한 번에 하나씩 기록합니다. 스트림의 끝은
//! [`MessageSink::finish`]로 성공 또는 에러 종료 조건과 함께 전달됩니다.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, ErrorDetail, Result};

#[async_trait]
pub trait MessageSink<M: Send + 'static>: Send {
    /// 메시지 하나를 기록합니다. 수신 측이 사라졌으면 `Cancelled`를 돌려줍니다.
    async fn send(&mut self, message: M) -> Result<()>;

    /// 스트림 종료. 에러가 있으면 종료 조건으로 함께 전달합니다.
    async fn finish(&mut self, outcome: std::result::Result<(), ErrorDetail>);
}

/// 스트림 종료 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Failed(ErrorDetail),
}

/// 받은 메시지를 모두 보관하는 싱크
#[derive(Debug)]
pub struct VecSink<M> {
    pub messages: Vec<M>,
    pub termination: Option<Termination>,
}

impl<M> Default for VecSink<M> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            termination: None,
        }
    }
}

impl<M> VecSink<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.termination.is_some()
    }
}

#[async_trait]
impl<M: Send + 'static> MessageSink<M> for VecSink<M> {
    async fn send(&mut self, message: M) -> Result<()> {
        self.messages.push(message);
        Ok(())
    }

    async fn finish(&mut self, outcome: std::result::Result<(), ErrorDetail>) {
        self.termination = Some(match outcome {
            Ok(()) => Termination::Completed,
            Err(detail) => Termination::Failed(detail),
        });
    }
}

/// 채널로 메시지를 전달하는 싱크
///
/// 채널 용량이 전송 계층의 배압이 됩니다. 수신 측이 닫히면 이후 기록은
/// `Cancelled`로 실패합니다.
#[derive(Debug)]
pub struct ChannelSink<M> {
    sender: mpsc::Sender<std::result::Result<M, ErrorDetail>>,
}

impl<M: Send + 'static> ChannelSink<M> {
    pub fn new(sender: mpsc::Sender<std::result::Result<M, ErrorDetail>>) -> Self {
        Self { sender }
    }

    /// 지정된 용량의 채널과 함께 생성합니다.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<std::result::Result<M, ErrorDetail>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl<M: Send + 'static> MessageSink<M> for ChannelSink<M> {
    async fn send(&mut self, message: M) -> Result<()> {
        self.sender
            .send(Ok(message))
            .await
            .map_err(|_| Error::cancelled("수신 측 스트림이 닫힘"))
    }

    async fn finish(&mut self, outcome: std::result::Result<(), ErrorDetail>) {
        if let Err(detail) = outcome {
            // 수신 측이 이미 떠났으면 전달할 곳이 없음
            let _ = self.sender.send(Err(detail)).await;
        }
    }
}
