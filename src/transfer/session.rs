use sha2::{Digest as _, Sha256};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Direction, ImageRef};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{ProgressEvent, SessionState};

const SHA256_PREFIX: &str = "sha256:";

/// `sha256:<64자리 16진수>` 형식의 다이제스트
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    pub fn parse(value: &str) -> Result<Self> {
        let hex_part = value
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| Error::invalid_request(format!("지원하지 않는 다이제스트 형식: {}", value)))?;

        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_request(format!("잘못된 sha256 다이제스트: {}", value)));
        }

        Ok(Self(hex_part.to_ascii_lowercase()))
    }

    /// 바이트열의 다이제스트를 계산합니다.
    pub fn of(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, self.0)
    }
}

/// 하나의 전송에 대한 장부
///
/// 전송 드라이버가 단독으로 소유하며 다른 작업과 공유하지 않습니다.
pub struct TransferSession {
    id: Uuid,
    direction: Direction,
    image: ImageRef,
    total_bytes: Option<u64>,
    bytes_transferred: u64,
    sequence: u64,
    state: SessionState,
    hasher: Sha256,
    expected: Option<Digest>,
    started: Instant,
}

impl TransferSession {
    pub fn new(direction: Direction, image: ImageRef, total_bytes: Option<u64>, expected: Option<Digest>) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            direction,
            image,
            total_bytes,
            bytes_transferred: 0,
            sequence: 0,
            state: SessionState::Active,
            hasher: Sha256::new(),
            expected,
            started: Instant::now(),
        };

        info!(
            session = %session.id,
            direction = %session.direction,
            image = %session.image,
            total_bytes = ?session.total_bytes,
            checksum = session.expected.is_some(),
            "전송 세션 시작"
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 길이 `len`인 청크를 받아도 되는지 확인합니다. 세션 상태는 바꾸지 않습니다.
    pub fn admit_chunk(&self, len: usize) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::invalid_request(format!("종료된 세션 {} 에 청크 기록 시도", self.id)));
        }

        let next = self.bytes_transferred + len as u64;
        if let Some(total) = self.total_bytes {
            if next > total {
                return Err(Error::invalid_request(format!(
                    "전송량 {} 바이트가 선언된 크기 {} 바이트를 초과함",
                    next, total
                )));
            }
        }
        Ok(())
    }

    /// 청크 하나를 반영하고 새 시퀀스 번호를 돌려줍니다.
    ///
    /// 선언된 전체 크기를 넘으면 아무것도 반영하지 않고 실패합니다.
    pub fn record_chunk(&mut self, data: &[u8]) -> Result<u64> {
        self.admit_chunk(data.len())?;

        self.hasher.update(data);
        self.bytes_transferred += data.len() as u64;
        self.sequence += 1;

        debug!(
            session = %self.id,
            sequence = self.sequence,
            chunk_bytes = data.len(),
            bytes_transferred = self.bytes_transferred,
            "청크 반영"
        );
        Ok(self.sequence)
    }

    /// 마지막 청크 이후 크기와 다이제스트를 확인합니다.
    pub fn verify(&mut self) -> Result<()> {
        if let Some(total) = self.total_bytes {
            if self.bytes_transferred != total {
                return Err(Error::invalid_request(format!(
                    "전송량 {} 바이트가 선언된 크기 {} 바이트와 다름",
                    self.bytes_transferred, total
                )));
            }
        }

        let actual = Digest::from_hasher(std::mem::take(&mut self.hasher));
        match &self.expected {
            Some(expected) if *expected != actual => {
                Err(Error::checksum_mismatch(&expected.to_string(), &actual.to_string()))
            }
            _ => {
                debug!(session = %self.id, digest = %actual, "다이제스트 확인");
                Ok(())
            }
        }
    }

    pub fn progress(&self) -> ProgressEvent {
        ProgressEvent {
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
            state: self.state,
            error: None,
        }
    }

    pub fn succeed(&mut self) -> ProgressEvent {
        self.finish(SessionState::Succeeded, None)
    }

    pub fn fail(&mut self, error: &Error) -> ProgressEvent {
        let state = if error.kind() == ErrorKind::Cancelled {
            SessionState::Cancelled
        } else {
            SessionState::Failed
        };
        self.finish(state, Some(error))
    }

    fn finish(&mut self, state: SessionState, error: Option<&Error>) -> ProgressEvent {
        if !self.state.is_terminal() {
            self.state = state;
        }

        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match error {
            None => info!(
                session = %self.id,
                direction = %self.direction,
                image = %self.image,
                bytes = self.bytes_transferred,
                chunks = self.sequence,
                elapsed_ms,
                "전송 세션 완료"
            ),
            Some(e) => warn!(
                session = %self.id,
                direction = %self.direction,
                image = %self.image,
                bytes = self.bytes_transferred,
                chunks = self.sequence,
                elapsed_ms,
                state = ?self.state,
                error = %e,
                "전송 세션 중단"
            ),
        }

        ProgressEvent {
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
            state: self.state,
            error: error.map(Error::to_detail),
        }
    }
}
