use serde::Serialize;
use std::fmt;

use crate::backend::BackendError;

/// Manager 경계 밖으로 나가는 고정된 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// 대상 이미지/컨테이너/볼륨이 존재하지 않음
    NotFound,
    /// 이미 존재하는 대상을 생성하려 함
    AlreadyExists,
    /// 같은 (방향, 이미지)에 대해 진행 중인 전송이 있음
    SessionConflict,
    /// 누적 다이제스트가 선언된 값과 다름
    ChecksumMismatch,
    /// 백엔드에 일시적으로 연결할 수 없음 (재시도 가능)
    BackendUnavailable,
    /// 백엔드 내부 오류
    BackendInternal,
    /// 잘못된 참조나 필터
    InvalidRequest,
    /// 호출이 취소되었거나 기한이 지남
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::SessionConflict => "SESSION_CONFLICT",
            ErrorKind::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorKind::BackendInternal => "BACKEND_INTERNAL",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// 호출자가 같은 요청을 그대로 다시 보내도 안전한지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::BackendUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    detail: String,
}

impl Error {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, detail)
    }

    pub fn session_conflict(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionConflict, detail)
    }

    pub fn checksum_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::ChecksumMismatch,
            format!("다이제스트 불일치: 예상 {}, 실제 {}", expected, actual),
        )
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, detail)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind,
            message: self.detail.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for Error {}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable { context, reason } => Error::new(
                ErrorKind::BackendUnavailable,
                format!("백엔드 연결 불가 ({}): {}", context, reason),
            ),
            BackendError::NotFound { resource } => {
                Error::new(ErrorKind::NotFound, format!("{} 을(를) 찾을 수 없음", resource))
            }
            BackendError::AlreadyExists { resource } => {
                Error::new(ErrorKind::AlreadyExists, format!("{} 이(가) 이미 존재함", resource))
            }
            BackendError::Internal { context, reason } => Error::new(
                ErrorKind::BackendInternal,
                format!("백엔드 내부 오류 ({}): {}", context, reason),
            ),
        }
    }
}

/// 진행 이벤트와 싱크 종료 조건에 실리는 직렬화 가능한 에러 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<ErrorDetail> for Error {
    fn from(detail: ErrorDetail) -> Self {
        Error::new(detail.kind, detail.message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
