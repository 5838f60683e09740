//! containerz는 컨테이너 관리 프로토콜 게이트웨이의 코어입니다.
//!
//! 프로토콜 서버가 받은 호출을 교체 가능한 컨테이너 런타임 백엔드의 작업으로
//! 변환합니다.
//!
//! # 주요 기능
//!
//! - 청크 단위 이미지 배포/회수 (진행 상황, 다이제스트 검증, 취소)
//! - 이미지/컨테이너/볼륨/플러그인 목록의 스트리밍 변환과 정확 일치 필터
//! - 컨테이너 수명주기와 볼륨 관리
//! - 백엔드 에러의 고정된 분류로의 정규화
//!
//! # 예제
//!
//! ```no_run
//! use containerz::backend::{DockerBackend, Filter};
//! use containerz::context::CallContext;
//! use containerz::manager::Manager;
//! use containerz::settings::{BackendSettings, TransferSettings};
//! use containerz::sink::VecSink;
//! use std::sync::Arc;
//!
//! # async fn run() -> containerz::Result<()> {
//! let backend = DockerBackend::connect(&BackendSettings::default())?;
//! let manager = Manager::new(Arc::new(backend), TransferSettings::default());
//!
//! let mut sink = VecSink::new();
//! manager.list_plugins(&CallContext::new(), Filter::by_name("plugin1"), &mut sink).await?;
//! for message in &sink.messages {
//!     println!("{}", message.plugins[0].config);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod listing;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod settings;
pub mod sink;
pub mod transfer;

pub use error::{Error, ErrorKind, Result};
