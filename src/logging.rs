use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::settings::{LogFormat, LogOutput, LogSettings, SettingsError};

/// 전역 로거를 초기화합니다.
///
/// 파일 출력이면 날짜별로 회전하는 비동기 기록기를 사용하며, 돌려받은
/// `WorkerGuard`가 살아있는 동안에만 로그가 기록됩니다. `RUST_LOG`가 있으면
/// 설정된 레벨보다 우선합니다.
pub fn init_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>, SettingsError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(settings.level).into())
        .from_env_lossy();

    let (writer, guard) = match &settings.output {
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), None),
        LogOutput::File(path) => {
            let path = Path::new(path);
            let file_name = path
                .file_name()
                .ok_or_else(|| SettingsError::InvalidConfig(format!("로그 파일 경로가 잘못됨: {}", path.display())))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));

            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .with_ansi(settings.output == LogOutput::Stdout)
        .with_target(true)
        .with_thread_ids(true);

    let result = match settings.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| SettingsError::InvalidConfig(format!("로거 초기화 실패: {}", e)))?;

    Ok(guard)
}
