use containerz::settings::{BackendKind, LogFormat, LogOutput, Settings, SettingsError, CONFIG_FILE_ENV};
use std::sync::Once;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;  // 테스트 격리를 위해 추가

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(|| {
            cleanup_env();
        });
    }

    fn teardown() {
        cleanup_env();
    }

    // 테스트 전후 환경변수 초기화를 위한 헬퍼 함수
    fn cleanup_env() {
        for name in [
            CONFIG_FILE_ENV,
            "CONTAINERZ_LOG_FORMAT",
            "CONTAINERZ_LOG_LEVEL",
            "CONTAINERZ_LOG_OUTPUT",
            "CONTAINERZ_BACKEND",
            "CONTAINERZ_BACKEND_ENDPOINT",
            "CONTAINERZ_BACKEND_TIMEOUT",
            "CONTAINERZ_RETRY_ATTEMPTS",
            "CONTAINERZ_RETRY_INTERVAL",
            "CONTAINERZ_CHUNK_SIZE",
            "CONTAINERZ_TRANSFER_TIMEOUT",
        ] {
            std::env::remove_var(name);
        }
    }

    // 테스트용 임시 TOML 파일 생성 헬퍼
    fn create_test_toml(content: &str) -> (String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");
        std::fs::write(&file_path, content).unwrap();
        (file_path.to_str().unwrap().to_string(), dir)
    }

    #[tokio::test]
    #[serial]
    async fn test_settings_defaults() {
        setup();

        let settings = Settings::from_env().await.unwrap();

        assert_eq!(settings.logging.level, tracing::Level::INFO);
        assert_eq!(settings.logging.format, LogFormat::Text);
        assert_eq!(settings.logging.output, LogOutput::Stdout);
        assert_eq!(settings.backend.kind, BackendKind::Docker);
        assert!(settings.backend.endpoint.is_none());
        assert_eq!(settings.backend.timeout, 120);
        assert_eq!(settings.backend.retry.max_attempts, 3);
        assert_eq!(settings.transfer.chunk_size, 64 * 1024);
        assert_eq!(settings.transfer.timeout, 0);
        teardown();
    }

    #[tokio::test]
    #[serial]
    async fn test_settings_from_env() {
        setup();

        // 환경변수 설정
        std::env::set_var("CONTAINERZ_LOG_FORMAT", "json");
        std::env::set_var("CONTAINERZ_LOG_LEVEL", "debug");
        std::env::set_var("CONTAINERZ_LOG_OUTPUT", "/tmp/containerz.log");
        std::env::set_var("CONTAINERZ_BACKEND_ENDPOINT", "unix:///var/run/docker.sock");
        std::env::set_var("CONTAINERZ_BACKEND_TIMEOUT", "30");
        std::env::set_var("CONTAINERZ_RETRY_ATTEMPTS", "5");
        std::env::set_var("CONTAINERZ_CHUNK_SIZE", "8192");
        std::env::set_var("CONTAINERZ_TRANSFER_TIMEOUT", "600");

        // 설정 로드 및 검증
        let settings = Settings::from_env().await.unwrap();

        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.level, tracing::Level::DEBUG);
        assert_eq!(settings.logging.output, LogOutput::File("/tmp/containerz.log".to_string()));
        assert_eq!(settings.backend.endpoint.as_deref(), Some("unix:///var/run/docker.sock"));
        assert_eq!(settings.backend.timeout, 30);
        assert_eq!(settings.backend.retry.max_attempts, 5);
        assert_eq!(settings.transfer.chunk_size, 8192);
        assert_eq!(settings.transfer.timeout, 600);

        teardown();
    }

    #[tokio::test]
    #[serial]
    async fn test_settings_validation() {
        setup();

        // 1. 잘못된 로그 레벨
        std::env::set_var("CONTAINERZ_LOG_LEVEL", "invalid_level");
        let result = Settings::from_env().await;
        assert!(result.is_err());
        teardown();

        // 2. 지원하지 않는 백엔드
        std::env::set_var("CONTAINERZ_BACKEND", "podman");
        let result = Settings::from_env().await;
        assert!(matches!(result, Err(SettingsError::EnvVarInvalid { .. })));
        teardown();

        // 3. 잘못된 엔드포인트
        std::env::set_var("CONTAINERZ_BACKEND_ENDPOINT", "ftp://host");
        let result = Settings::from_env().await;
        assert!(result.is_err());
        teardown();

        // 4. 범위를 벗어난 청크 크기
        std::env::set_var("CONTAINERZ_CHUNK_SIZE", "10");
        let result = Settings::from_env().await;
        assert!(result.is_err());
        teardown();

        // 5. 숫자가 아닌 타임아웃
        std::env::set_var("CONTAINERZ_BACKEND_TIMEOUT", "soon");
        let result = Settings::from_env().await;
        assert!(result.is_err());
        teardown();

        // 6. 시도 횟수 0
        std::env::set_var("CONTAINERZ_RETRY_ATTEMPTS", "0");
        let result = Settings::from_env().await;
        assert!(result.is_err());
        teardown();
    }

    #[tokio::test]
    #[serial]
    async fn test_settings_from_toml() {
        setup();

        let toml_content = r#"
            [logging]
            format = "json"
            level = "debug"

            [backend]
            endpoint = "tcp://10.0.0.5:2375"

            [backend.retry]
            max_attempts = 10
            interval = 2

            [transfer]
            chunk_size = 1048576
            timeout = 300
        "#;

        let (file_path, _temp_dir) = create_test_toml(toml_content);
        let settings = Settings::from_toml_file(&file_path).await.unwrap();

        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.backend.endpoint.as_deref(), Some("tcp://10.0.0.5:2375"));
        assert_eq!(settings.backend.retry.max_attempts, 10);
        assert_eq!(settings.backend.retry.interval, 2);
        assert_eq!(settings.transfer.chunk_size, 1048576);
        assert_eq!(settings.transfer.timeout, 300);
        teardown();
    }

    #[tokio::test]
    #[serial]
    async fn test_load_prefers_config_file() {
        setup();

        let (file_path, _temp_dir) = create_test_toml("[transfer]\nchunk_size = 2048\n");
        std::env::set_var(CONFIG_FILE_ENV, &file_path);
        // 파일이 지정되면 개별 환경 변수는 무시
        std::env::set_var("CONTAINERZ_CHUNK_SIZE", "4096");

        let settings = Settings::load().await.unwrap();
        assert_eq!(settings.transfer.chunk_size, 2048);
        teardown();
    }

    #[tokio::test]
    #[serial]
    async fn test_toml_errors() {
        setup();

        let result = Settings::from_toml_file("/nonexistent/containerz.toml").await;
        assert!(matches!(result, Err(SettingsError::FileError { .. })));

        let (file_path, _temp_dir) = create_test_toml("[transfer\nchunk_size = ");
        let result = Settings::from_toml_file(&file_path).await;
        assert!(matches!(result, Err(SettingsError::ParseError { .. })));

        let (file_path, _temp_dir) = create_test_toml("[backend]\ntimeout = 0\n");
        let result = Settings::from_toml_file(&file_path).await;
        assert!(result.is_err(), "타임아웃 0은 허용되지 않아야 함");

        teardown();
    }
}
