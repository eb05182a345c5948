//! 설정 관리 -- watchpost.toml 파싱 및 런타임 설정
//!
//! [`WatchpostConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//! 모든 설정은 시작 시점에만 적용되며 런타임에 변경되지 않습니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`WATCHPOST_SYSLOG_BIND=0.0.0.0:5514` 형식)
//! 3. 설정 파일 (`watchpost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), watchpost_core::error::WatchpostError> {
//! use watchpost_core::config::WatchpostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = WatchpostConfig::load("watchpost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = WatchpostConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, WatchpostError};
use crate::queue::DEFAULT_BACKLOG_THRESHOLD;

/// 허용되는 ack 모드
pub const ACK_MODES: &[&str] = &["queued", "confirmed"];

/// 허용되는 큐 백엔드
pub const QUEUE_BACKENDS: &[&str] = &["memory", "journal"];

/// Watchpost 통합 설정
///
/// `watchpost.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchpostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// HTTP 인제스트 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 인제스트 게이트웨이 설정
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// 내구성 큐 설정
    #[serde(default)]
    pub queue: QueueConfig,
    /// 파일 테일링 에이전트 설정
    #[serde(default)]
    pub file_agent: FileAgentConfig,
    /// UDP syslog 수신기 설정
    #[serde(default)]
    pub syslog: SyslogConfig,
    /// 원격 인제스트 전달 설정
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    /// 분석 워커 설정
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl WatchpostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WatchpostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, WatchpostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WatchpostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                WatchpostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, WatchpostError> {
        toml::from_str(toml_str).map_err(|e| {
            WatchpostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `WATCHPOST_{SECTION}_{FIELD}`
    /// 예: `WATCHPOST_FILE_AGENT_WATCH_PATH=/var/log/secure`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "WATCHPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "WATCHPOST_GENERAL_LOG_FORMAT");

        // Server
        override_bool(&mut self.server.enabled, "WATCHPOST_SERVER_ENABLED");
        override_string(&mut self.server.listen_addr, "WATCHPOST_SERVER_LISTEN_ADDR");

        // Gateway
        override_usize(
            &mut self.gateway.backlog_threshold,
            "WATCHPOST_GATEWAY_BACKLOG_THRESHOLD",
        );
        override_string(&mut self.gateway.ack_mode, "WATCHPOST_GATEWAY_ACK_MODE");
        override_usize(
            &mut self.gateway.handoff_capacity,
            "WATCHPOST_GATEWAY_HANDOFF_CAPACITY",
        );

        // Queue
        override_string(&mut self.queue.backend, "WATCHPOST_QUEUE_BACKEND");
        override_string(&mut self.queue.name, "WATCHPOST_QUEUE_NAME");
        override_string(&mut self.queue.journal_dir, "WATCHPOST_QUEUE_JOURNAL_DIR");
        override_bool(&mut self.queue.fsync, "WATCHPOST_QUEUE_FSYNC");

        // File agent
        override_bool(&mut self.file_agent.enabled, "WATCHPOST_FILE_AGENT_ENABLED");
        override_string(
            &mut self.file_agent.watch_path,
            "WATCHPOST_FILE_AGENT_WATCH_PATH",
        );
        override_u64(
            &mut self.file_agent.fallback_poll_secs,
            "WATCHPOST_FILE_AGENT_FALLBACK_POLL_SECS",
        );
        override_usize(
            &mut self.file_agent.max_line_length,
            "WATCHPOST_FILE_AGENT_MAX_LINE_LENGTH",
        );
        override_usize(
            &mut self.file_agent.max_read_bytes,
            "WATCHPOST_FILE_AGENT_MAX_READ_BYTES",
        );

        // Syslog
        override_bool(&mut self.syslog.enabled, "WATCHPOST_SYSLOG_ENABLED");
        override_string(&mut self.syslog.bind, "WATCHPOST_SYSLOG_BIND");
        override_usize(
            &mut self.syslog.buffer_capacity,
            "WATCHPOST_SYSLOG_BUFFER_CAPACITY",
        );

        // Forwarder
        override_string(
            &mut self.forwarder.ingest_url,
            "WATCHPOST_FORWARDER_INGEST_URL",
        );
        override_u64(
            &mut self.forwarder.timeout_secs,
            "WATCHPOST_FORWARDER_TIMEOUT_SECS",
        );

        // Worker
        override_bool(&mut self.worker.enabled, "WATCHPOST_WORKER_ENABLED");
        override_u64(
            &mut self.worker.pop_timeout_secs,
            "WATCHPOST_WORKER_POP_TIMEOUT_SECS",
        );
        override_u64(&mut self.worker.backoff_secs, "WATCHPOST_WORKER_BACKOFF_SECS");
        override_u64(
            &mut self.worker.analysis_delay_ms,
            "WATCHPOST_WORKER_ANALYSIS_DELAY_MS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "WATCHPOST_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "WATCHPOST_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "WATCHPOST_METRICS_PORT");
    }

    /// 원격 인제스트 URL이 설정되어 있는지 확인합니다.
    ///
    /// 설정되어 있으면 수집기는 로컬 게이트웨이 대신 HTTP로 전달합니다.
    pub fn forwards_remotely(&self) -> bool {
        !self.forwarder.ingest_url.trim().is_empty()
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), WatchpostError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.server.enabled {
            validate_socket_addr("server.listen_addr", &self.server.listen_addr)?;
        }

        if self.gateway.backlog_threshold == 0 {
            return Err(invalid("gateway.backlog_threshold", "must be greater than 0"));
        }
        if !ACK_MODES.contains(&self.gateway.ack_mode.as_str()) {
            return Err(invalid(
                "gateway.ack_mode",
                format!("must be one of: {}", ACK_MODES.join(", ")),
            ));
        }
        if self.gateway.handoff_capacity == 0 {
            return Err(invalid("gateway.handoff_capacity", "must be greater than 0"));
        }

        if !QUEUE_BACKENDS.contains(&self.queue.backend.as_str()) {
            return Err(invalid(
                "queue.backend",
                format!("must be one of: {}", QUEUE_BACKENDS.join(", ")),
            ));
        }
        if self.queue.name.is_empty()
            || !self
                .queue
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid(
                "queue.name",
                "must be non-empty and contain only [A-Za-z0-9_-]",
            ));
        }
        if self.queue.backend == "journal" && self.queue.journal_dir.is_empty() {
            return Err(invalid(
                "queue.journal_dir",
                "must not be empty when backend is 'journal'",
            ));
        }

        if self.file_agent.enabled && self.file_agent.watch_path.is_empty() {
            return Err(invalid(
                "file_agent.watch_path",
                "must not be empty when file agent is enabled",
            ));
        }
        if self.file_agent.enabled {
            if self.file_agent.max_line_length == 0 {
                return Err(invalid("file_agent.max_line_length", "must be greater than 0"));
            }
            if self.file_agent.max_read_bytes == 0 {
                return Err(invalid("file_agent.max_read_bytes", "must be greater than 0"));
            }
        }

        if self.syslog.enabled {
            validate_socket_addr("syslog.bind", &self.syslog.bind)?;
            if self.syslog.buffer_capacity == 0 {
                return Err(invalid("syslog.buffer_capacity", "must be greater than 0"));
            }
            if self.syslog.max_message_size == 0 || self.syslog.max_message_size > 65_535 {
                return Err(invalid("syslog.max_message_size", "must be 1-65535"));
            }
        }

        if self.forwards_remotely() {
            let url = self.forwarder.ingest_url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(
                    "forwarder.ingest_url",
                    "must start with http:// or https://",
                ));
            }
            if self.forwarder.timeout_secs == 0 {
                return Err(invalid("forwarder.timeout_secs", "must be greater than 0"));
            }
        }

        if self.worker.enabled {
            if self.worker.pop_timeout_secs == 0 {
                return Err(invalid("worker.pop_timeout_secs", "must be greater than 0"));
            }
            if self.worker.backoff_secs == 0 {
                return Err(invalid("worker.backoff_secs", "must be greater than 0"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> WatchpostError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn validate_socket_addr(field: &str, value: &str) -> Result<(), WatchpostError> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|e| invalid(field, format!("'{value}' is not a socket address: {e}")))
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// HTTP 인제스트 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:8000".to_owned(),
        }
    }
}

/// 인제스트 게이트웨이 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 이 길이 이상이면 큐 상태를 backlogged로 보고
    pub backlog_threshold: usize,
    /// ack 모드 (queued: push 전 응답, confirmed: push 확인 후 응답)
    pub ack_mode: String,
    /// 게이트웨이 -> 적재 태스크 핸드오프 채널 용량
    pub handoff_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backlog_threshold: DEFAULT_BACKLOG_THRESHOLD,
            ack_mode: "queued".to_owned(),
            handoff_capacity: 1024,
        }
    }
}

/// 내구성 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 백엔드 (memory, journal)
    pub backend: String,
    /// 큐 이름
    pub name: String,
    /// 저널 디렉토리 (journal 백엔드)
    pub journal_dir: String,
    /// push마다 fsync 수행 여부
    pub fsync: bool,
    /// 소비된 레코드가 이 수를 넘으면 저널 압축
    pub compact_threshold: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: "journal".to_owned(),
            name: "security_events".to_owned(),
            journal_dir: "/var/lib/watchpost/queue".to_owned(),
            fsync: false,
            compact_threshold: 1024,
        }
    }
}

/// 파일 테일링 에이전트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAgentConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 감시할 파일 경로
    pub watch_path: String,
    /// 알림 누락 대비 재확인 주기 (초, 0이면 비활성)
    pub fallback_poll_secs: u64,
    /// 최대 라인 길이 (바이트), 초과 라인은 건너뜀
    pub max_line_length: usize,
    /// poll 한 번에 읽는 최대 바이트 수
    pub max_read_bytes: usize,
}

impl Default for FileAgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_path: "/var/log/auth.log".to_owned(),
            fallback_poll_secs: 0,
            max_line_length: 64 * 1024, // 64KB
            max_read_bytes: 1024 * 1024,
        }
    }
}

/// UDP syslog 수신기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyslogConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소 (특권 포트 514 대신 5140)
    pub bind: String,
    /// 최대 데이터그램 크기 (바이트)
    pub max_message_size: usize,
    /// 수신 -> 전달 사이 내부 버퍼 용량
    pub buffer_capacity: usize,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:5140".to_owned(),
            max_message_size: 65_535,
            buffer_capacity: 1024,
        }
    }
}

/// 원격 인제스트 전달 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// 원격 백엔드의 `/ingest` URL (비어 있으면 로컬 게이트웨이 사용)
    pub ingest_url: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            ingest_url: String::new(),
            timeout_secs: 10,
        }
    }
}

/// 분석 워커 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// blocking pop 타임아웃 (초)
    pub pop_timeout_secs: u64,
    /// 분석 실패 후 대기 시간 (초)
    pub backoff_secs: u64,
    /// 스텁 분석기의 처리 지연 (밀리초)
    pub analysis_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pop_timeout_secs: 30,
            backoff_secs: 5,
            analysis_delay_ms: 1000,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
