//! 설정 관리 -- logrelay.toml 파싱 및 런타임 설정
//!
//! [`RelayConfig`]는 서버와 데몬의 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGRELAY_PARSER_TYPE=rfc3164` 형식)
//! 3. 설정 파일 (`logrelay.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logrelay_core::error::RelayError> {
//! use logrelay_core::config::RelayConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = RelayConfig::load("logrelay.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = RelayConfig::parse("[parser]\ntype = \"rfc3164\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RelayError};

/// logrelay 통합 설정
///
/// `logrelay.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// 일반 설정 (PID 파일)
    #[serde(default)]
    pub general: GeneralConfig,
    /// 서버 설정 (룰셋 경로)
    #[serde(default)]
    pub server: ServerSection,
    /// 리스너 설정
    #[serde(default)]
    pub listener: ListenerConfig,
    /// 로깅 설정
    #[serde(default)]
    pub log: LogConfig,
    /// 파서 설정
    #[serde(default)]
    pub parser: ParserConfig,
    /// 디스패치 워커 풀 설정
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// 종료 설정
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl RelayConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용한 뒤 검증합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RelayError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, RelayError> {
        toml::from_str(toml_str).map_err(|e| {
            RelayError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGRELAY_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General / Server
        override_string(&mut self.general.pid_file, "LOGRELAY_GENERAL_PID_FILE");
        override_string(&mut self.server.rule_file, "LOGRELAY_SERVER_RULE_FILE");

        // Listener
        override_string(&mut self.listener.kind, "LOGRELAY_LISTENER_TYPE");
        override_string(&mut self.listener.unix.path, "LOGRELAY_LISTENER_UNIX_PATH");
        override_string(&mut self.listener.tcp.addr, "LOGRELAY_LISTENER_TCP_ADDR");
        override_u16(&mut self.listener.tcp.port, "LOGRELAY_LISTENER_TCP_PORT");
        override_string(&mut self.listener.tls.addr, "LOGRELAY_LISTENER_TLS_ADDR");
        override_u16(&mut self.listener.tls.port, "LOGRELAY_LISTENER_TLS_PORT");
        override_string(
            &mut self.listener.tls.cert_path,
            "LOGRELAY_LISTENER_TLS_CERT_PATH",
        );
        override_string(
            &mut self.listener.tls.key_path,
            "LOGRELAY_LISTENER_TLS_KEY_PATH",
        );

        // Log
        override_string(&mut self.log.level, "LOGRELAY_LOG_LEVEL");
        override_string(&mut self.log.format, "LOGRELAY_LOG_FORMAT");
        override_bool(&mut self.log.extended, "LOGRELAY_LOG_EXTENDED");

        // Parser
        override_string(&mut self.parser.kind, "LOGRELAY_PARSER_TYPE");
        override_u64(&mut self.parser.timeout_ms, "LOGRELAY_PARSER_TIMEOUT_MS");
        override_usize(
            &mut self.parser.max_frame_size,
            "LOGRELAY_PARSER_MAX_FRAME_SIZE",
        );

        // Dispatch
        override_usize(&mut self.dispatch.workers, "LOGRELAY_DISPATCH_WORKERS");
        override_usize(
            &mut self.dispatch.queue_capacity,
            "LOGRELAY_DISPATCH_QUEUE_CAPACITY",
        );
        if let Ok(val) = std::env::var("LOGRELAY_DISPATCH_OVERFLOW") {
            match OverflowPolicy::from_str_loose(&val) {
                Some(policy) => self.dispatch.overflow = policy,
                None => warn!(
                    env_key = "LOGRELAY_DISPATCH_OVERFLOW",
                    value = val.as_str(),
                    "unknown overflow policy in env var, ignoring"
                ),
            }
        }

        // Shutdown / Metrics
        override_u64(
            &mut self.shutdown.drain_timeout_secs,
            "LOGRELAY_SHUTDOWN_DRAIN_TIMEOUT_SECS",
        );
        override_bool(&mut self.metrics.enabled, "LOGRELAY_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "LOGRELAY_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "LOGRELAY_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 리스너/파서 타입 문자열은 여기서 검사하지 않습니다. 각각 리스너 팩토리와
    /// 파서 선택 단계에서 전용 에러로 거부됩니다.
    pub fn validate(&self) -> Result<(), RelayError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(invalid(
                "log.level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log.format.as_str()) {
            return Err(invalid(
                "log.format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.server.rule_file.is_empty() {
            return Err(invalid("server.rule_file", "must not be empty".to_owned()));
        }

        if self.parser.timeout_ms == 0 {
            return Err(invalid(
                "parser.timeout_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
        if self.parser.max_frame_size == 0 || self.parser.max_frame_size > MAX_FRAME_SIZE {
            return Err(invalid(
                "parser.max_frame_size",
                format!("must be 1-{MAX_FRAME_SIZE}"),
            ));
        }

        const MAX_WORKERS: usize = 1024;
        if self.dispatch.workers == 0 || self.dispatch.workers > MAX_WORKERS {
            return Err(invalid(
                "dispatch.workers",
                format!("must be 1-{MAX_WORKERS}"),
            ));
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(invalid(
                "dispatch.queue_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.shutdown.drain_timeout_secs == 0 {
            return Err(invalid(
                "shutdown.drain_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must not be 0".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> RelayError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            pid_file: "/var/run/logrelay.pid".to_owned(),
        }
    }
}

/// 서버 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// 룰셋 파일 경로 (.toml, .yml, .yaml)
    pub rule_file: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            rule_file: "/etc/logrelay/rules.toml".to_owned(),
        }
    }
}

/// 리스너 설정
///
/// `type`이 선택한 하위 섹션만 사용됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// 리스너 타입 (unix, tcp, tls)
    #[serde(rename = "type")]
    pub kind: String,
    /// UNIX 소켓 리스너
    pub unix: UnixListenerConfig,
    /// TCP 리스너
    pub tcp: TcpListenerConfig,
    /// TLS 리스너
    pub tls: TlsListenerConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            kind: "unix".to_owned(),
            unix: UnixListenerConfig::default(),
            tcp: TcpListenerConfig::default(),
            tls: TlsListenerConfig::default(),
        }
    }
}

/// UNIX 소켓 리스너 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnixListenerConfig {
    /// 소켓 파일 경로
    pub path: String,
}

impl Default for UnixListenerConfig {
    fn default() -> Self {
        Self {
            path: "/var/tmp/logrelay.sock".to_owned(),
        }
    }
}

/// TCP 리스너 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpListenerConfig {
    /// 바인드 주소
    pub addr: String,
    /// 바인드 포트
    pub port: u16,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_owned(),
            port: 9099,
        }
    }
}

/// TLS 리스너 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsListenerConfig {
    /// 바인드 주소
    pub addr: String,
    /// 바인드 포트
    pub port: u16,
    /// PEM 인증서 체인 경로
    pub cert_path: String,
    /// PEM PKCS#8 개인키 경로
    pub key_path: String,
}

impl Default for TlsListenerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_owned(),
            port: 9099,
            cert_path: String::new(),
            key_path: String::new(),
        }
    }
}

/// 로깅 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub level: String,
    /// 로그 형식 (json, pretty)
    pub format: String,
    /// 전송 에러, 액션 소요 시간 등 확장 진단 로그
    pub extended: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "json".to_owned(),
            extended: false,
        }
    }
}

/// 파서 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// 파서 타입 (rfc3164, rfc5424)
    #[serde(rename = "type")]
    pub kind: String,
    /// 프레임당 읽기 제한 시간 (밀리초)
    pub timeout_ms: u64,
    /// 최대 프레임 크기 (바이트)
    pub max_frame_size: usize,
}

impl ParserConfig {
    /// 읽기 제한 시간을 `Duration`으로 반환합니다.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            kind: "rfc5424".to_owned(),
            timeout_ms: 500,
            max_frame_size: 64 * 1024, // 64KB
        }
    }
}

/// 디스패치 큐가 가득 찼을 때의 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// 새 메시지를 버림 (읽기 루프가 블록되지 않음, 기본값)
    #[default]
    Drop,
    /// 큐에 자리가 날 때까지 읽기 루프를 대기시킴
    Block,
}

impl OverflowPolicy {
    /// 대소문자 구분 없이 문자열에서 정책을 파싱합니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Some(Self::Drop),
            "block" => Some(Self::Block),
            _ => None,
        }
    }
}

/// 디스패치 워커 풀 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 워커 태스크 수
    pub workers: usize,
    /// 대기 큐 용량
    pub queue_capacity: usize,
    /// 큐 포화 시 정책
    pub overflow: OverflowPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            overflow: OverflowPolicy::Drop,
        }
    }
}

/// 종료 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// 진행 중인 연결/디스패치 작업을 기다리는 최대 시간 (초)
    pub drain_timeout_secs: u64,
}

impl ShutdownConfig {
    /// 드레인 제한 시간을 `Duration`으로 반환합니다.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 바인드 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
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
