//! logrelay 공통 크레이트
//!
//! syslog 수신 서버(`logrelay-router`)와 데몬(`logrelay-daemon`)이 공유하는
//! 도메인 타입, 에러 분류, 설정, 메트릭 이름을 정의합니다.
//!
//! - [`types`]: [`Message`], [`Severity`], [`Facility`]
//! - [`error`]: 최상위 에러 [`RelayError`]와 하위 분류
//! - [`config`]: `logrelay.toml` 파싱 및 환경변수 오버라이드
//! - [`metrics`]: Prometheus 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, PipelineError, RelayError, RulesetError};

// 설정
pub use config::RelayConfig;

// 도메인 타입
pub use types::{Facility, Message, Severity};
