//! 라우터 에러 타입
//!
//! [`RouterError`]는 서버 시작과 룰셋 리로드 과정에서 발생하는 에러를 표현합니다.
//! `From<RouterError> for RelayError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 프레임 단위 파싱 에러는 [`ParseError`](crate::parser::ParseError),
//! 액션 호출 에러는 [`ActionError`](crate::action::ActionError),
//! 템플릿 에러는 [`TemplateError`](crate::template::TemplateError)로 분리되어
//! 발생한 태스크 안에서 로그로 처리됩니다.

use logrelay_core::error::{ConfigError, PipelineError, RelayError, RulesetError};

/// 라우터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// 알 수 없는 리스너 타입
    #[error("unknown listener type: '{0}' (expected unix, tcp or tls)")]
    UnknownListenerType(String),

    /// TLS 리스너에 인증서 또는 키 경로가 없음
    #[error("tls listener requires both cert_path and key_path")]
    MissingCertConfig,

    /// 다른 프로세스가 이미 UNIX 소켓에서 수신 중
    #[error("unix socket {path} is already in use")]
    UnixInUse {
        /// 소켓 경로
        path: String,
    },

    /// 소켓 경로에 소켓이 아닌 파일이 존재
    #[error("{path} exists and is not a socket")]
    NotASocket {
        /// 소켓 경로
        path: String,
    },

    /// 바인드 실패
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// 바인드 대상 주소 또는 경로
        addr: String,
        /// 원인
        source: std::io::Error,
    },

    /// 인증서/키 로딩 실패
    #[error("failed to load tls identity: {0}")]
    TlsIdentity(String),

    /// 알 수 없는 파서 타입
    #[error("unknown parser type: '{0}' (expected rfc3164 or rfc5424)")]
    UnknownParserType(String),

    /// 룰셋 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 룰셋 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 룰 유효성 검증 실패
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation {
        /// 문제가 된 룰 ID
        rule_id: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 등록된 액션 플러그인이 없음
    #[error("no action plugins registered")]
    NoActions,

    /// 액션 등록 실패 (빈 이름, 중복 이름)
    #[error("invalid action registration: {0}")]
    InvalidAction(String),

    /// 서버가 이미 실행 중
    #[error("server already running")]
    AlreadyRunning,

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RouterError> for RelayError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::RuleLoad { path, reason } => {
                RelayError::Ruleset(RulesetError::Load { path, reason })
            }
            RouterError::RuleValidation { rule_id, reason } => {
                RelayError::Ruleset(RulesetError::Invalid { rule_id, reason })
            }
            RouterError::UnknownListenerType(kind) => RelayError::Config(ConfigError::InvalidValue {
                field: "listener.type".to_owned(),
                reason: format!("unknown listener type '{kind}'"),
            }),
            RouterError::UnknownParserType(kind) => RelayError::Config(ConfigError::InvalidValue {
                field: "parser.type".to_owned(),
                reason: format!("unknown parser type '{kind}'"),
            }),
            RouterError::MissingCertConfig => RelayError::Config(ConfigError::InvalidValue {
                field: "listener.tls".to_owned(),
                reason: "cert_path and key_path are required".to_owned(),
            }),
            RouterError::NoActions | RouterError::InvalidAction(_) => {
                RelayError::Pipeline(PipelineError::InitFailed(err.to_string()))
            }
            RouterError::AlreadyRunning => RelayError::Pipeline(PipelineError::AlreadyRunning),
            RouterError::Io(e) => RelayError::Io(e),
            other => RelayError::Pipeline(PipelineError::Listener(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_validation_error_display() {
        let err = RouterError::RuleValidation {
            rule_id: "disk-full".to_owned(),
            reason: "duplicate rule id".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("disk-full"));
        assert!(msg.contains("duplicate"));
    }

    #[test]
    fn rule_errors_convert_to_ruleset_errors() {
        let err: RelayError = RouterError::RuleLoad {
            path: "/etc/logrelay/rules.toml".to_owned(),
            reason: "invalid TOML".to_owned(),
        }
        .into();
        assert!(matches!(err, RelayError::Ruleset(RulesetError::Load { .. })));
    }

    #[test]
    fn listener_type_converts_to_config_error() {
        let err: RelayError = RouterError::UnknownListenerType("udp".to_owned()).into();
        assert!(matches!(
            err,
            RelayError::Config(ConfigError::InvalidValue { .. })
        ));
        assert!(err.to_string().contains("udp"));
    }

    #[test]
    fn bind_error_converts_to_pipeline_error() {
        let err: RelayError = RouterError::Bind {
            addr: "0.0.0.0:9099".to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        }
        .into();
        assert!(matches!(err, RelayError::Pipeline(PipelineError::Listener(_))));
    }
}
