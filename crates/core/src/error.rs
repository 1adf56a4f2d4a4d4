//! 에러 타입 -- 도메인별 에러 정의
//!
//! 시작 시점 에러(설정, 룰셋, 바인드)는 [`RelayError`]로 모여 프로세스 진입점까지
//! 전파됩니다. 연결/메시지/액션 단위 에러는 발생한 태스크에서 로그로 처리되며
//! 이 타입까지 올라오지 않습니다.

/// logrelay 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 룰셋 로딩/검증 에러
    #[error("ruleset error: {0}")]
    Ruleset(#[from] RulesetError),

    /// 파이프라인(리스너, 서버) 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 룰셋 에러
#[derive(Debug, thiserror::Error)]
pub enum RulesetError {
    /// 룰셋 파일 로딩 실패
    #[error("failed to load ruleset {path}: {reason}")]
    Load { path: String, reason: String },

    /// 룰 검증 실패
    #[error("invalid rule '{rule_id}': {reason}")]
    Invalid { rule_id: String, reason: String },
}

/// 파이프라인 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 리스너 초기화 실패
    #[error("listener init failed: {0}")]
    Listener(String),

    /// 서버 초기화 실패
    #[error("server init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("server already running")]
    AlreadyRunning,
}
