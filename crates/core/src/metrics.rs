//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logrelay_`
//! - 영역: `listener_`, `parser_`, `rules_`, `dispatch_`, `action_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logrelay_core::metrics::PARSER_MESSAGES_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 리스너 종류 레이블 키 (unix, tcp, tls)
pub const LABEL_LISTENER: &str = "listener";

/// 파서 형식 레이블 키 (rfc3164, rfc5424)
pub const LABEL_PARSER_FORMAT: &str = "format";

/// 액션 이름 레이블 키
pub const LABEL_ACTION: &str = "action";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Listener 메트릭 ────────────────────────────────────────────────

/// 수락된 연결 수 (counter, label: listener)
pub const LISTENER_CONNECTIONS_ACCEPTED_TOTAL: &str =
    "logrelay_listener_connections_accepted_total";

/// 현재 열린 연결 수 (gauge)
pub const LISTENER_CONNECTIONS_ACTIVE: &str = "logrelay_listener_connections_active";

/// accept 또는 TLS 핸드셰이크 실패 수 (counter, label: listener)
pub const LISTENER_ACCEPT_ERRORS_TOTAL: &str = "logrelay_listener_accept_errors_total";

// ─── Parser 메트릭 ──────────────────────────────────────────────────

/// 파싱에 성공한 메시지 수 (counter, label: format)
pub const PARSER_MESSAGES_TOTAL: &str = "logrelay_parser_messages_total";

/// 파싱 실패 수 (counter, label: format)
pub const PARSER_ERRORS_TOTAL: &str = "logrelay_parser_errors_total";

/// 읽기 제한 시간 초과로 닫힌 연결 수 (counter)
pub const PARSER_TIMEOUTS_TOTAL: &str = "logrelay_parser_timeouts_total";

// ─── Rules 메트릭 ───────────────────────────────────────────────────

/// 룰 매칭 수 (counter)
pub const RULES_MATCHES_TOTAL: &str = "logrelay_rules_matches_total";

/// 현재 로드된 룰 수 (gauge)
pub const RULES_LOADED: &str = "logrelay_rules_loaded";

/// 룰셋 리로드 시도 수 (counter, label: result)
pub const RULES_RELOADS_TOTAL: &str = "logrelay_rules_reloads_total";

// ─── Dispatch 메트릭 ────────────────────────────────────────────────

/// 큐 포화로 버려진 메시지 수 (counter)
pub const DISPATCH_DROPPED_TOTAL: &str = "logrelay_dispatch_dropped_total";

/// 디스패치 중 패닉이 발생한 작업 수 (counter)
pub const DISPATCH_PANICS_TOTAL: &str = "logrelay_dispatch_panics_total";

/// 디스패치 큐 대기 수 (gauge)
pub const DISPATCH_QUEUE_DEPTH: &str = "logrelay_dispatch_queue_depth";

// ─── Action 메트릭 ──────────────────────────────────────────────────

/// 액션 호출 수 (counter, label: action, result)
pub const ACTION_INVOCATIONS_TOTAL: &str = "logrelay_action_invocations_total";

/// 액션 처리 시간 (histogram, 초, label: action)
pub const ACTION_DURATION_SECONDS: &str = "logrelay_action_duration_seconds";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// 데몬 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logrelay_daemon_uptime_seconds";

/// 등록된 액션 플러그인 수 (gauge)
pub const DAEMON_ACTIONS_REGISTERED: &str = "logrelay_daemon_actions_registered";

/// 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logrelay_daemon_build_info";

// ─── 히스토그램 버킷 ────────────────────────────────────────────────

/// 액션 처리 시간 히스토그램 버킷 (초)
///
/// 100us ~ 5s 범위 (파일 쓰기는 fsync 포함)
pub const ACTION_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Listener
    describe_counter!(
        LISTENER_CONNECTIONS_ACCEPTED_TOTAL,
        "Total number of accepted client connections"
    );
    describe_gauge!(
        LISTENER_CONNECTIONS_ACTIVE,
        "Number of client connections currently open"
    );
    describe_counter!(
        LISTENER_ACCEPT_ERRORS_TOTAL,
        "Total number of failed accepts and TLS handshakes"
    );

    // Parser
    describe_counter!(
        PARSER_MESSAGES_TOTAL,
        "Total number of syslog frames parsed successfully"
    );
    describe_counter!(PARSER_ERRORS_TOTAL, "Total number of malformed syslog frames");
    describe_counter!(
        PARSER_TIMEOUTS_TOTAL,
        "Total number of connections closed by the read deadline"
    );

    // Rules
    describe_counter!(RULES_MATCHES_TOTAL, "Total number of rule matches");
    describe_gauge!(RULES_LOADED, "Number of rules in the active ruleset");
    describe_counter!(RULES_RELOADS_TOTAL, "Total number of ruleset reload attempts");

    // Dispatch
    describe_counter!(
        DISPATCH_DROPPED_TOTAL,
        "Total number of messages dropped because the dispatch queue was full"
    );
    describe_counter!(
        DISPATCH_PANICS_TOTAL,
        "Total number of dispatch jobs that panicked"
    );
    describe_gauge!(
        DISPATCH_QUEUE_DEPTH,
        "Number of messages waiting in the dispatch queue"
    );

    // Action
    describe_counter!(
        ACTION_INVOCATIONS_TOTAL,
        "Total number of action invocations by action and result"
    );
    describe_histogram!(
        ACTION_DURATION_SECONDS,
        "Time spent in a single action invocation in seconds"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "logrelay daemon uptime in seconds");
    describe_gauge!(
        DAEMON_ACTIONS_REGISTERED,
        "Number of action plugins registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
