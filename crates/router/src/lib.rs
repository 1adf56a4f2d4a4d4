//! logrelay 라우터 -- syslog 수신, 룰 매칭, 액션 디스패치
//!
//! # 모듈 구성
//!
//! - [`listener`]: UNIX/TCP/TLS 리스너 팩토리
//! - [`connection`]: 연결별 읽기 루프 (파싱 제한 시간, 에러 분류)
//! - [`parser`]: RFC 5424 / RFC 3164 파서와 프레임 리더
//! - [`rule`]: 정규식 룰셋 모델, TOML/YAML 로더, 무중단 교체 핸들
//! - [`dispatch`]: 룰 매처/디스패처와 고정 크기 워커 풀
//! - [`action`]: 액션 플러그인 계약, 레지스트리, 파일 액션
//! - [`template`]: 액션 출력 템플릿 컴파일러
//! - [`server`]: accept 루프, 리로드, 종료 드레인
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Listener -> Server accept loop -> Connection (parse, deadline)
//!                                        |
//!                                 bounded queue
//!                                        |
//!                              WorkerPool -> Dispatcher -> Action::process -> Template
//!                                               |
//!                                        RulesetHandle (hot swap)
//! ```

pub mod action;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod parser;
pub mod rule;
pub mod server;
pub mod settings;
pub mod template;

// --- 주요 타입 re-export ---

// 서버
pub use server::Server;

// 에러
pub use error::RouterError;

// 액션
pub use action::{Action, ActionError, ActionRegistry, DynAction, FileAction};

// 룰
pub use rule::{Rule, Ruleset, RulesetHandle, RulesetLoader};

// 디스패치
pub use dispatch::{DispatchQueue, DispatchSummary, Dispatcher, Submitted, WorkerPool};

// 리스너
pub use listener::{Listener, ListenerSpec};

// 파서
pub use parser::{ParseError, SyslogParser, parse_reader, parser_for};

// 템플릿
pub use template::{Template, TemplateError};

// 런타임 설정
pub use settings::RuntimeSettings;
