//! 룰 엔진 -- 정규식 룰셋 모델, 로딩, 매칭, 무중단 교체
//!
//! # 룰 형식
//! ```toml
//! [[rule]]
//! id = "disk-full"
//! regexp = "disk (\\S+) is full"
//! host_match = "^web-"
//!
//! [rule.actions.file]
//! output_filepath = "/var/log/logrelay/disk.log"
//! output_template = "{{.hostname}} {{.original_message}}\n"
//! ```
//!
//! # 아키텍처
//! - [`RulesetHandle`]: 현재 룰셋을 보관하고 원자적으로 교체
//! - [`loader`]: TOML/YAML 파일 로딩 및 유효성 검증
//! - [`matcher`]: 본문/호스트 매칭과 그룹 추출
//! - [`types`]: 룰 데이터 구조 정의

pub mod loader;
pub mod matcher;
pub mod types;

pub use loader::{RuleFormat, RulesetLoader};
pub use matcher::{match_rule, matching_rules};
pub use types::{Rule, RuleDef, Ruleset};

use std::sync::Arc;

use tokio::sync::watch;

use logrelay_core::metrics as m;

/// 현재 룰셋 핸들
///
/// 단일 writer(리로드)와 다수 reader(디스패치 워커)가 공유합니다.
/// reader는 `Arc`만 복제하므로 매칭 중에 잠금을 잡지 않고,
/// 교체 이전에 가져간 룰셋은 마지막 참조가 사라질 때 해제됩니다.
#[derive(Debug, Clone)]
pub struct RulesetHandle {
    tx: Arc<watch::Sender<Option<Arc<Ruleset>>>>,
}

impl RulesetHandle {
    /// 초기 룰셋으로 핸들을 생성합니다.
    pub fn new(initial: Option<Ruleset>) -> Self {
        if let Some(ruleset) = &initial {
            metrics::gauge!(m::RULES_LOADED).set(ruleset.len() as f64);
        }
        let (tx, _rx) = watch::channel(initial.map(Arc::new));
        Self { tx: Arc::new(tx) }
    }

    /// 룰셋이 없는 핸들을 생성합니다.
    pub fn empty() -> Self {
        Self::new(None)
    }

    /// 현재 룰셋을 반환합니다.
    pub fn current(&self) -> Option<Arc<Ruleset>> {
        self.tx.borrow().clone()
    }

    /// 룰셋을 교체하고 이전 룰셋을 반환합니다.
    pub fn replace(&self, ruleset: Ruleset) -> Option<Arc<Ruleset>> {
        metrics::gauge!(m::RULES_LOADED).set(ruleset.len() as f64);
        self.tx.send_replace(Some(Arc::new(ruleset)))
    }

    /// 룰셋 교체 알림을 구독합니다.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Ruleset>>> {
        self.tx.subscribe()
    }
}

impl Default for RulesetHandle {
    fn default() -> Self {
        Self::empty()
    }
}
