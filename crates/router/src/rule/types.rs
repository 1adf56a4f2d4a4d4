//! 룰 데이터 타입
//!
//! [`RuleDef`]는 룰셋 파일에서 역직렬화되는 원시 형태이고,
//! [`Rule`]은 정규식이 컴파일된 실행 형태입니다.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde::Deserialize;

use crate::error::RouterError;

/// 룰 ID 최대 길이
const MAX_RULE_ID_LEN: usize = 256;

/// 룰셋 파일 최상위 구조
///
/// TOML에서는 `[[rule]]` 테이블 배열, YAML에서는 `rule:` 시퀀스입니다.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesetFile {
    /// 룰 정의 목록 (파일 순서 유지)
    #[serde(default)]
    pub rule: Vec<RuleDef>,
}

/// 역직렬화된 룰 정의
///
/// # TOML 스키마
/// ```toml
/// [[rule]]
/// id = "disk-full"
/// regexp = "disk (\\S+) is full"
/// host_match = "^web-"
///
/// [rule.actions.file]
/// output_filepath = "/var/log/logrelay/disk.log"
/// output_template = "{{.hostname}} {{index .match 1}}\n"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    /// 룰 ID (룰셋 안에서 대소문자 무시 유일)
    pub id: String,
    /// 본문 매칭 정규식
    pub regexp: String,
    /// 호스트명 매칭 정규식 (빈 문자열은 미지정과 같음)
    #[serde(default)]
    pub host_match: Option<String>,
    /// 액션 이름 → 액션별 설정
    #[serde(default)]
    pub actions: BTreeMap<String, serde_json::Value>,
}

impl RuleDef {
    /// 정규식을 컴파일하여 실행 가능한 룰을 만듭니다.
    pub fn compile(self) -> Result<Rule, RouterError> {
        Rule::new(self.id, &self.regexp, self.host_match.as_deref(), self.actions)
    }
}

/// 컴파일된 룰
#[derive(Debug, Clone)]
pub struct Rule {
    /// 룰 ID
    pub id: String,
    /// 본문 매칭 정규식
    pub regexp: Regex,
    /// 호스트명 매칭 정규식
    pub host_match: Option<Regex>,
    /// 액션 이름 → 액션별 설정
    pub actions: BTreeMap<String, serde_json::Value>,
}

impl Rule {
    /// 룰을 생성하고 유효성을 검증합니다.
    ///
    /// # Errors
    /// - 빈 ID, 너무 긴 ID
    /// - 빈 본문 패턴
    /// - 컴파일할 수 없는 정규식
    pub fn new(
        id: impl Into<String>,
        regexp: &str,
        host_match: Option<&str>,
        actions: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, RouterError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RouterError::RuleValidation {
                rule_id: "(empty)".to_owned(),
                reason: "rule id must not be empty".to_owned(),
            });
        }
        if id.len() > MAX_RULE_ID_LEN {
            return Err(RouterError::RuleValidation {
                rule_id: id,
                reason: format!("rule id must not exceed {MAX_RULE_ID_LEN} characters"),
            });
        }
        if regexp.is_empty() {
            return Err(RouterError::RuleValidation {
                rule_id: id,
                reason: "regexp must not be empty".to_owned(),
            });
        }

        let compiled = Regex::new(regexp).map_err(|e| RouterError::RuleValidation {
            rule_id: id.clone(),
            reason: format!("invalid regexp: {e}"),
        })?;

        let host_match = match host_match.filter(|p| !p.is_empty()) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                RouterError::RuleValidation {
                    rule_id: id.clone(),
                    reason: format!("invalid host_match: {e}"),
                }
            })?),
            None => None,
        };

        Ok(Self {
            id,
            regexp: compiled,
            host_match,
            actions,
        })
    }

    /// 이 룰에 설정된 액션 설정을 조회합니다.
    pub fn action_config(&self, action: &str) -> Option<&serde_json::Value> {
        self.actions.get(action)
    }
}

/// 룰셋 -- 파일 순서대로 평가되는 룰 목록
#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    rules: Vec<Rule>,
}

impl Ruleset {
    /// 룰 목록으로 룰셋을 만듭니다.
    ///
    /// 대소문자를 무시한 중복 ID가 있으면 전체를 거부합니다.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RouterError> {
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in &rules {
            if !seen.insert(rule.id.to_lowercase()) {
                return Err(RouterError::RuleValidation {
                    rule_id: rule.id.clone(),
                    reason: "duplicate rule id".to_owned(),
                });
            }
        }
        Ok(Self { rules })
    }

    /// 룰 목록
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// 룰 수
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// ID로 룰을 조회합니다 (대소문자 무시).
    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id.eq_ignore_ascii_case(id))
    }
}
