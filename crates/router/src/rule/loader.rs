//! 룰셋 파일 로더 -- TOML 또는 YAML 룰셋을 디스크에서 로드합니다.
//!
//! 파일 확장자가 `.yml`/`.yaml`이면 YAML, 그 외에는 TOML로 해석합니다.
//! 하나의 룰이라도 잘못되면 전체 로드가 실패하며 부분 적용은 없습니다.

use std::path::Path;

use super::types::{Rule, RuleDef, Ruleset, RulesetFile};
use crate::error::RouterError;

/// 룰셋 파일 최대 크기
const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
/// 룰셋 하나의 최대 룰 수
const MAX_RULES_COUNT: usize = 10_000;

/// 룰셋 파일 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    /// `[[rule]]` 테이블 배열
    Toml,
    /// `rule:` 시퀀스
    Yaml,
}

impl RuleFormat {
    /// 파일 확장자로 형식을 결정합니다.
    pub fn from_path(path: &Path) -> Self {
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        if is_yaml { Self::Yaml } else { Self::Toml }
    }
}

/// 룰셋 로더
pub struct RulesetLoader;

impl RulesetLoader {
    /// 파일에서 룰셋을 로드합니다.
    ///
    /// # Errors
    /// - 파일을 읽을 수 없거나 크기 제한을 초과하는 경우
    /// - 역직렬화 실패 (알 수 없는 키 포함)
    /// - 룰 검증 실패, 대소문자 무시 중복 ID
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Ruleset, RouterError> {
        let path = path.as_ref();
        let source = path.display().to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| RouterError::RuleLoad {
                path: source.clone(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(RouterError::RuleLoad {
                path: source,
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RouterError::RuleLoad {
                path: source.clone(),
                reason: format!("failed to read file: {e}"),
            })?;

        let ruleset = Self::parse(&content, RuleFormat::from_path(path), &source)?;

        tracing::info!(
            path = %source,
            count = ruleset.len(),
            "loaded ruleset"
        );

        Ok(ruleset)
    }

    /// 문자열을 주어진 형식으로 파싱하여 룰셋을 만듭니다.
    pub fn parse(content: &str, format: RuleFormat, source: &str) -> Result<Ruleset, RouterError> {
        let file: RulesetFile = match format {
            RuleFormat::Toml => toml::from_str(content).map_err(|e| RouterError::RuleLoad {
                path: source.to_owned(),
                reason: format!("TOML parse error: {e}"),
            })?,
            RuleFormat::Yaml => {
                // 빈 YAML 문서는 빈 룰셋
                if content.trim().is_empty() {
                    RulesetFile::default()
                } else {
                    serde_yaml::from_str(content).map_err(|e| RouterError::RuleLoad {
                        path: source.to_owned(),
                        reason: format!("YAML parse error: {e}"),
                    })?
                }
            }
        };

        Self::build(file.rule, source)
    }

    /// TOML 문자열을 파싱합니다.
    pub fn parse_toml(content: &str, source: &str) -> Result<Ruleset, RouterError> {
        Self::parse(content, RuleFormat::Toml, source)
    }

    /// YAML 문자열을 파싱합니다.
    pub fn parse_yaml(content: &str, source: &str) -> Result<Ruleset, RouterError> {
        Self::parse(content, RuleFormat::Yaml, source)
    }

    fn build(defs: Vec<RuleDef>, source: &str) -> Result<Ruleset, RouterError> {
        if defs.len() > MAX_RULES_COUNT {
            return Err(RouterError::RuleLoad {
                path: source.to_owned(),
                reason: format!("too many rules: {} (max {MAX_RULES_COUNT})", defs.len()),
            });
        }

        let rules = defs
            .into_iter()
            .map(RuleDef::compile)
            .collect::<Result<Vec<Rule>, _>>()?;

        Ruleset::new(rules)
    }
}
