//! 룰 매칭 로직
//!
//! 본문 정규식이 먼저 매칭되어야 하고, 호스트 정규식이 있으면 호스트명도 매칭되어야 합니다.
//! 모든 룰을 평가하며 첫 매칭에서 멈추지 않습니다.

use logrelay_core::types::Message;

use super::types::{Rule, Ruleset};

/// 룰 하나를 메시지에 적용하여 매치 그룹을 반환합니다.
///
/// `groups[0]`은 전체 매치, 이후는 캡처 그룹이며
/// 참여하지 않은 그룹은 빈 문자열입니다.
pub fn match_rule(rule: &Rule, message: &Message) -> Option<Vec<String>> {
    let captures = rule.regexp.captures(&message.body)?;

    if let Some(host) = &rule.host_match {
        if !host.is_match(&message.hostname) {
            return None;
        }
    }

    Some(
        captures
            .iter()
            .map(|group| group.map_or_else(String::new, |m| m.as_str().to_owned()))
            .collect(),
    )
}

/// 룰셋의 룰을 순서대로 평가하여 매칭된 룰과 그룹을 반환합니다.
pub fn matching_rules<'a>(
    ruleset: &'a Ruleset,
    message: &'a Message,
) -> impl Iterator<Item = (&'a Rule, Vec<String>)> + 'a {
    ruleset
        .rules()
        .iter()
        .filter_map(move |rule| match_rule(rule, message).map(|groups| (rule, groups)))
}
