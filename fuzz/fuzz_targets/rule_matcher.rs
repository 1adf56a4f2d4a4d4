#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use logrelay_core::Message;
use logrelay_router::Rule;
use logrelay_router::rule::match_rule;

#[derive(Debug, Arbitrary)]
struct Input {
    regexp: String,
    host_match: Option<String>,
    hostname: String,
    body: String,
}

fuzz_target!(|input: Input| {
    let Ok(rule) = Rule::new(
        "fuzz",
        &input.regexp,
        input.host_match.as_deref(),
        BTreeMap::new(),
    ) else {
        return;
    };

    let message = Message::new(input.hostname, input.body);
    if let Some(groups) = match_rule(&rule, &message) {
        // 그룹 0은 항상 전체 매치
        assert!(!groups.is_empty());
        assert_eq!(groups.len(), rule.regexp.captures_len());
    }
});
