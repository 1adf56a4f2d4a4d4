#![no_main]

use libfuzzer_sys::fuzz_target;
use logrelay_router::RulesetLoader;

fuzz_target!(|data: &[u8]| {
    // 로더는 &str을 받으므로 UTF-8 변환 필요
    if let Ok(content) = std::str::from_utf8(data) {
        let _ = RulesetLoader::parse_toml(content, "fuzz-input.toml");
        let _ = RulesetLoader::parse_yaml(content, "fuzz-input.yml");
    }
});
