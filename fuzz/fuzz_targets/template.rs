#![no_main]

use libfuzzer_sys::fuzz_target;
use logrelay_core::Message;
use logrelay_router::template;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };

    // 컴파일과 실행 모두 패닉 없이 끝나야 한다
    let message = Message::new("web-1", "disk is full");
    let groups = vec!["disk is full".to_owned(), "full".to_owned()];
    let _ = template::render(&message, &groups, source);
});
