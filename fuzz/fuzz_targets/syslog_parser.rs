#![no_main]

use libfuzzer_sys::fuzz_target;
use logrelay_router::SyslogParser;
use logrelay_router::parser::{Rfc3164Parser, Rfc5424Parser};

fuzz_target!(|data: &[u8]| {
    // 크래시나 패닉 없이 Ok 또는 Err을 반환해야 한다
    let _ = Rfc5424Parser::new().parse(data);
    let _ = Rfc3164Parser::new().parse(data);
});
