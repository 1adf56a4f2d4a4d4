//! 재시작 없이 바꿀 수 있는 런타임 설정

use std::time::Duration;

use logrelay_core::config::RelayConfig;

/// 리로드 시 즉시 반영되는 설정
///
/// 서버가 `watch` 채널로 배포하며 연결 핸들러는 매 읽기 반복마다,
/// 디스패처는 매 메시지마다 최신 값을 읽습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// 프레임 하나를 읽고 파싱하는 제한 시간
    pub parse_timeout: Duration,
    /// 전송 에러와 액션 소요 시간 로그 출력 여부
    pub extended: bool,
}

impl RuntimeSettings {
    /// 설정 파일 값에서 런타임 설정을 만듭니다.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            parse_timeout: config.parser.timeout(),
            extended: config.log.extended,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}
