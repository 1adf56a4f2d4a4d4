//! 도메인 타입 -- 파싱된 syslog 메시지와 분류 enum
//!
//! [`Message`]는 파서가 한 프레임을 성공적으로 해석할 때마다 한 번 생성되며,
//! 이후에는 변경되지 않고 디스패처와 모든 액션 호출에서 읽기 전용으로 공유됩니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// syslog 심각도 (RFC 5424 Section 6.2.1)
///
/// 숫자가 작을수록 심각합니다. `Emergency` = 0, `Debug` = 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 시스템 사용 불가
    Emergency = 0,
    /// 즉시 조치 필요
    Alert = 1,
    /// 치명적 상태
    Critical = 2,
    /// 에러
    Error = 3,
    /// 경고
    Warning = 4,
    /// 정상이지만 주목할 상태
    Notice = 5,
    /// 정보
    Informational = 6,
    /// 디버그
    Debug = 7,
}

impl Severity {
    /// 숫자 코드(0-7)에서 심각도를 생성합니다.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Informational,
            7 => Self::Debug,
            _ => return None,
        })
    }

    /// 숫자 코드를 반환합니다.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// syslog 관례 키워드 (`emerg`, `err`, `info` 등)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emergency => "emerg",
            Self::Alert => "alert",
            Self::Critical => "crit",
            Self::Error => "err",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Informational => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// syslog facility (RFC 5424 Section 6.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facility {
    Kern = 0,
    User = 1,
    Mail = 2,
    Daemon = 3,
    Auth = 4,
    Syslog = 5,
    Lpr = 6,
    News = 7,
    Uucp = 8,
    Cron = 9,
    AuthPriv = 10,
    Ftp = 11,
    Ntp = 12,
    Security = 13,
    Console = 14,
    SolarisCron = 15,
    Local0 = 16,
    Local1 = 17,
    Local2 = 18,
    Local3 = 19,
    Local4 = 20,
    Local5 = 21,
    Local6 = 22,
    Local7 = 23,
}

impl Facility {
    const ALL: [Facility; 24] = [
        Self::Kern,
        Self::User,
        Self::Mail,
        Self::Daemon,
        Self::Auth,
        Self::Syslog,
        Self::Lpr,
        Self::News,
        Self::Uucp,
        Self::Cron,
        Self::AuthPriv,
        Self::Ftp,
        Self::Ntp,
        Self::Security,
        Self::Console,
        Self::SolarisCron,
        Self::Local0,
        Self::Local1,
        Self::Local2,
        Self::Local3,
        Self::Local4,
        Self::Local5,
        Self::Local6,
        Self::Local7,
    ];

    /// 숫자 코드(0-23)에서 facility를 생성합니다.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// 숫자 코드를 반환합니다.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// syslog 관례 키워드
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kern => "kern",
            Self::User => "user",
            Self::Mail => "mail",
            Self::Daemon => "daemon",
            Self::Auth => "auth",
            Self::Syslog => "syslog",
            Self::Lpr => "lpr",
            Self::News => "news",
            Self::Uucp => "uucp",
            Self::Cron => "cron",
            Self::AuthPriv => "authpriv",
            Self::Ftp => "ftp",
            Self::Ntp => "ntp",
            Self::Security => "security",
            Self::Console => "console",
            Self::SolarisCron => "solaris-cron",
            Self::Local0 => "local0",
            Self::Local1 => "local1",
            Self::Local2 => "local2",
            Self::Local3 => "local3",
            Self::Local4 => "local4",
            Self::Local5 => "local5",
            Self::Local6 => "local6",
            Self::Local7 => "local7",
        }
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 파싱된 syslog 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 송신 호스트명 (없으면 빈 문자열)
    pub hostname: String,
    /// 메시지 타임스탬프
    pub timestamp: DateTime<Utc>,
    /// 심각도
    pub severity: Severity,
    /// facility
    pub facility: Facility,
    /// 애플리케이션 이름 (RFC 5424 APP-NAME, RFC 3164 TAG)
    pub app_name: String,
    /// 프로세스 ID (없으면 빈 문자열)
    #[serde(default)]
    pub proc_id: String,
    /// RFC 5424 MSGID (없으면 빈 문자열)
    #[serde(default)]
    pub msg_id: String,
    /// RFC 5424 structured data 파라미터 (`sd_{id}_{param}`, 값)
    #[serde(default)]
    pub structured_data: Vec<(String, String)>,
    /// 메시지 본문
    pub body: String,
}

impl Message {
    /// 본문과 호스트명만 지정한 메시지를 생성합니다.
    ///
    /// 나머지 필드는 `user.notice`, 현재 시각으로 채워집니다.
    pub fn new(hostname: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            timestamp: Utc::now(),
            severity: Severity::Notice,
            facility: Facility::User,
            app_name: String::new(),
            proc_id: String::new(),
            msg_id: String::new(),
            structured_data: Vec::new(),
            body: body.into(),
        }
    }

    /// 애플리케이션 이름을 설정합니다.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// 심각도와 facility를 설정합니다.
    pub fn with_priority(mut self, facility: Facility, severity: Severity) -> Self {
        self.facility = facility;
        self.severity = severity;
        self
    }

    /// 타임스탬프를 설정합니다.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}.{}] {} {}: {}",
            self.facility, self.severity, self.hostname, self.app_name, self.body,
        )
    }
}
