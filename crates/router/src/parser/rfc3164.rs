//! BSD syslog (RFC 3164) 파서
//!
//! 형식: `<PRI>MMM DD HH:MM:SS HOSTNAME TAG[PID]: MSG`
//!
//! RFC 3164는 구조가 덜 엄격하므로 최선 노력으로 파싱합니다. 타임스탬프를
//! 해석할 수 없으면 PRI 이후 전체를 본문으로 취급합니다.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use logrelay_core::types::Message;

use super::{ParseError, SyslogParser, parse_pri};

const FORMAT: &str = "rfc3164";

/// TAG 최대 길이 (RFC 3164 Section 4.1.3)
const MAX_TAG_LEN: usize = 32;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// BSD syslog (RFC 3164) 파서
#[derive(Debug, Default, Clone, Copy)]
pub struct Rfc3164Parser;

impl Rfc3164Parser {
    /// 새 파서를 생성합니다.
    pub fn new() -> Self {
        Self
    }

    fn parse_frame(&self, frame: &[u8]) -> Result<Message, ParseError> {
        let input = String::from_utf8_lossy(frame);
        let input = input.trim_end();

        if input.trim().is_empty() {
            return Err(ParseError::malformed(FORMAT, 0, "empty input"));
        }

        let (facility, severity, offset) = parse_pri(input, FORMAT)?;
        let remainder = &input[offset..];

        let now = Utc::now();
        let Some((timestamp, rest)) = parse_bsd_timestamp(remainder, now) else {
            // 타임스탬프 파싱 실패, 전체를 메시지로
            return Ok(Message {
                hostname: String::new(),
                timestamp: now,
                severity,
                facility,
                app_name: String::new(),
                proc_id: String::new(),
                msg_id: String::new(),
                structured_data: Vec::new(),
                body: remainder.to_owned(),
            });
        };

        let (hostname, tag_and_msg) = match rest.split_once(' ') {
            Some((host, tail)) => (host, tail),
            None => (rest, ""),
        };
        let (app_name, proc_id, body) = split_tag(tag_and_msg);

        Ok(Message {
            hostname: hostname.to_owned(),
            timestamp,
            severity,
            facility,
            app_name: app_name.to_owned(),
            proc_id: proc_id.to_owned(),
            msg_id: String::new(),
            structured_data: Vec::new(),
            body: body.to_owned(),
        })
    }
}

impl SyslogParser for Rfc3164Parser {
    fn format_name(&self) -> &'static str {
        FORMAT
    }

    fn parse(&self, frame: &[u8]) -> Result<Message, ParseError> {
        self.parse_frame(frame)
    }
}

/// `MMM DD HH:MM:SS ` 타임스탬프를 파싱하고 나머지 문자열을 반환합니다.
///
/// 연도 정보가 없으므로 현재 연도를 가정하며, 결과가 하루 이상 미래이면
/// 작년 메시지로 간주합니다 (연말 경계).
fn parse_bsd_timestamp(input: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, &str)> {
    let month_str = input.get(..3)?;
    let month = MONTHS.iter().position(|m| *m == month_str)?;
    let month = u32::try_from(month).ok()? + 1;

    // 일자는 공백 패딩될 수 있음 (`Jan  5`)
    let rest = input.get(3..)?.strip_prefix(' ')?.trim_start_matches(' ');
    let (day_str, rest) = rest.split_once(' ')?;
    let day: u32 = day_str.parse().ok()?;

    let time_str = rest.get(..8)?;
    let time = NaiveTime::parse_from_str(time_str, "%H:%M:%S").ok()?;
    let rest = rest.get(8..)?.trim_start_matches(' ');

    let at_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|date| NaiveDateTime::new(date, time).and_utc())
    };

    let mut timestamp = at_year(now.year())?;
    if timestamp > now + Duration::days(1) {
        timestamp = at_year(now.year() - 1)?;
    }
    Some((timestamp, rest))
}

/// `TAG[PID]: MSG`를 분리합니다. TAG가 없으면 전체를 본문으로 반환합니다.
fn split_tag(input: &str) -> (&str, &str, &str) {
    let Some(colon) = input.find(':') else {
        return ("", "", input);
    };
    let tag_part = &input[..colon];
    if tag_part.is_empty() || tag_part.contains(' ') {
        return ("", "", input);
    }

    let body = input[colon + 1..].strip_prefix(' ').unwrap_or(&input[colon + 1..]);

    let (tag, pid) = match tag_part.split_once('[') {
        Some((tag, pid)) => (tag, pid.strip_suffix(']').unwrap_or(pid)),
        None => (tag_part, ""),
    };
    if tag.is_empty() || tag.len() > MAX_TAG_LEN {
        return ("", "", input);
    }
    (tag, pid, body)
}
