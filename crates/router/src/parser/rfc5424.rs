//! Syslog RFC 5424 파서
//!
//! [RFC 5424](https://tools.ietf.org/html/rfc5424) 형식의 syslog 메시지를 파싱합니다.
//!
//! # RFC 5424 메시지 형식
//! ```text
//! <PRI>VERSION TIMESTAMP HOSTNAME APP-NAME PROCID MSGID STRUCTURED-DATA MSG
//! ```

use chrono::{DateTime, Utc};
use logrelay_core::types::Message;

use super::{ParseError, SyslogParser, parse_pri};

const FORMAT: &str = "rfc5424";

/// UTF-8 BOM (RFC 5424 MSG-UTF8)
const BOM: char = '\u{feff}';

/// Syslog RFC 5424 파서
///
/// ## 지원 기능
/// - PRI 필드에서 facility/severity 디코딩
/// - RFC 3339 타임스탬프 파싱
/// - Structured Data (SD) 추출
/// - NILVALUE (`-`) 처리
#[derive(Debug, Default, Clone, Copy)]
pub struct Rfc5424Parser;

impl Rfc5424Parser {
    /// 새 파서를 생성합니다.
    pub fn new() -> Self {
        Self
    }

    fn parse_frame(&self, frame: &[u8]) -> Result<Message, ParseError> {
        let input = String::from_utf8_lossy(frame);
        let input = input.trim();

        if input.is_empty() {
            return Err(ParseError::malformed(FORMAT, 0, "empty input"));
        }

        let (facility, severity, offset) = parse_pri(input, FORMAT)?;

        let body = input[offset..].strip_prefix("1 ").ok_or_else(|| {
            ParseError::malformed(FORMAT, offset, "unsupported or missing VERSION (expected 1)")
        })?;

        // TIMESTAMP HOSTNAME APP-NAME PROCID MSGID SD+MSG
        let parts: Vec<&str> = body.splitn(6, ' ').collect();
        if parts.len() < 6 {
            return Err(ParseError::malformed(
                FORMAT,
                offset + 2,
                format!(
                    "RFC 5424 requires at least 6 fields after version, got {}",
                    parts.len()
                ),
            ));
        }

        let timestamp = match nilvalue_to_empty(parts[0]) {
            "" => Utc::now(),
            ts => parse_rfc3339(ts)?,
        };

        let (body, structured_data) = split_sd_and_message(parts[5])?;

        Ok(Message {
            hostname: nilvalue_to_empty(parts[1]).to_owned(),
            timestamp,
            severity,
            facility,
            app_name: nilvalue_to_empty(parts[2]).to_owned(),
            proc_id: nilvalue_to_empty(parts[3]).to_owned(),
            msg_id: nilvalue_to_empty(parts[4]).to_owned(),
            structured_data,
            body: body.trim_start_matches(BOM).to_owned(),
        })
    }
}

impl SyslogParser for Rfc5424Parser {
    fn format_name(&self) -> &'static str {
        FORMAT
    }

    fn parse(&self, frame: &[u8]) -> Result<Message, ParseError> {
        self.parse_frame(frame)
    }
}

/// NILVALUE (`-`)를 빈 문자열로 변환합니다.
fn nilvalue_to_empty(value: &str) -> &str {
    if value == "-" { "" } else { value }
}

/// RFC 3339 타임스탬프를 파싱합니다.
///
/// 예: `2024-01-15T12:00:00Z` 또는 `2024-01-15T12:00:00.123+09:00`
fn parse_rfc3339(timestamp: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ParseError::malformed(
                FORMAT,
                0,
                format!("invalid RFC 3339 timestamp '{timestamp}': {e}"),
            )
        })
}

/// STRUCTURED-DATA 필드와 MSG를 분리하고 SD 파라미터를 추출합니다.
fn split_sd_and_message(input: &str) -> Result<(&str, Vec<(String, String)>), ParseError> {
    if input == "-" {
        return Ok(("", Vec::new()));
    }
    if let Some(msg) = input.strip_prefix("- ") {
        return Ok((msg, Vec::new()));
    }
    if !input.starts_with('[') {
        return Err(ParseError::malformed(
            FORMAT,
            0,
            "STRUCTURED-DATA must be '-' or start with '['",
        ));
    }

    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    let mut sd_end = None;

    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            '[' if !in_quote => depth += 1,
            ']' if !in_quote => {
                depth = depth.saturating_sub(1);
                // 연속된 SD-ELEMENT가 없으면 SD 종료
                if depth == 0 && !input[idx + 1..].starts_with('[') {
                    sd_end = Some(idx + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let sd_end =
        sd_end.ok_or_else(|| ParseError::malformed(FORMAT, 0, "unterminated structured data"))?;
    let fields = parse_structured_data(&input[..sd_end])?;
    let msg = input[sd_end..].strip_prefix(' ').unwrap_or(&input[sd_end..]);
    Ok((msg, fields))
}

/// RFC 5424 Structured Data를 파싱합니다.
///
/// 형식: `[sd-id param1="value1" param2="value2"][sd-id2 ...]`
/// 추출된 파라미터는 `sd_{id}_{param}` 형식의 키로 반환됩니다.
fn parse_structured_data(sd: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut fields = Vec::new();
    let mut chars = sd.chars().peekable();

    while chars.peek().is_some() {
        if chars.next() != Some('[') {
            break;
        }

        // SD-ID 추출 (']' 또는 ' ' 전까지)
        let mut sd_id = String::new();
        while let Some(&ch) = chars.peek() {
            if ch == ']' || ch == ' ' {
                break;
            }
            sd_id.push(ch);
            chars.next();
        }

        if sd_id.is_empty() {
            return Err(ParseError::malformed(
                FORMAT,
                0,
                "empty SD-ID in structured data",
            ));
        }

        // SD-PARAM 파싱 (param="value" 형태)
        while let Some(&ch) = chars.peek() {
            if ch == ']' {
                chars.next();
                break;
            }
            if ch == ' ' {
                chars.next();
                continue;
            }

            let mut param_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch == '=' {
                    break;
                }
                param_name.push(ch);
                chars.next();
            }

            if chars.next() != Some('=') {
                return Err(ParseError::malformed(
                    FORMAT,
                    0,
                    format!("SD-PARAM '{param_name}' has no value"),
                ));
            }
            if chars.next() != Some('"') {
                return Err(ParseError::malformed(
                    FORMAT,
                    0,
                    "SD-PARAM value must be quoted",
                ));
            }

            let mut param_value = String::new();
            let mut escaped = false;
            for ch in chars.by_ref() {
                if escaped {
                    param_value.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    break;
                } else {
                    param_value.push(ch);
                }
            }

            fields.push((format!("sd_{sd_id}_{param_name}"), param_value));
        }
    }

    Ok(fields)
}
