//! syslog 파싱 모듈 -- RFC 5424, RFC 3164 형식별 파서와 프레임 리더
//!
//! 각 파서는 [`SyslogParser`] trait을 구현하여 한 프레임을 [`Message`]로 변환합니다.
//! [`parse_reader`]는 버퍼 리더에서 다음 프레임 하나를 읽어 파서에 넘깁니다.
//!
//! # 프레이밍
//! - 줄바꿈 구분 (`<34>1 ... \n`)
//! - 옥텟 카운팅 (RFC 6587, `87 <34>1 ...`): 1-10자리 숫자와 공백으로 시작하고
//!   길이가 최대 프레임 크기 이하일 때만 길이 접두어로 해석
//!
//! # 사용 예시
//! ```ignore
//! use logrelay_router::parser::{parse_reader, parser_for};
//!
//! let parser = parser_for("rfc5424")?;
//! let message = parse_reader(parser.as_ref(), &mut reader, 64 * 1024).await?;
//! ```

pub mod rfc3164;
pub mod rfc5424;

pub use rfc3164::Rfc3164Parser;
pub use rfc5424::Rfc5424Parser;

use std::sync::Arc;

use logrelay_core::types::{Facility, Message, Severity};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::RouterError;

/// RFC 5424에서 유효한 최대 PRI 값
/// facility 최댓값 23 * 8 + severity 최댓값 7 = 191
const MAX_SYSLOG_PRI: u8 = 191;

/// 옥텟 카운팅 길이 접두어 최대 자릿수
const MAX_LENGTH_DIGITS: usize = 10;

/// 프레임 단위 파싱 에러
///
/// [`ParseError::is_terminal`]이 `true`이면 연결을 종료해야 합니다.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 전송 계층 에러 (연결 리셋 등)
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// 스트림 종료
    #[error("end of stream")]
    Eof,

    /// 최대 프레임 크기 초과
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// 설정된 최대 크기
        limit: usize,
    },

    /// 형식이 잘못된 프레임
    #[error("{format} parse error at offset {offset}: {reason}")]
    Malformed {
        /// 파서 형식 (rfc3164, rfc5424)
        format: &'static str,
        /// 실패 위치 (바이트 오프셋)
        offset: usize,
        /// 실패 사유
        reason: String,
    },
}

impl ParseError {
    /// 연결을 종료해야 하는 에러인지 여부
    ///
    /// 형식 오류만 연결을 유지하며, 나머지는 스트림 상태를 신뢰할 수 없으므로 종료합니다.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }

    pub(crate) fn malformed(format: &'static str, offset: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            offset,
            reason: reason.into(),
        }
    }
}

/// syslog 프레임 파서
///
/// 구현체는 상태가 없으며 여러 연결 태스크에서 동시에 공유됩니다.
pub trait SyslogParser: Send + Sync {
    /// 파서 형식 이름 (`rfc3164`, `rfc5424`)
    fn format_name(&self) -> &'static str;

    /// 구분자가 제거된 한 프레임을 파싱합니다.
    fn parse(&self, frame: &[u8]) -> Result<Message, ParseError>;
}

/// 설정의 파서 타입 문자열(대소문자 무시)로 파서를 생성합니다.
pub fn parser_for(kind: &str) -> Result<Arc<dyn SyslogParser>, RouterError> {
    match kind.trim().to_lowercase().as_str() {
        "rfc3164" => Ok(Arc::new(Rfc3164Parser::new())),
        "rfc5424" => Ok(Arc::new(Rfc5424Parser::new())),
        _ => Err(RouterError::UnknownParserType(kind.to_owned())),
    }
}

/// 리더에서 다음 프레임 하나를 읽어 파싱합니다.
///
/// 빈 줄은 건너뜁니다. 마지막 프레임이 줄바꿈 없이 끝나면 그대로 파싱하고,
/// 다음 호출에서 [`ParseError::Eof`]를 반환합니다.
pub async fn parse_reader<R>(
    parser: &dyn SyslogParser,
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Message, ParseError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    loop {
        if reader.fill_buf().await?.is_empty() {
            return Err(ParseError::Eof);
        }

        let frame = read_frame(reader, max_frame_size).await?;
        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return parser.parse(&frame);
    }
}

/// 다음 프레임의 바이트를 읽습니다.
///
/// 1-10자리 숫자 + 공백이고 길이가 `max_frame_size` 이하이면 옥텟 카운팅,
/// 아니면 줄바꿈 구분으로 읽습니다. 숫자로 시작하는 일반 줄은 그 줄 전체가
/// 한 프레임이 되므로 다음 프레임과의 경계가 유지됩니다.
async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>, ParseError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut prefix = Vec::new();
    while prefix.len() <= MAX_LENGTH_DIGITS {
        let next = reader.fill_buf().await?.first().copied();
        match next {
            Some(b) if b.is_ascii_digit() => {
                reader.consume(1);
                prefix.push(b);
            }
            Some(b' ') if !prefix.is_empty() => {
                if let Some(len) = octet_length(&prefix, max_frame_size) {
                    reader.consume(1);
                    return read_octet_counted(reader, len).await;
                }
                break;
            }
            _ => break,
        }
    }

    if prefix.is_empty() {
        return read_line(reader, max_frame_size).await;
    }

    // 길이 접두어가 아니면 이미 읽은 숫자는 줄의 앞부분
    let rest = match read_line(reader, max_frame_size.saturating_sub(prefix.len())).await {
        Ok(rest) => rest,
        Err(ParseError::Eof) => Vec::new(),
        Err(ParseError::FrameTooLarge { .. }) => {
            return Err(ParseError::FrameTooLarge {
                limit: max_frame_size,
            });
        }
        Err(e) => return Err(e),
    };
    prefix.extend_from_slice(&rest);
    Ok(prefix)
}

fn octet_length(digits: &[u8], max_frame_size: usize) -> Option<usize> {
    if digits.is_empty() || digits.len() > MAX_LENGTH_DIGITS {
        return None;
    }
    std::str::from_utf8(digits)
        .ok()?
        .parse::<usize>()
        .ok()
        .filter(|&len| len <= max_frame_size)
}

async fn read_line<R>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>, ParseError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    let limit = u64::try_from(max_frame_size.saturating_add(1)).unwrap_or(u64::MAX);
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(ParseError::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max_frame_size {
        return Err(ParseError::FrameTooLarge {
            limit: max_frame_size,
        });
    }
    Ok(buf)
}

async fn read_octet_counted<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, ParseError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ParseError::Eof
        } else {
            ParseError::Io(e)
        }
    })?;

    while frame.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
        frame.pop();
    }
    Ok(frame)
}

/// `<PRI>` 필드를 파싱하여 (facility, severity, PRI 이후 오프셋)을 반환합니다.
pub(crate) fn parse_pri(
    input: &str,
    format: &'static str,
) -> Result<(Facility, Severity, usize), ParseError> {
    if !input.starts_with('<') {
        return Err(ParseError::malformed(
            format,
            0,
            "missing PRI field (expected '<')",
        ));
    }

    let pri_end = input
        .find('>')
        .filter(|&end| end <= 4)
        .ok_or_else(|| ParseError::malformed(format, 0, "unterminated PRI field"))?;

    let pri_str = &input[1..pri_end];
    let pri: u8 = pri_str
        .parse()
        .map_err(|_| ParseError::malformed(format, 1, format!("invalid PRI value: '{pri_str}'")))?;

    if pri > MAX_SYSLOG_PRI {
        return Err(ParseError::malformed(
            format,
            1,
            format!("PRI value {pri} out of valid range (0-{MAX_SYSLOG_PRI})"),
        ));
    }

    // PRI = facility * 8 + severity, 범위 검증 후이므로 항상 Some
    let facility = Facility::from_code(pri / 8)
        .ok_or_else(|| ParseError::malformed(format, 1, "invalid facility"))?;
    let severity = Severity::from_code(pri % 8)
        .ok_or_else(|| ParseError::malformed(format, 1, "invalid severity"))?;

    Ok((facility, severity, pri_end + 1))
}
