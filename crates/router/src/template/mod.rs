//! 출력 템플릿 컴파일러
//!
//! 액션이 메시지와 매칭 그룹으로 출력 문자열을 만들 때 사용합니다.
//! 문법은 Go `text/template`의 부분집합으로, 기존 룰셋 파일의 템플릿을 그대로 쓸 수 있습니다.
//!
//! # 지원 문법
//! - `{{ pipeline }}`, 트림 마커 `{{-` / `-}}`, 주석 `{{/* ... */}}`
//! - 피연산자: `.`, `.field`, 문자열 (`"..."`, `` `...` ``), 정수, `true`/`false`/`nil`, `( pipeline )`
//! - 파이프라인: `{{ index .match 1 | _ToUpper }}`
//! - 제어: `{{if}}` / `{{else if}}` / `{{else}}` / `{{end}}`, `{{range}}` / `{{else}}` / `{{end}}`
//! - 내장 함수: `index`, `len`, `print`, `eq`, `ne`, `not`
//! - 변환 함수: `_ToLower`, `_ToUpper`, `_ToBase64`, `_ToSHA1`, `_ToSHA256`, `_ToSHA512`
//!
//! # 바인딩
//! `.match`, `.hostname`, `.timestamp`, `.now_rfc3339`, `.now_unix`, `.severity`,
//! `.facility`, `.appname`, `.original_message`
//!
//! `.timestamp`는 Go의 `time.Time` 기본 출력(`2006-01-02 15:04:05 -0700 MST`)이 아니라
//! UTC RFC 3339 초 단위(`2024-01-15T12:00:00Z`)로 렌더링됩니다.
//! Go 형식에 맞춘 기존 템플릿은 출력 문자열이 달라집니다.
//!
//! # 사용 예시
//! ```ignore
//! let line = template::render(&message, &groups, "{{.hostname}} {{index .match 1}}\\n")?;
//! ```

mod exec;
mod parse;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use logrelay_core::types::Message;

use parse::Node;

/// 템플릿 에러
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    /// 문법 오류 (결과 없음)
    #[error("failed to compile template: {0}")]
    Compile(String),

    /// 실행 오류
    ///
    /// `partial`은 오류 직전까지 출력된 내용이며, 에러가 우선합니다.
    #[error("failed to render template: {reason}")]
    Render {
        /// 실패 사유
        reason: String,
        /// 오류 전까지 출력된 부분 결과
        partial: String,
    },
}

impl TemplateError {
    /// 오류 전까지 출력된 부분 결과 (컴파일 에러는 빈 문자열)
    pub fn partial(&self) -> &str {
        match self {
            Self::Compile(_) => "",
            Self::Render { partial, .. } => partial,
        }
    }
}

/// 템플릿 데이터 값
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 값 없음 (존재하지 않는 필드)
    Nil,
    /// 불리언
    Bool(bool),
    /// 정수
    Int(i64),
    /// 문자열
    Str(String),
    /// 리스트
    List(Vec<Value>),
    /// 문자열 키 맵 (키 순서로 순회)
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// `{{if}}` 판정: 빈 값과 0, false, nil은 거짓
    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("<no value>"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("map[")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// 컴파일된 템플릿
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// 템플릿 문자열을 컴파일합니다.
    ///
    /// 두 글자 이스케이프 `\n`, `\t`, `\r`은 파싱 전에 제어 문자로 치환됩니다.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let source = unescape_controls(source);
        let nodes = parse::parse(&source).map_err(TemplateError::Compile)?;
        Ok(Self { nodes })
    }

    /// 데이터를 바인딩하여 템플릿을 실행합니다.
    pub fn execute(&self, data: &Value) -> Result<String, TemplateError> {
        exec::execute(&self.nodes, data)
    }
}

/// 메시지와 매칭 그룹으로 템플릿을 렌더링합니다.
///
/// 호출마다 새로 컴파일합니다.
pub fn render(message: &Message, groups: &[String], source: &str) -> Result<String, TemplateError> {
    let template = Template::compile(source)?;
    template.execute(&bindings(message, groups, Utc::now()))
}

/// 템플릿에 노출되는 바인딩 맵을 생성합니다.
pub fn bindings(message: &Message, groups: &[String], now: DateTime<Utc>) -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "match".to_owned(),
        Value::List(groups.iter().cloned().map(Value::Str).collect()),
    );
    map.insert("hostname".to_owned(), Value::Str(message.hostname.clone()));
    map.insert(
        "timestamp".to_owned(),
        Value::Str(message.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    map.insert(
        "now_rfc3339".to_owned(),
        Value::Str(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    map.insert("now_unix".to_owned(), Value::Int(now.timestamp()));
    map.insert(
        "severity".to_owned(),
        Value::Str(message.severity.as_str().to_owned()),
    );
    map.insert(
        "facility".to_owned(),
        Value::Str(message.facility.as_str().to_owned()),
    );
    map.insert("appname".to_owned(), Value::Str(message.app_name.clone()));
    map.insert(
        "original_message".to_owned(),
        Value::Str(message.body.clone()),
    );
    Value::Map(map)
}

fn unescape_controls(source: &str) -> String {
    source
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r")
}
