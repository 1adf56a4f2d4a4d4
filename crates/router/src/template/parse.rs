//! 템플릿 파서: 텍스트/액션 분리, 액션 토큰화, 제어 구조 트리 구성

use super::exec::is_known_function;

const LEFT_DELIM: &str = "{{";
const RIGHT_DELIM: &str = "}}";

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Operand {
    Dot,
    Field(Vec<String>),
    Str(String),
    Int(i64),
    Bool(bool),
    Nil,
    Func(String),
    Pipeline(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Pipe,
    Dot,
    Field(Vec<String>),
    Str(String),
    Int(i64),
    Ident(String),
}

#[derive(Debug)]
enum Item {
    Text(String),
    Action { tokens: Vec<Token>, offset: usize },
}

/// 템플릿 소스를 노드 트리로 파싱합니다.
pub(super) fn parse(source: &str) -> Result<Vec<Node>, String> {
    let items = scan(source)?;
    let mut parser = TreeParser { items, pos: 0 };
    let (nodes, end) = parser.parse_list()?;
    match end {
        ListEnd::Eof => Ok(nodes),
        ListEnd::End { offset } => Err(format!("unexpected {{{{end}}}} at offset {offset}")),
        ListEnd::Else { offset, .. } => Err(format!("unexpected {{{{else}}}} at offset {offset}")),
    }
}

// --- 1단계: 텍스트와 액션 분리 ---

fn scan(source: &str) -> Result<Vec<Item>, String> {
    let mut items = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    while pos < source.len() {
        let Some(rel) = source[pos..].find(LEFT_DELIM) else {
            push_text(&mut items, &source[pos..], trim_next, false);
            break;
        };
        let open = pos + rel;
        let content_start = open + LEFT_DELIM.len();
        let close = find_close(source, content_start)
            .ok_or_else(|| format!("unclosed action starting at offset {open}"))?;

        let mut content = &source[content_start..close];
        let trim_left = has_left_trim(content);
        if trim_left {
            content = &content[1..];
        }
        let trim_right = has_right_trim(content);
        if trim_right {
            content = &content[..content.len() - 1];
        }

        push_text(&mut items, &source[pos..open], trim_next, trim_left);
        trim_next = trim_right;
        pos = close + RIGHT_DELIM.len();

        let trimmed = content.trim();
        if trimmed.starts_with("/*") {
            if !trimmed.ends_with("*/") || trimmed.len() < 4 {
                return Err(format!("unclosed comment at offset {open}"));
            }
            continue;
        }

        let tokens = lex(content).map_err(|e| format!("{e} in action at offset {open}"))?;
        if tokens.is_empty() {
            return Err(format!("missing value for command at offset {open}"));
        }
        items.push(Item::Action {
            tokens,
            offset: open,
        });
    }

    Ok(items)
}

fn push_text(items: &mut Vec<Item>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        items.push(Item::Text(text.to_owned()));
    }
}

fn has_left_trim(content: &str) -> bool {
    let bytes = content.as_bytes();
    bytes.first() == Some(&b'-') && bytes.get(1).is_some_and(u8::is_ascii_whitespace)
}

fn has_right_trim(content: &str) -> bool {
    let bytes = content.as_bytes();
    let n = bytes.len();
    n >= 2 && bytes[n - 1] == b'-' && bytes[n - 2].is_ascii_whitespace()
}

/// 문자열 리터럴 안의 `}}`는 건너뛰고 닫는 구분자 위치를 찾습니다.
fn find_close(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = from;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if source[i..].starts_with(RIGHT_DELIM) => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

// --- 2단계: 액션 토큰화 ---

fn lex(content: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = content.char_indices().peekable();

    while let Some(&(idx, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return Err("unterminated quoted string".to_owned()),
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, 'r')) => value.push('\r'),
                            Some((_, '\\')) => value.push('\\'),
                            Some((_, '"')) => value.push('"'),
                            Some((_, other)) => {
                                return Err(format!("unknown escape sequence '\\{other}'"));
                            }
                            None => return Err("unterminated quoted string".to_owned()),
                        },
                        Some((_, c)) => value.push(c),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '`' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return Err("unterminated raw string".to_owned()),
                        Some((_, '`')) => break,
                        Some((_, c)) => value.push(c),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '.' => {
                chars.next();
                let mut path = Vec::new();
                while chars.peek().is_some_and(|&(_, c)| is_ident_start(c)) {
                    let mut name = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if !is_ident_char(c) {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                    path.push(name);
                    if chars.peek().is_some_and(|&(_, c)| c == '.') {
                        chars.next();
                        if !chars.peek().is_some_and(|&(_, c)| is_ident_start(c)) {
                            return Err("unexpected '.' after field".to_owned());
                        }
                    }
                }
                if path.is_empty() {
                    tokens.push(Token::Dot);
                } else {
                    tokens.push(Token::Field(path));
                }
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = idx;
                chars.next();
                let mut end = start + c.len_utf8();
                while let Some(&(i, c)) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let literal = &content[start..end];
                let value = literal
                    .parse::<i64>()
                    .map_err(|_| format!("bad number syntax: '{literal}'"))?;
                tokens.push(Token::Int(value));
            }
            c if is_ident_start(c) => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(name));
            }
            '$' => return Err("variables are not supported".to_owned()),
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// --- 3단계: 제어 구조 트리 ---

enum ListEnd {
    Eof,
    End { offset: usize },
    Else { cond: Option<Vec<Token>>, offset: usize },
}

struct TreeParser {
    items: Vec<Item>,
    pos: usize,
}

impl TreeParser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, ListEnd), String> {
        let mut nodes = Vec::new();

        while self.pos < self.items.len() {
            let item = std::mem::replace(&mut self.items[self.pos], Item::Text(String::new()));
            self.pos += 1;

            let (tokens, offset) = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { tokens, offset } => (tokens, offset),
            };

            match tokens.first() {
                Some(Token::Ident(kw)) if kw == "end" => {
                    if tokens.len() > 1 {
                        return Err(format!("unexpected arguments to end at offset {offset}"));
                    }
                    return Ok((nodes, ListEnd::End { offset }));
                }
                Some(Token::Ident(kw)) if kw == "else" => {
                    let cond = match tokens.get(1) {
                        None => None,
                        Some(Token::Ident(next)) if next == "if" => Some(tokens[2..].to_vec()),
                        Some(_) => {
                            return Err(format!("unexpected arguments to else at offset {offset}"));
                        }
                    };
                    return Ok((nodes, ListEnd::Else { cond, offset }));
                }
                Some(Token::Ident(kw)) if kw == "if" => {
                    nodes.push(self.parse_if(&tokens[1..], offset)?);
                }
                Some(Token::Ident(kw)) if kw == "range" => {
                    nodes.push(self.parse_range(&tokens[1..], offset)?);
                }
                _ => {
                    let pipe = parse_pipeline(&tokens).map_err(|e| format!("{e} at offset {offset}"))?;
                    nodes.push(Node::Action(pipe));
                }
            }
        }

        Ok((nodes, ListEnd::Eof))
    }

    fn parse_if(&mut self, cond_tokens: &[Token], offset: usize) -> Result<Node, String> {
        let cond = parse_pipeline(cond_tokens).map_err(|e| format!("{e} in if at offset {offset}"))?;
        let (then, end) = self.parse_list()?;
        let otherwise = match end {
            ListEnd::End { .. } => Vec::new(),
            ListEnd::Else { cond: None, .. } => {
                let (otherwise, end) = self.parse_list()?;
                Self::expect_end(end, offset)?;
                otherwise
            }
            ListEnd::Else {
                cond: Some(tokens),
                offset: else_offset,
            } => vec![self.parse_if(&tokens, else_offset)?],
            ListEnd::Eof => return Err(format!("missing {{{{end}}}} for if at offset {offset}")),
        };
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }

    fn parse_range(&mut self, pipe_tokens: &[Token], offset: usize) -> Result<Node, String> {
        let pipe =
            parse_pipeline(pipe_tokens).map_err(|e| format!("{e} in range at offset {offset}"))?;
        let (body, end) = self.parse_list()?;
        let otherwise = match end {
            ListEnd::End { .. } => Vec::new(),
            ListEnd::Else { cond: None, .. } => {
                let (otherwise, end) = self.parse_list()?;
                Self::expect_end(end, offset)?;
                otherwise
            }
            ListEnd::Else { cond: Some(_), offset } => {
                return Err(format!("else if is not allowed in range at offset {offset}"));
            }
            ListEnd::Eof => return Err(format!("missing {{{{end}}}} for range at offset {offset}")),
        };
        Ok(Node::Range {
            pipe,
            body,
            otherwise,
        })
    }

    fn expect_end(end: ListEnd, offset: usize) -> Result<(), String> {
        match end {
            ListEnd::End { .. } => Ok(()),
            ListEnd::Else { offset, .. } => Err(format!("unexpected second else at offset {offset}")),
            ListEnd::Eof => Err(format!("missing {{{{end}}}} for block at offset {offset}")),
        }
    }
}

// --- 파이프라인 ---

fn parse_pipeline(tokens: &[Token]) -> Result<Pipeline, String> {
    let mut pos = 0;
    let pipe = parse_pipeline_at(tokens, &mut pos)?;
    match tokens.get(pos) {
        None => Ok(pipe),
        Some(Token::RParen) => Err("unexpected right paren".to_owned()),
        Some(other) => Err(format!("unexpected {other:?}")),
    }
}

fn parse_pipeline_at(tokens: &[Token], pos: &mut usize) -> Result<Pipeline, String> {
    let mut commands = Vec::new();
    let mut args = Vec::new();

    loop {
        match tokens.get(*pos) {
            None | Some(Token::RParen) => break,
            Some(Token::Pipe) => {
                if args.is_empty() {
                    return Err("missing command before '|'".to_owned());
                }
                commands.push(Command {
                    args: std::mem::take(&mut args),
                });
                *pos += 1;
                if matches!(tokens.get(*pos), None | Some(Token::RParen)) {
                    return Err("missing command after '|'".to_owned());
                }
            }
            Some(Token::LParen) => {
                *pos += 1;
                let inner = parse_pipeline_at(tokens, pos)?;
                if tokens.get(*pos) != Some(&Token::RParen) {
                    return Err("unclosed left paren".to_owned());
                }
                *pos += 1;
                args.push(Operand::Pipeline(inner));
            }
            Some(token) => {
                args.push(operand(token)?);
                *pos += 1;
            }
        }
    }

    if args.is_empty() {
        return Err("missing value for command".to_owned());
    }
    commands.push(Command { args });
    Ok(Pipeline { commands })
}

fn operand(token: &Token) -> Result<Operand, String> {
    Ok(match token {
        Token::Dot => Operand::Dot,
        Token::Field(path) => Operand::Field(path.clone()),
        Token::Str(s) => Operand::Str(s.clone()),
        Token::Int(n) => Operand::Int(*n),
        Token::Ident(name) => match name.as_str() {
            "true" => Operand::Bool(true),
            "false" => Operand::Bool(false),
            "nil" => Operand::Nil,
            "if" | "else" | "end" | "range" => return Err(format!("unexpected keyword '{name}'")),
            _ if is_known_function(name) => Operand::Func(name.clone()),
            _ => return Err(format!("function \"{name}\" not defined")),
        },
        Token::LParen | Token::RParen | Token::Pipe => {
            return Err(format!("unexpected {token:?}"));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_single_node() {
        assert_eq!(parse("hello").unwrap(), vec![Node::Text("hello".to_owned())]);
    }

    #[test]
    fn trim_markers_remove_adjacent_whitespace() {
        let nodes = parse("a  {{- .x -}}  b").unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], Node::Text("a".to_owned()));
        assert_eq!(nodes[2], Node::Text("b".to_owned()));
    }

    #[test]
    fn negative_number_is_not_trim_marker() {
        let nodes = parse("{{-3}}").unwrap();
        let Node::Action(pipe) = &nodes[0] else {
            panic!("expected action");
        };
        assert_eq!(pipe.commands[0].args, vec![Operand::Int(-3)]);
    }

    #[test]
    fn comments_produce_no_nodes() {
        let nodes = parse("a{{/* note */}}b").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Text("a".to_owned()), Node::Text("b".to_owned())]
        );
    }

    #[test]
    fn delimiter_inside_string_literal() {
        let nodes = parse(r#"{{ print "}}" }}"#).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn field_chain_lexes_as_path() {
        let tokens = lex(".a.b_c").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Field(vec!["a".to_owned(), "b_c".to_owned()])]
        );
    }

    #[test]
    fn pipeline_with_parens() {
        let nodes = parse("{{ (index .match 1) | _ToUpper }}").unwrap();
        let Node::Action(pipe) = &nodes[0] else {
            panic!("expected action");
        };
        assert_eq!(pipe.commands.len(), 2);
        assert!(matches!(pipe.commands[0].args[0], Operand::Pipeline(_)));
    }

    #[test]
    fn else_if_chain_nests() {
        let nodes = parse("{{if .a}}A{{else if .b}}B{{else}}C{{end}}").unwrap();
        let Node::If { otherwise, .. } = &nodes[0] else {
            panic!("expected if");
        };
        assert!(matches!(otherwise[0], Node::If { .. }));
    }

    #[test]
    fn structural_errors() {
        assert!(parse("{{if .a}}x").is_err());
        assert!(parse("{{end}}").is_err());
        assert!(parse("{{else}}").is_err());
        assert!(parse("{{range .a}}x{{else if .b}}y{{end}}").is_err());
        assert!(parse("{{if .a}}x{{else}}y{{else}}z{{end}}").is_err());
        assert!(parse("{{}}").is_err());
        assert!(parse("{{ .a | }}").is_err());
        assert!(parse("{{ (.a }}").is_err());
        assert!(parse("{{ .a) }}").is_err());
        assert!(parse("{{ \"open }}").is_err());
        assert!(parse("{{ $x }}").is_err());
        assert!(parse("{{/* open }}").is_err());
    }

    #[test]
    fn unknown_function_names_the_function() {
        let err = parse("{{ nosuch .a }}").unwrap_err();
        assert!(err.contains("nosuch"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_arbitrary_source_does_not_panic(source in "[{}a-z .|()\"$/*-]{0,64}") {
                let _ = parse(&source);
            }
        }
    }
}
