//! 템플릿 실행기와 함수 라이브러리

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::parse::{Command, Node, Operand, Pipeline};
use super::{TemplateError, Value};

const FUNCTIONS: &[&str] = &[
    "index",
    "len",
    "print",
    "eq",
    "ne",
    "not",
    "_ToLower",
    "_ToUpper",
    "_ToBase64",
    "_ToSHA1",
    "_ToSHA256",
    "_ToSHA512",
];

pub(super) fn is_known_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub(super) fn execute(nodes: &[Node], data: &Value) -> Result<String, TemplateError> {
    let mut out = String::new();
    match walk(nodes, data, &mut out) {
        Ok(()) => Ok(out),
        Err(reason) => Err(TemplateError::Render {
            reason,
            partial: out,
        }),
    }
}

fn walk(nodes: &[Node], dot: &Value, out: &mut String) -> Result<(), String> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Action(pipe) => {
                let value = eval_pipeline(pipe, dot)?;
                write!(out, "{value}").map_err(|e| e.to_string())?;
            }
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                if eval_pipeline(cond, dot)?.is_truthy() {
                    walk(then, dot, out)?;
                } else {
                    walk(otherwise, dot, out)?;
                }
            }
            Node::Range {
                pipe,
                body,
                otherwise,
            } => match eval_pipeline(pipe, dot)? {
                Value::List(items) if !items.is_empty() => {
                    for item in &items {
                        walk(body, item, out)?;
                    }
                }
                Value::Map(map) if !map.is_empty() => {
                    for item in map.values() {
                        walk(body, item, out)?;
                    }
                }
                Value::List(_) | Value::Map(_) | Value::Nil => walk(otherwise, dot, out)?,
                other => return Err(format!("range can't iterate over {}", other.type_name())),
            },
        }
    }
    Ok(())
}

fn eval_pipeline(pipe: &Pipeline, dot: &Value) -> Result<Value, String> {
    let mut piped = None;
    for command in &pipe.commands {
        piped = Some(eval_command(command, dot, piped)?);
    }
    Ok(piped.unwrap_or(Value::Nil))
}

fn eval_command(command: &Command, dot: &Value, piped: Option<Value>) -> Result<Value, String> {
    let Some((first, rest)) = command.args.split_first() else {
        return Err("empty command".to_owned());
    };

    if let Operand::Func(name) = first {
        let mut args = rest
            .iter()
            .map(|arg| eval_operand(arg, dot))
            .collect::<Result<Vec<_>, _>>()?;
        args.extend(piped);
        return call(name, args);
    }

    if !rest.is_empty() || piped.is_some() {
        return Err(format!("can't give argument to non-function {first:?}"));
    }
    eval_operand(first, dot)
}

fn eval_operand(operand: &Operand, dot: &Value) -> Result<Value, String> {
    match operand {
        Operand::Dot => Ok(dot.clone()),
        Operand::Field(path) => lookup(dot, path),
        Operand::Str(s) => Ok(Value::Str(s.clone())),
        Operand::Int(n) => Ok(Value::Int(*n)),
        Operand::Bool(b) => Ok(Value::Bool(*b)),
        Operand::Nil => Ok(Value::Nil),
        Operand::Func(name) => call(name, Vec::new()),
        Operand::Pipeline(pipe) => eval_pipeline(pipe, dot),
    }
}

static NIL: Value = Value::Nil;

fn lookup(dot: &Value, path: &[String]) -> Result<Value, String> {
    let mut current = dot;
    for name in path {
        current = match current {
            Value::Map(map) => map.get(name).unwrap_or(&NIL),
            Value::Nil => return Err(format!("nil value evaluating field {name}")),
            other => {
                return Err(format!(
                    "can't evaluate field {name} in type {}",
                    other.type_name()
                ));
            }
        };
    }
    Ok(current.clone())
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
    match name {
        "index" => index(args),
        "len" => {
            let [value] = expect_args::<1>(name, args)?;
            let len = match &value {
                Value::Str(s) => s.len(),
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                other => return Err(format!("len of type {}", other.type_name())),
            };
            i64::try_from(len)
                .map(Value::Int)
                .map_err(|_| "len overflows int".to_owned())
        }
        "print" => Ok(Value::Str(sprint(&args))),
        "eq" => {
            if args.len() < 2 {
                return Err(format!(
                    "wrong number of args for eq: want at least 2 got {}",
                    args.len()
                ));
            }
            let (first, others) = args.split_at(1);
            for other in others {
                if compare(&first[0], other)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "ne" => {
            let [a, b] = expect_args::<2>(name, args)?;
            Ok(Value::Bool(!compare(&a, &b)?))
        }
        "not" => {
            let [value] = expect_args::<1>(name, args)?;
            Ok(Value::Bool(!value.is_truthy()))
        }
        "_ToLower" => string_fn(name, args, |s| s.to_lowercase()),
        "_ToUpper" => string_fn(name, args, |s| s.to_uppercase()),
        "_ToBase64" => string_fn(name, args, |s| STANDARD_NO_PAD.encode(s)),
        "_ToSHA1" => string_fn(name, args, digest_hex::<Sha1>),
        "_ToSHA256" => string_fn(name, args, digest_hex::<Sha256>),
        "_ToSHA512" => string_fn(name, args, digest_hex::<Sha512>),
        _ => Err(format!("function \"{name}\" not defined")),
    }
}

fn expect_args<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], String> {
    let got = args.len();
    args.try_into()
        .map_err(|_| format!("wrong number of args for {name}: want {N} got {got}"))
}

fn string_fn(name: &str, args: Vec<Value>, f: impl Fn(&str) -> String) -> Result<Value, String> {
    let [value] = expect_args::<1>(name, args)?;
    match value {
        Value::Str(s) => Ok(Value::Str(f(&s))),
        other => Err(format!(
            "wrong type for value in {name}; expected string; got {}",
            other.type_name()
        )),
    }
}

fn digest_hex<D: Digest>(input: &str) -> String {
    hex::encode(D::digest(input.as_bytes()))
}

fn index(args: Vec<Value>) -> Result<Value, String> {
    let mut args = args.into_iter();
    let Some(mut item) = args.next() else {
        return Err("wrong number of args for index: want at least 1 got 0".to_owned());
    };

    for key in args {
        item = match (item, key) {
            (Value::List(items), Value::Int(i)) => {
                let len = items.len();
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.into_iter().nth(i))
                    .ok_or_else(|| format!("error calling index: index out of range: {i} (len {len})"))?
            }
            (Value::Str(s), Value::Int(i)) => usize::try_from(i)
                .ok()
                .and_then(|i| s.as_bytes().get(i).copied())
                .map(|b| Value::Int(i64::from(b)))
                .ok_or_else(|| format!("error calling index: index out of range: {i}"))?,
            (Value::Map(mut map), Value::Str(k)) => map.remove(&k).unwrap_or(Value::Nil),
            (Value::Nil, _) => return Err("error calling index: index of untyped nil".to_owned()),
            (container, key) => {
                return Err(format!(
                    "error calling index: cannot index {} with {}",
                    container.type_name(),
                    key.type_name()
                ));
            }
        };
    }
    Ok(item)
}

fn compare(a: &Value, b: &Value) -> Result<bool, String> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::Int(x), Value::Int(y)) => Ok(x == y),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (x, y) => Err(format!(
            "incompatible types for comparison: {} and {}",
            x.type_name(),
            y.type_name()
        )),
    }
}

/// 인접한 두 피연산자가 모두 문자열이 아닐 때만 공백을 넣습니다.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            let prev_is_str = matches!(args[i - 1], Value::Str(_));
            let cur_is_str = matches!(arg, Value::Str(_));
            if !prev_is_str && !cur_is_str {
                out.push(' ');
            }
        }
        let _ = write!(out, "{arg}");
    }
    out
}
