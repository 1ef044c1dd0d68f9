// Builtins and the bundled standard library
//
// Globals are available without prefix; everything else lives under `std.`.
// The AML half of the library (std.aml) is parsed once per process and
// merged over the native function map per decode.

use std::cell::RefCell;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value as Json;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::ast::{self, Position};
use crate::context::Context;
use crate::error::EvalError;
use crate::merge::merge_objects;
use crate::object::ObjectReference;
use crate::parser;
use crate::scope::Scope;
use crate::value::{self, Builtin, KeyValue, Locals, NativeFn, Type, Value};

static STD_AML: &str = include_str!("std.aml");

const STD_FUNCS: &[(&str, NativeFn)] = &[
    ("splitHostPort", split_host_port),
    ("joinHostPort", join_host_port),
    ("base64decode", base64_decode),
    ("base64", base64_encode),
    ("atoi", atoi),
    ("fileExt", file_ext),
    ("basename", basename),
    ("dirname", dirname),
    ("pathJoin", path_join),
    ("sha1sum", sha1sum),
    ("sha256sum", sha256sum),
    ("sha512sum", sha512sum),
    ("toHex", to_hex),
    ("fromHex", from_hex),
    ("toJSON", to_json),
    ("fromJSON", from_json),
    ("toYAML", to_yaml),
    ("fromYAML", from_yaml),
    ("error", error_fn),
    ("toTitle", to_title),
    ("toUpper", to_upper),
    ("toLower", to_lower),
    ("startsWith", starts_with),
    ("endsWith", ends_with),
    ("trim", trim),
    ("trimPrefix", trim_prefix),
    ("trimSuffix", trim_suffix),
    ("isString", is_string),
    ("isNumber", is_number),
    ("isBool", is_bool),
    ("isArray", is_array),
    ("isObject", is_object),
    ("join", join),
    ("replace", replace),
    ("indexOf", index_of),
    ("split", split),
    ("range", num_range),
    ("_sort", sort_by),
];

/// The parsed standard library, shared read-only across decodes.
fn std_ast() -> Result<&'static ast::Value, EvalError> {
    static AST: OnceLock<Result<ast::Value, String>> = OnceLock::new();
    let parsed = AST.get_or_init(|| {
        parser::parse("std.aml", STD_AML).map_err(|e| e.to_string())
    });
    match parsed {
        Ok(v) => Ok(v),
        Err(e) => Err(EvalError::evaluation(format!("invalid std.aml: {e}"))),
    }
}

/// Build the global object for one decode: `len`, the abstract type tokens,
/// and `std` (std.aml merged over the native functions).
pub fn new_builtin(ctx: &Context) -> Result<Value, EvalError> {
    let mut globals = Locals::default();
    globals.add("len", Value::Builtin(Builtin::new("len", length)));
    globals.add("number", Value::Abstract(Type::Number));
    globals.add("string", Value::Abstract(Type::String));
    globals.add("bool", Value::Abstract(Type::Bool));
    globals.add("array", Value::Abstract(Type::Array));
    globals.add("object", Value::Abstract(Type::Object));
    let globals = Value::locals(globals);

    let global_scope = Scope::default().push(globals.clone());

    let std_source = std_ast()?;
    let ast::ValueKind::Object(object) = &std_source.kind else {
        return Err(EvalError::evaluation("invalid std.aml: not an object"));
    };
    let std_object = Value::Object(ObjectReference::to_object(ctx, &global_scope, object));

    let mut natives = Locals::default();
    for &(name, func) in STD_FUNCS {
        natives.add(name, Value::Builtin(Builtin::new(name, func)));
    }
    let std = merge_objects(
        ctx,
        &Position::default(),
        &std_object,
        &Value::locals(natives),
    )?;

    let mut std_entry = Locals::default();
    std_entry.add("std", std);
    merge_objects(ctx, &Position::default(), &globals, &Value::locals(std_entry))
}

// ── Argument helpers ─────────────────────────────────────────────────────────

fn expect_args(count: usize, args: &[Value]) -> Result<(), EvalError> {
    if args.len() < count {
        return Err(EvalError::argument(format!(
            "expected at least {count} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn arg_string(ctx: &Context, args: &[Value], index: usize) -> Result<String, EvalError> {
    expect_args(index + 1, args)?;
    let t = args[index].type_of(ctx)?;
    if t != Type::String {
        return Err(EvalError::argument(format!(
            "expected string argument at index {index}, got: {t}"
        )));
    }
    match args[index].interface(ctx)? {
        Json::String(s) => Ok(s),
        other => Err(EvalError::argument(format!("expected string, got {other}"))),
    }
}

fn arg_int(ctx: &Context, args: &[Value], index: usize) -> Result<i64, EvalError> {
    match arg_number(ctx, args, index)? {
        Num::Int(i) => Ok(i),
        Num::Float(f) => Err(EvalError::argument(format!(
            "expected integer argument at index {index}, got: {f}"
        ))),
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn arg_number(ctx: &Context, args: &[Value], index: usize) -> Result<Num, EvalError> {
    expect_args(index + 1, args)?;
    let t = args[index].type_of(ctx)?;
    if t != Type::Number {
        return Err(EvalError::argument(format!(
            "expected number argument at index {index}, got: {t}"
        )));
    }
    match args[index].interface(ctx)? {
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Num::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Num::Float(f))
            } else {
                Err(EvalError::argument(format!("invalid number: {n}")))
            }
        }
        other => Err(EvalError::argument(format!("expected number, got {other}"))),
    }
}

fn arg_string_array(ctx: &Context, args: &[Value], index: usize) -> Result<Vec<String>, EvalError> {
    expect_args(index + 1, args)?;
    let t = args[index].type_of(ctx)?;
    if t != Type::Array {
        return Err(EvalError::argument(format!(
            "expected array argument at index {index}, got: {t}"
        )));
    }
    let mut result = Vec::new();
    let mut iter = args[index].iterator(ctx)?;
    while let Some(v) = iter.next(ctx)? {
        let t = v.type_of(ctx)?;
        if t != Type::String {
            return Err(EvalError::argument(format!(
                "expected array of strings but got type: {t}"
            )));
        }
        match v.interface(ctx)? {
            Json::String(s) => result.push(s),
            other => {
                return Err(EvalError::argument(format!(
                    "expected string, got {other}"
                )))
            }
        }
    }
    Ok(result)
}

fn string_array(pos: &Position, scope: &Scope, items: Vec<String>) -> Value {
    let values = items.into_iter().map(Value::from).collect();
    Value::Array(std::rc::Rc::new(crate::array::Array::from_values(
        pos.clone(),
        scope.clone(),
        values,
    )))
}

// ── Globals ──────────────────────────────────────────────────────────────────

fn length(ctx: &Context, _scope: &Scope, _pos: &Position, args: &[Value]) -> Result<Value, EvalError> {
    expect_args(1, args)?;
    Ok(Value::from(args[0].len(ctx)? as i64))
}

// ── Type predicates ──────────────────────────────────────────────────────────

fn is_type(ctx: &Context, t: Type, args: &[Value]) -> Result<Value, EvalError> {
    expect_args(1, args)?;
    Ok(Value::Bool(args[0].type_of(ctx)? == t))
}

fn is_string(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    is_type(ctx, Type::String, args)
}

fn is_number(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    is_type(ctx, Type::Number, args)
}

fn is_bool(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    is_type(ctx, Type::Bool, args)
}

fn is_array(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    is_type(ctx, Type::Array, args)
}

fn is_object(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    is_type(ctx, Type::Object, args)
}

// ── Strings ──────────────────────────────────────────────────────────────────

fn to_upper(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::string(arg_string(ctx, args, 0)?.to_uppercase()))
}

fn to_lower(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::string(arg_string(ctx, args, 0)?.to_lowercase()))
}

/// Uppercase the first letter of each whitespace-separated word.
fn to_title(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let mut result = String::with_capacity(s.len());
    let mut prev_space = true;
    for c in s.chars() {
        if prev_space {
            result.extend(c.to_uppercase());
        } else {
            result.push(c);
        }
        prev_space = c.is_whitespace();
    }
    Ok(Value::string(result))
}

fn trim(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::string(arg_string(ctx, args, 0)?.trim()))
}

fn trim_prefix(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let prefix = arg_string(ctx, args, 1)?;
    Ok(Value::string(
        s.strip_prefix(&prefix).unwrap_or(&s).to_string(),
    ))
}

fn trim_suffix(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let suffix = arg_string(ctx, args, 1)?;
    Ok(Value::string(
        s.strip_suffix(&suffix).unwrap_or(&s).to_string(),
    ))
}

fn starts_with(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let prefix = arg_string(ctx, args, 1)?;
    Ok(Value::Bool(s.starts_with(&prefix)))
}

fn ends_with(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let suffix = arg_string(ctx, args, 1)?;
    Ok(Value::Bool(s.ends_with(&suffix)))
}

/// `split(s, sep[, n])`: at most `n` pieces when `n` is positive, no limit
/// when negative, an empty array when zero.
fn split(ctx: &Context, scope: &Scope, pos: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let sep = arg_string(ctx, args, 1)?;
    let pieces: Vec<String> = if args.len() > 2 {
        let n = arg_int(ctx, args, 2)?;
        if n == 0 {
            Vec::new()
        } else if n < 0 {
            s.split(&sep).map(str::to_string).collect()
        } else {
            s.splitn(n as usize, &sep).map(str::to_string).collect()
        }
    } else {
        s.split(&sep).map(str::to_string).collect()
    };
    Ok(string_array(pos, scope, pieces))
}

fn join(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let items = arg_string_array(ctx, args, 0)?;
    let sep = arg_string(ctx, args, 1)?;
    Ok(Value::string(items.join(&sep)))
}

fn replace(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let find = arg_string(ctx, args, 1)?;
    let with = arg_string(ctx, args, 2)?;
    let result = if args.len() > 3 {
        let n = arg_int(ctx, args, 3)?;
        if n < 0 {
            s.replace(&find, &with)
        } else {
            s.replacen(&find, &with, n as usize)
        }
    } else {
        s.replace(&find, &with)
    };
    Ok(Value::string(result))
}

/// `indexOf(string, string)` or `indexOf(array, value)`; -1 when absent.
fn index_of(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    expect_args(2, args)?;
    let first = args[0].type_of(ctx)?;
    let second = args[1].type_of(ctx)?;

    if first == Type::String && second == Type::String {
        let s = arg_string(ctx, args, 0)?;
        let needle = arg_string(ctx, args, 1)?;
        let idx = s.find(&needle).map(|i| i as i64).unwrap_or(-1);
        return Ok(Value::from(idx));
    }

    if first == Type::Array {
        let wanted = args[1].interface(ctx)?;
        let mut iter = args[0].iterator(ctx)?;
        let mut i: i64 = 0;
        while let Some(v) = iter.next(ctx)? {
            if v.interface(ctx)? == wanted {
                return Ok(Value::from(i));
            }
            i += 1;
        }
        return Ok(Value::from(-1i64));
    }

    Err(EvalError::argument(format!(
        "invalid argument types [{first}, {second}] expected [string, string] or [array, any]"
    )))
}

// ── Encoding and hashes ──────────────────────────────────────────────────────

fn base64_encode(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    Ok(Value::string(BASE64.encode(s.as_bytes())))
}

fn base64_decode(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let bytes = BASE64
        .decode(s.as_bytes())
        .map_err(|e| EvalError::argument(format!("invalid base64: {e}")))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|e| EvalError::argument(format!("invalid base64 payload: {e}")))?;
    Ok(Value::string(decoded))
}

fn to_hex(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    Ok(Value::string(hex::encode(s.as_bytes())))
}

fn from_hex(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let bytes = hex::decode(&s).map_err(|e| EvalError::argument(format!("invalid hex: {e}")))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|e| EvalError::argument(format!("invalid hex payload: {e}")))?;
    Ok(Value::string(decoded))
}

fn sha1sum(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    Ok(Value::string(hex::encode(Sha1::digest(s.as_bytes()))))
}

fn sha256sum(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    Ok(Value::string(hex::encode(Sha256::digest(s.as_bytes()))))
}

fn sha512sum(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    Ok(Value::string(hex::encode(Sha512::digest(s.as_bytes()))))
}

fn to_json(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    expect_args(1, args)?;
    let data = args[0].interface(ctx)?;
    let text = serde_json::to_string(&data)
        .map_err(|e| EvalError::evaluation(format!("json encode: {e}")))?;
    Ok(Value::string(text))
}

fn from_json(ctx: &Context, scope: &Scope, pos: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let data: Json = serde_json::from_str(&s)
        .map_err(|e| EvalError::argument(format!("invalid json: {e}")))?;
    if !data.is_object() {
        return Err(EvalError::argument("expected a json object"));
    }
    value::from_json(ctx, scope, pos, &data)
}

fn to_yaml(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    expect_args(1, args)?;
    let data = args[0].interface(ctx)?;
    let text = serde_yaml::to_string(&data)
        .map_err(|e| EvalError::evaluation(format!("yaml encode: {e}")))?;
    Ok(Value::string(text))
}

fn from_yaml(ctx: &Context, scope: &Scope, pos: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let data: Json = serde_yaml::from_str(&s)
        .map_err(|e| EvalError::argument(format!("invalid yaml: {e}")))?;
    if !data.is_object() {
        return Err(EvalError::argument("expected a yaml mapping"));
    }
    value::from_json(ctx, scope, pos, &data)
}

// ── Paths and networking ─────────────────────────────────────────────────────

/// Trailing separators dropped, last path element returned. Paths are
/// `/`-separated regardless of platform.
fn basename(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        let result = if s.is_empty() { "." } else { "/" };
        return Ok(Value::string(result));
    }
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    Ok(Value::string(base.to_string()))
}

fn dirname(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let trimmed = s.trim_end_matches('/');
    let result = match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => {
            if s.starts_with('/') {
                "/".to_string()
            } else {
                ".".to_string()
            }
        }
    };
    Ok(Value::string(result))
}

fn file_ext(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let base = s.rsplit('/').next().unwrap_or(&s);
    let ext = match base.rfind('.') {
        Some(idx) => &base[idx..],
        None => "",
    };
    Ok(Value::string(ext.to_string()))
}

/// Join segments with `/`, collapsing duplicate separators; an optional
/// second argument substitutes the separator in the result.
fn path_join(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let segments = arg_string_array(ctx, args, 0)?;
    let mut joined = String::new();
    for segment in segments.iter().filter(|s| !s.is_empty()) {
        if !joined.is_empty() && !joined.ends_with('/') {
            joined.push('/');
        }
        joined.push_str(segment.trim_end_matches('/'));
    }
    while joined.contains("//") {
        joined = joined.replace("//", "/");
    }
    if args.len() > 1 {
        let sep = arg_string(ctx, args, 1)?;
        if sep != "/" {
            joined = joined.replace('/', &sep);
        }
    }
    Ok(Value::string(joined))
}

fn split_host_port(ctx: &Context, scope: &Scope, pos: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| EvalError::argument(format!("address {s}: missing ']'")))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| EvalError::argument(format!("address {s}: missing port")))?;
        (host.to_string(), port.to_string())
    } else {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EvalError::argument(format!("address {s}: missing port")))?;
        if host.contains(':') {
            return Err(EvalError::argument(format!(
                "address {s}: too many colons"
            )));
        }
        (host.to_string(), port.to_string())
    };
    Ok(string_array(pos, scope, vec![host, port]))
}

fn join_host_port(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    expect_args(2, args)?;
    let host = arg_string(ctx, args, 0)?;
    let port = match arg_string(ctx, args, 1) {
        Ok(s) => s,
        Err(_) => arg_int(ctx, args, 1)?.to_string(),
    };
    let result = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    Ok(Value::string(result))
}

// ── Numeric ──────────────────────────────────────────────────────────────────

fn atoi(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let s = arg_string(ctx, args, 0)?;
    let v: i64 = s
        .parse()
        .map_err(|e| EvalError::argument(format!("invalid integer {s}: {e}")))?;
    Ok(Value::from(v))
}

/// `range(max)`, `range(start, max)` or `range(start, max, step)`; integer
/// sequence when all arguments are integers, float sequence otherwise. The
/// step sign picks the direction; zero step is an error.
fn num_range(ctx: &Context, scope: &Scope, pos: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let mut start = Num::Int(0);
    let mut step = Num::Int(1);
    let mut max = arg_number(ctx, args, 0)?;

    if args.len() > 1 {
        start = max;
        max = arg_number(ctx, args, 1)?;
    }
    if args.len() > 2 {
        step = arg_number(ctx, args, 2)?;
    }

    let step_is_zero = match step {
        Num::Int(i) => i == 0,
        Num::Float(f) => f == 0.0,
    };
    if step_is_zero {
        return Err(EvalError::argument("invalid step value 0"));
    }

    let mut values = Vec::new();
    if let (Num::Int(start), Num::Int(max), Num::Int(step)) = (start, max, step) {
        let mut i = start;
        while (step > 0 && i < max) || (step < 0 && i > max) {
            ctx.tick()?;
            values.push(Value::from(i));
            i += step;
        }
    } else {
        let (start, max, step) = (start.as_f64(), max.as_f64(), step.as_f64());
        let mut i = start;
        while (step > 0.0 && i < max) || (step < 0.0 && i > max) {
            ctx.tick()?;
            values.push(Value::from(i));
            i += step;
        }
    }

    Ok(Value::Array(std::rc::Rc::new(
        crate::array::Array::from_values(pos.clone(), scope.clone(), values),
    )))
}

// ── Control ──────────────────────────────────────────────────────────────────

/// Fail evaluation with the rendered arguments as the message.
fn error_fn(ctx: &Context, _: &Scope, _: &Position, args: &[Value]) -> Result<Value, EvalError> {
    let mut parts = Vec::new();
    for v in args {
        if let Ok(data) = v.interface(ctx) {
            match data {
                Json::String(s) => parts.push(s),
                other => parts.push(other.to_string()),
            }
        }
    }
    Err(EvalError::evaluation(parts.join(",")))
}

/// Stable sort with a user comparator `cmp(a, b) -> bool` meaning a < b.
/// Comparator failures surface as the overall result error.
fn sort_by(ctx: &Context, scope: &Scope, pos: &Position, args: &[Value]) -> Result<Value, EvalError> {
    expect_args(2, args)?;

    let mut values = Vec::new();
    let mut iter = args[0].iterator(ctx)?;
    while let Some(v) = iter.next(ctx)? {
        values.push(v);
    }
    let cmp = &args[1];

    let failure: RefCell<Option<EvalError>> = RefCell::new(None);
    let less = |a: &Value, b: &Value| -> bool {
        if failure.borrow().is_some() {
            return false;
        }
        let call_args = [
            KeyValue::positional(a.clone()),
            KeyValue::positional(b.clone()),
        ];
        match cmp
            .call(ctx, scope, pos, &call_args)
            .and_then(|v| v.interface(ctx))
        {
            Ok(Json::Bool(b)) => b,
            Ok(other) => {
                *failure.borrow_mut() = Some(EvalError::evaluation(format!(
                    "expected bool result, got {other}"
                )));
                false
            }
            Err(e) => {
                *failure.borrow_mut() = Some(e);
                false
            }
        }
    };

    values.sort_by(|a, b| {
        if less(a, b) {
            std::cmp::Ordering::Less
        } else if less(b, a) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });

    if let Some(err) = failure.into_inner() {
        return Err(err);
    }
    Ok(Value::Array(std::rc::Rc::new(
        crate::array::Array::from_values(pos.clone(), scope.clone(), values),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(
        func: NativeFn,
        ctx: &Context,
        args: &[Value],
    ) -> Result<Value, EvalError> {
        func(ctx, &Scope::default(), &Position::default(), args)
    }

    fn text(ctx: &Context, v: Value) -> String {
        match v.interface(ctx).unwrap() {
            Json::String(s) => s,
            other => panic!("expected string, got {other}"),
        }
    }

    #[test]
    fn test_base64_round_trip() {
        let ctx = Context::new(10_000);
        let encoded = call(base64_encode, &ctx, &[Value::from("hello")]).unwrap();
        assert_eq!(text(&ctx, encoded.clone()), "aGVsbG8=");
        let decoded = call(base64_decode, &ctx, &[encoded]).unwrap();
        assert_eq!(text(&ctx, decoded), "hello");
    }

    #[test]
    fn test_hex_round_trip() {
        let ctx = Context::new(10_000);
        let encoded = call(to_hex, &ctx, &[Value::from("ab")]).unwrap();
        assert_eq!(text(&ctx, encoded.clone()), "6162");
        let decoded = call(from_hex, &ctx, &[encoded]).unwrap();
        assert_eq!(text(&ctx, decoded), "ab");
    }

    #[test]
    fn test_hash_digests() {
        let ctx = Context::new(10_000);
        let empty = [Value::from("")];
        assert_eq!(
            text(&ctx, call(sha1sum, &ctx, &empty).unwrap()),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            text(&ctx, call(sha256sum, &ctx, &empty).unwrap()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_path_functions() {
        let ctx = Context::new(10_000);
        assert_eq!(
            text(&ctx, call(basename, &ctx, &[Value::from("/a/b/c.txt")]).unwrap()),
            "c.txt"
        );
        assert_eq!(
            text(&ctx, call(dirname, &ctx, &[Value::from("/a/b/c.txt")]).unwrap()),
            "/a/b"
        );
        assert_eq!(
            text(&ctx, call(file_ext, &ctx, &[Value::from("/a/b.c/d.txt")]).unwrap()),
            ".txt"
        );
        assert_eq!(
            text(&ctx, call(dirname, &ctx, &[Value::from("plain")]).unwrap()),
            "."
        );
    }

    #[test]
    fn test_split_host_port() {
        let ctx = Context::new(10_000);
        let v = call(split_host_port, &ctx, &[Value::from("example.com:8080")]).unwrap();
        assert_eq!(
            v.interface(&ctx).unwrap(),
            serde_json::json!(["example.com", "8080"])
        );
        let v = call(split_host_port, &ctx, &[Value::from("[::1]:80")]).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(["::1", "80"]));
    }

    #[test]
    fn test_join_host_port_accepts_number() {
        let ctx = Context::new(10_000);
        let v = call(
            join_host_port,
            &ctx,
            &[Value::from("::1"), Value::from(80i64)],
        )
        .unwrap();
        assert_eq!(text(&ctx, v), "[::1]:80");
    }

    #[test]
    fn test_range() {
        let ctx = Context::new(10_000);
        let v = call(num_range, &ctx, &[Value::from(4i64)]).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!([0, 1, 2, 3]));

        let v = call(
            num_range,
            &ctx,
            &[Value::from(5i64), Value::from(1i64), Value::from(-2i64)],
        )
        .unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!([5, 3]));

        let err = call(
            num_range,
            &ctx,
            &[Value::from(1i64), Value::from(5i64), Value::from(0i64)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid step value 0"));
    }

    #[test]
    fn test_to_title() {
        let ctx = Context::new(10_000);
        let v = call(to_title, &ctx, &[Value::from("hello wide world")]).unwrap();
        assert_eq!(text(&ctx, v), "Hello Wide World");
    }

    #[test]
    fn test_split_with_limit() {
        let ctx = Context::new(10_000);
        let v = call(
            split,
            &ctx,
            &[Value::from("a,b,c"), Value::from(","), Value::from(2i64)],
        )
        .unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(["a", "b,c"]));
    }

    #[test]
    fn test_index_of() {
        let ctx = Context::new(10_000);
        let v = call(index_of, &ctx, &[Value::from("abcd"), Value::from("cd")]).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(2));
        let v = call(index_of, &ctx, &[Value::from("abcd"), Value::from("zz")]).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(-1));
    }
}
