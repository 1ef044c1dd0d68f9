// Value model: lazily resolved values with a uniform capability surface
// Scalars are inline; arrays and objects resolve on demand.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::array::Array;
use crate::ast::{self, Number, Position};
use crate::builtins;
use crate::context::{Context, ObjectId};
use crate::error::EvalError;
use crate::expression::evaluate_expression;
use crate::field::FieldSource;
use crate::list::evaluate_list;
use crate::object::ObjectReference;
use crate::scope::Scope;
use crate::strings::evaluate_string;

/// Type tag of a value. Stable across calls for any given value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Builtin,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::Null => "null",
            Type::Bool => "bool",
            Type::Number => "number",
            Type::String => "string",
            Type::Array => "array",
            Type::Object => "object",
            Type::Builtin => "builtin",
        };
        f.write_str(s)
    }
}

/// An evaluated (or lazily evaluating) value.
///
/// Objects are arena handles (see [`crate::context::ObjectId`]); everything
/// else clones in O(1) through `Rc` or by copy.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),
    Array(Rc<Array>),
    Object(ObjectId),
    /// Small ordered key/value surface: function argument frames, globals.
    Locals(Rc<Locals>),
    /// A native function from the standard library.
    Builtin(Builtin),
    /// Abstract type placeholder (`number`, `string`, ...): merges with
    /// concrete values but can never be materialized itself.
    Abstract(Type),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn locals(l: Locals) -> Self {
        Value::Locals(Rc::new(l))
    }

    pub fn type_of(&self, ctx: &Context) -> Result<Type, EvalError> {
        match self {
            Value::Null => Ok(Type::Null),
            Value::Bool(_) => Ok(Type::Bool),
            Value::Number(_) => Ok(Type::Number),
            Value::String(_) => Ok(Type::String),
            Value::Array(_) => Ok(Type::Array),
            Value::Object(id) => ObjectReference::type_of(ctx, *id),
            Value::Locals(_) => Err(EvalError::evaluation("locals have no type")),
            Value::Builtin(_) => Ok(Type::Builtin),
            Value::Abstract(t) => Ok(*t),
        }
    }

    /// Force full resolution into a plain data tree.
    pub fn interface(&self, ctx: &Context) -> Result<Json, EvalError> {
        match self {
            Value::Null => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::Number(n) => number_to_json(n),
            Value::String(s) => Ok(Json::String(s.to_string())),
            Value::Array(a) => a.interface(ctx),
            Value::Object(id) => ObjectReference::interface(ctx, *id),
            Value::Locals(_) => Err(EvalError::evaluation("locals can not be materialized")),
            Value::Builtin(_) => Ok(Json::Null),
            Value::Abstract(t) => Err(EvalError::evaluation(format!(
                "abstract value '{t}' can not be evaluated to a value"
            ))),
        }
    }

    /// Keyed lookup. Absent keys are `None`, not an error.
    pub fn lookup(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        match self {
            Value::Object(id) => ObjectReference::lookup(ctx, *id, key),
            Value::Locals(l) => Ok(l.lookup(key)),
            _ => Ok(None),
        }
    }

    /// Index with an evaluated value: integer for arrays, string for objects.
    pub fn index(&self, ctx: &Context, pos: &Position, idx: &Value) -> Result<Value, EvalError> {
        match self {
            Value::Array(a) => a.index(ctx, idx),
            Value::Object(id) => ObjectReference::index(ctx, *id, pos, idx),
            _ => {
                let t = self.type_of(ctx)?;
                Err(EvalError::evaluation(format!(
                    "type {t} does not support indexing"
                )))
            }
        }
    }

    pub fn slice(
        &self,
        ctx: &Context,
        start: &Value,
        end: &Value,
    ) -> Result<Value, EvalError> {
        match self {
            Value::Array(a) => a.slice(ctx, start, end),
            _ => {
                let t = self.type_of(ctx)?;
                Err(EvalError::evaluation(format!("type {t} is not sliceable")))
            }
        }
    }

    pub fn call(
        &self,
        ctx: &Context,
        scope: &Scope,
        pos: &Position,
        args: &[KeyValue],
    ) -> Result<Value, EvalError> {
        match self {
            Value::Builtin(b) => b.call(ctx, scope, pos, args),
            Value::Object(id) => ObjectReference::call(ctx, *id, pos, args),
            _ => {
                let t = self.type_of(ctx)?;
                Err(EvalError::evaluation(format!("type {t} is not callable")))
            }
        }
    }

    pub fn len(&self, ctx: &Context) -> Result<usize, EvalError> {
        match self {
            Value::String(s) => Ok(s.chars().count()),
            Value::Array(a) => a.len(ctx),
            Value::Object(id) => Ok(ObjectReference::keys(ctx, *id)?.len()),
            _ => {
                let t = self.type_of(ctx)?;
                Err(EvalError::evaluation(format!(
                    "type {t} does not support length"
                )))
            }
        }
    }

    pub fn iterator(&self, ctx: &Context) -> Result<ValueIter, EvalError> {
        match self {
            Value::Array(a) => a.iterator(ctx),
            Value::Abstract(Type::Array) => Ok(ValueIter::new(Vec::new())),
            _ => {
                let t = self.type_of(ctx)?;
                Err(EvalError::evaluation(format!(
                    "expected type array but got {t}"
                )))
            }
        }
    }

    pub fn keys(&self, ctx: &Context) -> Result<Vec<String>, EvalError> {
        match self {
            Value::Object(id) => ObjectReference::keys(ctx, *id),
            Value::Locals(l) => Ok(l.keys()),
            Value::Abstract(Type::Object) => Ok(Vec::new()),
            _ => {
                let t = self.type_of(ctx)?;
                Err(EvalError::evaluation(format!("type {t} has no keys")))
            }
        }
    }

    /// Ordered `(key, value)` pairs of an object-like value.
    pub fn key_values(&self, ctx: &Context) -> Result<Vec<KeyValue>, EvalError> {
        match self {
            Value::Locals(l) => Ok(l.key_values()),
            _ => {
                let mut result = Vec::new();
                for key in self.keys(ctx)? {
                    if let Some(value) = self.lookup(ctx, &key)? {
                        result.push(KeyValue {
                            key: Some(key.into()),
                            value,
                        });
                    }
                }
                Ok(result)
            }
        }
    }
}

fn number_to_json(n: &Number) -> Result<Json, EvalError> {
    if let Some(i) = n.as_i64() {
        return Ok(Json::from(i));
    }
    let f = n
        .as_f64()
        .ok_or_else(|| EvalError::evaluation(format!("invalid number literal: {n}")))?;
    serde_json::Number::from_f64(f)
        .map(Json::Number)
        .ok_or_else(|| EvalError::evaluation(format!("number {n} is not representable")))
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(Number::from_i64(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(Number::from_f64(v))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

// ── Key/value pairs and locals ───────────────────────────────────────────────

/// One call argument or object entry; `key` is `None` for positional
/// arguments.
#[derive(Clone)]
pub struct KeyValue {
    pub key: Option<Rc<str>>,
    pub value: Value,
}

impl KeyValue {
    pub fn positional(value: Value) -> Self {
        KeyValue { key: None, value }
    }

    pub fn named(key: impl Into<Rc<str>>, value: Value) -> Self {
        KeyValue {
            key: Some(key.into()),
            value,
        }
    }
}

/// An ordered set of named values exposed with an object-like surface.
#[derive(Clone, Default, Debug)]
pub struct Locals {
    values: IndexMap<Rc<str>, Value>,
}

impl Locals {
    pub fn add(&mut self, key: impl Into<Rc<str>>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.iter().map(|(k, _)| k.to_string()).collect()
    }

    pub fn key_values(&self) -> Vec<KeyValue> {
        self.values
            .iter()
            .map(|(k, v)| KeyValue {
                key: Some(k.clone()),
                value: v.clone(),
            })
            .collect()
    }

    /// The entries as synthetic field sources, for merging into objects.
    pub fn field_sources(&self) -> Vec<FieldSource> {
        self.values
            .iter()
            .map(|(k, v)| FieldSource::Static {
                key: k.clone(),
                value: v.clone(),
            })
            .collect()
    }
}

// ── Builtins ─────────────────────────────────────────────────────────────────

pub type NativeFn =
    fn(&Context, &Scope, &Position, &[Value]) -> Result<Value, EvalError>;

/// A named native function value.
#[derive(Clone, Debug)]
pub struct Builtin {
    pub name: &'static str,
    func: NativeFn,
}

impl Builtin {
    pub fn new(name: &'static str, func: NativeFn) -> Self {
        Builtin { name, func }
    }

    pub fn call(
        &self,
        ctx: &Context,
        scope: &Scope,
        pos: &Position,
        args: &[KeyValue],
    ) -> Result<Value, EvalError> {
        let values: Vec<Value> = args.iter().map(|kv| kv.value.clone()).collect();
        (self.func)(ctx, scope, pos, &values)
    }
}

// ── Iteration ────────────────────────────────────────────────────────────────

/// Iterator over the resolved elements of an array-like value. Every step
/// consumes a tick.
pub struct ValueIter {
    values: Vec<Value>,
    index: usize,
}

impl ValueIter {
    pub fn new(values: Vec<Value>) -> Self {
        ValueIter { values, index: 0 }
    }

    pub fn next(&mut self, ctx: &Context) -> Result<Option<Value>, EvalError> {
        ctx.tick()?;
        if self.index < self.values.len() {
            let v = self.values[self.index].clone();
            self.index += 1;
            Ok(Some(v))
        } else {
            Ok(None)
        }
    }
}

// ── AST conversion ───────────────────────────────────────────────────────────

/// Evaluate an AST under the global scope (builtins and `std` included).
pub fn eval(ctx: &Context, scope: &Scope, node: &ast::Value) -> Result<Value, EvalError> {
    let globals = builtins::new_builtin(ctx)?;
    to_value(ctx, &scope.push(globals), node)
}

/// Convert an AST node into a lazy value under `scope`.
///
/// Objects and arrays stay unresolved; strings, expressions and
/// comprehensions evaluate immediately.
pub fn to_value(ctx: &Context, scope: &Scope, node: &ast::Value) -> Result<Value, EvalError> {
    match &node.kind {
        ast::ValueKind::Null => Ok(Value::Null),
        ast::ValueKind::Bool(b) => Ok(Value::Bool(*b)),
        ast::ValueKind::Number(n) => Ok(Value::Number(n.clone())),
        ast::ValueKind::String(s) => Ok(Value::string(evaluate_string(ctx, scope, s)?)),
        ast::ValueKind::Array(a) => Ok(Value::Array(Rc::new(Array::from_ast(
            scope.clone(),
            a.clone(),
        )))),
        ast::ValueKind::Object(o) => Ok(Value::Object(ObjectReference::to_object(ctx, scope, o))),
        ast::ValueKind::Expression(e) => evaluate_expression(ctx, scope, e),
        ast::ValueKind::Comprehension(f) => Ok(Value::Array(evaluate_list(ctx, scope, f)?)),
    }
}

/// Import a plain JSON tree as a value. Objects become lazy objects with
/// synthetic fields so they take part in merges like any other object.
pub fn from_json(ctx: &Context, scope: &Scope, pos: &Position, data: &Json) -> Result<Value, EvalError> {
    match data {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::from(f))
            } else {
                Err(EvalError::evaluation(format!("invalid number: {n}")))
            }
        }
        Json::String(s) => Ok(Value::string(s.as_str())),
        Json::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(from_json(ctx, scope, pos, item)?);
            }
            Ok(Value::Array(Rc::new(Array::from_values(
                pos.clone(),
                scope.clone(),
                values,
            ))))
        }
        Json::Object(map) => {
            let mut sources = Vec::with_capacity(map.len());
            for (key, item) in map {
                sources.push(FieldSource::Static {
                    key: key.as_str().into(),
                    value: from_json(ctx, scope, pos, item)?,
                });
            }
            let id = ctx.alloc(ObjectReference::new(pos.clone(), scope.clone(), sources));
            Ok(Value::Object(id))
        }
    }
}
