// FieldReference: demand-driven resolution of a single object field
//
// Cycle discipline: every substantial method takes the non-reentrant
// `resolving` lock; paths that re-enter while locked record the requested
// key in `no_match` and report not-found instead of recursing. A later
// resolution that lands on a `no_match` key raises a cycle error.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use regex::Regex;
use tracing::trace;

use crate::ast::{self, Position};
use crate::context::Context;
use crate::error::{wrap_err, EvalError};
use crate::expression::evaluate_expression;
use crate::list::evaluate_list;
use crate::object::ObjectReference;
use crate::scope::Scope;
use crate::strings::{evaluate_string, quick_match, CouldBe};
use crate::value::{to_value, Type, Value};

/// Reserved key naming the embedded slot of an object whose single
/// contribution is a non-object value. Spelled with surrounding spaces so it
/// can never collide with a parsed identifier.
pub const EMBEDDED_KEY: &str = " __embedded__ ";

/// Where a field comes from: a parsed AST field, a synthetic `(key, value)`
/// pair (call frames, builtins, imported JSON), or a pre-resolved embedded
/// value (`for` expansion).
#[derive(Clone)]
pub enum FieldSource {
    Ast(Arc<ast::Field>),
    Static { key: Rc<str>, value: Value },
    Embedded(Value),
}

pub struct FieldReference {
    pub scope: Scope,
    pub source: FieldSource,
    resolving: Cell<bool>,
    values: RefCell<HashMap<String, Value>>,
    misses: RefCell<HashSet<String>>,
    no_match: RefCell<HashSet<String>>,
    body: RefCell<Option<Value>>,
    condition: Cell<Option<bool>>,
    key: RefCell<Option<String>>,
    embedded_value: RefCell<Option<Value>>,
}

struct Lock<'a>(&'a Cell<bool>);

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl FieldReference {
    pub fn new(scope: Scope, source: FieldSource) -> Self {
        let embedded_value = match &source {
            FieldSource::Embedded(v) => Some(v.clone()),
            _ => None,
        };
        FieldReference {
            scope,
            source,
            resolving: Cell::new(false),
            values: RefCell::new(HashMap::new()),
            misses: RefCell::new(HashSet::new()),
            no_match: RefCell::new(HashSet::new()),
            body: RefCell::new(None),
            condition: Cell::new(None),
            key: RefCell::new(None),
            embedded_value: RefCell::new(embedded_value),
        }
    }

    fn ast_field(&self) -> Option<&Arc<ast::Field>> {
        match &self.source {
            FieldSource::Ast(f) => Some(f),
            _ => None,
        }
    }

    pub fn position(&self) -> Position {
        self.ast_field()
            .map(|f| f.pos.clone())
            .unwrap_or_default()
    }

    pub fn is_embedded(&self) -> bool {
        match &self.source {
            FieldSource::Ast(f) => f.embedded,
            FieldSource::Embedded(_) => true,
            FieldSource::Static { .. } => false,
        }
    }

    pub fn is_let(&self) -> bool {
        self.ast_field().map(|f| f.let_).unwrap_or(false)
    }

    fn has_if_for(&self) -> bool {
        self.ast_field()
            .map(|f| f.if_field.is_some() || f.for_field.is_some())
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<Lock<'_>, EvalError> {
        if self.resolving.get() {
            return Err(wrap_err(
                &self.position(),
                EvalError::cycle("cycle detected"),
            ));
        }
        self.resolving.set(true);
        Ok(Lock(&self.resolving))
    }

    fn set_no_match(&self, key: &str) {
        self.no_match.borrow_mut().insert(key.to_string());
    }

    /// The value this field contributes for `key`, if any. Both hits and
    /// misses are cached per key.
    pub fn value(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        if let FieldSource::Static { key: own, value } = &self.source {
            if &**own == key {
                return Ok(Some(value.clone()));
            }
            return Ok(None);
        }

        if self.misses.borrow().contains(key) {
            return Ok(None);
        }
        if let Some(v) = self.values.borrow().get(key) {
            return Ok(Some(v.clone()));
        }

        let result = if self.has_if_for() {
            self.process_if_for(ctx, key)?
        } else {
            self.process_key_field(ctx, key)?
        };

        match result {
            Some(v) => {
                self.values.borrow_mut().insert(key.to_string(), v.clone());
                Ok(Some(v))
            }
            None => {
                self.misses.borrow_mut().insert(key.to_string());
                Ok(None)
            }
        }
    }

    /// The set of keys this field contributes. Match fields are never
    /// enumerated; embedded and `if`/`for` fields expose their body's keys.
    pub fn keys(&self, ctx: &Context) -> Result<Vec<String>, EvalError> {
        match &self.source {
            FieldSource::Static { key, .. } => return Ok(vec![key.to_string()]),
            FieldSource::Embedded(_) => return self.embedded_keys(ctx),
            FieldSource::Ast(_) => {}
        }
        let field = self.ast_field().expect("ast field");

        if field.key.is_match {
            return Ok(Vec::new());
        }
        if field.embedded {
            return self.embedded_keys(ctx);
        }
        if field.key.is_empty() {
            let Some(body) = self.get_body(ctx, "")? else {
                return Ok(Vec::new());
            };
            if body.type_of(ctx)? == Type::Object {
                return body.keys(ctx);
            }
            return Ok(Vec::new());
        }

        let (key, _) = self.resolve_key(ctx, "")?;
        Ok(vec![key])
    }

    fn embedded_keys(&self, ctx: &Context) -> Result<Vec<String>, EvalError> {
        let v = self.embedded_value(ctx)?;
        if v.type_of(ctx)? == Type::Object {
            return v.keys(ctx);
        }
        Ok(vec![EMBEDDED_KEY.to_string()])
    }

    // ── Keyed and embedded fields ────────────────────────────────────────────

    fn process_key_field(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        if self.is_embedded() {
            return self.lookup_embedded_key(ctx, key);
        }
        if !self.match_key(ctx, key)? {
            return Ok(None);
        }

        let _lock = self.lock()?;
        let field = self.ast_field().expect("ast field");
        let value = field
            .value
            .as_ref()
            .ok_or_else(|| EvalError::evaluation("field has no value"))?;
        Ok(Some(to_value(ctx, &self.scope, value)?))
    }

    fn match_key(&self, ctx: &Context, key: &str) -> Result<bool, EvalError> {
        let field = self.ast_field().expect("ast field");
        let Some(name) = &field.key.name else {
            return Ok(false);
        };

        if !field.key.is_match {
            match quick_match(name, key) {
                CouldBe::True => return Ok(true),
                CouldBe::False => return Ok(false),
                CouldBe::Maybe => {}
            }
        }

        let (resolved, ok) = self.resolve_key(ctx, key)?;
        if !ok {
            return Ok(false);
        }

        if field.key.is_match {
            let re = Regex::new(&resolved).map_err(|e| {
                wrap_err(&field.key.pos, EvalError::evaluation(format!("{e}")))
            })?;
            return Ok(re.is_match(key));
        }
        Ok(resolved == key)
    }

    /// Evaluate the field's key. While the field is already resolving a
    /// non-empty request records a `no_match` entry and reports not-found —
    /// the cycle-safe fast exit for interpolated keys.
    fn resolve_key(&self, ctx: &Context, requested: &str) -> Result<(String, bool), EvalError> {
        if let Some(k) = &*self.key.borrow() {
            return Ok((k.clone(), true));
        }

        if self.resolving.get() && !requested.is_empty() {
            self.set_no_match(requested);
            return Ok((String::new(), false));
        }

        let _lock = self.lock()?;
        let field = self.ast_field().expect("ast field");
        let name = field.key.name.as_ref().expect("non-empty key");
        let resolved = evaluate_string(ctx, &self.scope, name)?;
        trace!(key = %resolved, "resolved field key");

        if self.no_match.borrow().contains(&resolved) {
            return Err(wrap_err(
                &field.key.pos,
                EvalError::cycle(format!("cycle detected for key evaluated to {resolved}")),
            ));
        }
        self.no_match.borrow_mut().clear();
        *self.key.borrow_mut() = Some(resolved.clone());
        Ok((resolved, true))
    }

    fn lookup_embedded_key(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        if self.resolving.get() {
            self.set_no_match(key);
            return Ok(None);
        }
        let v = self.embedded_value(ctx)?;
        self.lookup_key_in_value(ctx, key, &v)
    }

    fn embedded_value(&self, ctx: &Context) -> Result<Value, EvalError> {
        if let Some(v) = &*self.embedded_value.borrow() {
            return Ok(v.clone());
        }
        let _lock = self.lock()?;
        let field = self.ast_field().expect("ast field");
        let value = field
            .value
            .as_ref()
            .ok_or_else(|| EvalError::evaluation("embedded field has no value"))?;
        let v = to_value(ctx, &self.scope, value)?;
        *self.embedded_value.borrow_mut() = Some(v.clone());
        Ok(v)
    }

    /// Look `key` up on a resolved body. Pending `no_match` keys are probed
    /// first: if the body can actually produce one of them, the earlier
    /// not-found answer was a lie born of recursion, so fail as a cycle.
    fn lookup_key_in_value(
        &self,
        ctx: &Context,
        key: &str,
        v: &Value,
    ) -> Result<Option<Value>, EvalError> {
        let pending = std::mem::take(&mut *self.no_match.borrow_mut());

        if key == EMBEDDED_KEY {
            if pending.contains(EMBEDDED_KEY) {
                return Err(wrap_err(
                    &self.position(),
                    EvalError::cycle("cycle detected resolving embedded object"),
                ));
            }
            return Ok(Some(v.clone()));
        }

        for missed in &pending {
            if v.lookup(ctx, missed)?.is_some() {
                return Err(wrap_err(
                    &self.position(),
                    EvalError::cycle(format!("cycle detected resolving key: {missed}")),
                ));
            }
        }

        v.lookup(ctx, key)
    }

    // ── `if` and `for` fields ────────────────────────────────────────────────

    fn process_if_for(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        let Some(body) = self.get_body(ctx, key)? else {
            return Ok(None);
        };
        self.lookup_key_in_value(ctx, key, &body)
    }

    fn get_body(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        let field = self.ast_field().expect("ast field");
        if field.if_field.is_some() {
            return self.if_body(ctx, key);
        }
        Ok(Some(self.for_body(ctx)?))
    }

    fn if_body(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        if let Some(cond) = self.condition.get() {
            if cond {
                return Ok(self.body.borrow().clone());
            }
            return Ok(None);
        }

        if self.resolving.get() {
            self.set_no_match(key);
            return Ok(None);
        }

        let _lock = self.lock()?;
        let field = self.ast_field().expect("ast field");
        let if_field = field.if_field.as_ref().expect("if field");

        // Key enumeration passes the empty key and must see the body.
        if !key.is_empty() && quick_if_no_key(key, if_field) {
            return Ok(None);
        }

        let body = self.eval_if_body(ctx, if_field)?;
        self.condition.set(Some(body.is_some()));
        *self.body.borrow_mut() = body.clone();
        Ok(body)
    }

    fn eval_if_body(&self, ctx: &Context, if_field: &ast::If) -> Result<Option<Value>, EvalError> {
        if self.check_condition(ctx, if_field)? {
            let id = ObjectReference::to_object(ctx, &self.scope, &if_field.object);
            return Ok(Some(Value::Object(id)));
        }
        match &if_field.else_field {
            Some(next) => self.eval_if_body(ctx, next),
            None => Ok(None),
        }
    }

    fn check_condition(&self, ctx: &Context, if_field: &ast::If) -> Result<bool, EvalError> {
        let inner = || -> Result<bool, EvalError> {
            let Some(condition) = &if_field.condition else {
                return Ok(true);
            };
            let v = evaluate_expression(ctx, &self.scope, condition)?;
            let t = v.type_of(ctx)?;
            if t != Type::Bool {
                return Err(EvalError::evaluation(format!(
                    "expecting boolean, expression evaluated to {t}"
                )));
            }
            match v.interface(ctx)? {
                serde_json::Value::Bool(b) => Ok(b),
                other => Err(EvalError::evaluation(format!(
                    "expecting boolean, got {other}"
                ))),
            }
        };
        inner().map_err(|e| wrap_err(&self.position(), e))
    }

    /// Expand the `for` iteration into one object whose fields embed the
    /// produced element objects. While the expansion is in flight, callers
    /// get a placeholder with the loop variables disallowed so the body
    /// cannot feed on itself.
    fn for_body(&self, ctx: &Context) -> Result<Value, EvalError> {
        if let Some(body) = &*self.body.borrow() {
            return Ok(body.clone());
        }

        let field = self.ast_field().expect("ast field");
        let for_field = field.for_field.as_ref().expect("for field");

        if self.resolving.get() {
            let vars: Vec<&str> = for_field
                .index_var
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(for_field.value_var.as_str()))
                .collect();
            let id = ObjectReference::to_object(
                ctx,
                &self.scope.disallow(vars),
                &for_field.object,
            );
            return Ok(Value::Object(id));
        }

        let _lock = self.lock()?;
        let list = evaluate_list(ctx, &self.scope, for_field)?;

        let mut sources = Vec::new();
        let mut iter = list.iterator(ctx)?;
        while let Some(element) = iter.next(ctx)? {
            sources.push(FieldSource::Embedded(element));
        }
        let id = ctx.alloc(ObjectReference::new(
            for_field.object.pos.clone(),
            self.scope.clone(),
            sources,
        ));
        let body = Value::Object(id);
        *self.body.borrow_mut() = Some(body.clone());
        Ok(body)
    }
}

/// Static pre-check for `if` chains: true when no branch object could
/// produce `key`, judged from the ASTs alone. Anything dynamic (embedded,
/// match keys, nested `if`/`for`) counts as possibly producing it.
fn quick_if_no_key(key: &str, if_field: &ast::If) -> bool {
    if !object_lacks_key(&if_field.object, key) {
        return false;
    }
    match &if_field.else_field {
        Some(next) => quick_if_no_key(key, next),
        None => true,
    }
}

fn object_lacks_key(object: &ast::Object, key: &str) -> bool {
    for field in &object.fields {
        if field.let_ {
            continue;
        }
        if field.embedded || field.if_field.is_some() || field.for_field.is_some() {
            return false;
        }
        let Some(name) = &field.key.name else {
            return false;
        };
        if field.key.is_match {
            return false;
        }
        if quick_match(name, key) != CouldBe::False {
            return false;
        }
    }
    true
}
