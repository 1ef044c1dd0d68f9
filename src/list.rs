// List comprehension evaluation

use std::rc::Rc;

use crate::array::Array;
use crate::ast;
use crate::context::Context;
use crate::error::{wrap_err, EvalError};
use crate::expression::evaluate_expression;
use crate::object::ObjectReference;
use crate::scope::Scope;
use crate::value::{Locals, Type, Value};

/// Evaluate a `for` comprehension into an array of body objects.
///
/// Each surviving item is materialized under locals binding `last` (the
/// previous object, or an empty one), the index/key variable and the value
/// variable; the optional `if` filter runs under the same locals.
pub fn evaluate_list(
    ctx: &Context,
    scope: &Scope,
    expr: &ast::For,
) -> Result<Rc<Array>, EvalError> {
    let result = evaluate_list_inner(ctx, scope, expr);
    result.map_err(|e| wrap_err(&expr.pos, e))
}

fn evaluate_list_inner(
    ctx: &Context,
    scope: &Scope,
    expr: &ast::For,
) -> Result<Rc<Array>, EvalError> {
    let source = evaluate_expression(ctx, scope, &expr.source)?;
    let t = source.type_of(ctx)?;

    let items = match t {
        Type::Array => items_for_array(ctx, &source)?,
        Type::Object => items_for_object(ctx, &source)?,
        _ => {
            return Err(EvalError::evaluation(format!(
                "expression must evaluate to an array or object, got {t}"
            )))
        }
    };

    let mut result: Vec<Value> = Vec::new();
    for (key, value) in items {
        ctx.tick()?;

        let last = match result.last() {
            Some(v) => v.clone(),
            None => Value::Object(ctx.alloc(ObjectReference::new(
                expr.pos.clone(),
                Scope::default(),
                Vec::new(),
            ))),
        };

        let mut locals = Locals::default();
        locals.add("last", last);
        if let Some(index_var) = &expr.index_var {
            locals.add(index_var.as_str(), key);
        }
        locals.add(expr.value_var.as_str(), value);
        let item_scope = scope.push(Value::locals(locals));

        if let Some(condition) = &expr.condition {
            let v = evaluate_expression(ctx, &item_scope, condition)?;
            if !expect_bool(ctx, &v)? {
                continue;
            }
        }

        result.push(Value::Object(ObjectReference::to_object(
            ctx,
            &item_scope,
            &expr.object,
        )));
    }

    Ok(Rc::new(Array::from_values(
        expr.pos.clone(),
        scope.clone(),
        result,
    )))
}

fn items_for_array(ctx: &Context, source: &Value) -> Result<Vec<(Value, Value)>, EvalError> {
    let mut result = Vec::new();
    let mut iter = source.iterator(ctx)?;
    let mut index: i64 = 0;
    while let Some(v) = iter.next(ctx)? {
        result.push((Value::from(index), v));
        index += 1;
    }
    Ok(result)
}

fn items_for_object(ctx: &Context, source: &Value) -> Result<Vec<(Value, Value)>, EvalError> {
    let mut result = Vec::new();
    for kv in source.key_values(ctx)? {
        let key = kv.key.map(|k| Value::String(k)).unwrap_or(Value::Null);
        result.push((key, kv.value));
    }
    Ok(result)
}

fn expect_bool(ctx: &Context, v: &Value) -> Result<bool, EvalError> {
    let t = v.type_of(ctx)?;
    if t != Type::Bool {
        return Err(EvalError::evaluation(format!(
            "expected bool type, got: {t}"
        )));
    }
    match v.interface(ctx)? {
        serde_json::Value::Bool(b) => Ok(b),
        other => Err(EvalError::evaluation(format!("expected bool, got {other}"))),
    }
}
