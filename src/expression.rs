// Expression evaluation: selector resolution and precedence-pass reduction

use crate::array::Array;
use crate::ast::{self, BinOp, Position};
use crate::context::Context;
use crate::error::{wrap_err, EvalError};
use crate::object::ObjectReference;
use crate::op::{binary_op, not};
use crate::scope::Scope;
use crate::value::{to_value, KeyValue, Value};

/// One reduction pass per precedence class, tightest binding first. Merge
/// binds loosest so `a & b + c` composes the sum.
const PASSES: &[&[BinOp]] = &[
    &[BinOp::Mul, BinOp::Div],
    &[BinOp::Add, BinOp::Sub],
    &[
        BinOp::Eq,
        BinOp::Ne,
        BinOp::Lt,
        BinOp::Le,
        BinOp::Gt,
        BinOp::Ge,
        BinOp::Match,
        BinOp::NotMatch,
    ],
    &[BinOp::And],
    &[BinOp::Or],
    &[BinOp::Merge],
];

/// Evaluate an expression: resolve every selector to a value, then collapse
/// the flat operator chain one precedence class at a time.
pub fn evaluate_expression(
    ctx: &Context,
    scope: &Scope,
    expr: &ast::Expression,
) -> Result<Value, EvalError> {
    let inner = || -> Result<Value, EvalError> {
        let first = selector_value(ctx, scope, &expr.selector)?;
        let mut chain: Vec<(Option<(BinOp, Position)>, Value)> = vec![(None, first)];
        for op in &expr.operators {
            let v = selector_value(ctx, scope, &op.selector)?;
            chain.push((Some((op.op, op.pos.clone())), v));
        }
        reduce(ctx, scope, chain)
    };
    inner().map_err(|e| wrap_err(&expr.pos, e))
}

fn reduce(
    ctx: &Context,
    scope: &Scope,
    mut chain: Vec<(Option<(BinOp, Position)>, Value)>,
) -> Result<Value, EvalError> {
    for pass in PASSES {
        let mut out: Vec<(Option<(BinOp, Position)>, Value)> = Vec::with_capacity(chain.len());
        for (op, value) in chain {
            match op {
                Some((op, pos)) if pass.contains(&op) => {
                    let Some(last) = out.last_mut() else {
                        return Err(EvalError::evaluation(format!(
                            "operator {op} has no left operand"
                        )));
                    };
                    last.1 = binary_op(ctx, scope, &pos, op, last.1.clone(), value)?;
                }
                other => out.push((other, value)),
            }
        }
        chain = out;
    }

    if chain.len() != 1 {
        // every operator belongs to a pass, so this is a construction error
        return Err(EvalError::evaluation("invalid operator chain"));
    }
    Ok(chain.remove(0).1)
}

/// Resolve a selector: base value, then postfix lookups, then `!`.
fn selector_value(ctx: &Context, scope: &Scope, sel: &ast::Selector) -> Result<Value, EvalError> {
    let mut base = match &sel.base {
        ast::SelectorBase::Identifier(name) => scope
            .lookup(ctx, name)?
            .ok_or_else(|| wrap_err(&sel.pos, EvalError::KeyNotFound(name.clone())))?,
        ast::SelectorBase::Value(v) => to_value(ctx, scope, v)?,
        ast::SelectorBase::Parens(v) => to_value(ctx, scope, v)?,
    };

    for lookup in &sel.lookups {
        base = apply_lookup(ctx, scope, base, lookup)?;
    }

    if sel.not {
        base = not(ctx, &sel.pos, base)?;
    }
    Ok(base)
}

fn apply_lookup(
    ctx: &Context,
    scope: &Scope,
    base: Value,
    lookup: &ast::Lookup,
) -> Result<Value, EvalError> {
    let result = match &lookup.kind {
        ast::LookupKind::Dot(name) => base
            .lookup(ctx, name)?
            .ok_or_else(|| EvalError::KeyNotFound(name.clone())),
        ast::LookupKind::Index(expr) => {
            let idx = evaluate_expression(ctx, scope, expr)?;
            base.index(ctx, &lookup.pos, &idx)
        }
        ast::LookupKind::Slice(start, end) => {
            let start = evaluate_expression(ctx, scope, start)?;
            let end = evaluate_expression(ctx, scope, end)?;
            base.slice(ctx, &start, &end)
        }
        ast::LookupKind::Call(call) => {
            let args = call_args(ctx, scope, call)?;
            base.call(ctx, scope, &lookup.pos, &args)
        }
    };
    result.map_err(|e| wrap_err(&lookup.pos, e))
}

/// Evaluate call arguments: positional values first, then named fields.
fn call_args(ctx: &Context, scope: &Scope, call: &ast::Call) -> Result<Vec<KeyValue>, EvalError> {
    let mut result = Vec::new();
    if let Some(positional) = &call.positional {
        let array = Array::from_ast(scope.clone(), positional.clone());
        let mut iter = array.iterator(ctx)?;
        while let Some(v) = iter.next(ctx)? {
            result.push(KeyValue::positional(v));
        }
    }
    if let Some(named) = &call.named {
        let id = ObjectReference::to_object(ctx, scope, named);
        result.extend(Value::Object(id).key_values(ctx)?);
    }
    Ok(result)
}
