// Binary and unary operator semantics

use std::rc::Rc;

use regex::Regex;
use serde_json::Value as Json;

use crate::array::Array;
use crate::ast::{BinOp, Position};
use crate::context::Context;
use crate::error::{wrap_err, EvalError};
use crate::merge;
use crate::scope::Scope;
use crate::value::{Type, Value};

/// A number pulled out of a value, keeping the integer/float distinction.
#[derive(Clone, Copy, Debug)]
enum Num {
    Int(i64),
    Float(f64),
}

pub fn binary_op(
    ctx: &Context,
    _scope: &Scope,
    pos: &Position,
    op: BinOp,
    left: Value,
    right: Value,
) -> Result<Value, EvalError> {
    let result = binary_op_inner(ctx, pos, op, left, right);
    result.map_err(|e| wrap_err(pos, e))
}

fn binary_op_inner(
    ctx: &Context,
    pos: &Position,
    op: BinOp,
    left: Value,
    right: Value,
) -> Result<Value, EvalError> {
    if op == BinOp::Merge {
        return merge::merge(ctx, pos, left, right);
    }
    if matches!(op, BinOp::Eq | BinOp::Ne) {
        return equality(ctx, op, &left, &right);
    }

    let lt = left.type_of(ctx)?;
    let rt = right.type_of(ctx)?;
    let incompatible = || EvalError::IncompatibleTypes {
        op: op.to_string(),
        left: lt,
        right: rt,
    };
    if lt != rt {
        return Err(incompatible());
    }

    match op {
        BinOp::Add if lt == Type::Array => {
            let mut values = Vec::new();
            let mut iter = left.iterator(ctx)?;
            while let Some(v) = iter.next(ctx)? {
                values.push(v);
            }
            let mut iter = right.iterator(ctx)?;
            while let Some(v) = iter.next(ctx)? {
                values.push(v);
            }
            Ok(Value::Array(Rc::new(Array::from_values(
                pos.clone(),
                Scope::default(),
                values,
            ))))
        }
        BinOp::Add if lt == Type::String => {
            let l = string_of(ctx, &left)?;
            let r = string_of(ctx, &right)?;
            Ok(Value::string(format!("{l}{r}")))
        }
        BinOp::And | BinOp::Or => {
            if lt != Type::Bool {
                return Err(incompatible());
            }
            let l = bool_of(ctx, &left)?;
            let r = bool_of(ctx, &right)?;
            Ok(Value::Bool(if op == BinOp::And { l && r } else { l || r }))
        }
        BinOp::Match | BinOp::NotMatch => {
            if lt != Type::String {
                return Err(incompatible());
            }
            let l = string_of(ctx, &left)?;
            let pattern = string_of(ctx, &right)?;
            let re = Regex::new(&pattern)
                .map_err(|e| EvalError::evaluation(format!("invalid pattern: {e}")))?;
            let matched = re.is_match(&l);
            Ok(Value::Bool(if op == BinOp::Match {
                matched
            } else {
                !matched
            }))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if lt != Type::Number {
                return Err(incompatible());
            }
            let l = number_of(ctx, &left)?;
            let r = number_of(ctx, &right)?;
            Ok(Value::Bool(compare(op, l, r)))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            if lt != Type::Number {
                return Err(incompatible());
            }
            let l = number_of(ctx, &left)?;
            let r = number_of(ctx, &right)?;
            arithmetic(op, l, r)
        }
        BinOp::Eq | BinOp::Ne | BinOp::Merge => unreachable!("handled above"),
    }
}

/// `!` requires a boolean operand.
pub fn not(ctx: &Context, pos: &Position, v: Value) -> Result<Value, EvalError> {
    match v {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => {
            let t = other.type_of(ctx)?;
            Err(wrap_err(
                pos,
                EvalError::evaluation(format!("operator ! not applicable for type: {t}")),
            ))
        }
    }
}

/// `==`/`!=`. A null operand compares by type alone; numbers compare on the
/// float path when either side is a float; everything else compares resolved
/// interface values.
fn equality(ctx: &Context, op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let lt = left.type_of(ctx)?;
    let rt = right.type_of(ctx)?;

    let equal = if lt == Type::Null || rt == Type::Null {
        lt == rt
    } else if lt != rt {
        return Err(EvalError::IncompatibleTypes {
            op: op.to_string(),
            left: lt,
            right: rt,
        });
    } else if lt == Type::Number {
        match (number_of(ctx, left)?, number_of(ctx, right)?) {
            (Num::Int(a), Num::Int(b)) => a == b,
            (a, b) => as_f64(a) == as_f64(b),
        }
    } else {
        left.interface(ctx)? == right.interface(ctx)?
    };

    Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }))
}

fn arithmetic(op: BinOp, l: Num, r: Num) -> Result<Value, EvalError> {
    if let (Num::Int(a), Num::Int(b)) = (l, r) {
        let v = match op {
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(EvalError::evaluation("division by zero"));
                }
                a / b
            }
            _ => unreachable!("arithmetic operator"),
        };
        return Ok(Value::from(v));
    }

    let a = as_f64(l);
    let b = as_f64(r);
    let v = match op {
        BinOp::Mul => a * b,
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(EvalError::evaluation("division by zero"));
            }
            a / b
        }
        _ => unreachable!("arithmetic operator"),
    };
    Ok(Value::from(v))
}

fn compare(op: BinOp, l: Num, r: Num) -> bool {
    if let (Num::Int(a), Num::Int(b)) = (l, r) {
        return match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            BinOp::Ge => a >= b,
            _ => false,
        };
    }
    let a = as_f64(l);
    let b = as_f64(r);
    match op {
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        _ => false,
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn number_of(ctx: &Context, v: &Value) -> Result<Num, EvalError> {
    match v.interface(ctx)? {
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Num::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Num::Float(f))
            } else {
                Err(EvalError::evaluation(format!("invalid number: {n}")))
            }
        }
        other => Err(EvalError::evaluation(format!(
            "expected number, got {other}"
        ))),
    }
}

fn string_of(ctx: &Context, v: &Value) -> Result<String, EvalError> {
    match v.interface(ctx)? {
        Json::String(s) => Ok(s),
        other => Err(EvalError::evaluation(format!(
            "expected string, got {other}"
        ))),
    }
}

fn bool_of(ctx: &Context, v: &Value) -> Result<bool, EvalError> {
    match v.interface(ctx)? {
        Json::Bool(b) => Ok(b),
        other => Err(EvalError::evaluation(format!("expected bool, got {other}"))),
    }
}
