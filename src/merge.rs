// Merge engine: type-compatible composition of two values
//
// Objects merge lazily by concatenating their field sources; individual keys
// are only re-merged when looked up.

use crate::ast::Position;
use crate::context::Context;
use crate::error::{wrap_err, EvalError};
use crate::field::FieldSource;
use crate::object::ObjectReference;
use crate::scope::Scope;
use crate::value::{Type, Value};

/// Merge `right` onto `left`. Null yields the other side, matching types are
/// required otherwise, non-objects take the right operand, and objects
/// produce a new lazy object over the combined scope.
pub fn merge(
    ctx: &Context,
    pos: &Position,
    left: Value,
    right: Value,
) -> Result<Value, EvalError> {
    ctx.tick()?;

    let lt = left.type_of(ctx)?;
    if lt == Type::Null {
        return Ok(right);
    }
    let rt = right.type_of(ctx)?;
    if rt == Type::Null {
        return Ok(left);
    }

    if lt != rt {
        return Err(wrap_err(
            pos,
            EvalError::evaluation(format!(
                "can not merge incompatible types {lt} and {rt}"
            )),
        ));
    }

    if lt == Type::Object {
        return merge_objects(ctx, pos, &left, &right);
    }
    Ok(right)
}

/// Fold a list of per-field hits for one key, left to right.
pub fn merge_slice(
    ctx: &Context,
    values: Vec<(Value, Position)>,
) -> Result<Value, EvalError> {
    let mut iter = values.into_iter();
    let Some((mut acc, _)) = iter.next() else {
        return Err(EvalError::evaluation("nothing to merge"));
    };
    for (value, pos) in iter {
        acc = merge(ctx, &pos, acc, value)?;
    }
    Ok(acc)
}

/// Merge two object-like values into a new lazy object: fields are the
/// concatenation (left first) and the scope is the union of both capture
/// scopes with the right side taking priority.
pub fn merge_objects(
    ctx: &Context,
    pos: &Position,
    left: &Value,
    right: &Value,
) -> Result<Value, EvalError> {
    // An all-embedded left object contributes its embedded value instead.
    let (lscope, lsources, _) = object_parts(ctx, left, true)?;
    let (rscope, rsources, rpos) = object_parts(ctx, right, false)?;

    let mut sources = lsources;
    sources.extend(rsources);

    let merged_pos = if rpos.is_set() { rpos } else { pos.clone() };
    let id = ctx.alloc(ObjectReference::new(
        merged_pos,
        lscope.merge(&rscope),
        sources,
    ));
    Ok(Value::Object(id))
}

fn object_parts(
    ctx: &Context,
    v: &Value,
    delegate_embedded: bool,
) -> Result<(Scope, Vec<FieldSource>, Position), EvalError> {
    match v {
        Value::Object(id) => {
            if delegate_embedded && ObjectReference::is_embedded(ctx, *id)? {
                let embedded =
                    ObjectReference::lookup(ctx, *id, crate::field::EMBEDDED_KEY)?;
                if let Some(inner) = embedded {
                    return object_parts(ctx, &inner, true);
                }
            }
            let this = ctx.object(*id);
            Ok((this.scope.clone(), this.sources.clone(), this.pos.clone()))
        }
        Value::Locals(l) => Ok((Scope::default(), l.field_sources(), Position::default())),
        Value::Abstract(Type::Object) => {
            Ok((Scope::default(), Vec::new(), Position::default()))
        }
        other => {
            let t = other.type_of(ctx)?;
            Err(EvalError::evaluation(format!(
                "can not merge non-object type {t}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_identity() {
        let ctx = Context::new(1_000);
        let pos = Position::default();
        let v = merge(&ctx, &pos, Value::Null, Value::from(5i64)).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(5));
        let v = merge(&ctx, &pos, Value::from(5i64), Value::Null).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(5));
    }

    #[test]
    fn test_scalar_right_wins() {
        let ctx = Context::new(1_000);
        let pos = Position::default();
        let v = merge(&ctx, &pos, Value::from(1i64), Value::from(2i64)).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(2));
    }

    #[test]
    fn test_incompatible_types() {
        let ctx = Context::new(1_000);
        let pos = Position::default();
        let err = merge(&ctx, &pos, Value::from(1i64), Value::from("x")).unwrap_err();
        assert!(err
            .to_string()
            .contains("can not merge incompatible types number and string"));
    }

    #[test]
    fn test_abstract_type_as_placeholder() {
        let ctx = Context::new(1_000);
        let pos = Position::default();
        // number & 5 → 5: the placeholder constrains, the concrete side wins
        let v = merge(&ctx, &pos, Value::Abstract(Type::Number), Value::from(5i64)).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(5));
        // number & "x" is a type error
        let err = merge(&ctx, &pos, Value::Abstract(Type::Number), Value::from("x")).unwrap_err();
        assert!(err.to_string().contains("incompatible types"));
    }
}
