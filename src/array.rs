// Lazy arrays: unresolved element nodes resolved and memoized on demand

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::ast::{self, Position};
use crate::context::Context;
use crate::error::{wrap_err, EvalError};
use crate::scope::Scope;
use crate::value::{to_value, Value, ValueIter};

/// An array value. Elements stay as AST nodes until the first operation that
/// needs them; the resolved slice is memoized.
#[derive(Debug)]
pub struct Array {
    pub pos: Position,
    scope: Scope,
    source: Option<Arc<ast::Array>>,
    values: RefCell<Option<Rc<Vec<Value>>>>,
}

impl Array {
    pub fn from_ast(scope: Scope, source: Arc<ast::Array>) -> Self {
        Array {
            pos: source.pos.clone(),
            scope,
            source: Some(source),
            values: RefCell::new(None),
        }
    }

    pub fn from_values(pos: Position, scope: Scope, values: Vec<Value>) -> Self {
        Array {
            pos,
            scope,
            source: None,
            values: RefCell::new(Some(Rc::new(values))),
        }
    }

    /// Resolve every element to a value, once.
    pub fn values(&self, ctx: &Context) -> Result<Rc<Vec<Value>>, EvalError> {
        if let Some(values) = &*self.values.borrow() {
            return Ok(values.clone());
        }
        let mut result = Vec::new();
        if let Some(source) = &self.source {
            for node in &source.values {
                result.push(to_value(ctx, &self.scope, node)?);
            }
        }
        let values = Rc::new(result);
        *self.values.borrow_mut() = Some(values.clone());
        Ok(values)
    }

    pub fn len(&self, ctx: &Context) -> Result<usize, EvalError> {
        Ok(self.values(ctx)?.len())
    }

    pub fn iterator(&self, ctx: &Context) -> Result<ValueIter, EvalError> {
        Ok(ValueIter::new(self.values(ctx)?.to_vec()))
    }

    pub fn index(&self, ctx: &Context, idx: &Value) -> Result<Value, EvalError> {
        let result = self.index_inner(ctx, idx);
        result.map_err(|e| wrap_err(&self.pos, e))
    }

    fn index_inner(&self, ctx: &Context, idx: &Value) -> Result<Value, EvalError> {
        let Value::Number(n) = idx else {
            let t = idx.type_of(ctx)?;
            return Err(EvalError::evaluation(format!(
                "can not use type {t} as an index to an array"
            )));
        };
        let wanted = n.as_i64().ok_or_else(|| {
            EvalError::evaluation(format!(
                "can only use valid integers as an index to an array, got {n}"
            ))
        })?;

        let mut iter = self.iterator(ctx)?;
        let mut i: i64 = 0;
        while let Some(v) = iter.next(ctx)? {
            if i == wanted {
                return Ok(v);
            }
            i += 1;
        }
        Err(EvalError::evaluation(format!(
            "index out of bound {wanted}, len {i}"
        )))
    }

    /// `[start:end]` on integer bounds; the result shares element values.
    pub fn slice(&self, ctx: &Context, start: &Value, end: &Value) -> Result<Value, EvalError> {
        let result = self.slice_inner(ctx, start, end);
        result.map_err(|e| wrap_err(&self.pos, e))
    }

    fn slice_inner(&self, ctx: &Context, start: &Value, end: &Value) -> Result<Value, EvalError> {
        ctx.tick()?;
        let values = self.values(ctx)?;
        let start = slice_bound(ctx, start)?;
        let end = slice_bound(ctx, end)?;
        if start > end || end > values.len() {
            return Err(EvalError::evaluation(format!(
                "slice bounds out of range [{start}:{end}] with length {}",
                values.len()
            )));
        }
        Ok(Value::Array(Rc::new(Array::from_values(
            self.pos.clone(),
            self.scope.clone(),
            values[start..end].to_vec(),
        ))))
    }

    pub fn interface(&self, ctx: &Context) -> Result<Json, EvalError> {
        let inner = || -> Result<Json, EvalError> {
            ctx.tick()?;
            let values = self.values(ctx)?;
            let mut result = Vec::with_capacity(values.len());
            for v in values.iter() {
                result.push(v.interface(ctx)?);
            }
            Ok(Json::Array(result))
        };
        inner().map_err(|e| wrap_err(&self.pos, e))
    }
}

fn slice_bound(ctx: &Context, v: &Value) -> Result<usize, EvalError> {
    let Value::Number(n) = v else {
        let t = v.type_of(ctx)?;
        return Err(EvalError::evaluation(format!(
            "slice arguments must be a number got {t}"
        )));
    };
    let i = n.as_i64().ok_or_else(|| {
        EvalError::evaluation(format!("slice arguments must be an integer got {n}"))
    })?;
    usize::try_from(i)
        .map_err(|_| EvalError::evaluation(format!("slice arguments must be non-negative got {i}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(ctx: &Context, values: &[i64]) -> Array {
        let _ = ctx;
        Array::from_values(
            Position::default(),
            Scope::default(),
            values.iter().map(|v| Value::from(*v)).collect(),
        )
    }

    #[test]
    fn test_index() {
        let ctx = Context::new(1_000);
        let arr = ints(&ctx, &[10, 20, 30]);
        let v = arr.index(&ctx, &Value::from(1i64)).unwrap();
        assert_eq!(v.interface(&ctx).unwrap(), serde_json::json!(20));

        let err = arr.index(&ctx, &Value::from(9i64)).unwrap_err();
        assert!(err.to_string().contains("index out of bound"));
    }

    #[test]
    fn test_slice_shares_elements() {
        let ctx = Context::new(1_000);
        let arr = ints(&ctx, &[1, 2, 3, 4]);
        let sliced = arr
            .slice(&ctx, &Value::from(1i64), &Value::from(3i64))
            .unwrap();
        assert_eq!(
            sliced.interface(&ctx).unwrap(),
            serde_json::json!([2, 3])
        );
    }

    #[test]
    fn test_slice_requires_integers() {
        let ctx = Context::new(1_000);
        let arr = ints(&ctx, &[1, 2]);
        let err = arr
            .slice(&ctx, &Value::from(0.5), &Value::from(1i64))
            .unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }
}
