// Scope chain: linked name environments with primary and secondary parents

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::Position;
use crate::context::Context;
use crate::error::EvalError;
use crate::merge;
use crate::value::Value;

/// An immutable scope chain node. Push, merge and disallow all return new
/// scopes; existing nodes are never mutated.
#[derive(Clone, Default, Debug)]
pub struct Scope {
    inner: Option<Rc<ScopeInner>>,
}

#[derive(Debug)]
struct ScopeInner {
    parent: Scope,
    secondary: Scope,
    value: Option<Value>,
    disallow: Option<Rc<HashSet<String>>>,
}

impl Scope {
    /// A new scope with `value`'s keys shadowing everything in `self`.
    pub fn push(&self, value: Value) -> Scope {
        Scope {
            inner: Some(Rc::new(ScopeInner {
                parent: self.clone(),
                secondary: Scope::default(),
                value: Some(value),
                disallow: None,
            })),
        }
    }

    /// Combine with `new_parent` so its bindings take priority; used when two
    /// objects merge and the result must see both capture scopes.
    pub fn merge(&self, new_parent: &Scope) -> Scope {
        if let (Some(a), Some(b)) = (&self.inner, &new_parent.inner) {
            if Rc::ptr_eq(a, b) {
                return self.clone();
            }
        }
        if self.inner.is_none() && new_parent.inner.is_none() {
            return Scope::default();
        }
        Scope {
            inner: Some(Rc::new(ScopeInner {
                parent: new_parent.clone(),
                secondary: self.clone(),
                value: None,
                disallow: None,
            })),
        }
    }

    /// A copy of this node with the given identifiers blocked from lookup.
    pub fn disallow<I>(&self, names: I) -> Scope
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let set: HashSet<String> = names.into_iter().map(Into::into).collect();
        let (parent, secondary, value) = match &self.inner {
            Some(inner) => (
                inner.parent.clone(),
                inner.secondary.clone(),
                inner.value.clone(),
            ),
            None => (Scope::default(), Scope::default(), None),
        };
        Scope {
            inner: Some(Rc::new(ScopeInner {
                parent,
                secondary,
                value,
                disallow: Some(Rc::new(set)),
            })),
        }
    }

    /// Resolve `key` against the bound value, then the parents. When both
    /// parents resolve, the results merge with the primary parent winning.
    pub fn lookup(&self, ctx: &Context, key: &str) -> Result<Option<Value>, EvalError> {
        let Some(inner) = &self.inner else {
            return Ok(None);
        };
        ctx.tick()?;

        if let Some(disallow) = &inner.disallow {
            if disallow.contains(key) {
                return Err(EvalError::cycle(format!(
                    "cycle detected looking up key {key}"
                )));
            }
        }

        if let Some(value) = &inner.value {
            if let Some(found) = value.lookup(ctx, key)? {
                return Ok(Some(found));
            }
        }

        let primary = inner.parent.lookup(ctx, key)?;
        let secondary = inner.secondary.lookup(ctx, key)?;

        match (primary, secondary) {
            (Some(p), Some(s)) => Ok(Some(merge::merge(ctx, &Position::default(), s, p)?)),
            (Some(p), None) => Ok(Some(p)),
            (None, Some(s)) => Ok(Some(s)),
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_shadows_parent() {
        let ctx = Context::new(1_000);
        let mut outer = crate::value::Locals::default();
        outer.add("a", Value::from("outer"));
        outer.add("b", Value::from("kept"));
        let mut inner = crate::value::Locals::default();
        inner.add("a", Value::from("inner"));

        let scope = Scope::default()
            .push(Value::locals(outer))
            .push(Value::locals(inner));

        let a = scope.lookup(&ctx, "a").unwrap().unwrap();
        assert_eq!(a.interface(&ctx).unwrap(), serde_json::json!("inner"));
        let b = scope.lookup(&ctx, "b").unwrap().unwrap();
        assert_eq!(b.interface(&ctx).unwrap(), serde_json::json!("kept"));
        assert!(scope.lookup(&ctx, "missing").unwrap().is_none());
    }

    #[test]
    fn test_disallow_blocks_lookup() {
        let ctx = Context::new(1_000);
        let mut locals = crate::value::Locals::default();
        locals.add("x", Value::from(1i64));
        let scope = Scope::default()
            .push(Value::locals(locals))
            .disallow(["x"]);

        let err = scope.lookup(&ctx, "x").unwrap_err();
        assert!(err.is_cycle());
    }
}
