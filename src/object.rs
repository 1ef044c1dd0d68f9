// ObjectReference: a lazy object built from field references
//
// Objects live in the context arena and are addressed by ObjectId, so the
// methods here are associated functions over (ctx, id).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{Map, Value as Json};
use tracing::trace;

use crate::ast::{self, Position};
use crate::context::{Context, ObjectId};
use crate::error::{wrap_err, EvalError};
use crate::field::{FieldReference, FieldSource, EMBEDDED_KEY};
use crate::merge::{merge_objects, merge_slice};
use crate::scope::Scope;
use crate::value::{KeyValue, Type, Value};

pub const RETURN_NAME: &str = "_return";
pub const ARGS_NAME: &str = "args";

pub struct ObjectReference {
    pub pos: Position,
    pub scope: Scope,
    pub sources: Vec<FieldSource>,
    state: RefCell<State>,
    embedded_lookup: Cell<bool>,
}

#[derive(Default)]
struct State {
    fields: Option<Rc<Vec<Rc<FieldReference>>>>,
    values: std::collections::HashMap<String, Value>,
    key_order: Option<Vec<String>>,
    embedded: Option<bool>,
    embedded_value: Option<Value>,
}

impl ObjectReference {
    pub fn new(pos: Position, scope: Scope, sources: Vec<FieldSource>) -> Self {
        ObjectReference {
            pos,
            scope,
            sources,
            state: RefCell::new(State::default()),
            embedded_lookup: Cell::new(false),
        }
    }

    /// Allocate a lazy object for an AST object literal under `scope`.
    pub fn to_object(ctx: &Context, scope: &Scope, object: &ast::Object) -> ObjectId {
        let sources = object
            .fields
            .iter()
            .map(|f| FieldSource::Ast(f.clone()))
            .collect();
        ctx.alloc(ObjectReference::new(
            object.pos.clone(),
            scope.clone(),
            sources,
        ))
    }

    /// Build the field references once. Plain fields close over the object
    /// itself; they are mirrored into an auxiliary parent object that
    /// `if`/`for` fields close over instead, so a condition can see its
    /// plain siblings without re-entering the conditional field that is
    /// being resolved.
    fn process(ctx: &Context, id: ObjectId) {
        let this = ctx.object(id);
        if this.state.borrow().fields.is_some() {
            return;
        }

        let parent_id = ctx.alloc(ObjectReference::new(
            this.pos.clone(),
            this.scope.clone(),
            Vec::new(),
        ));
        let parent = ctx.object(parent_id);

        let mut parent_fields = Vec::new();
        let mut fields = Vec::new();
        for source in &this.sources {
            let is_if_for = matches!(
                source,
                FieldSource::Ast(f) if f.if_field.is_some() || f.for_field.is_some()
            );
            if is_if_for {
                fields.push(Rc::new(FieldReference::new(
                    this.scope.push(Value::Object(parent_id)),
                    source.clone(),
                )));
            } else {
                parent_fields.push(Rc::new(FieldReference::new(
                    this.scope.push(Value::Object(parent_id)),
                    source.clone(),
                )));
                fields.push(Rc::new(FieldReference::new(
                    this.scope.push(Value::Object(id)),
                    source.clone(),
                )));
            }
        }

        parent.state.borrow_mut().fields = Some(Rc::new(parent_fields));
        this.state.borrow_mut().fields = Some(Rc::new(fields));
    }

    fn fields(ctx: &Context, id: ObjectId) -> Rc<Vec<Rc<FieldReference>>> {
        Self::process(ctx, id);
        let this = ctx.object(id);
        let fields = this.state.borrow().fields.clone();
        fields.unwrap_or_default()
    }

    /// Visible keys: union over non-`let` fields, deduplicated by first
    /// appearance, source order preserved.
    pub fn keys(ctx: &Context, id: ObjectId) -> Result<Vec<String>, EvalError> {
        let this = ctx.object(id);
        if let Some(order) = &this.state.borrow().key_order {
            return Ok(order.clone());
        }

        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for field in Self::fields(ctx, id).iter() {
            if field.is_let() {
                continue;
            }
            for key in field.keys(ctx)? {
                if seen.insert(key.clone()) {
                    result.push(key);
                }
            }
        }

        this.state.borrow_mut().key_order = Some(result.clone());
        Ok(result)
    }

    /// True when the object's fields are all embedded; mixing embedded and
    /// keyed fields is rejected here.
    pub fn is_embedded(ctx: &Context, id: ObjectId) -> Result<bool, EvalError> {
        let this = ctx.object(id);
        if let Some(embedded) = this.state.borrow().embedded {
            return Ok(embedded);
        }

        let fields = Self::fields(ctx, id);
        let embedded = match fields.first() {
            None => false,
            Some(first) => {
                let flag = first.is_embedded();
                for field in fields.iter().skip(1) {
                    if field.is_embedded() != flag {
                        return Err(wrap_err(
                            &this.pos,
                            EvalError::evaluation("can not mix embedded objects with fields"),
                        ));
                    }
                }
                flag
            }
        };

        this.state.borrow_mut().embedded = Some(embedded);
        Ok(embedded)
    }

    fn embedded_object(ctx: &Context, id: ObjectId) -> Result<Value, EvalError> {
        let this = ctx.object(id);
        if let Some(v) = &this.state.borrow().embedded_value {
            return Ok(v.clone());
        }
        let v = Self::lookup(ctx, id, EMBEDDED_KEY)?
            .ok_or_else(|| wrap_err(&this.pos, EvalError::evaluation("missing embedded value")))?;
        this.state.borrow_mut().embedded_value = Some(v.clone());
        Ok(v)
    }

    pub fn type_of(ctx: &Context, id: ObjectId) -> Result<Type, EvalError> {
        if Self::is_embedded(ctx, id)? {
            return Self::embedded_object(ctx, id)?.type_of(ctx);
        }
        Ok(Type::Object)
    }

    pub fn lookup(ctx: &Context, id: ObjectId, key: &str) -> Result<Option<Value>, EvalError> {
        let this = ctx.object(id);
        let result = Self::lookup_inner(ctx, id, key);
        result.map_err(|e| wrap_err(&this.pos, e))
    }

    fn lookup_inner(ctx: &Context, id: ObjectId, key: &str) -> Result<Option<Value>, EvalError> {
        ctx.tick()?;
        let this = ctx.object(id);

        if key != EMBEDDED_KEY && Self::is_embedded(ctx, id)? {
            if this.embedded_lookup.get() {
                return Ok(None);
            }
            this.embedded_lookup.set(true);
            let result = Self::embedded_object(ctx, id).and_then(|v| v.lookup(ctx, key));
            this.embedded_lookup.set(false);
            return result;
        }

        if let Some(v) = this.state.borrow().values.get(key) {
            return Ok(Some(v.clone()));
        }

        trace!(key, "object lookup");
        let mut hits: Vec<(Value, Position)> = Vec::new();
        for field in Self::fields(ctx, id).iter() {
            if let Some(v) = field.value(ctx, key)? {
                hits.push((v, field.position()));
            }
        }

        if hits.is_empty() {
            return Ok(None);
        }

        let merged = merge_slice(ctx, hits)?;
        this.state
            .borrow_mut()
            .values
            .insert(key.to_string(), merged.clone());
        Ok(Some(merged))
    }

    /// Materialize every visible key into a plain mapping.
    pub fn interface(ctx: &Context, id: ObjectId) -> Result<Json, EvalError> {
        let this = ctx.object(id);
        let result = Self::interface_inner(ctx, id);
        result.map_err(|e| wrap_err(&this.pos, e))
    }

    fn interface_inner(ctx: &Context, id: ObjectId) -> Result<Json, EvalError> {
        ctx.tick()?;

        if Self::is_embedded(ctx, id)? {
            return Self::embedded_object(ctx, id)?.interface(ctx);
        }

        let mut data = Map::new();
        for key in Self::keys(ctx, id)? {
            ctx.tick()?;
            let Some(value) = Self::lookup(ctx, id, &key)? else {
                continue;
            };
            data.insert(key, value.interface(ctx)?);
        }
        Ok(Json::Object(data))
    }

    pub fn index(
        ctx: &Context,
        id: ObjectId,
        pos: &Position,
        idx: &Value,
    ) -> Result<Value, EvalError> {
        let t = idx.type_of(ctx)?;
        if t != Type::String {
            return Err(wrap_err(
                pos,
                EvalError::evaluation(format!(
                    "can not use type {t} as an index to an object"
                )),
            ));
        }
        let Json::String(key) = idx.interface(ctx)? else {
            return Err(EvalError::evaluation("expected string index"));
        };
        Self::lookup(ctx, id, &key)?
            .ok_or_else(|| wrap_err(pos, EvalError::KeyNotFound(key)))
    }

    // ── Calls ────────────────────────────────────────────────────────────────

    /// Call the object as a function: lay the arguments over the declared
    /// `args` object via merge, then look up `_return` on the result.
    pub fn call(
        ctx: &Context,
        id: ObjectId,
        pos: &Position,
        args: &[KeyValue],
    ) -> Result<Value, EvalError> {
        let this = ctx.object(id);
        let result = Self::call_inner(ctx, id, pos, args);
        result.map_err(|e| wrap_err(&this.pos, e))
    }

    fn call_inner(
        ctx: &Context,
        id: ObjectId,
        pos: &Position,
        args: &[KeyValue],
    ) -> Result<Value, EvalError> {
        ctx.tick()?;
        let this = ctx.object(id);

        let arg_sources = Self::args_to_sources(ctx, id, args)?;
        let args_obj = ctx.alloc(ObjectReference::new(
            pos.clone(),
            this.scope.clone(),
            arg_sources,
        ));
        let call_obj = ctx.alloc(ObjectReference::new(
            pos.clone(),
            this.scope.clone(),
            vec![FieldSource::Static {
                key: ARGS_NAME.into(),
                value: Value::Object(args_obj),
            }],
        ));

        let merged = merge_objects(ctx, pos, &Value::Object(id), &Value::Object(call_obj))?;
        merged
            .lookup(ctx, RETURN_NAME)?
            .ok_or_else(|| EvalError::evaluation("invalid function missing return key"))
    }

    /// Zip positional arguments against the declared argument keys and let
    /// named arguments override by name. Surplus positional arguments are an
    /// arity error.
    fn args_to_sources(
        ctx: &Context,
        id: ObjectId,
        args: &[KeyValue],
    ) -> Result<Vec<FieldSource>, EvalError> {
        let Some(declared) = Self::lookup(ctx, id, ARGS_NAME)? else {
            return Ok(Vec::new());
        };

        let t = declared.type_of(ctx)?;
        if t != Type::Object {
            return Err(EvalError::evaluation(format!(
                "invalid function, args key is of type {t} not object"
            )));
        }
        let declared_keys = declared.key_values(ctx)?;

        let mut result = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            if let Some(key) = &arg.key {
                result.push(FieldSource::Static {
                    key: key.clone(),
                    value: arg.value.clone(),
                });
                continue;
            }
            let Some(declared_key) = declared_keys.get(i).and_then(|kv| kv.key.clone()) else {
                return Err(EvalError::argument(format!(
                    "function accepts {} args and received {}",
                    declared_keys.len(),
                    args.len()
                )));
            };
            result.push(FieldSource::Static {
                key: declared_key,
                value: arg.value.clone(),
            });
        }
        Ok(result)
    }
}
