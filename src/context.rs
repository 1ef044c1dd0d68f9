// Evaluation context: execution budget, cancellation, object arena

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EvalError;
use crate::object::ObjectReference;

/// Default execution budget for one decode.
pub const DEFAULT_TICKS: i64 = 10_000;

/// Handle of an object allocated in the context arena.
///
/// Objects push themselves into the scope of their own fields; routing that
/// self-reference through an integer handle keeps the value graph free of
/// `Rc` cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectId(usize);

/// Per-decode evaluation state.
///
/// Single-owner and single-threaded: the counter and arena use cell types,
/// and one context services one decode at a time.
pub struct Context {
    ticks: Cell<i64>,
    cancel: Option<Arc<AtomicBool>>,
    objects: RefCell<Vec<Rc<ObjectReference>>>,
}

impl Context {
    pub fn new(ticks: i64) -> Self {
        Context {
            ticks: Cell::new(ticks),
            cancel: None,
            objects: RefCell::new(Vec::new()),
        }
    }

    /// Observe `flag` at every tick; setting it cancels the evaluation.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Consume one unit of the execution budget.
    pub fn tick(&self) -> Result<(), EvalError> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(EvalError::Cancelled);
            }
        }
        let left = self.ticks.get() - 1;
        self.ticks.set(left);
        if left <= 0 {
            return Err(EvalError::ExecutionLimit);
        }
        Ok(())
    }

    pub(crate) fn alloc(&self, obj: ObjectReference) -> ObjectId {
        let mut objects = self.objects.borrow_mut();
        objects.push(Rc::new(obj));
        ObjectId(objects.len() - 1)
    }

    pub(crate) fn object(&self, id: ObjectId) -> Rc<ObjectReference> {
        self.objects.borrow()[id.0].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhaustion() {
        let ctx = Context::new(3);
        assert!(ctx.tick().is_ok());
        assert!(ctx.tick().is_ok());
        assert!(matches!(ctx.tick(), Err(EvalError::ExecutionLimit)));
    }

    #[test]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = Context::new(100).with_cancel(flag.clone());
        assert!(ctx.tick().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(ctx.tick(), Err(EvalError::Cancelled)));
    }
}
