//! Reference nodes (C4, spec §4.4): the closed set of expression-tree node
//! variants the external compiler emits, executed here against a [`Scope`].
//!
//! Every node implements [`RefNode`]. `get` is the general contract; leaf and
//! primitive-fast-path nodes override `eval_value` to skip allocating a
//! throwaway [`Record`] (spec §4.4 "EVERY leaf and primitive node ... MUST
//! override it to avoid allocating a throwaway record").

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{EvalResult, SourcePos};
use crate::object_model::record::Record;
use crate::interpreter::Interpreter;
use crate::scope::Scope;
use crate::value::Value;

mod assign;
mod binary;
mod call;
mod conditional;
mod dispatch;
mod field;
mod index;
mod literal;
mod local;
mod method_call;
pub mod pic;
mod this_fast;
mod unary;

pub use assign::{AssignIfNullRef, AssignOpRef, AssignRef, IncDecRef};
pub use binary::{BinaryOp, BinaryOpRef, ElvisRef, LogicalAndRef, LogicalOrRef};
pub use call::CallRef;
pub use conditional::{CastRef, ConditionalRef, QualifiedThisRef};
pub use field::FieldRef;
pub use index::IndexRef;
pub use literal::{ConstRef, ListLiteralRef, ListPattern, MapLiteralRef, RangeRef, StatementRef};
pub use local::{BoundLocalVarRef, FastLocalVarRef, LocalSlotRef, LocalVarRef};
pub use method_call::MethodCallRef;
pub use this_fast::{
    ImplicitThisMemberRef, ImplicitThisMethodCallRef, QualifiedThisFieldSlotRef, QualifiedThisMethodSlotCallRef, ThisFieldSlotRef, ThisMethodSlotCallRef,
};
pub use unary::{UnaryOp, UnaryOpRef};

/// The interface every node in the expression tree implements (spec §4.4).
pub trait RefNode: fmt::Debug {
    /// Resolve to the live record backing this expression (an l-value when
    /// one exists, a frozen/synthetic record otherwise).
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>>;

    /// The bare value, without materializing a `Record` when avoidable.
    /// Defaults to `get(scope).value.clone()`; fast-path leaves override this.
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        Ok(self.get(scope, interp)?.borrow().value.clone())
    }

    /// Write `value` through this node as an l-value. The default rejects any
    /// node that isn't one (spec §4.4 assignment contract); l-value variants
    /// override it.
    fn set_at(&self, _scope: &Rc<Scope>, interp: &mut Interpreter, _value: Value, pos: SourcePos) -> EvalResult<()> {
        Err(interp.raise_error_unscoped(crate::error::ErrorKind::IllegalAssignment, "not an assignable expression", pos))
    }

    /// Visit every free-variable name this subtree references.
    fn for_each_variable(&self, _f: &mut dyn FnMut(&str)) {}

    /// Visit every free-variable reference along with its source position.
    fn for_each_variable_with_pos(&self, _f: &mut dyn FnMut(&str, SourcePos)) {}
}

/// Evaluate a child sub-expression's bare value under the `RVAL_FASTPATH`
/// flag (spec §6 "nodes call `evalValue` instead of `get().value` on
/// children"). Every node that holds child sub-expressions (not just itself)
/// reads them through this helper rather than calling `eval_value` directly,
/// so turning the flag off is observable: children are forced through the
/// general `get()` path instead of whichever fast path they'd otherwise take.
pub(crate) fn eval_child(node: &Rc<dyn RefNode>, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
    if interp.perf_flags().rval_fastpath {
        node.eval_value(scope, interp)
    } else {
        Ok(node.get(scope, interp)?.borrow().value.clone())
    }
}
