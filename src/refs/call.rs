//! `CallRef(callee, args)` (spec §4.4 "Direct call"): evaluate the callee
//! expression itself (as opposed to `MethodCallRef`, which evaluates a
//! receiver and resolves a name against it), bind arguments, and invoke.
//!
//! There is no member resolution here and so no PIC: the callee is already a
//! `Value::Callable` once evaluated, not a name to look up on a receiver's
//! class hierarchy.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::interpreter::Interpreter;
use crate::object_model::record::{Record, Visibility};
use crate::scope::Scope;
use crate::value::Value;

use super::method_call::{eval_arg_nodes, ArgNode};
use super::{eval_child, RefNode};

#[derive(Debug)]
pub struct CallRef {
    pub callee: Rc<dyn RefNode>,
    pub args: Vec<ArgNode>,
    pub trailing_block: Option<Rc<dyn RefNode>>,
    /// `callee?.(...)`: a `Null` callee short-circuits to `Null`.
    pub optional: bool,
    pub pos: SourcePos,
}

impl CallRef {
    pub fn new(callee: Rc<dyn RefNode>, args: Vec<ArgNode>, trailing_block: Option<Rc<dyn RefNode>>, optional: bool, pos: SourcePos) -> Self {
        CallRef {
            callee,
            args,
            trailing_block,
            optional,
            pos,
        }
    }

    fn do_call(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let callee = eval_child(&self.callee, scope, interp)?;
        let method = match callee {
            Value::Null if self.optional => return Ok(Value::Null),
            Value::Null => return Err(RuntimeError::null_pointer(self.pos)),
            Value::Callable(m) => m,
            other => return Err(RuntimeError::illegal_argument(format!("{} is not callable", other.type_name()), self.pos)),
        };
        let args = eval_arg_nodes(&self.args, self.trailing_block.as_ref(), scope, interp, self.pos)?;
        method.invoke(interp, None, &args)
    }
}

impl RefNode for CallRef {
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.do_call(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }

    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        self.do_call(scope, interp)
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        self.callee.for_each_variable(f);
        for arg in &self.args {
            match arg {
                ArgNode::Positional(n) | ArgNode::Named(_, n) | ArgNode::Spread(n) => n.for_each_variable(f),
            }
        }
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
        self.callee.for_each_variable_with_pos(f);
        for arg in &self.args {
            match arg {
                ArgNode::Positional(n) | ArgNode::Named(_, n) | ArgNode::Spread(n) => n.for_each_variable_with_pos(f),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::Method;
    use crate::refs::{BinaryOp, BinaryOpRef, ConstRef, LocalVarRef};

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    fn doubler() -> Value {
        let body: Rc<dyn RefNode> = Rc::new(BinaryOpRef {
            op: BinaryOp::Add,
            left: Rc::new(LocalVarRef::new("n", pos())),
            right: Rc::new(LocalVarRef::new("n", pos())),
            pos: pos(),
        });
        Value::Callable(Rc::new(Method::new("double", None, vec!["n".to_string()], body)))
    }

    #[test]
    fn calls_a_plain_callable_value() {
        let node = CallRef::new(
            Rc::new(ConstRef::new(doubler())),
            vec![ArgNode::Positional(Rc::new(ConstRef::new(Value::Int(5))))],
            None,
            false,
            pos(),
        );
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(10));
    }

    #[test]
    fn optional_call_on_null_short_circuits() {
        let node = CallRef::new(Rc::new(ConstRef::new(Value::Null)), vec![], None, true, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Null);
    }

    #[test]
    fn calling_a_non_callable_is_illegal_argument() {
        let node = CallRef::new(Rc::new(ConstRef::new(Value::Int(1))), vec![], None, false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let err = node.eval_value(&scope, &mut interp).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IllegalArgument);
    }
}
