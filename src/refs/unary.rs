//! `UnaryOpRef` (spec §4.4 "Unary").

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, SourcePos};
use crate::object_model::record::{Record, Visibility};
use crate::scope::Scope;
use crate::value::Value;
use crate::interpreter::Interpreter;

use super::{eval_child, RefNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    BitNot,
}

#[derive(Debug)]
pub struct UnaryOpRef {
    pub op: UnaryOp,
    pub operand: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for UnaryOpRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let value = eval_child(&self.operand, scope, interp)?;
        let flags = interp.perf_flags();

        if flags.primitive_fastops {
            let fast = match (self.op, &value) {
                (UnaryOp::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
                (UnaryOp::Negate, Value::Int(n)) => Some(Value::Int(n.wrapping_neg())),
                (UnaryOp::Negate, Value::Real(n)) => Some(Value::Real(-n)),
                (UnaryOp::BitNot, Value::Int(n)) => Some(Value::Int(!n)),
                _ => None,
            };
            if let Some(result) = fast {
                interp.stats_mut().primitive_fast_ops_hit += 1;
                return Ok(result);
            }
        }

        match self.op {
            UnaryOp::Not => value.logical_not(self.pos),
            UnaryOp::Negate => value.negate(self.pos),
            UnaryOp::BitNot => value.bit_not(self.pos),
        }
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        self.operand.for_each_variable(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::ConstRef;

    #[test]
    fn negate_int_and_real() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let n = UnaryOpRef {
            op: UnaryOp::Negate,
            operand: Rc::new(ConstRef::new(Value::Int(5))),
            pos: SourcePos::new(1, 1),
        };
        assert_eq!(n.eval_value(&scope, &mut interp).unwrap(), Value::Int(-5));
    }

    #[test]
    fn not_on_bool() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let n = UnaryOpRef {
            op: UnaryOp::Not,
            operand: Rc::new(ConstRef::new(Value::Bool(true))),
            pos: SourcePos::new(1, 1),
        };
        assert_eq!(n.eval_value(&scope, &mut interp).unwrap(), Value::Bool(false));
    }

    #[test]
    fn fast_path_hit_is_counted_only_when_the_fast_path_fires() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        interp.set_perf_flags(crate::perf_flags::PerfFlags::all_on());

        let fast = UnaryOpRef {
            op: UnaryOp::Negate,
            operand: Rc::new(ConstRef::new(Value::Int(5))),
            pos: SourcePos::new(1, 1),
        };
        fast.eval_value(&scope, &mut interp).unwrap();
        assert_eq!(interp.stats().primitive_fast_ops_hit, 1);

        let slow = UnaryOpRef {
            op: UnaryOp::Not,
            operand: Rc::new(ConstRef::new(Value::Int(5))),
            pos: SourcePos::new(1, 1),
        };
        // `Not` on an Int isn't one of the primitive fast paths; it falls
        // through to `Value::logical_not` and must not bump the counter.
        assert!(slow.eval_value(&scope, &mut interp).is_err());
        assert_eq!(interp.stats().primitive_fast_ops_hit, 1);
    }
}
