//! Assignment nodes: `AssignRef`, `AssignIfNullRef`, `AssignOpRef`, `IncDecRef`
//! (spec §4.4 "Assignment").

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, SourcePos};
use crate::object_model::record::{Record, Visibility};
use crate::scope::Scope;
use crate::value::Value;
use crate::interpreter::Interpreter;

use super::binary::BinaryOp;
use super::{eval_child, RefNode};

fn record_of(value: Value) -> Rc<RefCell<Record>> {
    Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None)))
}

/// `AssignRef(target, value)`: plain `target = value` (spec §4.4).
#[derive(Debug)]
pub struct AssignRef {
    pub target: Rc<dyn RefNode>,
    pub value: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for AssignRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let value = eval_child(&self.value, scope, interp)?;
        self.target.set_at(scope, interp, value.clone(), self.pos)?;
        Ok(value)
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        Ok(record_of(self.eval_value(scope, interp)?))
    }
}

/// `AssignIfNullRef(target, value)`: `target ?= value`, writes `value` only
/// when `target`'s current value is `Null` (spec §4.4).
#[derive(Debug)]
pub struct AssignIfNullRef {
    pub target: Rc<dyn RefNode>,
    pub value: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for AssignIfNullRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let current = eval_child(&self.target, scope, interp)?;
        if !current.is_null() {
            return Ok(current);
        }
        let value = eval_child(&self.value, scope, interp)?;
        self.target.set_at(scope, interp, value.clone(), self.pos)?;
        Ok(value)
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        Ok(record_of(self.eval_value(scope, interp)?))
    }
}

/// `AssignOpRef(op, target, value)`: compound assignment (`+=`, `-=`, ...).
/// Consults [`Value::plus_assign_in_place`] first for aggregate mutation
/// before falling back to `target op value; setAt(...)` (spec §4.4).
#[derive(Debug)]
pub struct AssignOpRef {
    pub op: BinaryOp,
    pub target: Rc<dyn RefNode>,
    pub value: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for AssignOpRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let current = eval_child(&self.target, scope, interp)?;
        let rhs = eval_child(&self.value, scope, interp)?;

        if self.op == BinaryOp::Add {
            if let Some(mutated) = current.plus_assign_in_place(&rhs, self.pos)? {
                self.target.set_at(scope, interp, mutated.clone(), self.pos)?;
                return Ok(mutated);
            }
        }

        let computed = match self.op {
            BinaryOp::Add => current.add(&rhs, self.pos)?,
            BinaryOp::Sub => current.sub(&rhs, self.pos)?,
            BinaryOp::Mul => current.mul(&rhs, self.pos)?,
            BinaryOp::Div => current.div(&rhs, self.pos)?,
            BinaryOp::Rem => current.rem(&rhs, self.pos)?,
            BinaryOp::BitAnd => current.bit_and(&rhs, self.pos)?,
            BinaryOp::BitOr => current.bit_or(&rhs, self.pos)?,
            BinaryOp::BitXor => current.bit_xor(&rhs, self.pos)?,
            BinaryOp::Shl => current.shl(&rhs, self.pos)?,
            BinaryOp::Shr => current.shr(&rhs, self.pos)?,
            BinaryOp::Or => current.logical_or(&rhs, self.pos)?,
            BinaryOp::And => current.logical_and(&rhs, self.pos)?,
            _ => return Err(crate::error::RuntimeError::not_implemented("compound assignment", self.pos)),
        };
        self.target.set_at(scope, interp, computed.clone(), self.pos)?;
        Ok(computed)
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        Ok(record_of(self.eval_value(scope, interp)?))
    }
}

/// `IncDecRef(target, isIncrement, isPrefix)`: `++x`/`x++`/`--x`/`x--` (spec
/// §4.4). Prefix returns the new value; postfix returns the old one.
#[derive(Debug)]
pub struct IncDecRef {
    pub target: Rc<dyn RefNode>,
    pub is_increment: bool,
    pub is_prefix: bool,
    pub pos: SourcePos,
}

impl RefNode for IncDecRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let current = eval_child(&self.target, scope, interp)?;
        let delta = if self.is_increment { 1 } else { -1 };
        let stepped = current.step(delta, self.pos)?;
        self.target.set_at(scope, interp, stepped.clone(), self.pos)?;
        Ok(if self.is_prefix { stepped } else { current })
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        Ok(record_of(self.eval_value(scope, interp)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::ConstRef;
    use crate::object_model::record::Visibility as Vis;

    struct SlotRef(Rc<RefCell<Record>>);

    impl std::fmt::Debug for SlotRef {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "SlotRef")
        }
    }

    impl RefNode for SlotRef {
        fn get(&self, _scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
            Ok(self.0.clone())
        }

        fn set_at(&self, _scope: &Rc<Scope>, _interp: &mut Interpreter, value: Value, _pos: SourcePos) -> EvalResult<()> {
            self.0.borrow_mut().value = value;
            Ok(())
        }
    }

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    #[test]
    fn assign_writes_through_target() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let slot = Rc::new(RefCell::new(Record::new_field(Value::Int(0), true, Vis::Public, None)));
        let node = AssignRef {
            target: Rc::new(SlotRef(slot.clone())),
            value: Rc::new(ConstRef::new(Value::Int(9))),
            pos: pos(),
        };
        node.eval_value(&scope, &mut interp).unwrap();
        assert_eq!(slot.borrow().value, Value::Int(9));
    }

    #[test]
    fn assign_if_null_skips_when_not_null() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let slot = Rc::new(RefCell::new(Record::new_field(Value::Int(5), true, Vis::Public, None)));
        let node = AssignIfNullRef {
            target: Rc::new(SlotRef(slot.clone())),
            value: Rc::new(ConstRef::new(Value::Int(9))),
            pos: pos(),
        };
        node.eval_value(&scope, &mut interp).unwrap();
        assert_eq!(slot.borrow().value, Value::Int(5));
    }

    #[test]
    fn postfix_increment_returns_old_value() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let slot = Rc::new(RefCell::new(Record::new_field(Value::Int(3), true, Vis::Public, None)));
        let node = IncDecRef {
            target: Rc::new(SlotRef(slot.clone())),
            is_increment: true,
            is_prefix: false,
            pos: pos(),
        };
        let result = node.eval_value(&scope, &mut interp).unwrap();
        assert_eq!(result, Value::Int(3));
        assert_eq!(slot.borrow().value, Value::Int(4));
    }
}
