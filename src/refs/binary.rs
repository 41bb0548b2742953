//! `BinaryOpRef` and the short-circuit nodes `LogicalOrRef`/`LogicalAndRef`/
//! `ElvisRef` (spec §4.4 "Binary", "Short-circuit").

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::object_model::record::{Record, Visibility};
use crate::scope::Scope;
use crate::value::Value;
use crate::interpreter::Interpreter;

use super::{eval_child, RefNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum BinaryOp {
    Or,
    And,
    MapEntry,
    Eq,
    Neq,
    RefEq,
    RefNeq,
    Match,
    NotMatch,
    Le,
    Lt,
    Ge,
    Gt,
    In,
    NotIn,
    Is,
    NotIs,
    Spaceship,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn is_primitive(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Real(_) | Value::Bool(_) | Value::Char(_))
}

/// `BinaryOpRef(op, left, right)` (spec §4.4). Left is evaluated strictly
/// before right (spec §5 "Ordering guarantees"); there is no short-circuiting
/// here — that's `LogicalOrRef`/`LogicalAndRef`'s job.
#[derive(Debug)]
pub struct BinaryOpRef {
    pub op: BinaryOp,
    pub left: Rc<dyn RefNode>,
    pub right: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for BinaryOpRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let left = eval_child(&self.left, scope, interp)?;
        let right = eval_child(&self.right, scope, interp)?;
        let pos = self.pos;

        if interp.perf_flags().primitive_fastops && is_primitive(&left) && is_primitive(&right) {
            interp.stats_mut().primitive_fast_ops_hit += 1;
        }

        match self.op {
            BinaryOp::Or => left.logical_or(&right, pos),
            BinaryOp::And => left.logical_and(&right, pos),
            BinaryOp::MapEntry => Ok(left.map_entry_with(&right)),
            BinaryOp::Eq => Ok(Value::Bool(left.value_eq(&right))),
            BinaryOp::Neq => Ok(Value::Bool(!left.value_eq(&right))),
            BinaryOp::RefEq => Ok(Value::Bool(left.ref_eq(&right))),
            BinaryOp::RefNeq => Ok(Value::Bool(!left.ref_eq(&right))),
            BinaryOp::Match | BinaryOp::NotMatch => {
                let text = match &left {
                    Value::Str(s) => s,
                    _ => return Err(RuntimeError::illegal_argument("left-hand side of a match must be a String", pos)),
                };
                let source = match &right {
                    Value::Regex(r) => r,
                    _ => return Err(RuntimeError::illegal_argument("right-hand side of a match must be a Regex", pos)),
                };
                let compiled = interp.compiled_regex(source, pos)?;
                let is_match = compiled.is_match(text);
                Ok(Value::Bool(if self.op == BinaryOp::Match { is_match } else { !is_match }))
            }
            BinaryOp::Le => order(&left, &right, pos, |o| o != Ordering::Greater),
            BinaryOp::Lt => order(&left, &right, pos, |o| o == Ordering::Less),
            BinaryOp::Ge => order(&left, &right, pos, |o| o != Ordering::Less),
            BinaryOp::Gt => order(&left, &right, pos, |o| o == Ordering::Greater),
            BinaryOp::In => right.contains(&left, pos).map(Value::Bool),
            BinaryOp::NotIn => right.contains(&left, pos).map(|b| Value::Bool(!b)),
            BinaryOp::Is => match &right {
                Value::Class(c) => Ok(Value::Bool(left.is_instance_of(c))),
                _ => Err(RuntimeError::illegal_argument("right-hand side of `is` must be a Class", pos)),
            },
            BinaryOp::NotIs => match &right {
                Value::Class(c) => Ok(Value::Bool(!left.is_instance_of(c))),
                _ => Err(RuntimeError::illegal_argument("right-hand side of `is` must be a Class", pos)),
            },
            BinaryOp::Spaceship => left.spaceship(&right, pos),
            BinaryOp::BitAnd => left.bit_and(&right, pos),
            BinaryOp::BitOr => left.bit_or(&right, pos),
            BinaryOp::BitXor => left.bit_xor(&right, pos),
            BinaryOp::Shl => left.shl(&right, pos),
            BinaryOp::Shr => left.shr(&right, pos),
            BinaryOp::Add => left.add(&right, pos),
            BinaryOp::Sub => left.sub(&right, pos),
            BinaryOp::Mul => left.mul(&right, pos),
            BinaryOp::Div => left.div(&right, pos),
            BinaryOp::Rem => left.rem(&right, pos),
        }
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        self.left.for_each_variable(f);
        self.right.for_each_variable(f);
    }
}

fn order(left: &Value, right: &Value, pos: SourcePos, accept: impl FnOnce(Ordering) -> bool) -> EvalResult<Value> {
    match left.compare(right) {
        Some(o) => Ok(Value::Bool(accept(o))),
        None => Err(RuntimeError::not_implemented("compare", pos)),
    }
}

/// `LogicalOrRef(l, r)`: evaluate `l`; if it's a `Bool` settling the result
/// (`true`), short-circuit without evaluating `r` (spec §4.4).
#[derive(Debug)]
pub struct LogicalOrRef {
    pub left: Rc<dyn RefNode>,
    pub right: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for LogicalOrRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let left = eval_child(&self.left, scope, interp)?;
        if let Value::Bool(true) = left {
            return Ok(Value::Bool(true));
        }
        let right = eval_child(&self.right, scope, interp)?;
        if let (Value::Bool(a), Value::Bool(b)) = (&left, &right) {
            return Ok(Value::Bool(*a || *b));
        }
        left.logical_or(&right, self.pos)
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

/// `LogicalAndRef(l, r)`: mirror image of `LogicalOrRef` (spec §4.4).
#[derive(Debug)]
pub struct LogicalAndRef {
    pub left: Rc<dyn RefNode>,
    pub right: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for LogicalAndRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let left = eval_child(&self.left, scope, interp)?;
        if let Value::Bool(false) = left {
            return Ok(Value::Bool(false));
        }
        let right = eval_child(&self.right, scope, interp)?;
        if let (Value::Bool(a), Value::Bool(b)) = (&left, &right) {
            return Ok(Value::Bool(*a && *b));
        }
        left.logical_and(&right, self.pos)
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

/// `ElvisRef(l, r)`: `l` if non-`Null`, else `r` (spec §4.4).
#[derive(Debug)]
pub struct ElvisRef {
    pub left: Rc<dyn RefNode>,
    pub right: Rc<dyn RefNode>,
}

impl RefNode for ElvisRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let left = eval_child(&self.left, scope, interp)?;
        if left.is_null() {
            eval_child(&self.right, scope, interp)
        } else {
            Ok(left)
        }
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::ConstRef;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    #[test]
    fn add_dispatches_to_value_operator() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let node = BinaryOpRef {
            op: BinaryOp::Add,
            left: Rc::new(ConstRef::new(Value::Int(2))),
            right: Rc::new(ConstRef::new(Value::Int(3))),
            pos: pos(),
        };
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(5));
    }

    #[test]
    fn logical_or_short_circuits() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        struct Boom;
        impl std::fmt::Debug for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "Boom")
            }
        }
        impl RefNode for Boom {
            fn eval_value(&self, _scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Value> {
                panic!("right side must not be evaluated")
            }
            fn get(&self, _scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
                panic!("right side must not be evaluated")
            }
        }
        let node = LogicalOrRef {
            left: Rc::new(ConstRef::new(Value::Bool(true))),
            right: Rc::new(Boom),
            pos: pos(),
        };
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Bool(true));
    }

    #[test]
    fn match_and_not_match_test_a_string_against_a_regex() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let matches = BinaryOpRef {
            op: BinaryOp::Match,
            left: Rc::new(ConstRef::new(Value::Str("hello123".into()))),
            right: Rc::new(ConstRef::new(Value::Regex("[a-z]+\\d+".into()))),
            pos: pos(),
        };
        assert_eq!(matches.eval_value(&scope, &mut interp).unwrap(), Value::Bool(true));

        let not_matches = BinaryOpRef {
            op: BinaryOp::NotMatch,
            left: Rc::new(ConstRef::new(Value::Str("HELLO".into()))),
            right: Rc::new(ConstRef::new(Value::Regex("[a-z]+\\d+".into()))),
            pos: pos(),
        };
        assert_eq!(not_matches.eval_value(&scope, &mut interp).unwrap(), Value::Bool(true));
    }

    #[test]
    fn elvis_picks_right_on_null() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let node = ElvisRef {
            left: Rc::new(ConstRef::new(Value::Null)),
            right: Rc::new(ConstRef::new(Value::Int(7))),
        };
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(7));
    }
}
