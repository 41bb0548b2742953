//! `ConditionalRef`, `CastRef`, `QualifiedThisRef` (spec §4.4 "Conditional & cast").

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::object_model::record::{Record, Visibility};
use crate::object_model::Class;
use crate::scope::{Scope, MAX_PARENT_WALK};
use crate::value::Value;
use crate::interpreter::Interpreter;

use super::{eval_child, RefNode};

/// `ConditionalRef(cond, a, b)`: picks a branch by the boolness of `cond`
/// (spec §4.4).
#[derive(Debug)]
pub struct ConditionalRef {
    pub cond: Rc<dyn RefNode>,
    pub then_branch: Rc<dyn RefNode>,
    pub else_branch: Rc<dyn RefNode>,
    pub pos: SourcePos,
}

impl RefNode for ConditionalRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let cond = eval_child(&self.cond, scope, interp)?;
        if cond.to_bool(self.pos)? {
            eval_child(&self.then_branch, scope, interp)
        } else {
            eval_child(&self.else_branch, scope, interp)
        }
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

/// `CastRef(value, type, isNullable)` (spec §4.4).
#[derive(Debug)]
pub struct CastRef {
    pub value: Rc<dyn RefNode>,
    pub target: Rc<Class>,
    pub is_nullable: bool,
    pub pos: SourcePos,
}

impl RefNode for CastRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let value = eval_child(&self.value, scope, interp)?;
        let unwrapped = match &value {
            Value::QualifiedView(inst, _) => Value::Instance(inst.clone()),
            other => other.clone(),
        };

        if !unwrapped.is_instance_of(&self.target) {
            return if self.is_nullable {
                Ok(Value::Null)
            } else {
                Err(RuntimeError::class_cast(format!("cannot cast {} to {}", unwrapped.type_name(), self.target.name), self.pos))
            };
        }

        match &unwrapped {
            Value::Instance(inst) => {
                let actual = inst.borrow().class.clone();
                if actual.id != self.target.id && actual.linearization_contains(self.target.id) {
                    Ok(Value::QualifiedView(inst.clone(), self.target.id))
                } else {
                    Ok(unwrapped)
                }
            }
            _ => Ok(unwrapped),
        }
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

/// `QualifiedThisRef(typeName)`: walks parent scopes for a `thisObj` that
/// `isInstanceOf typeName`, returning a qualified view (spec §4.4).
#[derive(Debug)]
pub struct QualifiedThisRef {
    pub target: Rc<Class>,
    pub pos: SourcePos,
}

impl RefNode for QualifiedThisRef {
    fn eval_value(&self, scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Value> {
        let mut current = Some(scope.clone());
        let mut steps = 0;
        while let Some(s) = current {
            if steps >= MAX_PARENT_WALK {
                break;
            }
            if let Some(this_obj) = s.this_obj() {
                if this_obj.is_instance_of(&self.target) {
                    return match this_obj {
                        Value::Instance(inst) => Ok(Value::QualifiedView(inst, self.target.id)),
                        other => Ok(other),
                    };
                }
            }
            let next = s.parent();
            if let Some(next_scope) = &next {
                if Rc::ptr_eq(next_scope, &s) {
                    break;
                }
            }
            current = next;
            steps += 1;
        }
        Err(RuntimeError::no_such_element(format!("no enclosing `this` is an instance of {}", self.target.name), self.pos))
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::ClassRegistry;
    use crate::refs::ConstRef;

    #[test]
    fn conditional_picks_branch_by_bool() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let node = ConditionalRef {
            cond: Rc::new(ConstRef::new(Value::Bool(false))),
            then_branch: Rc::new(ConstRef::new(Value::Int(1))),
            else_branch: Rc::new(ConstRef::new(Value::Int(2))),
            pos: SourcePos::new(1, 1),
        };
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(2));
    }

    #[test]
    fn cast_to_unrelated_class_fails_without_nullable() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let registry = ClassRegistry::new();
        let target = registry.register("Other", vec![]).unwrap();
        let node = CastRef {
            value: Rc::new(ConstRef::new(Value::Int(1))),
            target,
            is_nullable: false,
            pos: SourcePos::new(1, 1),
        };
        assert!(node.eval_value(&scope, &mut interp).is_err());
    }

    #[test]
    fn nullable_cast_failure_yields_null() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let registry = ClassRegistry::new();
        let target = registry.register("Other", vec![]).unwrap();
        let node = CastRef {
            value: Rc::new(ConstRef::new(Value::Int(1))),
            target,
            is_nullable: true,
            pos: SourcePos::new(1, 1),
        };
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Null);
    }
}
