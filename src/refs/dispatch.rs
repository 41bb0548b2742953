//! Shared record-read/record-write dispatch used by `FieldRef`, `IndexRef`,
//! and the `this`-fast-path nodes (spec §4.2 "Property/Delegated records
//! route through their accessors instead of storing the value directly").
//!
//! Plain `Field`/`ConstructorField`/`Other` records hand back their stored
//! value directly; `Property` records invoke the getter/setter pair;
//! `Delegated` records forward to `delegate.getValue`/`setValue` on the
//! delegate target. Centralized here so every call site that reads or writes
//! a resolved record behaves identically regardless of which reference node
//! found it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::interpreter::Interpreter;
use crate::object_model::record::{Record, RecordKind};
use crate::object_model::Method;
use crate::scope::Arguments;
use crate::value::Value;

/// Read `record`'s effective value for `receiver` (spec §4.2).
pub fn read_record_value(record: &Rc<RefCell<Record>>, receiver: &Value, name: &str, interp: &mut Interpreter, pos: SourcePos) -> EvalResult<Value> {
    let (kind, value, delegate) = {
        let r = record.borrow();
        (r.kind, r.value.clone(), r.delegate.clone())
    };
    match kind {
        RecordKind::Property => match value {
            Value::Property(accessors) => accessors.getter.invoke(interp, Some(receiver.clone()), &Arguments::default()),
            other => Ok(other),
        },
        RecordKind::Delegated => {
            let delegate = delegate.ok_or_else(|| RuntimeError::illegal_state("delegated record missing a delegate", pos))?;
            let get_value = resolve_callable_on(&delegate.target, "getValue", pos)?;
            get_value.invoke(
                interp,
                Some(delegate.target.clone()),
                &Arguments::positional(vec![receiver.clone(), Value::Str(Rc::from(name))]),
            )
        }
        _ => Ok(value),
    }
}

/// Write `new_value` through `record` on behalf of `receiver` (spec §4.2).
/// Checks `is_mutable` first for every kind, including `Property` (a
/// property with no setter is simply not mutable).
pub fn write_record_value(record: &Rc<RefCell<Record>>, receiver: &Value, name: &str, new_value: Value, interp: &mut Interpreter, pos: SourcePos) -> EvalResult<()> {
    let (kind, is_mutable, value, delegate) = {
        let r = record.borrow();
        (r.kind, r.is_mutable, r.value.clone(), r.delegate.clone())
    };
    if !is_mutable {
        return Err(RuntimeError::illegal_assignment(format!("`{name}` is not mutable"), pos));
    }
    match kind {
        RecordKind::Property => {
            let accessors = match value {
                Value::Property(accessors) => accessors,
                _ => return Err(RuntimeError::illegal_state("property record missing its accessors", pos)),
            };
            let setter = accessors
                .setter
                .as_ref()
                .ok_or_else(|| RuntimeError::illegal_assignment(format!("`{name}` has no setter"), pos))?;
            setter.invoke(interp, Some(receiver.clone()), &Arguments::positional(vec![new_value]))?;
            Ok(())
        }
        RecordKind::Delegated => {
            let delegate = delegate.ok_or_else(|| RuntimeError::illegal_state("delegated record missing a delegate", pos))?;
            let set_value = resolve_callable_on(&delegate.target, "setValue", pos)?;
            set_value.invoke(
                interp,
                Some(delegate.target.clone()),
                &Arguments::positional(vec![receiver.clone(), Value::Str(Rc::from(name)), new_value]),
            )?;
            Ok(())
        }
        RecordKind::Fun => Err(RuntimeError::illegal_assignment(format!("`{name}` names a method, not a value"), pos)),
        _ => {
            record.borrow_mut().value = new_value;
            Ok(())
        }
    }
}

/// Resolve `method_name` as a plain (non-mangled) member on `target`,
/// used to find a delegate's `getValue`/`setValue`.
fn resolve_callable_on(target: &Value, method_name: &str, pos: SourcePos) -> EvalResult<Rc<Method>> {
    match target {
        Value::Instance(inst) => {
            let resolved = crate::object_model::resolution::resolve_member(&inst.borrow(), None, method_name, None, pos)?;
            match &resolved.record.borrow().value {
                Value::Callable(m) => Ok(m.clone()),
                _ => Err(RuntimeError::illegal_state(format!("`{method_name}` is not callable on the delegate target"), pos)),
            }
        }
        _ => Err(RuntimeError::illegal_argument(format!("delegate target has no `{method_name}`"), pos)),
    }
}
