//! `IndexRef(target, index)` (spec §4.4): `target[index]` read/write.
//!
//! `List+Int`, `String+Int` (yielding a `Char`), and `Map+String` are
//! primitive fast paths that never touch a cache — they're resolved by
//! matching on the receiver/index value shapes directly. Any other receiver
//! (a user-defined class overloading `[]`) falls through to a PIC keyed on
//! `(classId, layoutVersion)`, structurally identical to the field PIC,
//! caching an invoker for the class's `get`/`set` method.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::interpreter::Interpreter;
use crate::object_model::record::{Record, Visibility};
use crate::object_model::resolution::{self, MemberSite};
use crate::object_model::Method;
use crate::refs::pic::{Pic, Probe, ShapeKey, UNSTABLE_SHAPE};
use crate::scope::{Arguments, Scope};
use crate::value::Value;

use super::{eval_child, RefNode};

const GET_METHOD: &str = "get";
const SET_METHOD: &str = "set";

#[derive(Debug, Clone)]
enum IndexHandler {
    InstanceMethodSlot(usize),
    Direct(Rc<Method>),
}

fn handler_from_method_site(site: &MemberSite, method: Rc<Method>) -> IndexHandler {
    match site {
        MemberSite::InstanceMethod { slot, .. } => IndexHandler::InstanceMethodSlot(*slot),
        _ => IndexHandler::Direct(method),
    }
}

fn method_from_record(record: &Rc<RefCell<Record>>, name: &str, pos: SourcePos) -> EvalResult<Rc<Method>> {
    match &record.borrow().value {
        Value::Callable(m) => Ok(m.clone()),
        _ => Err(RuntimeError::illegal_state(format!("`{name}` is not callable"), pos)),
    }
}

fn method_for_handler(handler: &IndexHandler, receiver: &Value, name: &str, pos: SourcePos) -> EvalResult<Rc<Method>> {
    match handler {
        IndexHandler::Direct(m) => Ok(m.clone()),
        IndexHandler::InstanceMethodSlot(slot) => {
            let inst = match receiver {
                Value::Instance(i) => i.clone(),
                Value::QualifiedView(i, _) => i.clone(),
                _ => return Err(RuntimeError::illegal_state("instance-slot handler used on a non-instance receiver", pos)),
            };
            inst.borrow()
                .method_slot(*slot)
                .cloned()
                .ok_or_else(|| RuntimeError::symbol_not_found(name, pos))
        }
    }
}

#[derive(Debug)]
pub struct IndexRef {
    pub target: Rc<dyn RefNode>,
    pub index: Rc<dyn RefNode>,
    pub pos: SourcePos,
    read_cache: RefCell<Pic<IndexHandler>>,
    write_cache: RefCell<Pic<IndexHandler>>,
}

impl IndexRef {
    pub fn new(target: Rc<dyn RefNode>, index: Rc<dyn RefNode>, pos: SourcePos) -> Self {
        IndexRef {
            target,
            index,
            pos,
            read_cache: RefCell::new(Pic::new()),
            write_cache: RefCell::new(Pic::new()),
        }
    }

    fn read_primitive(&self, target: &Value, index: &Value) -> Option<EvalResult<Value>> {
        match (target, index) {
            (Value::List(list), Value::Int(i)) => Some(list.borrow().get(normalize(*i, list.borrow().len())).cloned().ok_or_else(|| {
                RuntimeError::no_such_element(format!("index {i} out of bounds"), self.pos)
            })),
            (Value::Str(s), Value::Int(i)) => Some(
                s.chars()
                    .nth(normalize(*i, s.chars().count()))
                    .map(Value::Char)
                    .ok_or_else(|| RuntimeError::no_such_element(format!("index {i} out of bounds"), self.pos)),
            ),
            (Value::Map(map), Value::Str(_)) => Some(
                map.borrow()
                    .get(index)
                    .cloned()
                    .ok_or_else(|| RuntimeError::no_such_element("key not found", self.pos)),
            ),
            _ => None,
        }
    }

    fn write_primitive(&self, target: &Value, index: &Value, value: Value) -> Option<EvalResult<()>> {
        match (target, index) {
            (Value::List(list), Value::Int(i)) => {
                let len = list.borrow().len();
                let idx = normalize(*i, len);
                Some(match list.borrow_mut().get_mut(idx) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(RuntimeError::no_such_element(format!("index {i} out of bounds"), self.pos)),
                })
            }
            (Value::Map(map), Value::Str(_)) => {
                map.borrow_mut().insert(index.clone(), value);
                Some(Ok(()))
            }
            _ => None,
        }
    }

    fn resolve_method(&self, target: &Value, caller: Option<crate::object_model::ClassId>, name: &str) -> EvalResult<(IndexHandler, Rc<Method>)> {
        let resolved = match target {
            Value::Instance(inst) => resolution::resolve_member(&inst.borrow(), caller, name, None, self.pos)?,
            Value::QualifiedView(inst, ancestor) => resolution::resolve_member_from(&inst.borrow(), Some(*ancestor), caller, name, None, self.pos)?,
            _ => return Err(RuntimeError::illegal_argument("value does not support index access", self.pos)),
        };
        let method = method_from_record(&resolved.record, name, self.pos)?;
        Ok((handler_from_method_site(&resolved.site, method.clone()), method))
    }

    fn do_read(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let target = eval_child(&self.target, scope, interp)?;
        let index = eval_child(&self.index, scope, interp)?;

        if let Some(result) = self.read_primitive(&target, &index) {
            return result;
        }

        let shape = target.shape_key();
        let flags = interp.perf_flags();
        let caller = scope.this_class();

        if flags.index_pic {
            if flags.index_pic_size_4 {
                self.read_cache.borrow_mut().force_size4();
            }
            let probed = {
                let mut cache = self.read_cache.borrow_mut();
                match cache.probe(shape) {
                    Probe::Hit(h) => Some(Ok(h.clone())),
                    Probe::NegativeHit(m) => Some(Err(m.to_string())),
                    Probe::Miss => None,
                }
            };
            if let Some(outcome) = probed {
                self.read_cache.borrow_mut().record_access(flags, false, outcome.is_err());
                return match outcome {
                    Ok(handler) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().index_pic_hit += 1;
                        }
                        let method = method_for_handler(&handler, &target, GET_METHOD, self.pos)?;
                        method.invoke(interp, Some(target.clone()), &Arguments::positional(vec![index]))
                    }
                    Err(message) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().index_pic_miss += 1;
                        }
                        Err(RuntimeError::new(crate::error::ErrorKind::SymbolNotFound, message, self.pos))
                    }
                };
            }
            if flags.pic_debug_counters {
                interp.stats_mut().index_pic_miss += 1;
            }
            // A true cache miss still counts toward this site's adaptive window
            // (spec §4.4), or a megamorphic site never accumulates enough
            // accesses to promote from size 2 to size 4.
            self.read_cache.borrow_mut().record_access(flags, false, true);
        }

        match self.resolve_method(&target, caller, GET_METHOD) {
            Ok((handler, _)) => {
                if flags.index_pic && shape != UNSTABLE_SHAPE {
                    self.read_cache.borrow_mut().install(shape, handler.clone());
                }
                // Route through the handler rather than the just-resolved method: a
                // slot-backed site must invoke the receiver's actual dynamic-class
                // override, consistent with the cached-hit path below.
                let method = method_for_handler(&handler, &target, GET_METHOD, self.pos)?;
                method.invoke(interp, Some(target.clone()), &Arguments::positional(vec![index]))
            }
            Err(err) => {
                if flags.index_pic && shape != UNSTABLE_SHAPE {
                    self.read_cache.borrow_mut().install_negative(shape, err.message.clone());
                }
                Err(err)
            }
        }
    }

    fn do_write(&self, scope: &Rc<Scope>, interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        let target = eval_child(&self.target, scope, interp)?;
        let index = eval_child(&self.index, scope, interp)?;

        if let Some(result) = self.write_primitive(&target, &index, value.clone()) {
            return result;
        }

        let shape = target.shape_key();
        let flags = interp.perf_flags();
        let caller = scope.this_class();

        if flags.index_pic {
            if flags.index_pic_size_4 {
                self.write_cache.borrow_mut().force_size4();
            }
            let probed = {
                let mut cache = self.write_cache.borrow_mut();
                match cache.probe(shape) {
                    Probe::Hit(h) => Some(Ok(h.clone())),
                    Probe::NegativeHit(m) => Some(Err(m.to_string())),
                    Probe::Miss => None,
                }
            };
            if let Some(outcome) = probed {
                self.write_cache.borrow_mut().record_access(flags, false, outcome.is_err());
                return match outcome {
                    Ok(handler) => {
                        let method = method_for_handler(&handler, &target, SET_METHOD, pos)?;
                        method.invoke(interp, Some(target.clone()), &Arguments::positional(vec![index, value]))?;
                        Ok(())
                    }
                    Err(message) => Err(RuntimeError::illegal_assignment(message, pos)),
                };
            }
            // A true cache miss still counts toward this site's adaptive window
            // (spec §4.4), or a megamorphic site never accumulates enough
            // accesses to promote from size 2 to size 4.
            self.write_cache.borrow_mut().record_access(flags, false, true);
        }

        match self.resolve_method(&target, caller, SET_METHOD) {
            Ok((handler, _)) => {
                if flags.index_pic && shape != UNSTABLE_SHAPE {
                    self.write_cache.borrow_mut().install(shape, handler.clone());
                }
                let method = method_for_handler(&handler, &target, SET_METHOD, pos)?;
                method.invoke(interp, Some(target.clone()), &Arguments::positional(vec![index, value]))?;
                Ok(())
            }
            Err(err) => {
                if flags.index_pic && shape != UNSTABLE_SHAPE {
                    self.write_cache.borrow_mut().install_negative(shape, err.message.clone());
                }
                Err(err)
            }
        }
    }
}

/// Negative indices count from the end, matching the source's `List`/`String` convention.
fn normalize(i: i64, len: usize) -> usize {
    if i < 0 {
        (len as i64 + i).max(0) as usize
    } else {
        i as usize
    }
}

impl RefNode for IndexRef {
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.do_read(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, true, Visibility::Public, None))))
    }

    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        self.do_read(scope, interp)
    }

    fn set_at(&self, scope: &Rc<Scope>, interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        self.do_write(scope, interp, value, pos)
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        self.target.for_each_variable(f);
        self.index.for_each_variable(f);
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
        self.target.for_each_variable_with_pos(f);
        self.index.for_each_variable_with_pos(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::ConstRef;
    use std::rc::Rc as StdRc;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    #[test]
    fn reads_list_element() {
        let list = Value::List(StdRc::new(RefCell::new(vec![Value::Int(10), Value::Int(20)])));
        let node = IndexRef::new(StdRc::new(ConstRef::new(list)), StdRc::new(ConstRef::new(Value::Int(1))), pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(20));
    }

    #[test]
    fn negative_index_counts_from_end() {
        let list = Value::List(StdRc::new(RefCell::new(vec![Value::Int(10), Value::Int(20), Value::Int(30)])));
        let node = IndexRef::new(StdRc::new(ConstRef::new(list)), StdRc::new(ConstRef::new(Value::Int(-1))), pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(30));
    }

    #[test]
    fn string_index_returns_char() {
        let s = Value::Str(Rc::from("abc"));
        let node = IndexRef::new(StdRc::new(ConstRef::new(s)), StdRc::new(ConstRef::new(Value::Int(1))), pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Char('b'));
    }

    #[test]
    fn list_write_replaces_element() {
        let list = Value::List(StdRc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)])));
        let node = IndexRef::new(StdRc::new(ConstRef::new(list.clone())), StdRc::new(ConstRef::new(Value::Int(0))), pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        node.set_at(&scope, &mut interp, Value::Int(99), pos()).unwrap();
        match list {
            Value::List(l) => assert_eq!(l.borrow()[0], Value::Int(99)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn out_of_bounds_read_is_no_such_element() {
        let list = Value::List(StdRc::new(RefCell::new(vec![Value::Int(1)])));
        let node = IndexRef::new(StdRc::new(ConstRef::new(list)), StdRc::new(ConstRef::new(Value::Int(5))), pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let err = node.eval_value(&scope, &mut interp).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NoSuchElement);
    }

    /// A user-defined `[]` overload dispatches virtually, like a plain method
    /// call through a `QualifiedView` (spec §8 scenario 7) — the override
    /// wins on both the cold resolve and a cached PIC hit.
    #[test]
    fn qualified_view_index_keeps_virtual_dispatch_on_cold_and_warm_paths() {
        use crate::object_model::record::Visibility as Vis;
        use crate::object_model::{ClassRegistry, Method};

        let reg = ClassRegistry::new();
        let a = reg.register("A", vec![]).unwrap();
        let a_body: Rc<dyn RefNode> = Rc::new(ConstRef::new(Value::Int(1)));
        a.add_member(
            GET_METHOD,
            Record::new_method(Rc::new(Method::new(GET_METHOD, Some(a.id), vec!["i".to_string()], a_body)), Vis::Public, Some(a.id)),
        );

        let b = reg.register("B", vec![a.clone()]).unwrap();
        let b_body: Rc<dyn RefNode> = Rc::new(ConstRef::new(Value::Int(2)));
        b.add_member(
            GET_METHOD,
            Record::new_method(Rc::new(Method::new(GET_METHOD, Some(b.id), vec!["i".to_string()], b_body)), Vis::Public, Some(b.id)),
        );

        let inst = Rc::new(RefCell::new(b.instantiate()));
        let view = Value::QualifiedView(inst, a.id);

        let node = IndexRef::new(StdRc::new(ConstRef::new(view)), StdRc::new(ConstRef::new(Value::Int(0))), pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(2));
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(2));
    }
}
