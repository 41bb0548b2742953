//! `FieldRef(target, name, optional)` (spec §4.4): the field-access workhorse
//! and the model for every other PIC-backed node.
//!
//! Each cache site holds its own read PIC and write PIC, both keyed on the
//! receiver's `(classId, layoutVersion)` shape (spec §4.4 "key 0 means
//! 'shape not stable, do not cache'"). On a resolution failure the thrown
//! error's message is installed as a negative-cache entry so a repeated miss
//! on the same shape doesn't re-walk the hierarchy just to fail again.
//!
//! A successful non-`Property` read also leaves a one-shot transient note of
//! the record it found, so an immediately following write at the same site
//! (`x.f = x.f + 1`) can skip straight to it without a second resolution.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::interpreter::Interpreter;
use crate::object_model::record::{Record, RecordKind, Visibility};
use crate::object_model::resolution::{self, MemberSite};
use crate::object_model::ClassId;
use crate::refs::dispatch::{read_record_value, write_record_value};
use crate::refs::pic::{Pic, ShapeKey, UNSTABLE_SHAPE};
use crate::scope::Scope;
use crate::value::Value;

use super::{eval_child, RefNode};

/// Where a cached field access physically lives, so a cache hit can skip
/// straight to the backing record without re-walking the hierarchy.
#[derive(Debug, Clone)]
enum FieldHandler {
    /// A field slot on the receiving instance (the common case).
    InstanceSlot(usize),
    /// A method slot read as a value (`obj.m` without a call) — not bound to
    /// the receiver, since `Method::invoke` always takes `thisObj` explicitly.
    InstanceMethodSlot(usize),
    /// Anything else a resolution can land on: classScope statics, extension
    /// records, and any record a PIC can't reduce to a slot index.
    Direct(Rc<RefCell<Record>>),
}

fn handler_from_site(site: &MemberSite, record: &Rc<RefCell<Record>>) -> FieldHandler {
    match site {
        MemberSite::InstanceField { slot, .. } => FieldHandler::InstanceSlot(*slot),
        MemberSite::InstanceMethod { slot, .. } => FieldHandler::InstanceMethodSlot(*slot),
        _ => FieldHandler::Direct(record.clone()),
    }
}

/// A one-shot note of the record behind the most recent non-`Property` read
/// at this site, valid only for the frame that produced it (spec §4.4).
struct TransientNote {
    shape: ShapeKey,
    frame_id: u64,
    record: Rc<RefCell<Record>>,
}

#[derive(Debug)]
pub struct FieldRef {
    pub target: Rc<dyn RefNode>,
    pub name: String,
    /// `target?.name`: a `Null` receiver short-circuits to `Null` rather than raising.
    pub optional: bool,
    pub pos: SourcePos,
    read_cache: RefCell<Pic<FieldHandler>>,
    write_cache: RefCell<Pic<FieldHandler>>,
    transient: RefCell<Option<TransientNote>>,
}

impl FieldRef {
    pub fn new(target: Rc<dyn RefNode>, name: impl Into<String>, optional: bool, pos: SourcePos) -> Self {
        FieldRef {
            target,
            name: name.into(),
            optional,
            pos,
            read_cache: RefCell::new(Pic::new()),
            write_cache: RefCell::new(Pic::new()),
            transient: RefCell::new(None),
        }
    }

    fn caller(scope: &Rc<Scope>) -> Option<ClassId> {
        scope.this_class()
    }

    fn resolve_read(&self, target: &Value, caller: Option<ClassId>, scope: &Rc<Scope>) -> EvalResult<(FieldHandler, Rc<RefCell<Record>>)> {
        let resolved = match target {
            Value::Instance(inst) => resolution::resolve_member(&inst.borrow(), caller, &self.name, Some(scope), self.pos)?,
            Value::QualifiedView(inst, ancestor) => {
                resolution::resolve_member_from(&inst.borrow(), Some(*ancestor), caller, &self.name, Some(scope), self.pos)?
            }
            Value::Class(class) => resolution::resolve_static_member(class, caller, &self.name, self.pos)?,
            _ => return Err(RuntimeError::symbol_not_found(&self.name, self.pos)),
        };
        let handler = handler_from_site(&resolved.site, &resolved.record);
        Ok((handler, resolved.record))
    }

    fn record_for_handler(&self, handler: &FieldHandler, receiver: &Value) -> EvalResult<Rc<RefCell<Record>>> {
        match handler {
            FieldHandler::Direct(record) => Ok(record.clone()),
            FieldHandler::InstanceSlot(slot) => {
                let inst = instance_of(receiver, self.pos)?;
                inst.borrow()
                    .field_slot(*slot)
                    .cloned()
                    .ok_or_else(|| RuntimeError::symbol_not_found(&self.name, self.pos))
            }
            FieldHandler::InstanceMethodSlot(slot) => {
                let inst = instance_of(receiver, self.pos)?;
                let method = inst
                    .borrow()
                    .method_slot(*slot)
                    .cloned()
                    .ok_or_else(|| RuntimeError::symbol_not_found(&self.name, self.pos))?;
                Ok(Rc::new(RefCell::new(Record::new_method(method, Visibility::Public, None))))
            }
        }
    }

    fn remember_transient(&self, shape: ShapeKey, frame_id: u64, record: &Rc<RefCell<Record>>) {
        if record.borrow().kind == RecordKind::Property {
            *self.transient.borrow_mut() = None;
            return;
        }
        *self.transient.borrow_mut() = Some(TransientNote {
            shape,
            frame_id,
            record: record.clone(),
        });
    }

    fn do_read(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let target = eval_child(&self.target, scope, interp)?;
        if matches!(target, Value::Null) {
            return if self.optional {
                Ok(Value::Null)
            } else {
                Err(RuntimeError::null_pointer(self.pos))
            };
        }

        let shape = target.shape_key();
        let flags = interp.perf_flags();
        let caller = Self::caller(scope);

        if flags.field_pic {
            if flags.field_pic_size_4 {
                self.read_cache.borrow_mut().force_size4();
            }
            let probed = {
                let mut cache = self.read_cache.borrow_mut();
                match cache.probe(shape) {
                    crate::refs::pic::Probe::Hit(h) => Some(Ok(h.clone())),
                    crate::refs::pic::Probe::NegativeHit(m) => Some(Err(m.to_string())),
                    crate::refs::pic::Probe::Miss => None,
                }
            };
            if let Some(outcome) = probed {
                self.read_cache.borrow_mut().record_access(flags, false, outcome.is_err());
                return match outcome {
                    Ok(handler) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().field_pic_hit += 1;
                        }
                        trace!(name = %self.name, "field PIC hit");
                        let record = self.record_for_handler(&handler, &target)?;
                        self.remember_transient(shape, scope.frame_id(), &record);
                        read_record_value(&record, &target, &self.name, interp, self.pos)
                    }
                    Err(message) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().field_pic_miss += 1;
                        }
                        Err(RuntimeError::new(crate::error::ErrorKind::SymbolNotFound, message, self.pos))
                    }
                };
            }
            if flags.pic_debug_counters {
                interp.stats_mut().field_pic_miss += 1;
            }
            // A true cache miss is still an access against this site's adaptive
            // window (spec §4.4 "windowed miss-rate heuristics") — without this,
            // a megamorphic site that always misses never accumulates enough
            // window accesses to promote from size 2 to size 4.
            self.read_cache.borrow_mut().record_access(flags, false, true);
        }

        match self.resolve_read(&target, caller, scope) {
            Ok((handler, _)) => {
                if flags.field_pic && shape != UNSTABLE_SHAPE {
                    self.read_cache.borrow_mut().install(shape, handler.clone());
                }
                // Route through the handler rather than the just-resolved record: a
                // slot-backed site must read the per-instance slot (each instance owns
                // its own field storage, spec §3), not the class-level template record
                // `lookup_on_class` happened to find it through.
                let record = self.record_for_handler(&handler, &target)?;
                self.remember_transient(shape, scope.frame_id(), &record);
                read_record_value(&record, &target, &self.name, interp, self.pos)
            }
            Err(err) => {
                if flags.field_pic && shape != UNSTABLE_SHAPE {
                    self.read_cache.borrow_mut().install_negative(shape, err.message.clone());
                }
                Err(err)
            }
        }
    }

    fn do_write(&self, scope: &Rc<Scope>, interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        let target = eval_child(&self.target, scope, interp)?;
        if matches!(target, Value::Null) {
            if self.optional {
                return Ok(());
            }
            return Err(RuntimeError::null_pointer(pos));
        }

        let shape = target.shape_key();
        let flags = interp.perf_flags();
        let frame_id = scope.frame_id();

        // Fast path: the record we just read at this exact shape/frame is still valid.
        if let Some(note) = self.transient.borrow().as_ref() {
            if note.shape == shape && note.frame_id == frame_id {
                return write_record_value(&note.record, &target, &self.name, value, interp, pos);
            }
        }

        if flags.field_pic {
            if flags.field_pic_size_4 {
                self.write_cache.borrow_mut().force_size4();
            }
            let probed = {
                let mut cache = self.write_cache.borrow_mut();
                match cache.probe(shape) {
                    crate::refs::pic::Probe::Hit(h) => Some(Ok(h.clone())),
                    crate::refs::pic::Probe::NegativeHit(m) => Some(Err(m.to_string())),
                    crate::refs::pic::Probe::Miss => None,
                }
            };
            if let Some(outcome) = probed {
                self.write_cache.borrow_mut().record_access(flags, false, outcome.is_err());
                return match outcome {
                    Ok(handler) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().field_pic_set_hit += 1;
                        }
                        let record = self.record_for_handler(&handler, &target)?;
                        write_record_value(&record, &target, &self.name, value, interp, pos)
                    }
                    Err(message) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().field_pic_set_miss += 1;
                        }
                        Err(RuntimeError::illegal_assignment(message, pos))
                    }
                };
            }
            if flags.pic_debug_counters {
                interp.stats_mut().field_pic_set_miss += 1;
            }
            self.write_cache.borrow_mut().record_access(flags, false, true);
        }

        let caller = Self::caller(scope);
        match self.resolve_read(&target, caller, scope) {
            Ok((handler, _)) => {
                if flags.field_pic && shape != UNSTABLE_SHAPE {
                    self.write_cache.borrow_mut().install(shape, handler.clone());
                }
                let record = self.record_for_handler(&handler, &target)?;
                write_record_value(&record, &target, &self.name, value, interp, pos)
            }
            Err(err) => {
                if flags.field_pic && shape != UNSTABLE_SHAPE {
                    self.write_cache.borrow_mut().install_negative(shape, err.message.clone());
                }
                Err(err)
            }
        }
    }
}

fn instance_of(value: &Value, pos: SourcePos) -> EvalResult<Rc<RefCell<crate::object_model::Instance>>> {
    match value {
        Value::Instance(inst) => Ok(inst.clone()),
        Value::QualifiedView(inst, _) => Ok(inst.clone()),
        _ => Err(RuntimeError::illegal_state("instance-slot handler used on a non-instance receiver", pos)),
    }
}

impl RefNode for FieldRef {
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
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
        self.target.for_each_variable_with_pos(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::record::Visibility;
    use crate::object_model::ClassRegistry;
    use crate::refs::ConstRef;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    fn instance_with_field(reg: &ClassRegistry, field_value: Value) -> Value {
        let class = reg.register("C", vec![]).unwrap();
        class.add_member("x", Record::new_field(field_value, true, Visibility::Public, Some(class.id)));
        let inst = class.instantiate();
        Value::Instance(Rc::new(RefCell::new(inst)))
    }

    #[test]
    fn reads_plain_field() {
        let reg = ClassRegistry::new();
        let receiver = instance_with_field(&reg, Value::Int(7));
        let node = FieldRef::new(Rc::new(ConstRef::new(receiver)), "x", false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(7));
    }

    #[test]
    fn repeated_read_hits_the_pic() {
        let reg = ClassRegistry::new();
        let receiver = instance_with_field(&reg, Value::Int(1));
        let node = FieldRef::new(Rc::new(ConstRef::new(receiver)), "x", false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        interp.set_perf_flags(crate::perf_flags::PerfFlags {
            pic_debug_counters: true,
            ..crate::perf_flags::PerfFlags::all_on()
        });
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(1));
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(1));
        assert!(interp.stats().field_pic_hit >= 1);
    }

    #[test]
    fn optional_chain_short_circuits_on_null() {
        let node = FieldRef::new(Rc::new(ConstRef::new(Value::Null)), "x", true, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Null);
    }

    #[test]
    fn non_optional_null_receiver_raises_null_pointer() {
        let node = FieldRef::new(Rc::new(ConstRef::new(Value::Null)), "x", false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let err = node.eval_value(&scope, &mut interp).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NullPointer);
    }

    #[test]
    fn write_then_read_back() {
        let reg = ClassRegistry::new();
        let receiver = instance_with_field(&reg, Value::Int(0));
        let node = FieldRef::new(Rc::new(ConstRef::new(receiver)), "x", false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        node.set_at(&scope, &mut interp, Value::Int(42), pos()).unwrap();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(42));
    }

    #[test]
    fn missing_field_is_symbol_not_found() {
        let reg = ClassRegistry::new();
        let receiver = instance_with_field(&reg, Value::Int(0));
        let node = FieldRef::new(Rc::new(ConstRef::new(receiver)), "missing", false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let err = node.eval_value(&scope, &mut interp).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SymbolNotFound);
    }

    /// Writing `x` on one instance must not leak into another instance of the
    /// same class: each instance owns its own field slot, distinct from the
    /// class-level template record the resolver finds it through (spec §3).
    #[test]
    fn write_is_isolated_per_instance() {
        let reg = ClassRegistry::new();
        let class = reg.register("C", vec![]).unwrap();
        class.add_member("x", Record::new_field(Value::Int(0), true, Visibility::Public, Some(class.id)));
        let a = Value::Instance(Rc::new(RefCell::new(class.instantiate())));
        let b = Value::Instance(Rc::new(RefCell::new(class.instantiate())));

        let node_a = FieldRef::new(Rc::new(ConstRef::new(a)), "x", false, pos());
        let node_b = FieldRef::new(Rc::new(ConstRef::new(b)), "x", false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();

        node_a.set_at(&scope, &mut interp, Value::Int(99), pos()).unwrap();
        assert_eq!(node_a.eval_value(&scope, &mut interp).unwrap(), Value::Int(99));
        assert_eq!(node_b.eval_value(&scope, &mut interp).unwrap(), Value::Int(0));
    }
}
