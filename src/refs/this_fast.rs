//! The `this`-fast-path nodes (spec §4.4 "Qualified member and this-self fast
//! paths"): `ThisFieldSlotRef`, `ThisMethodSlotCallRef`,
//! `QualifiedThisFieldSlotRef`, `QualifiedThisMethodSlotCallRef`,
//! `ImplicitThisMemberRef`, `ImplicitThisMethodCallRef`.
//!
//! Each short-circuits the general `FieldRef`/`MethodCallRef` PIC path when
//! the compiler can prove the receiver is `this` (or `this@T`): there is no
//! target sub-expression to evaluate, no `Null`-receiver optional chain, and
//! no need to re-derive the caller's class from the scope chain in a loop —
//! it's always `scope.this_class()`. They still carry a cache of the same
//! shape as `FieldRef`/`MethodCallRef` because even a proven-`this` receiver
//! can be any subclass at runtime.
//!
//! The unqualified variants (`ThisFieldSlotRef`, `ThisMethodSlotCallRef`,
//! `ImplicitThisMemberRef`, `ImplicitThisMethodCallRef`) resolve with ordinary
//! virtual dispatch — a slot-indexed handler reads whichever override the
//! receiver's dynamic class installed there. The qualified variants
//! (`QualifiedThisFieldSlotRef`, `QualifiedThisMethodSlotCallRef`) must NOT
//! take that shortcut: `this@A.f()` means "A's own `f`", not whatever `f`
//! the receiver's dynamic class overrides it with, so they always resolve to
//! the exact record `resolve_member_from` found (spec §8 scenario 7).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::interpreter::Interpreter;
use crate::object_model::record::{Record, Visibility};
use crate::object_model::resolution::{self, MemberSite};
use crate::object_model::{Class, ClassId, Method};
use crate::refs::dispatch::{read_record_value, write_record_value};
use crate::refs::method_call::{eval_arg_nodes, ArgNode};
use crate::refs::pic::{Pic, Probe, ShapeKey, UNSTABLE_SHAPE};
use crate::scope::Scope;
use crate::value::Value;

use super::RefNode;

fn this_obj(scope: &Rc<Scope>, pos: SourcePos) -> EvalResult<Value> {
    scope.this_obj().ok_or_else(|| RuntimeError::illegal_state("no `this` in this context", pos))
}

// ---------------------------------------------------------------------------
// Field-shaped nodes: ThisFieldSlotRef, QualifiedThisFieldSlotRef, ImplicitThisMemberRef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum FieldHandler {
    InstanceSlot(usize),
    InstanceMethodSlot(usize),
    Direct(Rc<RefCell<Record>>),
}

/// Unlike the general `FieldRef`, a qualified lookup (`start.is_some()`) never
/// installs a slot handler: the slot array holds whichever override the
/// dynamic class put there, which is exactly the polymorphism `this@T` is
/// meant to bypass.
fn handler_from_site(site: &MemberSite, record: &Rc<RefCell<Record>>, qualified: bool) -> FieldHandler {
    if qualified {
        return FieldHandler::Direct(record.clone());
    }
    match site {
        MemberSite::InstanceField { slot, .. } => FieldHandler::InstanceSlot(*slot),
        MemberSite::InstanceMethod { slot, .. } => FieldHandler::InstanceMethodSlot(*slot),
        _ => FieldHandler::Direct(record.clone()),
    }
}

fn instance_of(value: &Value, pos: SourcePos) -> EvalResult<Rc<RefCell<crate::object_model::Instance>>> {
    match value {
        Value::Instance(inst) => Ok(inst.clone()),
        Value::QualifiedView(inst, _) => Ok(inst.clone()),
        _ => Err(RuntimeError::illegal_state("`this` is not an instance", pos)),
    }
}

fn record_for_field_handler(handler: &FieldHandler, receiver: &Value, name: &str, pos: SourcePos) -> EvalResult<Rc<RefCell<Record>>> {
    match handler {
        FieldHandler::Direct(record) => Ok(record.clone()),
        FieldHandler::InstanceSlot(slot) => instance_of(receiver, pos)?
            .borrow()
            .field_slot(*slot)
            .cloned()
            .ok_or_else(|| RuntimeError::symbol_not_found(name, pos)),
        FieldHandler::InstanceMethodSlot(slot) => {
            let inst = instance_of(receiver, pos)?;
            let method = inst.borrow().method_slot(*slot).cloned().ok_or_else(|| RuntimeError::symbol_not_found(name, pos))?;
            Ok(Rc::new(RefCell::new(Record::new_method(method, Visibility::Public, None))))
        }
    }
}

fn resolve_field(receiver: &Value, start: Option<ClassId>, caller: Option<ClassId>, name: &str, scope: &Rc<Scope>, pos: SourcePos) -> EvalResult<(FieldHandler, Rc<RefCell<Record>>)> {
    let inst = instance_of(receiver, pos)?;
    let resolved = resolution::resolve_member_from(&inst.borrow(), start, caller, name, Some(scope), pos)?;
    let handler = handler_from_site(&resolved.site, &resolved.record, start.is_some());
    Ok((handler, resolved.record))
}

macro_rules! field_fast_path {
    ($ty:ident, $start_expr:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug)]
        pub struct $ty {
            pub name: String,
            pub pos: SourcePos,
            read_cache: RefCell<Pic<FieldHandler>>,
            write_cache: RefCell<Pic<FieldHandler>>,
        }

        impl $ty {
            fn start(&self) -> Option<ClassId> {
                $start_expr(self)
            }

            fn do_read(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
                let receiver = this_obj(scope, self.pos)?;
                let shape: ShapeKey = receiver.shape_key();
                let flags = interp.perf_flags();
                let caller = scope.this_class();
                let start = self.start();

                if flags.field_pic {
                    if flags.field_pic_size_4 {
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
                                    interp.stats_mut().field_pic_hit += 1;
                                }
                                let record = record_for_field_handler(&handler, &receiver, &self.name, self.pos)?;
                                read_record_value(&record, &receiver, &self.name, interp, self.pos)
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
                    // A true cache miss still counts toward this site's adaptive
                    // window (spec §4.4), or a megamorphic site never accumulates
                    // enough accesses to promote from size 2 to size 4.
                    self.read_cache.borrow_mut().record_access(flags, false, true);
                }

                match resolve_field(&receiver, start, caller, &self.name, scope, self.pos) {
                    Ok((handler, record)) => {
                        if flags.field_pic && shape != UNSTABLE_SHAPE {
                            self.read_cache.borrow_mut().install(shape, handler);
                        }
                        read_record_value(&record, &receiver, &self.name, interp, self.pos)
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
                let receiver = this_obj(scope, pos)?;
                let shape: ShapeKey = receiver.shape_key();
                let flags = interp.perf_flags();
                let caller = scope.this_class();
                let start = self.start();

                if flags.field_pic {
                    if flags.field_pic_size_4 {
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
                                if flags.pic_debug_counters {
                                    interp.stats_mut().field_pic_set_hit += 1;
                                }
                                let record = record_for_field_handler(&handler, &receiver, &self.name, pos)?;
                                write_record_value(&record, &receiver, &self.name, value, interp, pos)
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

                match resolve_field(&receiver, start, caller, &self.name, scope, pos) {
                    Ok((handler, record)) => {
                        if flags.field_pic && shape != UNSTABLE_SHAPE {
                            self.write_cache.borrow_mut().install(shape, handler);
                        }
                        write_record_value(&record, &receiver, &self.name, value, interp, pos)
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

        impl RefNode for $ty {
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
        }
    };
}

field_fast_path!(ThisFieldSlotRef, |_: &ThisFieldSlotRef| None, "`ThisFieldSlotRef(name)`: `this.name`, proven by the compiler (spec §4.4).");
field_fast_path!(
    ImplicitThisMemberRef,
    |_: &ImplicitThisMemberRef| None,
    "`ImplicitThisMemberRef(name)`: a bare `name` the compiler proved resolves to an implicit `this.name` (spec §4.4)."
);

/// `QualifiedThisFieldSlotRef(type, name)`: `this@T.name` (spec §4.4).
#[derive(Debug)]
pub struct QualifiedThisFieldSlotRef {
    pub ancestor: Rc<Class>,
    pub name: String,
    pub pos: SourcePos,
    read_cache: RefCell<Pic<FieldHandler>>,
    write_cache: RefCell<Pic<FieldHandler>>,
}

impl QualifiedThisFieldSlotRef {
    pub fn new(ancestor: Rc<Class>, name: impl Into<String>, pos: SourcePos) -> Self {
        QualifiedThisFieldSlotRef {
            ancestor,
            name: name.into(),
            pos,
            read_cache: RefCell::new(Pic::new()),
            write_cache: RefCell::new(Pic::new()),
        }
    }

    fn start(&self) -> Option<ClassId> {
        Some(self.ancestor.id)
    }
}

impl ThisFieldSlotRef {
    pub fn new(name: impl Into<String>, pos: SourcePos) -> Self {
        ThisFieldSlotRef {
            name: name.into(),
            pos,
            read_cache: RefCell::new(Pic::new()),
            write_cache: RefCell::new(Pic::new()),
        }
    }
}

impl ImplicitThisMemberRef {
    pub fn new(name: impl Into<String>, pos: SourcePos) -> Self {
        ImplicitThisMemberRef {
            name: name.into(),
            pos,
            read_cache: RefCell::new(Pic::new()),
            write_cache: RefCell::new(Pic::new()),
        }
    }
}

// Hand-write the body for the qualified variant: it needs `self.ancestor` in
// scope, which the macro's generated `$ty` struct above doesn't have a field
// for. Simplest to give it its own (identical-shaped) impl rather than widen
// the macro for one extra field.
impl QualifiedThisFieldSlotRef {
    fn do_read(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let receiver = this_obj(scope, self.pos)?;
        let shape: ShapeKey = receiver.shape_key();
        let flags = interp.perf_flags();
        let caller = scope.this_class();
        let start = self.start();

        if flags.field_pic {
            if flags.field_pic_size_4 {
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
                            interp.stats_mut().field_pic_hit += 1;
                        }
                        let record = record_for_field_handler(&handler, &receiver, &self.name, self.pos)?;
                        read_record_value(&record, &receiver, &self.name, interp, self.pos)
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
            // A true cache miss still counts toward this site's adaptive
            // window (spec §4.4), or a megamorphic site never accumulates
            // enough accesses to promote from size 2 to size 4.
            self.read_cache.borrow_mut().record_access(flags, false, true);
        }

        match resolve_field(&receiver, start, caller, &self.name, scope, self.pos) {
            Ok((handler, record)) => {
                if flags.field_pic && shape != UNSTABLE_SHAPE {
                    self.read_cache.borrow_mut().install(shape, handler);
                }
                read_record_value(&record, &receiver, &self.name, interp, self.pos)
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
        let receiver = this_obj(scope, pos)?;
        let shape: ShapeKey = receiver.shape_key();
        let flags = interp.perf_flags();
        let caller = scope.this_class();
        let start = self.start();

        if flags.field_pic {
            if flags.field_pic_size_4 {
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
                        if flags.pic_debug_counters {
                            interp.stats_mut().field_pic_set_hit += 1;
                        }
                        let record = record_for_field_handler(&handler, &receiver, &self.name, pos)?;
                        write_record_value(&record, &receiver, &self.name, value, interp, pos)
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

        match resolve_field(&receiver, start, caller, &self.name, scope, pos) {
            Ok((handler, record)) => {
                if flags.field_pic && shape != UNSTABLE_SHAPE {
                    self.write_cache.borrow_mut().install(shape, handler);
                }
                write_record_value(&record, &receiver, &self.name, value, interp, pos)
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

impl RefNode for QualifiedThisFieldSlotRef {
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
}

// ---------------------------------------------------------------------------
// Method-shaped nodes: ThisMethodSlotCallRef, QualifiedThisMethodSlotCallRef, ImplicitThisMethodCallRef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum MethodHandler {
    InstanceSlot(usize),
    Direct(Rc<Method>),
}

fn method_handler_from_site(site: &MemberSite, method: Rc<Method>, qualified: bool) -> MethodHandler {
    if qualified {
        return MethodHandler::Direct(method);
    }
    match site {
        MemberSite::InstanceMethod { slot, .. } => MethodHandler::InstanceSlot(*slot),
        _ => MethodHandler::Direct(method),
    }
}

fn method_from_record(record: &Rc<RefCell<Record>>, name: &str, pos: SourcePos) -> EvalResult<Rc<Method>> {
    match &record.borrow().value {
        Value::Callable(m) => Ok(m.clone()),
        _ => Err(RuntimeError::illegal_state(format!("`{name}` is not callable"), pos)),
    }
}

fn method_for_handler(handler: &MethodHandler, receiver: &Value, name: &str, pos: SourcePos) -> EvalResult<Rc<Method>> {
    match handler {
        MethodHandler::Direct(m) => Ok(m.clone()),
        MethodHandler::InstanceSlot(slot) => instance_of(receiver, pos)?
            .borrow()
            .method_slot(*slot)
            .cloned()
            .ok_or_else(|| RuntimeError::symbol_not_found(name, pos)),
    }
}

fn resolve_method(receiver: &Value, start: Option<ClassId>, caller: Option<ClassId>, name: &str, scope: &Rc<Scope>, pos: SourcePos) -> EvalResult<(MethodHandler, Rc<Method>)> {
    let inst = instance_of(receiver, pos)?;
    let resolved = resolution::resolve_member_from(&inst.borrow(), start, caller, name, Some(scope), pos)?;
    let method = method_from_record(&resolved.record, name, pos)?;
    Ok((method_handler_from_site(&resolved.site, method.clone(), start.is_some()), method))
}

macro_rules! method_fast_path {
    ($ty:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug)]
        pub struct $ty {
            pub name: String,
            pub args: Vec<ArgNode>,
            pub trailing_block: Option<Rc<dyn RefNode>>,
            pub pos: SourcePos,
            cache: RefCell<Pic<MethodHandler>>,
        }

        impl $ty {
            pub fn new(name: impl Into<String>, args: Vec<ArgNode>, trailing_block: Option<Rc<dyn RefNode>>, pos: SourcePos) -> Self {
                $ty {
                    name: name.into(),
                    args,
                    trailing_block,
                    pos,
                    cache: RefCell::new(Pic::new()),
                }
            }

            fn start(&self) -> Option<ClassId> {
                None
            }

            fn do_call(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
                let receiver = this_obj(scope, self.pos)?;
                let args = eval_arg_nodes(&self.args, self.trailing_block.as_ref(), scope, interp, self.pos)?;
                let shape: ShapeKey = receiver.shape_key();
                let flags = interp.perf_flags();
                let caller = scope.this_class();
                let start = self.start();

                if flags.method_pic {
                    if flags.method_pic_size_4 {
                        self.cache.borrow_mut().force_size4();
                    }
                    let probed = {
                        let mut cache = self.cache.borrow_mut();
                        match cache.probe(shape) {
                            Probe::Hit(h) => Some(Ok(h.clone())),
                            Probe::NegativeHit(m) => Some(Err(m.to_string())),
                            Probe::Miss => None,
                        }
                    };
                    if let Some(outcome) = probed {
                        self.cache.borrow_mut().record_access(flags, true, outcome.is_err());
                        return match outcome {
                            Ok(handler) => {
                                if flags.pic_debug_counters {
                                    interp.stats_mut().method_pic_hit += 1;
                                }
                                let method = method_for_handler(&handler, &receiver, &self.name, self.pos)?;
                                method.invoke(interp, Some(receiver.clone()), &args)
                            }
                            Err(message) => {
                                if flags.pic_debug_counters {
                                    interp.stats_mut().method_pic_miss += 1;
                                }
                                Err(RuntimeError::new(crate::error::ErrorKind::SymbolNotFound, message, self.pos))
                            }
                        };
                    }
                    if flags.pic_debug_counters {
                        interp.stats_mut().method_pic_miss += 1;
                    }
                    // A true cache miss still counts toward this site's adaptive
                    // window (spec §4.4), or a megamorphic site never accumulates
                    // enough accesses to promote from size 2 to size 4.
                    self.cache.borrow_mut().record_access(flags, true, true);
                }

                match resolve_method(&receiver, start, caller, &self.name, scope, self.pos) {
                    Ok((handler, method)) => {
                        if flags.method_pic && shape != UNSTABLE_SHAPE {
                            self.cache.borrow_mut().install(shape, handler);
                        }
                        method.invoke(interp, Some(receiver.clone()), &args)
                    }
                    Err(err) => {
                        if flags.method_pic && shape != UNSTABLE_SHAPE {
                            self.cache.borrow_mut().install_negative(shape, err.message.clone());
                        }
                        Err(err)
                    }
                }
            }
        }

        impl RefNode for $ty {
            fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
                let value = self.do_call(scope, interp)?;
                Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
            }

            fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
                self.do_call(scope, interp)
            }

            fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
                for arg in &self.args {
                    match arg {
                        ArgNode::Positional(n) | ArgNode::Named(_, n) | ArgNode::Spread(n) => n.for_each_variable(f),
                    }
                }
            }

            fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
                for arg in &self.args {
                    match arg {
                        ArgNode::Positional(n) | ArgNode::Named(_, n) | ArgNode::Spread(n) => n.for_each_variable_with_pos(f),
                    }
                }
            }
        }
    };
}

method_fast_path!(ThisMethodSlotCallRef, "`ThisMethodSlotCallRef(name, args)`: `this.name(args)`, proven by the compiler (spec §4.4).");
method_fast_path!(
    ImplicitThisMethodCallRef,
    "`ImplicitThisMethodCallRef(name, args)`: a bare `name(args)` the compiler proved is an implicit `this.name(args)` (spec §4.4)."
);

/// `QualifiedThisMethodSlotCallRef(type, name, args)`: `this@T.name(args)`
/// (spec §4.4, §8 scenario 7 — must resolve to `T`'s own method, bypassing
/// whatever the receiver's dynamic class overrides it with).
#[derive(Debug)]
pub struct QualifiedThisMethodSlotCallRef {
    pub ancestor: Rc<Class>,
    pub name: String,
    pub args: Vec<ArgNode>,
    pub trailing_block: Option<Rc<dyn RefNode>>,
    pub pos: SourcePos,
    cache: RefCell<Pic<MethodHandler>>,
}

impl QualifiedThisMethodSlotCallRef {
    pub fn new(ancestor: Rc<Class>, name: impl Into<String>, args: Vec<ArgNode>, trailing_block: Option<Rc<dyn RefNode>>, pos: SourcePos) -> Self {
        QualifiedThisMethodSlotCallRef {
            ancestor,
            name: name.into(),
            args,
            trailing_block,
            pos,
            cache: RefCell::new(Pic::new()),
        }
    }

    fn do_call(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let receiver = this_obj(scope, self.pos)?;
        let args = eval_arg_nodes(&self.args, self.trailing_block.as_ref(), scope, interp, self.pos)?;
        let shape: ShapeKey = receiver.shape_key();
        let flags = interp.perf_flags();
        let caller = scope.this_class();
        let start = Some(self.ancestor.id);

        if flags.method_pic {
            if flags.method_pic_size_4 {
                self.cache.borrow_mut().force_size4();
            }
            let probed = {
                let mut cache = self.cache.borrow_mut();
                match cache.probe(shape) {
                    Probe::Hit(h) => Some(Ok(h.clone())),
                    Probe::NegativeHit(m) => Some(Err(m.to_string())),
                    Probe::Miss => None,
                }
            };
            if let Some(outcome) = probed {
                self.cache.borrow_mut().record_access(flags, true, outcome.is_err());
                return match outcome {
                    Ok(handler) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().method_pic_hit += 1;
                        }
                        let method = method_for_handler(&handler, &receiver, &self.name, self.pos)?;
                        method.invoke(interp, Some(receiver.clone()), &args)
                    }
                    Err(message) => {
                        if flags.pic_debug_counters {
                            interp.stats_mut().method_pic_miss += 1;
                        }
                        Err(RuntimeError::new(crate::error::ErrorKind::SymbolNotFound, message, self.pos))
                    }
                };
            }
            if flags.pic_debug_counters {
                interp.stats_mut().method_pic_miss += 1;
            }
            self.cache.borrow_mut().record_access(flags, true, true);
        }

        match resolve_method(&receiver, start, caller, &self.name, scope, self.pos) {
            Ok((handler, method)) => {
                if flags.method_pic && shape != UNSTABLE_SHAPE {
                    self.cache.borrow_mut().install(shape, handler);
                }
                method.invoke(interp, Some(receiver.clone()), &args)
            }
            Err(err) => {
                if flags.method_pic && shape != UNSTABLE_SHAPE {
                    self.cache.borrow_mut().install_negative(shape, err.message.clone());
                }
                Err(err)
            }
        }
    }
}

impl RefNode for QualifiedThisMethodSlotCallRef {
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.do_call(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }

    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        self.do_call(scope, interp)
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        for arg in &self.args {
            match arg {
                ArgNode::Positional(n) | ArgNode::Named(_, n) | ArgNode::Spread(n) => n.for_each_variable(f),
            }
        }
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
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
    use crate::object_model::record::Visibility as Vis;
    use crate::object_model::ClassRegistry;
    use crate::refs::{BinaryOp, BinaryOpRef, ConstRef, LocalVarRef};
    use crate::scope::Scope;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    #[test]
    fn this_field_slot_ref_reads_own_field() {
        let reg = ClassRegistry::new();
        let class = reg.register("C", vec![]).unwrap();
        class.add_member("x", Record::new_field(Value::Int(5), true, Vis::Public, Some(class.id)));
        let inst = Value::Instance(Rc::new(RefCell::new(class.instantiate())));

        let node = ThisFieldSlotRef::new("x", pos());
        let scope = Scope::new_root(Some(inst), Some(class.id));
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(5));
    }

    #[test]
    fn this_field_slot_ref_without_this_is_illegal_state() {
        let node = ThisFieldSlotRef::new("x", pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let err = node.eval_value(&scope, &mut interp).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IllegalState);
    }

    #[test]
    fn this_method_slot_call_ref_invokes_with_positional_args() {
        let reg = ClassRegistry::new();
        let class = reg.register("C", vec![]).unwrap();
        let body: Rc<dyn RefNode> = Rc::new(BinaryOpRef {
            op: BinaryOp::Add,
            left: Rc::new(LocalVarRef::new("n", pos())),
            right: Rc::new(LocalVarRef::new("n", pos())),
            pos: pos(),
        });
        let method = Rc::new(Method::new("twice", Some(class.id), vec!["n".to_string()], body));
        class.add_member("twice", Record::new_method(method, Vis::Public, Some(class.id)));
        let inst = Value::Instance(Rc::new(RefCell::new(class.instantiate())));

        let node = ThisMethodSlotCallRef::new("twice", vec![ArgNode::Positional(Rc::new(ConstRef::new(Value::Int(3))))], None, pos());
        let scope = Scope::new_root(Some(inst), Some(class.id));
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(6));
    }

    /// spec §8 scenario 7: `class A { open fun f() = 1 }; class B : A { override fun f() = 2 }`
    /// — called *from inside B*, `this@A.f()` must land on A's own `f`, not B's override.
    #[test]
    fn qualified_this_method_call_bypasses_override() {
        let reg = ClassRegistry::new();
        let a = reg.register("A", vec![]).unwrap();
        let a_body: Rc<dyn RefNode> = Rc::new(ConstRef::new(Value::Int(1)));
        a.add_member("f", Record::new_method(Rc::new(Method::new("f", Some(a.id), vec![], a_body)), Vis::Public, Some(a.id)));

        let b = reg.register("B", vec![a.clone()]).unwrap();
        let b_body: Rc<dyn RefNode> = Rc::new(ConstRef::new(Value::Int(2)));
        b.add_member("f", Record::new_method(Rc::new(Method::new("f", Some(b.id), vec![], b_body)), Vis::Public, Some(b.id)));

        let inst = Value::Instance(Rc::new(RefCell::new(b.instantiate())));

        let node = QualifiedThisMethodSlotCallRef::new(a.clone(), "f", vec![], None, pos());
        let scope = Scope::new_root(Some(inst), Some(b.id));
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(1));
    }
}
