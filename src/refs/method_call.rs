//! `MethodCallRef(receiver, name, args)` (spec §4.4 "Method call"): evaluate
//! the receiver, bind arguments, and invoke `name` through a method PIC
//! identical in structure to the field PIC.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::interpreter::Interpreter;
use crate::object_model::record::{Record, Visibility};
use crate::object_model::resolution::{self, MemberSite};
use crate::object_model::Method;
use crate::refs::pic::{Pic, Probe, ShapeKey, UNSTABLE_SHAPE};
use crate::scope::{Arguments, Scope};
use crate::value::Value;

use super::{eval_child, RefNode};

/// One evaluated-at-call-time argument slot (spec §5 "Argument evaluation at
/// a call site is left-to-right, followed by named/spread expansion").
#[derive(Clone)]
pub enum ArgNode {
    Positional(Rc<dyn RefNode>),
    Named(String, Rc<dyn RefNode>),
    /// `...expr`: `expr` must evaluate to a `List`, whose elements splice into
    /// the positional argument list in place.
    Spread(Rc<dyn RefNode>),
}

#[derive(Debug, Clone)]
enum MethodHandler {
    InstanceSlot(usize),
    /// Covers both a class-scope static invoker and the generic
    /// "resolved through extension/Obj" case — both just hold a method.
    Direct(Rc<Method>),
}

fn handler_from_site(site: &MemberSite, method: Rc<Method>) -> MethodHandler {
    match site {
        MemberSite::InstanceMethod { slot, .. } => MethodHandler::InstanceSlot(*slot),
        _ => MethodHandler::Direct(method),
    }
}

/// Shared argument evaluation for every call-shaped node (`MethodCallRef`,
/// `CallRef`, and the `this`-fast-path call variants): left-to-right
/// positional/named evaluation, then spread expansion, then the trailing
/// block if any (spec §5 "Argument evaluation at a call site").
pub(crate) fn eval_arg_nodes(
    args: &[ArgNode],
    trailing_block: Option<&Rc<dyn RefNode>>,
    scope: &Rc<Scope>,
    interp: &mut Interpreter,
    pos: SourcePos,
) -> EvalResult<Arguments> {
    let mut positional = Vec::new();
    let mut named = IndexMap::new();
    for arg in args {
        match arg {
            ArgNode::Positional(node) => positional.push(eval_child(node, scope, interp)?),
            ArgNode::Named(key, node) => {
                named.insert(key.clone(), eval_child(node, scope, interp)?);
            }
            ArgNode::Spread(node) => match eval_child(node, scope, interp)? {
                Value::List(list) => positional.extend(list.borrow().iter().cloned()),
                _ => return Err(RuntimeError::illegal_argument("spread argument must be a List", pos)),
            },
        }
    }
    let mut bound = Arguments::positional(positional).with_named(named);
    if let Some(block) = trailing_block {
        bound = bound.with_trailing_block(block.clone());
    }
    Ok(bound)
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
        MethodHandler::InstanceSlot(slot) => {
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
pub struct MethodCallRef {
    pub receiver: Rc<dyn RefNode>,
    pub name: String,
    pub args: Vec<ArgNode>,
    pub trailing_block: Option<Rc<dyn RefNode>>,
    /// `receiver?.name(...)`: a `Null` receiver short-circuits to `Null`.
    pub optional: bool,
    pub pos: SourcePos,
    cache: RefCell<Pic<MethodHandler>>,
}

impl std::fmt::Debug for ArgNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgNode::Positional(_) => write!(f, "Positional(..)"),
            ArgNode::Named(n, _) => write!(f, "Named({n}, ..)"),
            ArgNode::Spread(_) => write!(f, "Spread(..)"),
        }
    }
}

impl MethodCallRef {
    pub fn new(receiver: Rc<dyn RefNode>, name: impl Into<String>, args: Vec<ArgNode>, trailing_block: Option<Rc<dyn RefNode>>, optional: bool, pos: SourcePos) -> Self {
        MethodCallRef {
            receiver,
            name: name.into(),
            args,
            trailing_block,
            optional,
            pos,
            cache: RefCell::new(Pic::new()),
        }
    }

    fn eval_args(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Arguments> {
        eval_arg_nodes(&self.args, self.trailing_block.as_ref(), scope, interp, self.pos)
    }

    fn resolve(&self, target: &Value, caller: Option<crate::object_model::ClassId>, scope: &Rc<Scope>) -> EvalResult<(MethodHandler, Rc<Method>)> {
        let resolved = match target {
            Value::Instance(inst) => resolution::resolve_member(&inst.borrow(), caller, &self.name, Some(scope), self.pos)?,
            Value::QualifiedView(inst, ancestor) => resolution::resolve_member_from(&inst.borrow(), Some(*ancestor), caller, &self.name, Some(scope), self.pos)?,
            Value::Class(class) => resolution::resolve_static_member(class, caller, &self.name, self.pos)?,
            _ => return Err(RuntimeError::illegal_argument(format!("`{}` is not callable on this value", self.name), self.pos)),
        };
        let method = method_from_record(&resolved.record, &self.name, self.pos)?;
        Ok((handler_from_site(&resolved.site, method.clone()), method))
    }

    fn do_call(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let target = eval_child(&self.receiver, scope, interp)?;
        if matches!(target, Value::Null) {
            return if self.optional { Ok(Value::Null) } else { Err(RuntimeError::null_pointer(self.pos)) };
        }

        let args = self.eval_args(scope, interp)?;
        let shape: ShapeKey = target.shape_key();
        let flags = interp.perf_flags();
        let caller = scope.this_class();
        let this_obj = if matches!(target, Value::Class(_)) { None } else { Some(target.clone()) };

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
                        let method = method_for_handler(&handler, &target, &self.name, self.pos)?;
                        method.invoke(interp, this_obj, &args)
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
            // A true cache miss still counts toward this site's adaptive window
            // (spec §4.4); otherwise a megamorphic call site never accumulates
            // enough window accesses to promote from size 2 to size 4.
            self.cache.borrow_mut().record_access(flags, true, true);
        }

        match self.resolve(&target, caller, scope) {
            Ok((handler, _)) => {
                if flags.method_pic && shape != UNSTABLE_SHAPE {
                    self.cache.borrow_mut().install(shape, handler.clone());
                }
                // Route through the handler rather than the just-resolved method: a
                // slot-backed site must invoke whatever override the receiver's dynamic
                // class put in that slot (virtual dispatch, spec §8 scenario 7's
                // `(B() as A).f() == 2`), not the literal record the lineage walk landed on.
                let method = method_for_handler(&handler, &target, &self.name, self.pos)?;
                method.invoke(interp, this_obj, &args)
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

impl RefNode for MethodCallRef {
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.do_call(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }

    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        self.do_call(scope, interp)
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        self.receiver.for_each_variable(f);
        for arg in &self.args {
            match arg {
                ArgNode::Positional(n) | ArgNode::Named(_, n) | ArgNode::Spread(n) => n.for_each_variable(f),
            }
        }
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
        self.receiver.for_each_variable_with_pos(f);
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
    use crate::object_model::{ClassRegistry, Method};
    use crate::refs::ConstRef;
    use crate::scope::Scope;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    /// Builds `class C { fun twice(n) = n + n }` and an instance of it.
    fn instance_with_method() -> Value {
        let reg = ClassRegistry::new();
        let class = reg.register("C", vec![]).unwrap();
        let body: Rc<dyn RefNode> = Rc::new(crate::refs::BinaryOpRef {
            op: crate::refs::BinaryOp::Add,
            left: Rc::new(super::super::local::LocalVarRef::new("n", pos())),
            right: Rc::new(super::super::local::LocalVarRef::new("n", pos())),
            pos: pos(),
        });
        let method = Rc::new(Method::new("twice", Some(class.id), vec!["n".to_string()], body));
        class.add_member("twice", Record::new_method(method, Vis::Public, Some(class.id)));
        let inst = class.instantiate();
        Value::Instance(Rc::new(RefCell::new(inst)))
    }

    #[test]
    fn calls_instance_method_with_positional_arg() {
        let receiver = instance_with_method();
        let node = MethodCallRef::new(
            Rc::new(ConstRef::new(receiver)),
            "twice",
            vec![ArgNode::Positional(Rc::new(ConstRef::new(Value::Int(4))))],
            None,
            false,
            pos(),
        );
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(8));
    }

    #[test]
    fn optional_chain_short_circuits_on_null_receiver() {
        let node = MethodCallRef::new(Rc::new(ConstRef::new(Value::Null)), "twice", vec![], None, true, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Null);
    }

    #[test]
    fn missing_method_is_symbol_not_found() {
        let receiver = instance_with_method();
        let node = MethodCallRef::new(Rc::new(ConstRef::new(receiver)), "missing", vec![], None, false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let err = node.eval_value(&scope, &mut interp).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::SymbolNotFound);
    }

    /// `(B() as A).f()`: an upcast preserves virtual dispatch (spec §8 scenario
    /// 7) — the override wins on both the cold resolve and a cached PIC hit.
    #[test]
    fn qualified_view_call_keeps_virtual_dispatch_on_cold_and_warm_paths() {
        let reg = ClassRegistry::new();
        let a = reg.register("A", vec![]).unwrap();
        let a_body: Rc<dyn RefNode> = Rc::new(ConstRef::new(Value::Int(1)));
        a.add_member("f", Record::new_method(Rc::new(Method::new("f", Some(a.id), vec![], a_body)), Vis::Public, Some(a.id)));

        let b = reg.register("B", vec![a.clone()]).unwrap();
        let b_body: Rc<dyn RefNode> = Rc::new(ConstRef::new(Value::Int(2)));
        b.add_member("f", Record::new_method(Rc::new(Method::new("f", Some(b.id), vec![], b_body)), Vis::Public, Some(b.id)));

        let inst = Rc::new(RefCell::new(b.instantiate()));
        let view = Value::QualifiedView(inst, a.id);

        let node = MethodCallRef::new(Rc::new(ConstRef::new(view)), "f", vec![], None, false, pos());
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(2));
        // Second call hits the PIC; must still see the override, not flip back to A's.
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(2));
    }
}
