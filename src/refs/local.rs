//! Local-variable resolution (spec §4.4 "Local variable resolution"): four
//! variants of increasing compile-time knowledge, from "walk everything and
//! fall back to `this.name`" down to "the slot index and depth are already
//! known, just index into it".

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::{ErrorKind, EvalResult, RuntimeError, SourcePos};
use crate::interpreter::Interpreter;
use crate::object_model::record::Record;
use crate::object_model::resolution;
use crate::scope::{Scope, MAX_PARENT_WALK};
use crate::value::Value;

use super::RefNode;

/// `LocalVarRef(name)`: the fully general variant — current frame, then the
/// parent chain, then `this.name` — used when the compiler can't prove more.
#[derive(Debug)]
pub struct LocalVarRef {
    pub name: String,
    pub pos: SourcePos,
    /// `(frameId, slotIndex)` from the last time this name resolved in the
    /// *current* frame (not an ancestor's), so a repeat hit in the same frame
    /// skips the slot-map hash lookup (spec §4.4 "Caches `(frameId, slotIndex)`").
    cache: RefCell<Option<(u64, usize)>>,
}

impl LocalVarRef {
    pub fn new(name: impl Into<String>, pos: SourcePos) -> Self {
        LocalVarRef {
            name: name.into(),
            pos,
            cache: RefCell::new(None),
        }
    }

    fn resolve(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let flags = interp.perf_flags();

        if flags.local_slot_pic {
            if let Some((frame_id, idx)) = *self.cache.borrow() {
                if scope.frame_id() == frame_id {
                    if let Some(record) = scope.slot_at(idx) {
                        if flags.pic_debug_counters {
                            interp.stats_mut().local_var_pic_hit += 1;
                        }
                        return Ok(record);
                    }
                }
            }
            if flags.pic_debug_counters {
                interp.stats_mut().local_var_pic_miss += 1;
            }
        }

        if let Some(idx) = scope.slot_index_of(&self.name) {
            if flags.local_slot_pic {
                *self.cache.borrow_mut() = Some((scope.frame_id(), idx));
            }
            return Ok(scope.slot_at(idx).expect("slot_index_of implies slot_at"));
        }

        if let Some(record) = scope.get(&self.name) {
            return Ok(record);
        }

        // Fall back to `this.name` as a field; any failure here is reported as
        // `SymbolNotFound` on the *variable* name, not whatever field-resolution
        // error it underlies (spec §4.4 "map 'no such field' errors to SymbolNotFound").
        match scope.this_obj() {
            Some(Value::Instance(inst)) => {
                resolution::resolve_member(&inst.borrow(), scope.this_class(), &self.name, Some(scope), self.pos)
                    .map(|resolved| resolved.record)
                    .map_err(|_| RuntimeError::symbol_not_found(&self.name, self.pos))
            }
            Some(Value::QualifiedView(inst, ancestor)) => {
                resolution::resolve_member_from(&inst.borrow(), Some(ancestor), scope.this_class(), &self.name, Some(scope), self.pos)
                    .map(|resolved| resolved.record)
                    .map_err(|_| RuntimeError::symbol_not_found(&self.name, self.pos))
            }
            _ => Err(RuntimeError::symbol_not_found(&self.name, self.pos)),
        }
    }
}

impl RefNode for LocalVarRef {
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        self.resolve(scope, interp)
    }

    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        Ok(self.resolve(scope, interp)?.borrow().value.clone())
    }

    fn set_at(&self, scope: &Rc<Scope>, interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        let record = self.resolve(scope, interp)?;
        if !record.borrow().is_mutable {
            return Err(RuntimeError::illegal_assignment(format!("`{}` is not mutable", self.name), pos));
        }
        record.borrow_mut().value = value;
        Ok(())
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        f(&self.name);
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
        f(&self.name, self.pos);
    }
}

/// `FastLocalVarRef(name)`: known to be a local/closure reference. Walks the
/// ancestor chain once, then caches the owning scope (weakly, so the cache
/// doesn't keep a frame alive past its natural lifetime) plus its `frameId`
/// and slot index (spec §4.4 variant 2).
#[derive(Debug)]
pub struct FastLocalVarRef {
    pub name: String,
    pub pos: SourcePos,
    cache: RefCell<Option<(Weak<Scope>, u64, usize)>>,
}

impl FastLocalVarRef {
    pub fn new(name: impl Into<String>, pos: SourcePos) -> Self {
        FastLocalVarRef {
            name: name.into(),
            pos,
            cache: RefCell::new(None),
        }
    }

    /// Whether `candidate` is still reachable by walking `scope`'s ancestor
    /// chain (cycle-guarded per spec §4.3).
    fn is_ancestor(scope: &Rc<Scope>, candidate: &Rc<Scope>) -> bool {
        let mut current = Some(scope.clone());
        let mut steps = 0;
        while let Some(s) = current {
            if Rc::ptr_eq(&s, candidate) {
                return true;
            }
            if steps >= MAX_PARENT_WALK {
                return false;
            }
            let next = s.parent();
            if let Some(n) = &next {
                if Rc::ptr_eq(n, &s) {
                    return false;
                }
            }
            current = next;
            steps += 1;
        }
        false
    }

    fn resolve(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let flags = interp.perf_flags();

        if flags.local_slot_pic {
            if let Some((owner_weak, frame_id, idx)) = self.cache.borrow().clone() {
                if let Some(owner) = owner_weak.upgrade() {
                    if owner.frame_id() == frame_id && Self::is_ancestor(scope, &owner) {
                        if let Some(record) = owner.slot_at(idx) {
                            if flags.pic_debug_counters {
                                interp.stats_mut().fast_local_hit += 1;
                            }
                            return Ok(record);
                        }
                    }
                }
            }
            if flags.pic_debug_counters {
                interp.stats_mut().fast_local_miss += 1;
            }
        }

        let (owner, frame_id, idx) = scope.find_owner(&self.name).ok_or_else(|| RuntimeError::symbol_not_found(&self.name, self.pos))?;
        if flags.local_slot_pic {
            *self.cache.borrow_mut() = Some((Rc::downgrade(&owner), frame_id, idx));
        }
        owner.slot_at(idx).ok_or_else(|| RuntimeError::symbol_not_found(&self.name, self.pos))
    }
}

impl RefNode for FastLocalVarRef {
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        self.resolve(scope, interp)
    }

    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        Ok(self.resolve(scope, interp)?.borrow().value.clone())
    }

    fn set_at(&self, scope: &Rc<Scope>, interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        let record = self.resolve(scope, interp)?;
        if !record.borrow().is_mutable {
            return Err(RuntimeError::illegal_assignment(format!("`{}` is not mutable", self.name), pos));
        }
        record.borrow_mut().value = value;
        Ok(())
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        f(&self.name);
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
        f(&self.name, self.pos);
    }
}

/// `BoundLocalVarRef(slotIndex)`: the slot is already known at compile time
/// in the *current* frame — direct indexed access, no walk at all.
#[derive(Debug)]
pub struct BoundLocalVarRef {
    pub slot_index: usize,
    pub pos: SourcePos,
}

impl BoundLocalVarRef {
    pub fn new(slot_index: usize, pos: SourcePos) -> Self {
        BoundLocalVarRef { slot_index, pos }
    }

    fn resolve(&self, scope: &Rc<Scope>) -> EvalResult<Rc<RefCell<Record>>> {
        scope
            .slot_at(self.slot_index)
            .ok_or_else(|| RuntimeError::new(ErrorKind::IllegalState, "bound local slot index out of range", self.pos))
    }
}

impl RefNode for BoundLocalVarRef {
    fn get(&self, scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        self.resolve(scope)
    }

    fn eval_value(&self, scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Value> {
        Ok(self.resolve(scope)?.borrow().value.clone())
    }

    fn set_at(&self, scope: &Rc<Scope>, _interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        let record = self.resolve(scope)?;
        if !record.borrow().is_mutable {
            return Err(RuntimeError::illegal_assignment("local is not mutable", pos));
        }
        record.borrow_mut().value = value;
        Ok(())
    }
}

/// `LocalSlotRef(name, slotIndex, depth)`: compile-known slot index *and*
/// depth up the ancestor chain — direct, no hashing, no frameId validation.
#[derive(Debug)]
pub struct LocalSlotRef {
    pub name: String,
    pub slot_index: usize,
    pub depth: usize,
    pub pos: SourcePos,
}

impl LocalSlotRef {
    pub fn new(name: impl Into<String>, slot_index: usize, depth: usize, pos: SourcePos) -> Self {
        LocalSlotRef {
            name: name.into(),
            slot_index,
            depth,
            pos,
        }
    }

    fn owner(&self, scope: &Rc<Scope>) -> EvalResult<Rc<Scope>> {
        let mut current = scope.clone();
        for _ in 0..self.depth {
            current = current
                .parent()
                .ok_or_else(|| RuntimeError::illegal_state(format!("`{}`: ancestor chain shorter than recorded depth", self.name), self.pos))?;
        }
        Ok(current)
    }

    fn resolve(&self, scope: &Rc<Scope>) -> EvalResult<Rc<RefCell<Record>>> {
        let owner = self.owner(scope)?;
        owner
            .slot_at(self.slot_index)
            .ok_or_else(|| RuntimeError::new(ErrorKind::IllegalState, "local slot index out of range", self.pos))
    }
}

impl RefNode for LocalSlotRef {
    fn get(&self, scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        self.resolve(scope)
    }

    fn eval_value(&self, scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Value> {
        Ok(self.resolve(scope)?.borrow().value.clone())
    }

    fn set_at(&self, scope: &Rc<Scope>, _interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        let record = self.resolve(scope)?;
        if !record.borrow().is_mutable {
            return Err(RuntimeError::illegal_assignment(format!("`{}` is not mutable", self.name), pos));
        }
        record.borrow_mut().value = value;
        Ok(())
    }

    fn for_each_variable(&self, f: &mut dyn FnMut(&str)) {
        f(&self.name);
    }

    fn for_each_variable_with_pos(&self, f: &mut dyn FnMut(&str, SourcePos)) {
        f(&self.name, self.pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::record::Visibility;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    fn rec(v: Value) -> Rc<RefCell<Record>> {
        Rc::new(RefCell::new(Record::new_field(v, true, Visibility::Public, None)))
    }

    #[test]
    fn local_var_ref_finds_current_frame_slot() {
        let scope = Scope::new_root(None, None);
        scope.define("x", rec(Value::Int(5)));
        let node = LocalVarRef::new("x", pos());
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(5));
    }

    #[test]
    fn local_var_ref_climbs_to_parent() {
        let root = Scope::new_root(None, None);
        root.define("x", rec(Value::Int(9)));
        let child = Scope::child(&root, None, None);
        let node = LocalVarRef::new("x", pos());
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&child, &mut interp).unwrap(), Value::Int(9));
    }

    #[test]
    fn local_var_ref_missing_is_symbol_not_found() {
        let scope = Scope::new_root(None, None);
        let node = LocalVarRef::new("nope", pos());
        let mut interp = Interpreter::new_for_tests();
        let err = node.eval_value(&scope, &mut interp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SymbolNotFound);
    }

    #[test]
    fn fast_local_var_ref_caches_owner_across_calls() {
        let root = Scope::new_root(None, None);
        root.define("x", rec(Value::Int(1)));
        let child = Scope::child(&root, None, None);
        let node = FastLocalVarRef::new("x", pos());
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&child, &mut interp).unwrap(), Value::Int(1));
        assert_eq!(node.eval_value(&child, &mut interp).unwrap(), Value::Int(1));
    }

    #[test]
    fn bound_local_var_ref_direct_index() {
        let scope = Scope::new_root(None, None);
        scope.define("x", rec(Value::Int(1)));
        scope.define("y", rec(Value::Int(2)));
        let node = BoundLocalVarRef::new(1, pos());
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(2));
    }

    #[test]
    fn local_slot_ref_walks_depth_then_indexes() {
        let root = Scope::new_root(None, None);
        root.define("x", rec(Value::Int(7)));
        let child = Scope::child(&root, None, None);
        let grandchild = Scope::child(&child, None, None);
        let node = LocalSlotRef::new("x", 0, 2, pos());
        let mut interp = Interpreter::new_for_tests();
        assert_eq!(node.eval_value(&grandchild, &mut interp).unwrap(), Value::Int(7));
    }
}
