//! `Scope`: one call frame (spec §4.3).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::error::{ErrorKind, RuntimeError, SourcePos};
use crate::object_model::record::Record;
use crate::object_model::ClassId;
use crate::value::Value;

/// Parent-chain walks MUST be bounded (spec §4.3 "Cycle guards ... MUST bound
/// their iteration count (≥4096)"). Reentrant pooled-frame rebinding can
/// transiently make `parent === self`; every walk below checks for that too.
pub const MAX_PARENT_WALK: usize = 4096;

/// An extension method/property registered against a receiver type on some
/// lexical scope (spec §4.2 step 3, "extension on the current scope chain").
#[derive(Clone)]
pub struct Extension {
    pub receiver_class: ClassId,
    pub name: String,
    pub record: Rc<RefCell<Record>>,
}

/// One call frame. `frameId` is bumped whenever a pooled frame is recycled,
/// invalidating any `(frameId, slotIndex)` pair cached by a reference node
/// (spec §4.3 "A cached (frameId, slotIndex) remains valid iff ...").
pub struct Scope {
    parent: RefCell<Option<Rc<Scope>>>,
    this_obj: RefCell<Option<Value>>,
    this_class: Cell<Option<ClassId>>,
    slots: RefCell<Vec<Rc<RefCell<Record>>>>,
    slot_map: RefCell<HashMap<String, usize>>,
    extensions: RefCell<Vec<Extension>>,
    frame_id: Cell<u64>,
    /// The position of whichever reference node is currently evaluating in
    /// this frame, used to build the `frameTrace` of an error (spec §7 "a
    /// stack of source positions from the cache of active Scope.pos values").
    pos: Cell<SourcePos>,
}

impl Scope {
    /// A fresh, unpooled root scope (e.g. top-level `execute` invocation).
    pub fn new_root(this_obj: Option<Value>, this_class: Option<ClassId>) -> Rc<Scope> {
        Rc::new(Scope {
            parent: RefCell::new(None),
            this_obj: RefCell::new(this_obj),
            this_class: Cell::new(this_class),
            slots: RefCell::new(Vec::new()),
            slot_map: RefCell::new(HashMap::new()),
            extensions: RefCell::new(Vec::new()),
            frame_id: Cell::new(0),
            pos: Cell::new(SourcePos::UNKNOWN),
        })
    }

    pub fn child(parent: &Rc<Scope>, this_obj: Option<Value>, this_class: Option<ClassId>) -> Rc<Scope> {
        Rc::new(Scope {
            parent: RefCell::new(Some(parent.clone())),
            this_obj: RefCell::new(this_obj),
            this_class: Cell::new(this_class),
            slots: RefCell::new(Vec::new()),
            slot_map: RefCell::new(HashMap::new()),
            extensions: RefCell::new(Vec::new()),
            frame_id: Cell::new(0),
            pos: Cell::new(SourcePos::UNKNOWN),
        })
    }

    /// Reconfigure this frame in place for reuse from a [`crate::scope::FramePool`],
    /// bumping `frameId` so stale `(frameId, slotIndex)` caches miss (spec §4.3).
    pub(crate) fn reset_for_reuse(&self, parent: Option<Rc<Scope>>, this_obj: Option<Value>, this_class: Option<ClassId>) {
        *self.parent.borrow_mut() = parent;
        *self.this_obj.borrow_mut() = this_obj;
        self.this_class.set(this_class);
        self.slots.borrow_mut().clear();
        self.slot_map.borrow_mut().clear();
        self.extensions.borrow_mut().clear();
        self.frame_id.set(self.frame_id.get().wrapping_add(1));
        self.pos.set(SourcePos::UNKNOWN);
    }

    pub fn pos(&self) -> SourcePos {
        self.pos.get()
    }

    pub fn set_pos(&self, pos: SourcePos) {
        self.pos.set(pos);
    }

    fn collect_frame_trace(&self) -> Vec<SourcePos> {
        let mut trace = vec![self.pos()];
        let mut current = self.parent();
        let mut steps = 0;
        while let Some(scope) = current {
            if steps >= MAX_PARENT_WALK {
                break;
            }
            trace.push(scope.pos());
            let next = scope.parent();
            if let Some(next_scope) = &next {
                if Rc::ptr_eq(next_scope, &scope) {
                    break;
                }
            }
            current = next;
            steps += 1;
        }
        trace
    }

    /// `raiseError(kind, message)`: the uniform error-raising hook exposed on
    /// every scope (spec §6), stamping the current position and the active
    /// frame trace.
    pub fn raise_error(&self, kind: ErrorKind, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(kind, message, self.pos()).with_trace(self.collect_frame_trace())
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id.get()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn this_obj(&self) -> Option<Value> {
        self.this_obj.borrow().clone()
    }

    pub fn this_class(&self) -> Option<ClassId> {
        self.this_class.get()
    }

    pub fn parent(&self) -> Option<Rc<Scope>> {
        self.parent.borrow().clone()
    }

    /// Define a new local slot in *this* frame, returning its index.
    pub fn define(&self, name: impl Into<String>, record: Rc<RefCell<Record>>) -> usize {
        let name = name.into();
        let idx = self.slots.borrow().len();
        self.slots.borrow_mut().push(record);
        self.slot_map.borrow_mut().insert(name, idx);
        idx
    }

    /// `getSlotIndexOf`: touches only the current frame (spec §4.3).
    pub fn slot_index_of(&self, name: &str) -> Option<usize> {
        self.slot_map.borrow().get(name).copied()
    }

    pub fn slot_at(&self, index: usize) -> Option<Rc<RefCell<Record>>> {
        self.slots.borrow().get(index).cloned()
    }

    /// `scope[name]`: climbs the parent chain, returning the first matching
    /// record (spec §4.3).
    pub fn get(&self, name: &str) -> Option<Rc<RefCell<Record>>> {
        if let Some(&idx) = self.slot_map.borrow().get(name) {
            return self.slot_at(idx);
        }
        let mut current = self.parent();
        let mut steps = 0;
        while let Some(scope) = current {
            if steps >= MAX_PARENT_WALK {
                break;
            }
            if let Some(&idx) = scope.slot_map.borrow().get(name) {
                return scope.slot_at(idx);
            }
            let next = scope.parent();
            if let Some(next_scope) = &next {
                if Rc::ptr_eq(next_scope, &scope) {
                    break;
                }
            }
            current = next;
            steps += 1;
        }
        None
    }

    /// Walk the ancestor chain (self first) looking for the frame that owns
    /// slot `name`, returning `(owner, frame_id, slot_index)` so callers like
    /// `FastLocalVarRef` can cache `(ownerScope, frameId, slotIndex)` directly
    /// (spec §4.4 "Local variable resolution", variant 2).
    pub fn find_owner(self: &Rc<Scope>, name: &str) -> Option<(Rc<Scope>, u64, usize)> {
        let mut current = Some(self.clone());
        let mut steps = 0;
        while let Some(scope) = current {
            if steps >= MAX_PARENT_WALK {
                break;
            }
            if let Some(idx) = scope.slot_index_of(name) {
                return Some((scope.clone(), scope.frame_id(), idx));
            }
            let next = scope.parent();
            if let Some(next_scope) = &next {
                if Rc::ptr_eq(next_scope, &scope) {
                    break;
                }
            }
            current = next;
            steps += 1;
        }
        None
    }

    pub fn register_extension(&self, receiver_class: ClassId, name: impl Into<String>, record: Rc<RefCell<Record>>) {
        self.extensions.borrow_mut().push(Extension {
            receiver_class,
            name: name.into(),
            record,
        });
    }

    /// Step 3 of member resolution (spec §4.2): walk the scope chain
    /// (innermost first) for an extension whose receiver type is any of
    /// `ancestor_ids`.
    pub fn resolve_extension(&self, ancestor_ids: &[ClassId], name: &str) -> Option<Rc<RefCell<Record>>> {
        if let Some(found) = self.extensions.borrow().iter().find(|e| e.name == name && ancestor_ids.contains(&e.receiver_class)) {
            trace!(name, receiver = found.receiver_class, "extension matched");
            return Some(found.record.clone());
        }
        let mut current = self.parent();
        let mut steps = 0;
        while let Some(scope) = current {
            if steps >= MAX_PARENT_WALK {
                break;
            }
            if let Some(found) = scope.extensions.borrow().iter().find(|e| e.name == name && ancestor_ids.contains(&e.receiver_class)) {
                return Some(found.record.clone());
            }
            let next = scope.parent();
            if let Some(next_scope) = &next {
                if Rc::ptr_eq(next_scope, &scope) {
                    break;
                }
            }
            current = next;
            steps += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::record::Visibility;

    fn rec(v: Value) -> Rc<RefCell<Record>> {
        Rc::new(RefCell::new(Record::new_field(v, true, Visibility::Public, None)))
    }

    #[test]
    fn get_climbs_parent_chain() {
        let root = Scope::new_root(None, None);
        root.define("x", rec(Value::Int(1)));
        let child = Scope::child(&root, None, None);
        let found = child.get("x").unwrap();
        assert_eq!(found.borrow().value, Value::Int(1));
    }

    #[test]
    fn slot_index_of_only_sees_current_frame() {
        let root = Scope::new_root(None, None);
        root.define("x", rec(Value::Int(1)));
        let child = Scope::child(&root, None, None);
        assert_eq!(child.slot_index_of("x"), None);
        assert_eq!(root.slot_index_of("x"), Some(0));
    }

    #[test]
    fn reset_for_reuse_bumps_frame_id_and_clears_slots() {
        let root = Scope::new_root(None, None);
        root.define("x", rec(Value::Int(1)));
        let before = root.frame_id();
        root.reset_for_reuse(None, None, None);
        assert!(root.frame_id() > before);
        assert_eq!(root.slot_count(), 0);
        assert_eq!(root.get("x"), None);
    }

    #[test]
    fn self_parent_cycle_does_not_hang() {
        let root = Scope::new_root(None, None);
        *root.parent.borrow_mut() = Some(root.clone());
        assert_eq!(root.get("missing"), None);
    }
}
