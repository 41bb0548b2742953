//! Classes, linearization, and the class registry (spec §3 "Class", §9 "Cyclic graphs").
//!
//! Classes are allocated once and never destroyed while live; we hand them out as
//! `Rc<Class>` rather than chasing raw back-pointers, per the design note in §9.
//! `ClassId` is the small stable integer instances carry so a cycle through
//! `classScope` closing over a class never has to be a raw pointer cycle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{EvalResult, RuntimeError};
use crate::object_model::record::{Record, Visibility};

pub type ClassId = u64;

/// Root of every linearization. Matches spec §3/§4.2: "`Obj` as the terminal root".
pub const OBJ_CLASS_ID: ClassId = 0;

pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub parents: Vec<Rc<Class>>,
    /// The MRO: `self` first, `Obj` last. Computed once at registration (spec §3).
    linearization: RefCell<Vec<Rc<Class>>>,
    pub layout_version: Cell<u64>,
    /// Instance members keyed by mangled name for non-public members, by surface
    /// name for public ones (spec §4.2 "Name mangling").
    pub members: RefCell<HashMap<String, Rc<RefCell<Record>>>>,
    /// Memoized surface-name -> (mangled key, declaring class) for resolution
    /// fast paths. Cleared whenever `layout_version` bumps.
    public_resolution_cache: RefCell<HashMap<String, (String, ClassId)>>,
    pub field_slot_map: RefCell<HashMap<String, usize>>,
    field_slot_names: RefCell<Vec<String>>,
    pub method_slot_map: RefCell<HashMap<String, usize>>,
    method_slot_names: RefCell<Vec<String>>,
    /// Static/companion members (`classScope.objects` in spec terms).
    pub class_scope: RefCell<HashMap<String, Rc<RefCell<Record>>>>,
    pub class_scope_layout_version: Cell<u64>,
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("layout_version", &self.layout_version.get())
            .finish()
    }
}

impl Class {
    /// Mangle a non-public member name with its declaring class (spec §4.2).
    pub fn mangle(class_name: &str, member_name: &str) -> String {
        format!("{class_name}$${member_name}")
    }

    pub fn linearization(&self) -> Vec<Rc<Class>> {
        self.linearization.borrow().clone()
    }

    pub fn linearization_contains(&self, id: ClassId) -> bool {
        self.linearization.borrow().iter().any(|c| c.id == id)
    }

    /// Add (or replace) a member on this class, bumping `layout_version` so every
    /// PIC keyed on `(self.id, *)` becomes stale (spec §4.4, invariant 2 in §8).
    /// `Field`/`ConstructorField` records are also assigned a field slot;
    /// non-abstract `Fun` records are assigned a method slot.
    pub fn add_member(&self, surface_name: &str, record: Record) {
        let key = match record.visibility {
            Visibility::Public => surface_name.to_string(),
            _ => Self::mangle(&self.name, surface_name),
        };
        match record.kind {
            super::record::RecordKind::Field | super::record::RecordKind::ConstructorField => {
                self.allocate_field_slot(&key);
            }
            super::record::RecordKind::Fun if !record.is_abstract => {
                self.allocate_method_slot(&key);
            }
            _ => {}
        }
        self.members.borrow_mut().insert(key.clone(), Rc::new(RefCell::new(record)));
        self.bump_layout();
        debug!(class = %self.name, member = %surface_name, key = %key, "member added");
    }

    pub fn add_static_member(&self, surface_name: &str, record: Record) {
        self.class_scope.borrow_mut().insert(surface_name.to_string(), Rc::new(RefCell::new(record)));
        self.class_scope_layout_version.set(self.class_scope_layout_version.get().wrapping_add(1));
    }

    /// Register a field slot index for this class's instances (spec §3 "Field slot map").
    pub fn allocate_field_slot(&self, mangled_key: &str) -> usize {
        let mut map = self.field_slot_map.borrow_mut();
        if let Some(&idx) = map.get(mangled_key) {
            return idx;
        }
        let idx = self.field_slot_names.borrow().len();
        self.field_slot_names.borrow_mut().push(mangled_key.to_string());
        map.insert(mangled_key.to_string(), idx);
        idx
    }

    pub fn allocate_method_slot(&self, mangled_key: &str) -> usize {
        let mut map = self.method_slot_map.borrow_mut();
        if let Some(&idx) = map.get(mangled_key) {
            return idx;
        }
        let idx = self.method_slot_names.borrow().len();
        self.method_slot_names.borrow_mut().push(mangled_key.to_string());
        map.insert(mangled_key.to_string(), idx);
        idx
    }

    pub fn field_slot_count(&self) -> usize {
        self.field_slot_names.borrow().len()
    }

    pub fn method_slot_count(&self) -> usize {
        self.method_slot_names.borrow().len()
    }

    pub fn field_slot_names(&self) -> Vec<String> {
        self.field_slot_names.borrow().clone()
    }

    pub fn method_slot_names(&self) -> Vec<String> {
        self.method_slot_names.borrow().clone()
    }

    fn bump_layout(&self) {
        self.layout_version.set(self.layout_version.get().wrapping_add(1));
        self.public_resolution_cache.borrow_mut().clear();
    }

    pub fn cached_public_resolution(&self, name: &str) -> Option<(String, ClassId)> {
        self.public_resolution_cache.borrow().get(name).cloned()
    }

    pub fn cache_public_resolution(&self, name: &str, key: String, declaring: ClassId) {
        self.public_resolution_cache.borrow_mut().insert(name.to_string(), (key, declaring));
    }

    /// Allocate a new instance of this class: one field slot per entry in
    /// `field_slot_map`, cloned from whichever ancestor's `members` declared it
    /// (spec §3 "Instance ... fieldSlots[] (parallel to its class's field-slot
    /// map)"). Slots with no declaring member (shouldn't normally happen) default
    /// to an `Unset` public field so access fails loudly rather than panicking.
    pub fn instantiate(self: &Rc<Class>) -> super::Instance {
        let lineage = self.linearization();

        let field_slots = self
            .field_slot_names()
            .into_iter()
            .map(|key| {
                let found = lineage.iter().find_map(|k| k.members.borrow().get(&key).cloned());
                match found {
                    Some(r) => Rc::new(RefCell::new(r.borrow().clone())),
                    None => Rc::new(RefCell::new(Record::new_field(
                        crate::value::Value::Unset,
                        true,
                        Visibility::Public,
                        None,
                    ))),
                }
            })
            .collect();

        let method_slots = self
            .method_slot_names()
            .into_iter()
            .filter_map(|key| {
                lineage.iter().find_map(|k| {
                    k.members.borrow().get(&key).and_then(|r| match &r.borrow().value {
                        crate::value::Value::Callable(m) => Some(m.clone()),
                        _ => None,
                    })
                })
            })
            .collect();

        super::Instance::new(self.clone(), field_slots, method_slots)
    }
}

/// Owns every live class, keyed by `ClassId` (spec §9 "allocate all Classes into
/// an arena keyed by classId").
pub struct ClassRegistry {
    classes: RefCell<HashMap<ClassId, Rc<Class>>>,
    next_id: Cell<ClassId>,
    obj: Rc<Class>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        let obj = Rc::new(Class {
            id: OBJ_CLASS_ID,
            name: "Obj".to_string(),
            parents: Vec::new(),
            linearization: RefCell::new(Vec::new()),
            layout_version: Cell::new(0),
            members: RefCell::new(HashMap::new()),
            public_resolution_cache: RefCell::new(HashMap::new()),
            field_slot_map: RefCell::new(HashMap::new()),
            field_slot_names: RefCell::new(Vec::new()),
            method_slot_map: RefCell::new(HashMap::new()),
            method_slot_names: RefCell::new(Vec::new()),
            class_scope: RefCell::new(HashMap::new()),
            class_scope_layout_version: Cell::new(0),
        });
        *obj.linearization.borrow_mut() = vec![obj.clone()];

        let registry = ClassRegistry {
            classes: RefCell::new(HashMap::new()),
            next_id: Cell::new(OBJ_CLASS_ID + 1),
            obj: obj.clone(),
        };
        registry.classes.borrow_mut().insert(OBJ_CLASS_ID, obj);
        registry
    }

    pub fn obj_class(&self) -> Rc<Class> {
        self.obj.clone()
    }

    pub fn get(&self, id: ClassId) -> Option<Rc<Class>> {
        self.classes.borrow().get(&id).cloned()
    }

    /// Class-construction API exposed to the external compiler (spec §6).
    /// Computes the linearization once via C3-style merge, `Obj` terminal.
    pub fn register(&self, name: impl Into<String>, parents: Vec<Rc<Class>>) -> EvalResult<Rc<Class>> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let linearization = linearize(&parents, self.obj.clone())?;

        // Merge ancestors' already-resolved slot layouts so inherited fields/methods
        // keep stable slot indices in the new class's instance arrays (spec §3
        // "Field slot map"/"Two instances of the same class share slot map indices").
        let (field_names, method_names) = merge_slot_layouts(&parents);

        let class = Rc::new(Class {
            id,
            name: name.into(),
            parents,
            linearization: RefCell::new(Vec::new()),
            layout_version: Cell::new(0),
            members: RefCell::new(HashMap::new()),
            public_resolution_cache: RefCell::new(HashMap::new()),
            field_slot_map: RefCell::new(HashMap::new()),
            field_slot_names: RefCell::new(Vec::new()),
            method_slot_map: RefCell::new(HashMap::new()),
            method_slot_names: RefCell::new(Vec::new()),
            class_scope: RefCell::new(HashMap::new()),
            class_scope_layout_version: Cell::new(0),
        });

        for name in field_names {
            class.allocate_field_slot(&name);
        }
        for name in method_names {
            class.allocate_method_slot(&name);
        }

        let mut full = vec![class.clone()];
        full.extend(linearization);
        *class.linearization.borrow_mut() = full;

        self.classes.borrow_mut().insert(id, class.clone());
        debug!(class = %class.name, id, "class registered");
        Ok(class)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Union parents' field/method slot names, preserving first-seen order, so the
/// child class's instance layout extends rather than reshuffles its ancestors'.
fn merge_slot_layouts(parents: &[Rc<Class>]) -> (Vec<String>, Vec<String>) {
    let mut fields = Vec::new();
    let mut methods = Vec::new();
    for parent in parents {
        for name in parent.field_slot_names() {
            if !fields.contains(&name) {
                fields.push(name);
            }
        }
        for name in parent.method_slot_names() {
            if !methods.contains(&name) {
                methods.push(name);
            }
        }
    }
    (fields, methods)
}

/// C3-style linearization of `parents`, terminating in `obj`. Returns the merged
/// ancestor list *excluding* the class being defined (the caller prepends itself).
fn linearize(parents: &[Rc<Class>], obj: Rc<Class>) -> EvalResult<Vec<Rc<Class>>> {
    if parents.is_empty() {
        return Ok(vec![obj]);
    }

    let mut sequences: Vec<Vec<Rc<Class>>> = parents.iter().map(|p| p.linearization()).collect();
    sequences.push(parents.to_vec());

    let mut result = Vec::new();
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            break;
        }

        let mut chosen: Option<Rc<Class>> = None;
        'candidates: for seq in &sequences {
            let candidate = &seq[0];
            for other in &sequences {
                if other[1..].iter().any(|c| c.id == candidate.id) {
                    continue 'candidates;
                }
            }
            chosen = Some(candidate.clone());
            break;
        }

        let chosen = chosen.ok_or_else(|| {
            RuntimeError::illegal_state(
                "inconsistent class hierarchy: no valid linearization (C3 merge failed)",
                crate::error::SourcePos::UNKNOWN,
            )
        })?;

        if !result.iter().any(|c: &Rc<Class>| c.id == chosen.id) {
            result.push(chosen.clone());
        }
        for seq in sequences.iter_mut() {
            seq.retain(|c| c.id != chosen.id);
        }
    }

    if !result.iter().any(|c| c.id == obj.id) {
        result.push(obj);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_is_terminal_for_fresh_class() {
        let reg = ClassRegistry::new();
        let c = reg.register("C", vec![]).unwrap();
        let lin = c.linearization();
        assert_eq!(lin.first().unwrap().id, c.id);
        assert_eq!(lin.last().unwrap().id, OBJ_CLASS_ID);
    }

    #[test]
    fn single_inheritance_linearizes_front_to_back() {
        let reg = ClassRegistry::new();
        let b = reg.register("B", vec![]).unwrap();
        let d = reg.register("D", vec![b.clone()]).unwrap();
        let lin = d.linearization();
        let names: Vec<_> = lin.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["D", "B", "Obj"]);
    }

    #[test]
    fn diamond_inheritance_keeps_obj_last_once() {
        let reg = ClassRegistry::new();
        let a = reg.register("A", vec![]).unwrap();
        let b = reg.register("B", vec![a.clone()]).unwrap();
        let c = reg.register("C", vec![a.clone()]).unwrap();
        let d = reg.register("D", vec![b.clone(), c.clone()]).unwrap();
        let lin = d.linearization();
        let names: Vec<_> = lin.iter().map(|cl| cl.name.clone()).collect();
        assert_eq!(names.iter().filter(|n| n.as_str() == "Obj").count(), 1);
        assert_eq!(names.last().unwrap(), "Obj");
        assert_eq!(names[0], "D");
    }

    #[test]
    fn layout_version_bumps_on_member_add() {
        let reg = ClassRegistry::new();
        let c = reg.register("C", vec![]).unwrap();
        let v0 = c.layout_version.get();
        c.add_member("x", Record::new_field(crate::value::Value::Int(1), true, Visibility::Public, Some(c.id)));
        assert!(c.layout_version.get() > v0);
    }
}
