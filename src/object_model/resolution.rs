//! Member resolution across the class hierarchy (spec §4.2).

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::object_model::{Class, ClassId, Instance};
use crate::object_model::record::{Record, Visibility};
use crate::scope::Scope;

/// Where a resolved member physically lives, so a PIC can install a direct
/// handler instead of re-walking the hierarchy (spec §4.4).
#[derive(Debug, Clone)]
pub enum MemberSite {
    /// A field slot on instances of `owner` (index into `Instance::field_slots`).
    InstanceField { owner: ClassId, slot: usize },
    /// A method slot on instances of `owner`.
    InstanceMethod { owner: ClassId, slot: usize },
    /// A static member living in `owner`'s classScope.
    ClassScope { owner: ClassId },
    /// Resolved through an extension in the lexical scope chain, or any other
    /// path that doesn't correspond to a stable slot — callers fall back to a
    /// generic read/write through the record directly.
    Generic,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub record: Rc<RefCell<Record>>,
    pub declaring_class: Option<ClassId>,
    pub site: MemberSite,
}

/// `canAccessMember` (spec §4.2).
pub fn can_access(visibility: Visibility, declaring_class: Option<ClassId>, caller: Option<ClassId>, registry_lookup: impl Fn(ClassId) -> Option<Rc<Class>>) -> bool {
    match visibility {
        Visibility::Public => true,
        Visibility::Protected => match (declaring_class, caller) {
            (Some(dc), Some(c)) => {
                if dc == c {
                    return true;
                }
                registry_lookup(c).map(|cc| cc.linearization_contains(dc)).unwrap_or(false)
            }
            _ => false,
        },
        Visibility::Private => declaring_class.is_some() && declaring_class == caller,
    }
}

/// Resolve member `name` on instance `inst`, called from class `caller` (or `None`
/// for top-level/unqualified code). Implements the five-step order from spec
/// §4.2: private-local short-circuit, linearization walk, extension lookup,
/// `Obj` fallback, `SymbolNotFound`.
pub fn resolve_member(
    inst: &Instance,
    caller: Option<ClassId>,
    name: &str,
    scope: Option<&Scope>,
    pos: SourcePos,
) -> EvalResult<Resolved> {
    resolve_member_from(inst, None, caller, name, scope, pos)
}

/// Like [`resolve_member`], but when `start` names an ancestor class, step 2's
/// linearization walk begins at that ancestor instead of the instance's
/// dynamic class — this is how `QualifiedView`/`this@T` dispatch "starts the
/// linearization search at ancestorClass" (spec §4.1) while step 1's
/// private-local check still keys off `caller`, not `start`.
pub fn resolve_member_from(
    inst: &Instance,
    start: Option<ClassId>,
    caller: Option<ClassId>,
    name: &str,
    scope: Option<&Scope>,
    pos: SourcePos,
) -> EvalResult<Resolved> {
    let class = &inst.class;

    // Step 1: private member declared directly on the caller's own class wins.
    if let Some(caller_id) = caller {
        if caller_id == class.id || class.linearization_contains(caller_id) {
            if let Some(caller_class) = class.linearization().into_iter().find(|c| c.id == caller_id) {
                let mangled = Class::mangle(&caller_class.name, name);
                if let Some(record) = caller_class.members.borrow().get(&mangled).cloned() {
                    if record.borrow().visibility == Visibility::Private {
                        trace!(name, caller = caller_class.name, "private member resolved locally");
                        return Ok(finish(record, Some(caller_id), class, name));
                    }
                }
            }
        }
    }

    // Step 2: walk the linearization front-to-back, skipping Obj (handled last)
    // and anything before `start` when a qualified-view ancestor was given.
    let lineage = class.linearization();
    let skip = match start {
        Some(start_id) => lineage.iter().position(|c| c.id == start_id).unwrap_or(0),
        None => 0,
    };
    for k in lineage.into_iter().skip(skip) {
        if k.id == crate::object_model::OBJ_CLASS_ID {
            continue;
        }
        if let Some(resolved) = lookup_on_class(&k, class, caller, name) {
            return Ok(resolved);
        }
    }

    // Step 3: extension lookup on the current lexical scope chain.
    if let Some(scope) = scope {
        let ancestor_ids: Vec<ClassId> = class.linearization().iter().map(|c| c.id).collect();
        if let Some(record) = scope.resolve_extension(&ancestor_ids, name) {
            trace!(name, "resolved via extension");
            return Ok(Resolved {
                record,
                declaring_class: None,
                site: MemberSite::Generic,
            });
        }
    }

    // Step 4: Obj fallback (may be shadowed by extensions per step 3, which already ran).
    if let Some(obj) = class.linearization().into_iter().find(|c| c.id == crate::object_model::OBJ_CLASS_ID) {
        if let Some(resolved) = lookup_on_class(&obj, class, caller, name) {
            return Ok(resolved);
        }
    }

    Err(RuntimeError::symbol_not_found(name, pos))
}

fn lookup_on_class(k: &Rc<Class>, instance_class: &Rc<Class>, caller: Option<ClassId>, name: &str) -> Option<Resolved> {
    let candidates = [name.to_string(), Class::mangle(&k.name, name)];
    for key in candidates {
        if let Some(record) = k.members.borrow().get(&key).cloned() {
            let rec_ref = record.borrow();
            if rec_ref.is_abstract {
                continue;
            }
            let accessible = can_access(rec_ref.visibility, rec_ref.declaring_class.or(Some(k.id)), caller, |id| {
                instance_class.linearization().into_iter().find(|c| c.id == id)
            });
            if !accessible {
                continue;
            }
            drop(rec_ref);
            return Some(finish(record, Some(k.id), instance_class, &key));
        }
        if let Some(record) = k.class_scope.borrow().get(&key).cloned() {
            let rec_ref = record.borrow();
            if rec_ref.is_abstract {
                continue;
            }
            let accessible = can_access(rec_ref.visibility, rec_ref.declaring_class.or(Some(k.id)), caller, |id| {
                instance_class.linearization().into_iter().find(|c| c.id == id)
            });
            if !accessible {
                continue;
            }
            drop(rec_ref);
            return Some(finish(record, Some(k.id), instance_class, &key));
        }
    }
    None
}

/// `key` is the exact (already-mangled-or-public) key the member was found
/// under, so slot lookups don't need to re-derive mangling.
fn finish(record: Rc<RefCell<Record>>, declaring_class: Option<ClassId>, instance_class: &Rc<Class>, key: &str) -> Resolved {
    let site = match declaring_class {
        Some(owner) => {
            if let Some(&slot) = instance_class.field_slot_map.borrow().get(key) {
                MemberSite::InstanceField { owner, slot }
            } else if let Some(&slot) = instance_class.method_slot_map.borrow().get(key) {
                MemberSite::InstanceMethod { owner, slot }
            } else {
                MemberSite::ClassScope { owner }
            }
        }
        None => MemberSite::Generic,
    };
    Resolved {
        record,
        declaring_class,
        site,
    }
}

/// Visibility check re-exported for reference-node fast paths that already have
/// a declaring class and caller class in hand (e.g. `ThisFieldSlotRef`).
pub fn check_access(rec: &Record, caller: Option<ClassId>, instance_class: &Rc<Class>) -> bool {
    can_access(rec.visibility, rec.declaring_class, caller, |id| {
        instance_class.linearization().into_iter().find(|c| c.id == id)
    })
}

/// Resolve a static member `name` on a `Class` receiver (`ClassName.member`):
/// walk the linearization front-to-back looking in `classScope` first, then
/// `members` (so calling a static method from a `Class` value works the same
/// way an instance method does), honoring visibility (spec §4.2).
pub fn resolve_static_member(class: &Rc<Class>, caller: Option<ClassId>, name: &str, pos: SourcePos) -> EvalResult<Resolved> {
    for k in class.linearization() {
        let candidates = [name.to_string(), Class::mangle(&k.name, name)];
        for key in &candidates {
            if let Some(record) = k.class_scope.borrow().get(key).cloned() {
                let rec_ref = record.borrow();
                if rec_ref.is_abstract {
                    continue;
                }
                let accessible = can_access(rec_ref.visibility, rec_ref.declaring_class.or(Some(k.id)), caller, |id| {
                    class.linearization().into_iter().find(|c| c.id == id)
                });
                if !accessible {
                    continue;
                }
                drop(rec_ref);
                return Ok(Resolved {
                    record,
                    declaring_class: Some(k.id),
                    site: MemberSite::ClassScope { owner: k.id },
                });
            }
            if let Some(record) = k.members.borrow().get(key).cloned() {
                let rec_ref = record.borrow();
                if rec_ref.is_abstract {
                    continue;
                }
                let accessible = can_access(rec_ref.visibility, rec_ref.declaring_class.or(Some(k.id)), caller, |id| {
                    class.linearization().into_iter().find(|c| c.id == id)
                });
                if !accessible {
                    continue;
                }
                drop(rec_ref);
                return Ok(Resolved {
                    record,
                    declaring_class: Some(k.id),
                    site: MemberSite::Generic,
                });
            }
        }
    }
    Err(RuntimeError::symbol_not_found(name, pos))
}

#[cfg(test)]
mod static_tests {
    use super::*;
    use crate::object_model::ClassRegistry;
    use crate::value::Value;

    #[test]
    fn static_member_resolves_through_class_scope() {
        let reg = ClassRegistry::new();
        let c = reg.register("C", vec![]).unwrap();
        c.add_static_member("k", Record::new_field(Value::Int(9), true, Visibility::Public, Some(c.id)));
        let resolved = resolve_static_member(&c, None, "k", SourcePos::UNKNOWN).unwrap();
        assert_eq!(resolved.record.borrow().value, Value::Int(9));
    }

    #[test]
    fn private_static_member_is_inaccessible_from_outside() {
        let reg = ClassRegistry::new();
        let c = reg.register("C", vec![]).unwrap();
        c.add_static_member("k", Record::new_field(Value::Int(9), true, Visibility::Private, Some(c.id)));
        assert!(resolve_static_member(&c, None, "k", SourcePos::UNKNOWN).is_err());
    }
}
