//! The `Record` type: the unit held in every slot (spec §3 "Record").

use std::rc::Rc;

use crate::object_model::{ClassId, Method};
use crate::value::Value;

/// Visibility of a member, checked by [`crate::object_model::resolution::can_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Private,
    Protected,
    Public,
}

/// What kind of thing a record represents. `Fun` records hold a bound or unbound
/// method reference (`Value::Callable`); `Property`/`Delegated` records route
/// reads and writes through accessor objects instead of storing the value directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Field,
    ConstructorField,
    Fun,
    Property,
    Delegated,
    Other,
}

/// A property's getter/setter pair. Properties never get an implicit backing
/// field (spec §4.2, §9) — callers who need one declare a separate `Field` record.
#[derive(Debug, Clone)]
pub struct PropertyAccessors {
    pub getter: Rc<Method>,
    pub setter: Option<Rc<Method>>,
}

/// A delegate object: reads call `delegate.getValue(instance, name)`, writes call
/// `delegate.setValue(instance, name, newValue)` (spec §4.2).
#[derive(Debug, Clone)]
pub struct Delegate {
    pub target: Value,
}

/// The unit held in a slot: `{value, isMutable, visibility, writeVisibility, type,
/// declaringClass, receiver, delegate}` (spec §3).
///
/// `is_abstract` is a pragmatic extension beyond the field list spec §3 names
/// verbatim: resolution step 2 explicitly requires skipping "abstract" records
/// (`open fun f()` with no body), so the record needs to carry that bit somewhere.
#[derive(Debug, Clone)]
pub struct Record {
    pub value: Value,
    pub is_mutable: bool,
    pub visibility: Visibility,
    pub write_visibility: Option<Visibility>,
    pub kind: RecordKind,
    pub declaring_class: Option<ClassId>,
    pub receiver: Option<Value>,
    pub delegate: Option<Delegate>,
    pub is_abstract: bool,
}

impl Record {
    pub fn new_field(value: Value, is_mutable: bool, visibility: Visibility, declaring_class: Option<ClassId>) -> Self {
        Record {
            value,
            is_mutable,
            visibility,
            write_visibility: None,
            kind: RecordKind::Field,
            declaring_class,
            receiver: None,
            delegate: None,
            is_abstract: false,
        }
    }

    pub fn new_method(method: Rc<Method>, visibility: Visibility, declaring_class: Option<ClassId>) -> Self {
        Record {
            value: Value::Callable(method),
            is_mutable: false,
            visibility,
            write_visibility: None,
            kind: RecordKind::Fun,
            declaring_class,
            receiver: None,
            delegate: None,
            is_abstract: false,
        }
    }

    pub fn new_abstract_method(visibility: Visibility, declaring_class: Option<ClassId>) -> Self {
        Record {
            value: Value::Void,
            is_mutable: false,
            visibility,
            write_visibility: None,
            kind: RecordKind::Fun,
            declaring_class,
            receiver: None,
            delegate: None,
            is_abstract: true,
        }
    }

    pub fn new_property(accessors: PropertyAccessors, visibility: Visibility, declaring_class: Option<ClassId>) -> Self {
        Record {
            value: Value::Property(Rc::new(accessors)),
            is_mutable: true,
            visibility,
            write_visibility: None,
            kind: RecordKind::Property,
            declaring_class,
            receiver: None,
            delegate: None,
            is_abstract: false,
        }
    }

    pub fn effective_write_visibility(&self) -> Visibility {
        self.write_visibility.unwrap_or(self.visibility)
    }

    /// Bind this record's receiver to an instance, producing a template copy used
    /// when a method/property record is read off a particular receiver (spec §3:
    /// "receiver (optional, for template records bound at lookup)").
    pub fn bound_to(&self, receiver: Value) -> Record {
        let mut copy = self.clone();
        copy.receiver = Some(receiver);
        copy
    }
}
