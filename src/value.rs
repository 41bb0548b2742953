//! The value universe (C1, spec §3/§4.1): a tagged variant carrying the full
//! operator contract. Scalars (`Int`/`Real`/`Bool`/`Char`) are unboxed so the
//! primitive fast paths in `refs::binary`/`refs::unary` stay monomorphic and
//! allocation-free (spec §9 "Dynamic typing").

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::object_model::{Class, Instance, Method};

pub type ValueList = Rc<RefCell<Vec<Value>>>;
pub type ValueMap = Rc<RefCell<IndexMap<Value, Value>>>;
pub type ValueSet = Rc<RefCell<IndexSet<Value>>>;

/// Any host-provided iterator adapted into the value universe (spec §3 "…
/// KotlinIterator adapter", generalized — the host language is unspecified here).
pub trait HostIterator: fmt::Debug {
    fn next(&mut self) -> EvalResult<Option<Value>>;
    /// Best-effort resource release when iteration is abandoned early (spec §5
    /// "Cancellation").
    fn cancel(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct RangeData {
    pub start: Option<Box<Value>>,
    pub end: Option<Box<Value>>,
    pub end_inclusive: bool,
}

use crate::object_model::record::PropertyAccessors;

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Real(f64),
    Bool(bool),
    Char(char),
    Str(Rc<str>),
    List(ValueList),
    Map(ValueMap),
    Set(ValueSet),
    Range(Rc<RangeData>),
    Null,
    /// Not yet assigned; any operation on it raises `UnsetError` (spec §4.1).
    Unset,
    /// The result of a statement producing no value; never equal to `Null`.
    Void,
    Instance(Rc<RefCell<Instance>>),
    Class(Rc<Class>),
    /// A transient wrapper created by `as T` / `this@T` (spec §4.1).
    QualifiedView(Rc<RefCell<Instance>>, crate::object_model::ClassId),
    Property(Rc<PropertyAccessors>),
    Buffer(Rc<Vec<u8>>),
    /// A regex source pattern; `BinaryOpRef`'s `Match`/`NotMatch` compile it
    /// (via the interpreter's regex cache) and test it against a `Str`.
    Regex(Rc<str>),
    MapEntry(Box<Value>, Box<Value>),
    HostIter(Rc<RefCell<dyn HostIterator>>),
    /// A bound or unbound method/function reference. Not enumerated verbatim in
    /// spec §3's variant list, but required for `Record.value` to type-check for
    /// `Fun`-kind records and for `CallRef`'s callee to evaluate to *something*
    /// callable; grounded in the list's own "plus host-opaque …" extensibility
    /// clause. See DESIGN.md.
    Callable(Rc<Method>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Real(n) => write!(f, "Real({n})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Char(c) => write!(f, "Char({c:?})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(l) => write!(f, "List({:?})", l.borrow()),
            Value::Map(m) => write!(f, "Map(len={})", m.borrow().len()),
            Value::Set(s) => write!(f, "Set(len={})", s.borrow().len()),
            Value::Range(r) => write!(f, "Range({:?}..{:?}, inclusive={})", r.start, r.end, r.end_inclusive),
            Value::Null => write!(f, "Null"),
            Value::Unset => write!(f, "Unset"),
            Value::Void => write!(f, "Void"),
            Value::Instance(i) => write!(f, "Instance({})", i.borrow().class.name),
            Value::Class(c) => write!(f, "Class({})", c.name),
            Value::QualifiedView(i, aid) => write!(f, "QualifiedView({}, @{})", i.borrow().class.name, aid),
            Value::Property(_) => write!(f, "Property(..)"),
            Value::Buffer(b) => write!(f, "Buffer(len={})", b.len()),
            Value::Regex(r) => write!(f, "Regex({r:?})"),
            Value::MapEntry(k, v) => write!(f, "MapEntry({k:?} ==> {v:?})"),
            Value::HostIter(_) => write!(f, "HostIter(..)"),
            Value::Callable(m) => write!(f, "Callable({})", m.name),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Real(_) => "Real",
            Value::Bool(_) => "Bool",
            Value::Char(_) => "Char",
            Value::Str(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Set(_) => "Set",
            Value::Range(_) => "Range",
            Value::Null => "Null",
            Value::Unset => "Unset",
            Value::Void => "Void",
            Value::Instance(_) => "Instance",
            Value::Class(_) => "Class",
            Value::QualifiedView(..) => "QualifiedView",
            Value::Property(_) => "Property",
            Value::Buffer(_) => "Buffer",
            Value::Regex(_) => "Regex",
            Value::MapEntry(..) => "MapEntry",
            Value::HostIter(_) => "Iterator",
            Value::Callable(_) => "Callable",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    fn check_set(&self, pos: SourcePos) -> EvalResult<()> {
        if self.is_unset() {
            Err(RuntimeError::unset(pos))
        } else {
            Ok(())
        }
    }

    /// `toBool`: Bool is itself, Int is nonzero, everything else goes through an
    /// explicit conversion hook (spec §4.4 "ConditionalRef").
    pub fn to_bool(&self, pos: SourcePos) -> EvalResult<bool> {
        self.check_set(pos)?;
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(n) => Ok(*n != 0),
            Value::Null => Ok(false),
            Value::Void => Ok(false),
            _ => Ok(true),
        }
    }

    /// Three-valued compare: `Some(Equal/Less/Greater)`, or `None` when the pair
    /// is not comparable (spec §4.1 "incomparable pairs return a sentinel").
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Real(a), Real(b)) => a.partial_cmp(b),
            (Int(a), Real(b)) => (*a as f64).partial_cmp(b),
            (Real(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Char(a), Char(b)) => a.partial_cmp(b),
            (Str(a), Str(b)) => a.as_ref().partial_cmp(b.as_ref()),
            (Null, Null) => Some(Ordering::Equal),
            (Void, Void) => Some(Ordering::Equal),
            (List(a), List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Some(Ordering::Equal);
                }
                let a = a.borrow();
                let b = b.borrow();
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Some(Ordering::Equal) => continue,
                        other => return other,
                    }
                }
                a.len().partial_cmp(&b.len())
            }
            (Range(a), Range(b)) => {
                let starts = match (&a.start, &b.start) {
                    (None, None) => Some(Ordering::Equal),
                    (Some(x), Some(y)) => x.compare(y),
                    _ => return None,
                }?;
                if starts != Ordering::Equal {
                    return Some(starts);
                }
                let ends = match (&a.end, &b.end) {
                    (None, None) => Some(Ordering::Equal),
                    (Some(x), Some(y)) => x.compare(y),
                    _ => return None,
                }?;
                if ends != Ordering::Equal {
                    return Some(ends);
                }
                a.end_inclusive.partial_cmp(&b.end_inclusive)
            }
            (MapEntry(ak, av), MapEntry(bk, bv)) => match ak.compare(bk) {
                Some(Ordering::Equal) => av.compare(bv),
                other => other,
            },
            _ => None,
        }
    }

    /// `Eq`: falls back to `compareTo == 0`; reference-identity fast path for
    /// aggregate/host types whose `compare` returns `None` (spec §4.1).
    pub fn value_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Map(a), Map(b)) => Rc::ptr_eq(a, b),
            (Set(a), Set(b)) => Rc::ptr_eq(a, b),
            (Instance(a), Instance(b)) => Rc::ptr_eq(a, b),
            (Class(a), Class(b)) => Rc::ptr_eq(a, b),
            (Buffer(a), Buffer(b)) => Rc::ptr_eq(a, b),
            (Regex(a), Regex(b)) => Rc::ptr_eq(a, b),
            (Property(a), Property(b)) => Rc::ptr_eq(a, b),
            (Callable(a), Callable(b)) => Rc::ptr_eq(a, b),
            (HostIter(a), HostIter(b)) => Rc::ptr_eq(a, b),
            (QualifiedView(a, ca), QualifiedView(b, cb)) => Rc::ptr_eq(a, b) && ca == cb,
            (Unset, Unset) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// `RefEq`: pointer identity for reference-shaped variants; primitives have
    /// no separate host identity so value equality stands in (spec §4.1).
    pub fn ref_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (List(a), List(b)) => Rc::ptr_eq(a, b),
            (Map(a), Map(b)) => Rc::ptr_eq(a, b),
            (Set(a), Set(b)) => Rc::ptr_eq(a, b),
            (Instance(a), Instance(b)) => Rc::ptr_eq(a, b),
            (Class(a), Class(b)) => Rc::ptr_eq(a, b),
            (Buffer(a), Buffer(b)) => Rc::ptr_eq(a, b),
            (Regex(a), Regex(b)) => Rc::ptr_eq(a, b),
            (Property(a), Property(b)) => Rc::ptr_eq(a, b),
            (Callable(a), Callable(b)) => Rc::ptr_eq(a, b),
            (HostIter(a), HostIter(b)) => Rc::ptr_eq(a, b),
            (QualifiedView(a, ca), QualifiedView(b, cb)) => Rc::ptr_eq(a, b) && ca == cb,
            (Str(a), Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Int(a), Int(b)) => a == b,
            (Real(a), Real(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Null, Null) | (Void, Void) | (Unset, Unset) => true,
            _ => false,
        }
    }

    /// The PIC shape key for this value as a cache-site receiver: `(classId,
    /// layoutVersion)` for an `Instance`/`QualifiedView`, `(classId,
    /// classScopeLayoutVersion)` for a `Class` (static access), `UNSTABLE_SHAPE`
    /// for anything else — "key 0 means shape not stable, do not cache" (spec
    /// §4.4).
    pub fn shape_key(&self) -> crate::refs::pic::ShapeKey {
        match self {
            Value::Instance(inst) => inst.borrow().shape_key(),
            Value::QualifiedView(inst, _) => inst.borrow().shape_key(),
            Value::Class(c) => (c.id, c.class_scope_layout_version.get()),
            _ => crate::refs::pic::UNSTABLE_SHAPE,
        }
    }

    pub fn is_instance_of(&self, class: &Rc<Class>) -> bool {
        match self {
            Value::Instance(inst) => inst.borrow().class.linearization_contains(class.id),
            Value::QualifiedView(inst, ancestor) => {
                *ancestor == class.id || inst.borrow().class.linearization().iter().find(|c| c.id == *ancestor).map(|c| c.linearization_contains(class.id)).unwrap_or(false)
            }
            Value::Int(_) | Value::Real(_) | Value::Bool(_) | Value::Char(_) | Value::Str(_) => class.name == self.type_name() || class.id == crate::object_model::OBJ_CLASS_ID,
            _ => class.id == crate::object_model::OBJ_CLASS_ID,
        }
    }

    pub fn contains(&self, item: &Value, pos: SourcePos) -> EvalResult<bool> {
        self.check_set(pos)?;
        match self {
            Value::List(l) => Ok(l.borrow().iter().any(|v| v.value_eq(item))),
            Value::Set(s) => Ok(s.borrow().contains(item)),
            Value::Map(m) => Ok(m.borrow().contains_key(item)),
            Value::Str(s) => match item {
                Value::Str(sub) => Ok(s.contains(sub.as_ref())),
                Value::Char(c) => Ok(s.contains(*c)),
                _ => Err(RuntimeError::not_implemented("contains", pos)),
            },
            Value::Range(r) => range_contains(r, item),
            _ => Err(RuntimeError::not_implemented("contains", pos)),
        }
    }
}

/// Mask a shift amount to 6 bits (spec §4.4 "Shift amounts are masked to 6 bits").
fn mask_shift(n: i64) -> u32 {
    (n as u64 & 0x3f) as u32
}

impl Value {
    /// `UnaryOpRef(Negate)`.
    pub fn negate(&self, pos: SourcePos) -> EvalResult<Value> {
        self.check_set(pos)?;
        match self {
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Real(n) => Ok(Value::Real(-n)),
            _ => Err(RuntimeError::not_implemented("negate", pos)),
        }
    }

    /// `UnaryOpRef(Not)`.
    pub fn logical_not(&self, pos: SourcePos) -> EvalResult<Value> {
        self.check_set(pos)?;
        match self {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(RuntimeError::not_implemented("not", pos)),
        }
    }

    /// `UnaryOpRef(BitNot)`.
    pub fn bit_not(&self, pos: SourcePos) -> EvalResult<Value> {
        self.check_set(pos)?;
        match self {
            Value::Int(n) => Ok(Value::Int(!n)),
            _ => Err(RuntimeError::not_implemented("bitNot", pos)),
        }
    }

    /// Numeric arithmetic with left-to-right Int/Real promotion (spec §4.4).
    /// `int_op` runs when both sides are `Int` (wrapping); `real_op` runs
    /// otherwise after promoting both sides to `f64`.
    fn numeric_op(
        &self,
        other: &Value,
        op_name: &str,
        int_op: impl FnOnce(i64, i64) -> EvalResult<i64>,
        real_op: impl FnOnce(f64, f64) -> f64,
        pos: SourcePos,
    ) -> EvalResult<Value> {
        self.check_set(pos)?;
        other.check_set(pos)?;
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b)?)),
            (Value::Int(a), Value::Real(b)) => Ok(Value::Real(real_op(*a as f64, *b))),
            (Value::Real(a), Value::Int(b)) => Ok(Value::Real(real_op(*a, *b as f64))),
            (Value::Real(a), Value::Real(b)) => Ok(Value::Real(real_op(*a, *b))),
            _ => Err(RuntimeError::not_implemented(op_name, pos)),
        }
    }

    pub fn add(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.check_set(pos)?;
        other.check_set(pos)?;
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(Rc::from(format!("{a}{b}")))),
            (Value::Str(a), Value::Int(b)) => Ok(Value::Str(Rc::from(format!("{a}{b}")))),
            (Value::Str(a), Value::Char(b)) => Ok(Value::Str(Rc::from(format!("{a}{b}")))),
            (Value::Int(a), Value::Str(b)) => Ok(Value::Str(Rc::from(format!("{a}{b}")))),
            (Value::Char(a), Value::Str(b)) => Ok(Value::Str(Rc::from(format!("{a}{b}")))),
            _ => self.numeric_op(other, "+", |a, b| Ok(a.wrapping_add(b)), |a, b| a + b, pos),
        }
    }

    pub fn sub(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.numeric_op(other, "-", |a, b| Ok(a.wrapping_sub(b)), |a, b| a - b, pos)
    }

    pub fn mul(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.numeric_op(other, "*", |a, b| Ok(a.wrapping_mul(b)), |a, b| a * b, pos)
    }

    pub fn div(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.numeric_op(
            other,
            "/",
            |a, b| if b == 0 { Err(RuntimeError::divide_by_zero(pos)) } else { Ok(a.wrapping_div(b)) },
            |a, b| a / b,
            pos,
        )
    }

    pub fn rem(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.numeric_op(
            other,
            "%",
            |a, b| if b == 0 { Err(RuntimeError::divide_by_zero(pos)) } else { Ok(a.wrapping_rem(b)) },
            |a, b| a % b,
            pos,
        )
    }

    fn int_op(&self, other: &Value, op_name: &str, f: impl FnOnce(i64, i64) -> i64, pos: SourcePos) -> EvalResult<Value> {
        self.check_set(pos)?;
        other.check_set(pos)?;
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(f(*a, *b))),
            _ => Err(RuntimeError::not_implemented(op_name, pos)),
        }
    }

    pub fn bit_and(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
            _ => self.int_op(other, "bitAnd", |a, b| a & b, pos),
        }
    }

    pub fn bit_or(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
            _ => self.int_op(other, "bitOr", |a, b| a | b, pos),
        }
    }

    pub fn bit_xor(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a ^ *b)),
            _ => self.int_op(other, "bitXor", |a, b| a ^ b, pos),
        }
    }

    pub fn shl(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.int_op(other, "shl", |a, b| a.wrapping_shl(mask_shift(b)), pos)
    }

    pub fn shr(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.int_op(other, "shr", |a, b| a.wrapping_shr(mask_shift(b)), pos)
    }

    /// Short-circuit `&&`/`||` only ever reach here with both sides already
    /// evaluated as a primitive fast path; the general short-circuiting lives in
    /// `refs::binary` (spec §4.4 "Within a BinaryOpRef ... short-circuit").
    pub fn logical_and(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
            _ => Err(RuntimeError::not_implemented("and", pos)),
        }
    }

    pub fn logical_or(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
            _ => Err(RuntimeError::not_implemented("or", pos)),
        }
    }

    /// Spaceship: three-valued compare exposed as a `Value` (spec §4.4 "Shuttle").
    pub fn spaceship(&self, other: &Value, pos: SourcePos) -> EvalResult<Value> {
        self.check_set(pos)?;
        other.check_set(pos)?;
        match self.compare(other) {
            Some(Ordering::Less) => Ok(Value::Int(-1)),
            Some(Ordering::Equal) => Ok(Value::Int(0)),
            Some(Ordering::Greater) => Ok(Value::Int(1)),
            None => Err(RuntimeError::not_implemented("spaceship", pos)),
        }
    }

    /// `==>`: builds a `MapEntry` out of any pair of values (spec §4.4).
    pub fn map_entry_with(&self, other: &Value) -> Value {
        Value::MapEntry(Box::new(self.clone()), Box::new(other.clone()))
    }

    /// In-place compound assignment hook consulted by `AssignOpRef` before
    /// falling back to `target op value; setAt(...)` (spec §4.4 "ask the value
    /// for an in-place op"). Only mutable-in-place aggregate ops answer; returns
    /// `None` to signal "fall back" rather than "not implemented", since e.g.
    /// `Int.plusAssign` simply doesn't exist (numbers are immutable, spec §4.1).
    pub fn plus_assign_in_place(&self, other: &Value, pos: SourcePos) -> EvalResult<Option<Value>> {
        match self {
            Value::List(l) => {
                match other {
                    Value::List(o) if !Rc::ptr_eq(l, o) => l.borrow_mut().extend(o.borrow().iter().cloned()),
                    Value::List(_) => {
                        let snapshot: Vec<Value> = l.borrow().clone();
                        l.borrow_mut().extend(snapshot);
                    }
                    other => l.borrow_mut().push(other.clone()),
                }
                Ok(Some(Value::List(l.clone())))
            }
            Value::Set(s) => {
                match other {
                    Value::Set(o) => {
                        let items: Vec<Value> = o.borrow().iter().cloned().collect();
                        s.borrow_mut().extend(items);
                    }
                    other => {
                        s.borrow_mut().insert(other.clone());
                    }
                }
                Ok(Some(Value::Set(s.clone())))
            }
            _ => {
                let _ = pos;
                Ok(None)
            }
        }
    }

    /// `IncDecRef` delta computation: numbers only, per spec §4.1 "Incrementing/
    /// decrementing an Int always allocates a new value".
    pub fn step(&self, delta: i64, pos: SourcePos) -> EvalResult<Value> {
        self.check_set(pos)?;
        match self {
            Value::Int(n) => Ok(Value::Int(n.wrapping_add(delta))),
            Value::Real(n) => Ok(Value::Real(n + delta as f64)),
            _ => Err(RuntimeError::not_implemented("inc/dec", pos)),
        }
    }

    /// A human-readable rendering used by string concatenation and diagnostics;
    /// not part of the operator contract proper but convenient to keep alongside it.
    pub fn display_string(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Real(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Null => "null".to_string(),
            Value::Unset => "unset".to_string(),
            Value::Void => "void".to_string(),
            Value::List(l) => format!("[{}]", l.borrow().iter().map(Value::display_string).collect::<Vec<_>>().join(", ")),
            Value::Set(s) => format!("{{{}}}", s.borrow().iter().map(Value::display_string).collect::<Vec<_>>().join(", ")),
            Value::Map(m) => format!(
                "{{{}}}",
                m.borrow().iter().map(|(k, v)| format!("{} ==> {}", k.display_string(), v.display_string())).collect::<Vec<_>>().join(", ")
            ),
            Value::MapEntry(k, v) => format!("{} ==> {}", k.display_string(), v.display_string()),
            Value::Instance(i) => format!("{}@{:p}", i.borrow().class.name, Rc::as_ptr(i)),
            Value::Class(c) => format!("class {}", c.name),
            Value::QualifiedView(i, _) => i.borrow().class.name.to_string(),
            Value::Range(r) => format!(
                "{}{}{}",
                r.start.as_ref().map(|v| v.display_string()).unwrap_or_default(),
                if r.end_inclusive { "..=" } else { ".." },
                r.end.as_ref().map(|v| v.display_string()).unwrap_or_default()
            ),
            Value::Buffer(b) => format!("Buffer(len={})", b.len()),
            Value::Regex(r) => format!("/{r}/"),
            Value::Property(_) => "property".to_string(),
            Value::HostIter(_) => "iterator".to_string(),
            Value::Callable(m) => format!("fun {}", m.name),
        }
    }
}

fn range_contains(r: &RangeData, item: &Value) -> EvalResult<bool> {
    let above_start = match &r.start {
        None => true,
        Some(s) => matches!(s.compare(item), Some(Ordering::Less) | Some(Ordering::Equal)),
    };
    let below_end = match &r.end {
        None => true,
        Some(e) => match item.compare(e) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => r.end_inclusive,
            _ => false,
        },
    };
    Ok(above_start && below_end)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.value_eq(other)
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int(n) => n.hash(state),
            Value::Real(n) => n.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Char(c) => c.hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(l) => {
                for v in l.borrow().iter() {
                    v.hash(state);
                }
            }
            Value::Range(r) => {
                r.start.hash(state);
                r.end.hash(state);
                r.end_inclusive.hash(state);
            }
            Value::MapEntry(k, v) => {
                k.hash(state);
                v.hash(state);
            }
            Value::Null | Value::Unset | Value::Void => {}
            Value::Map(m) => (Rc::as_ptr(m) as usize).hash(state),
            Value::Set(s) => (Rc::as_ptr(s) as usize).hash(state),
            Value::Instance(i) => (Rc::as_ptr(i) as usize).hash(state),
            Value::Class(c) => (Rc::as_ptr(c) as usize).hash(state),
            Value::QualifiedView(i, a) => {
                (Rc::as_ptr(i) as usize).hash(state);
                a.hash(state);
            }
            Value::Property(p) => (Rc::as_ptr(p) as usize).hash(state),
            Value::Buffer(b) => (Rc::as_ptr(b) as usize).hash(state),
            Value::Regex(r) => (Rc::as_ptr(r) as *const () as usize).hash(state),
            Value::HostIter(h) => (Rc::as_ptr(h) as *const () as usize).hash(state),
            Value::Callable(c) => (Rc::as_ptr(c) as usize).hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_int_real_arithmetic_promotes_to_real() {
        let pos = SourcePos::new(1, 1);
        let r = Value::Int(3).add(&Value::Real(0.5), pos).unwrap();
        assert_eq!(r, Value::Real(3.5));
    }

    #[test]
    fn string_concat_variants() {
        let pos = SourcePos::new(1, 1);
        let s = Value::Str(Rc::from("x=")).add(&Value::Int(5), pos).unwrap();
        assert_eq!(s, Value::Str(Rc::from("x=5")));
        let s2 = Value::Int(5).add(&Value::Str(Rc::from("!")), pos).unwrap();
        assert_eq!(s2, Value::Str(Rc::from("5!")));
    }

    #[test]
    fn divide_by_zero_raises() {
        let pos = SourcePos::new(1, 1);
        assert!(Value::Int(1).div(&Value::Int(0), pos).is_err());
    }

    #[test]
    fn shift_amount_is_masked_to_six_bits() {
        let pos = SourcePos::new(1, 1);
        assert_eq!(Value::Int(1).shl(&Value::Int(64), pos).unwrap(), Value::Int(1));
        assert_eq!(Value::Int(1).shl(&Value::Int(0), pos).unwrap(), Value::Int(1));
    }

    #[test]
    fn list_plus_assign_extends_in_place() {
        let pos = SourcePos::new(1, 1);
        let l = Value::List(Rc::new(RefCell::new(vec![Value::Int(1)])));
        let updated = l.plus_assign_in_place(&Value::Int(2), pos).unwrap().unwrap();
        match updated {
            Value::List(v) => assert_eq!(v.borrow().len(), 2),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn inc_dec_step_allocates_new_value() {
        let pos = SourcePos::new(1, 1);
        assert_eq!(Value::Int(5).step(1, pos).unwrap(), Value::Int(6));
        assert_eq!(Value::Int(5).step(-1, pos).unwrap(), Value::Int(4));
    }

    #[test]
    fn int_real_compare_promotes() {
        assert_eq!(Value::Int(2).compare(&Value::Real(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Real(1.5).compare(&Value::Int(2)), Some(Ordering::Less));
    }

    #[test]
    fn list_compare_is_lexicographic() {
        let a = Value::List(Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)])));
        let b = Value::List(Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(3)])));
        assert_eq!(a.compare(&b), Some(Ordering::Less));
    }

    #[test]
    fn unset_any_op_raises() {
        let pos = SourcePos::new(1, 1);
        assert!(Value::Unset.to_bool(pos).is_err());
        assert!(Value::Unset.contains(&Value::Int(1), pos).is_err());
    }

    #[test]
    fn map_equality_is_reference_only() {
        let m1 = Value::Map(Rc::new(RefCell::new(IndexMap::new())));
        let m2 = Value::Map(Rc::new(RefCell::new(IndexMap::new())));
        assert_ne!(m1, m2);
        assert_eq!(m1.clone(), m1);
    }

    #[test]
    fn range_contains_endpoints() {
        let r = RangeData {
            start: Some(Box::new(Value::Int(1))),
            end: Some(Box::new(Value::Int(5))),
            end_inclusive: true,
        };
        let pos = SourcePos::new(1, 1);
        assert!(Value::Range(Rc::new(r.clone())).contains(&Value::Int(5), pos).unwrap());
        let r2 = RangeData { end_inclusive: false, ..r };
        assert!(!Value::Range(Rc::new(r2)).contains(&Value::Int(5), pos).unwrap());
    }
}
