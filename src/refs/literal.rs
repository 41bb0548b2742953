//! Literals, constants, and collection-literal/destructuring nodes
//! (spec §4.4 "Literals & constants" and "List/Map/Range literals and
//! destructuring").

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::object_model::record::{Record, Visibility};
use crate::scope::Scope;
use crate::value::{RangeData, Value};
use crate::interpreter::Interpreter;

use super::{eval_child, RefNode};

/// `ConstRef(record)`: returns a frozen record (spec §4.4).
#[derive(Debug)]
pub struct ConstRef {
    record: Rc<RefCell<Record>>,
}

impl ConstRef {
    pub fn new(value: Value) -> Self {
        ConstRef {
            record: Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))),
        }
    }
}

impl RefNode for ConstRef {
    fn get(&self, _scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        Ok(self.record.clone())
    }

    fn eval_value(&self, _scope: &Rc<Scope>, _interp: &mut Interpreter) -> EvalResult<Value> {
        Ok(self.record.borrow().value.clone())
    }
}

/// `StatementRef(stmt)`: transparently executes a sub-statement node, used
/// during a compilation migration where a statement is temporarily reused as
/// an expression (spec §4.4).
#[derive(Debug)]
pub struct StatementRef {
    pub stmt: Rc<dyn RefNode>,
}

impl RefNode for StatementRef {
    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        self.stmt.get(scope, interp)
    }

    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        eval_child(&self.stmt, scope, interp)
    }

    fn set_at(&self, scope: &Rc<Scope>, interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        self.stmt.set_at(scope, interp, value, pos)
    }
}

/// One entry of a list literal or list destructuring pattern.
#[derive(Clone)]
pub enum ListPattern {
    Element(Rc<dyn RefNode>),
    /// `...spread`: on read, expands another list's elements in place; on
    /// write, captures every element not claimed by a sibling entry.
    Spread(Rc<dyn RefNode>),
}

/// `ListLiteralRef(entries)` (spec §4.4).
#[derive(Clone)]
pub struct ListLiteralRef {
    pub entries: Vec<ListPattern>,
    pub pos: SourcePos,
}

impl std::fmt::Debug for ListLiteralRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListLiteralRef").field("len", &self.entries.len()).finish()
    }
}

impl RefNode for ListLiteralRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry {
                ListPattern::Element(node) => out.push(eval_child(node, scope, interp)?),
                ListPattern::Spread(node) => match eval_child(node, scope, interp)? {
                    Value::List(l) => out.extend(l.borrow().iter().cloned()),
                    _ => return Err(RuntimeError::illegal_argument("spread target of a list literal must be a List", self.pos)),
                },
            }
        }
        Ok(Value::List(Rc::new(RefCell::new(out))))
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }

    /// `ListLiteralRef.setAt(value)`: destructuring write (spec §4.4).
    fn set_at(&self, scope: &Rc<Scope>, interp: &mut Interpreter, value: Value, pos: SourcePos) -> EvalResult<()> {
        let items = match value {
            Value::List(l) => l.borrow().clone(),
            _ => return Err(RuntimeError::destructuring("destructuring target requires a List value", pos)),
        };

        let spread_positions: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| matches!(e, ListPattern::Spread(_)).then_some(i))
            .collect();

        if spread_positions.len() > 1 {
            return Err(RuntimeError::destructuring("at most one spread is allowed in a destructuring pattern", pos));
        }

        match spread_positions.first() {
            None => {
                if items.len() != self.entries.len() {
                    return Err(RuntimeError::destructuring(
                        format!("expected {} element(s), got {}", self.entries.len(), items.len()),
                        pos,
                    ));
                }
                for (entry, item) in self.entries.iter().zip(items.into_iter()) {
                    match entry {
                        ListPattern::Element(node) => node.set_at(scope, interp, item, pos)?,
                        ListPattern::Spread(_) => unreachable!("checked above"),
                    }
                }
                Ok(())
            }
            Some(&spread_idx) => {
                let head = &self.entries[..spread_idx];
                let tail = &self.entries[spread_idx + 1..];
                if items.len() < head.len() + tail.len() {
                    return Err(RuntimeError::destructuring(
                        format!("too few elements to destructure: need at least {}, got {}", head.len() + tail.len(), items.len()),
                        pos,
                    ));
                }
                for (entry, item) in head.iter().zip(items.iter()) {
                    if let ListPattern::Element(node) = entry {
                        node.set_at(scope, interp, item.clone(), pos)?;
                    }
                }
                let middle_end = items.len() - tail.len();
                let middle: Vec<Value> = items[head.len()..middle_end].to_vec();
                if let ListPattern::Spread(node) = &self.entries[spread_idx] {
                    node.set_at(scope, interp, Value::List(Rc::new(RefCell::new(middle))), pos)?;
                }
                for (entry, item) in tail.iter().zip(items[middle_end..].iter()) {
                    if let ListPattern::Element(node) = entry {
                        node.set_at(scope, interp, item.clone(), pos)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// One entry of a map literal: a key/value pair, or a spread of another map.
#[derive(Clone)]
pub enum MapPattern {
    Entry(Rc<dyn RefNode>, Rc<dyn RefNode>),
    Spread(Rc<dyn RefNode>),
}

/// `MapLiteralRef(entries)` (spec §4.4).
#[derive(Clone)]
pub struct MapLiteralRef {
    pub entries: Vec<MapPattern>,
    pub pos: SourcePos,
}

impl std::fmt::Debug for MapLiteralRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapLiteralRef").field("len", &self.entries.len()).finish()
    }
}

impl RefNode for MapLiteralRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let mut out = IndexMap::new();
        for entry in &self.entries {
            match entry {
                MapPattern::Entry(k, v) => {
                    let key = eval_child(k, scope, interp)?;
                    let value = eval_child(v, scope, interp)?;
                    out.insert(key, value);
                }
                MapPattern::Spread(node) => match eval_child(node, scope, interp)? {
                    Value::Map(m) => {
                        for (k, v) in m.borrow().iter() {
                            out.insert(k.clone(), v.clone());
                        }
                    }
                    _ => return Err(RuntimeError::illegal_argument("spread target of a map literal must be a Map", self.pos)),
                },
            }
        }
        Ok(Value::Map(Rc::new(RefCell::new(out))))
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

/// `RangeRef(left?, right?, isEndInclusive)` (spec §4.4).
#[derive(Debug, Clone)]
pub struct RangeRef {
    pub start: Option<Rc<dyn RefNode>>,
    pub end: Option<Rc<dyn RefNode>>,
    pub end_inclusive: bool,
}

impl RefNode for RangeRef {
    fn eval_value(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Value> {
        let start = self.start.as_ref().map(|n| eval_child(n, scope, interp)).transpose()?.map(Box::new);
        let end = self.end.as_ref().map(|n| eval_child(n, scope, interp)).transpose()?.map(Box::new);
        Ok(Value::Range(Rc::new(RangeData {
            start,
            end,
            end_inclusive: self.end_inclusive,
        })))
    }

    fn get(&self, scope: &Rc<Scope>, interp: &mut Interpreter) -> EvalResult<Rc<RefCell<Record>>> {
        let value = self.eval_value(scope, interp)?;
        Ok(Rc::new(RefCell::new(Record::new_field(value, false, Visibility::Public, None))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePos {
        SourcePos::new(1, 1)
    }

    #[test]
    fn const_ref_returns_frozen_value() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let node = ConstRef::new(Value::Int(42));
        assert_eq!(node.eval_value(&scope, &mut interp).unwrap(), Value::Int(42));
    }

    #[test]
    fn list_literal_expands_spread() {
        let scope = Scope::new_root(None, None);
        let mut interp = Interpreter::new_for_tests();
        let inner = Value::List(Rc::new(RefCell::new(vec![Value::Int(2), Value::Int(3)])));
        let entries = vec![
            ListPattern::Element(Rc::new(ConstRef::new(Value::Int(1)))),
            ListPattern::Spread(Rc::new(ConstRef::new(inner))),
        ];
        let node = ListLiteralRef { entries, pos: pos() };
        let v = node.eval_value(&scope, &mut interp).unwrap();
        match v {
            Value::List(l) => assert_eq!(*l.borrow(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            _ => panic!("expected list"),
        }
    }
}
