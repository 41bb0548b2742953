//! Call-site argument binding (spec §4.4 "MethodCallRef ... performs argument
//! binding (positional, named, spread; plus a trailing block if any)").

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{EvalResult, RuntimeError, SourcePos};
use crate::object_model::record::{Record, Visibility};
use crate::object_model::Method;
use crate::refs::RefNode;
use crate::value::Value;

use super::Scope;

/// The bound arguments at a call site, already past spread-expansion (spec §5
/// "Argument evaluation at a call site is left-to-right, followed by named/
/// spread expansion").
#[derive(Default, Clone)]
pub struct Arguments {
    pub positional: Vec<Value>,
    pub named: IndexMap<String, Value>,
    /// A trailing `{ ... }` block passed after the argument list, captured as
    /// an unevaluated body bound to the callee's last parameter as a zero-arg
    /// callable (spec §4.4).
    pub trailing_block: Option<Rc<dyn RefNode>>,
}

impl Arguments {
    pub fn positional(values: Vec<Value>) -> Self {
        Arguments {
            positional: values,
            named: IndexMap::new(),
            trailing_block: None,
        }
    }

    pub fn with_named(mut self, named: IndexMap<String, Value>) -> Self {
        self.named = named;
        self
    }

    pub fn with_trailing_block(mut self, block: Rc<dyn RefNode>) -> Self {
        self.trailing_block = Some(block);
        self
    }

    /// Bind `self` into `scope` against `param_names`, defining one local slot
    /// per parameter in declaration order.
    pub fn bind_into(&self, scope: &Rc<Scope>, param_names: &[String]) -> EvalResult<()> {
        if self.positional.len() > param_names.len() {
            return Err(RuntimeError::illegal_argument(
                format!("expected at most {} argument(s), got {}", param_names.len(), self.positional.len()),
                SourcePos::UNKNOWN,
            ));
        }

        for (name, value) in param_names.iter().zip(self.positional.iter()) {
            scope.define(name.clone(), param_slot(value.clone()));
        }

        for (name, value) in &self.named {
            if !param_names.iter().any(|p| p == name) {
                return Err(RuntimeError::illegal_argument(format!("unknown named argument `{name}`"), SourcePos::UNKNOWN));
            }
            scope.define(name.clone(), param_slot(value.clone()));
        }

        if let Some(block) = &self.trailing_block {
            if let Some(last) = param_names.last() {
                let already_bound = self.positional.len() == param_names.len() || self.named.contains_key(last);
                if !already_bound {
                    let method = Method::new(format!("{last}$block"), None, Vec::new(), block.clone());
                    scope.define(last.clone(), param_slot(Value::Callable(Rc::new(method))));
                }
            }
        }

        Ok(())
    }
}

fn param_slot(value: Value) -> Rc<RefCell<Record>> {
    Rc::new(RefCell::new(Record::new_field(value, true, Visibility::Public, None)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_args_bind_in_order() {
        let scope = Scope::new_root(None, None);
        let args = Arguments::positional(vec![Value::Int(1), Value::Int(2)]);
        args.bind_into(&scope, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(scope.get("a").unwrap().borrow().value, Value::Int(1));
        assert_eq!(scope.get("b").unwrap().borrow().value, Value::Int(2));
    }

    #[test]
    fn too_many_positional_args_is_illegal_argument() {
        let scope = Scope::new_root(None, None);
        let args = Arguments::positional(vec![Value::Int(1), Value::Int(2)]);
        assert!(args.bind_into(&scope, &["a".to_string()]).is_err());
    }

    #[test]
    fn unknown_named_arg_is_illegal_argument() {
        let scope = Scope::new_root(None, None);
        let mut named = IndexMap::new();
        named.insert("z".to_string(), Value::Int(9));
        let args = Arguments::default().with_named(named);
        assert!(args.bind_into(&scope, &["a".to_string()]).is_err());
    }
}
