//! Method bodies: a compiled reference-node tree invoked through a pooled child
//! frame (spec §3 "instanceScope ... resolves methods to bodies compiled once on
//! the class", §4.3 "Call frames").

use std::fmt;
use std::rc::Rc;

use crate::error::EvalResult;
use crate::interpreter::Interpreter;
use crate::refs::RefNode;
use crate::scope::Arguments;
use crate::value::Value;

use super::ClassId;

/// A method or function body. Bodies are produced by the external compiler as a
/// tree of reference nodes (spec §2 "Produced by the external compiler, executed
/// by the core") and invoked here through the frame pool.
pub struct Method {
    pub name: String,
    pub declaring_class: Option<ClassId>,
    pub is_static: bool,
    pub param_names: Vec<String>,
    pub body: Rc<dyn RefNode>,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("declaring_class", &self.declaring_class)
            .field("params", &self.param_names)
            .finish()
    }
}

impl Method {
    pub fn new(name: impl Into<String>, declaring_class: Option<ClassId>, param_names: Vec<String>, body: Rc<dyn RefNode>) -> Self {
        Method {
            name: name.into(),
            declaring_class,
            is_static: false,
            param_names,
            body,
        }
    }

    /// Invoke this method: acquire a child frame (pooled if `SCOPE_POOL` is on),
    /// bind `thisObj` and positional/named arguments, evaluate the body, release
    /// the frame on every exit path (spec §4.3, §5 "Scoped acquisition").
    pub fn invoke(&self, interp: &mut Interpreter, this_obj: Option<Value>, args: &Arguments) -> EvalResult<Value> {
        interp.with_child_frame(this_obj, self.declaring_class, |scope, interp| {
            args.bind_into(scope, &self.param_names)?;
            self.body.eval_value(scope, interp)
        })
    }
}
