//! Evaluation core for a dynamic, object-oriented scripting language.
//!
//! This crate is the hot path of an interpreter: the expression and l-value
//! machinery (`refs`), the object model with multiple-inheritance dispatch
//! (`object_model`), and the polymorphic inline caches that accelerate field
//! reads, field writes, index access, method invocation, and local-variable
//! resolution (`refs::pic`). Everything else an interpreter needs — lexing,
//! parsing, module loading, a CLI, a serialization codec, the standard
//! library's own bodies — lives outside this crate and talks to it only
//! through the surface re-exported here.
//!
//! # Architecture
//!
//! 1. **Value universe** (`value`) — the tagged `Value` enum every runtime
//!    value is, with its operator contract (arithmetic, comparison, bitwise,
//!    membership) implemented directly on it.
//! 2. **Object model** (`object_model`) — `Class`/`ClassRegistry` (C3-style
//!    linearization, member tables, field/method slot maps), `Instance`
//!    (per-object slot storage), and member resolution honoring visibility.
//! 3. **Scope** (`scope`) — the call-frame chain: slot-indexed locals, a
//!    `thisObj`/current-class context, and a frame pool for cheap calls.
//! 4. **Reference nodes** (`refs`) — the closed set of expression-tree node
//!    variants a compiler front-end emits and this crate executes, each
//!    carrying its own inline cache where the contract calls for one.
//! 5. **Interpreter** (`interpreter`) — the embedder handle tying the above
//!    together: a `PerfFlags` snapshot, `Stats` counters, and `execute`.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use dynacore::interpreter::Interpreter;
//! use dynacore::object_model::ClassRegistry;
//! use dynacore::perf_flags::PerfFlags;
//! use dynacore::refs::{BinaryOp, BinaryOpRef, ConstRef, RefNode};
//! use dynacore::scope::Scope;
//! use dynacore::value::Value;
//! use dynacore::error::SourcePos;
//!
//! let mut interp = Interpreter::new(Rc::new(ClassRegistry::new()), PerfFlags::default());
//! let scope = Scope::new_root(None, None);
//! let node: Rc<dyn RefNode> = Rc::new(BinaryOpRef {
//!     op: BinaryOp::Add,
//!     left: Rc::new(ConstRef::new(Value::Int(1))),
//!     right: Rc::new(ConstRef::new(Value::Int(2))),
//!     pos: SourcePos::new(1, 1),
//! });
//! assert_eq!(interp.execute(&node, &scope).unwrap(), Value::Int(3));
//! ```

pub mod error;
pub mod interpreter;
pub mod object_model;
pub mod perf_flags;
pub mod refs;
pub mod scope;
pub mod value;

pub use error::{ErrorKind, EvalResult, RuntimeError, SourcePos};
pub use interpreter::Interpreter;
pub use perf_flags::{PerfFlags, Stats};
pub use value::Value;
