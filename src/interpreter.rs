//! The `Interpreter`: the embedder-facing handle that owns everything the
//! source's process-wide globals used to hold — the class registry, the
//! frame pool, a `PerfFlags` snapshot, and the `Stats` counters (spec §9
//! "Global mutable state", §6 "outputs the core exposes").
//!
//! There is exactly one of these per running script; `execute` is its single
//! entry point from the runtime driver.

use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use crate::error::{ErrorKind, EvalResult, RuntimeError, SourcePos};
use crate::object_model::{ClassId, ClassRegistry};
use crate::perf_flags::{PerfFlags, Stats};
use crate::refs::RefNode;
use crate::scope::{FramePool, Scope};
use crate::value::Value;

/// Compiled regexes rarely number more than a handful per script; this just
/// bounds the cache so a program that builds regex sources dynamically in a
/// loop can't grow it unboundedly.
const REGEX_CACHE_CAPACITY: usize = 64;

pub struct Interpreter {
    classes: Rc<ClassRegistry>,
    flags: PerfFlags,
    stats: Stats,
    frame_pool: FramePool,
    /// Compiled-regex memoization keyed by source, gated by `regex_cache`
    /// (spec §6 "REGEX_CACHE: memoize compiled regexes by source").
    regex_cache: LruCache<Rc<str>, Rc<regex::Regex>>,
    /// The parent every pooled/unpooled call frame hangs off. Method bodies
    /// are compiled once against their declaring class (spec §3 "Instance ...
    /// resolves methods to bodies compiled once on the class"), not against
    /// whatever lexical scope happened to make the call, so call frames chain
    /// to this shared root rather than to the caller's scope.
    root: Rc<Scope>,
}

impl Interpreter {
    pub fn new(classes: Rc<ClassRegistry>, flags: PerfFlags) -> Self {
        Interpreter {
            classes,
            flags,
            stats: Stats::default(),
            frame_pool: FramePool::new(),
            regex_cache: LruCache::new(NonZeroUsize::new(REGEX_CACHE_CAPACITY).expect("nonzero constant")),
            root: Scope::new_root(None, None),
        }
    }

    /// A fresh interpreter over a fresh, empty class registry with default
    /// flags — convenient for unit tests that don't care about wiring up an
    /// embedder-supplied registry.
    pub fn new_for_tests() -> Self {
        Interpreter::new(Rc::new(ClassRegistry::new()), PerfFlags::default())
    }

    pub fn classes(&self) -> &Rc<ClassRegistry> {
        &self.classes
    }

    pub fn perf_flags(&self) -> PerfFlags {
        self.flags
    }

    pub fn set_perf_flags(&mut self, flags: PerfFlags) {
        self.flags = flags;
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    pub fn root_scope(&self) -> &Rc<Scope> {
        &self.root
    }

    /// Compile `source`, consulting/populating the regex cache when
    /// `regex_cache` is on; otherwise compiles fresh every call.
    pub fn compiled_regex(&mut self, source: &Rc<str>, pos: SourcePos) -> EvalResult<Rc<regex::Regex>> {
        if self.flags.regex_cache {
            if let Some(hit) = self.regex_cache.get(source) {
                return Ok(hit.clone());
            }
        }
        let compiled = Rc::new(
            regex::Regex::new(source).map_err(|e| RuntimeError::illegal_argument(format!("invalid regex /{source}/: {e}"), pos))?,
        );
        if self.flags.regex_cache {
            self.regex_cache.put(source.clone(), compiled.clone());
        }
        Ok(compiled)
    }

    /// `raiseError(kind, message)` (spec §6), for call sites that don't have a
    /// live `Scope` handy to stamp a frame trace onto (e.g. node construction
    /// failures before any frame exists).
    pub fn raise_error_unscoped(&self, kind: ErrorKind, message: impl Into<String>, pos: SourcePos) -> RuntimeError {
        RuntimeError::new(kind, message, pos)
    }

    /// `withChildFrame(args, thisObj, block)` (spec §4.3, §5 "Scoped
    /// acquisition"): acquire a child frame — pooled when `SCOPE_POOL` is on —
    /// run `f`, and release it on every exit path including a raised error.
    pub fn with_child_frame<T>(
        &mut self,
        this_obj: Option<Value>,
        this_class: Option<ClassId>,
        f: impl FnOnce(&Rc<Scope>, &mut Interpreter) -> EvalResult<T>,
    ) -> EvalResult<T> {
        let parent = self.root.clone();
        let scope = if self.flags.scope_pool {
            self.frame_pool.checkout(&parent, this_obj, this_class)
        } else {
            Scope::child(&parent, this_obj, this_class)
        };
        let result = f(&scope, self);
        if self.flags.scope_pool {
            self.frame_pool.release(scope);
        }
        result
    }

    /// `execute(rootNode, initialScope) → Value` (spec §6): the runtime
    /// driver's sole entry point. Returns `Void` when the root node is a
    /// statement producing no value (the node itself decides that).
    pub fn execute(&mut self, root: &Rc<dyn RefNode>, initial_scope: &Rc<Scope>) -> EvalResult<Value> {
        root.eval_value(initial_scope, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_child_frame_bumps_frame_id_when_pooled() {
        let mut interp = Interpreter::new(Rc::new(ClassRegistry::new()), PerfFlags::all_on());
        let first_id = interp.with_child_frame(None, None, |scope, _| Ok(scope.frame_id())).unwrap();
        let second_id = interp.with_child_frame(None, None, |scope, _| Ok(scope.frame_id())).unwrap();
        assert!(second_id > first_id);
    }

    #[test]
    fn compiled_regex_caches_by_source_when_enabled() {
        let mut interp = Interpreter::new(Rc::new(ClassRegistry::new()), PerfFlags::all_on());
        let source: Rc<str> = Rc::from("[0-9]+");
        let first = interp.compiled_regex(&source, SourcePos::UNKNOWN).unwrap();
        let second = interp.compiled_regex(&source, SourcePos::UNKNOWN).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn compiled_regex_recompiles_every_call_when_disabled() {
        let mut interp = Interpreter::new(Rc::new(ClassRegistry::new()), PerfFlags::all_off());
        let source: Rc<str> = Rc::from("[0-9]+");
        let first = interp.compiled_regex(&source, SourcePos::UNKNOWN).unwrap();
        let second = interp.compiled_regex(&source, SourcePos::UNKNOWN).unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn with_child_frame_releases_on_error() {
        let mut interp = Interpreter::new(Rc::new(ClassRegistry::new()), PerfFlags::all_on());
        let err: EvalResult<()> = interp.with_child_frame(None, None, |_, _| Err(RuntimeError::execution("boom", SourcePos::UNKNOWN)));
        assert!(err.is_err());
        let reused = interp.with_child_frame(None, None, |scope, _| Ok(scope.frame_id()));
        assert!(reused.is_ok());
    }
}
