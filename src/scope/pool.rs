//! Child-frame pooling (spec §4.3 "When a performance flag enables pooling,
//! child frames are drawn from a pool and returned on exit").

use std::rc::Rc;

use tracing::debug;

use crate::object_model::ClassId;
use crate::value::Value;

use super::Scope;

/// A free list of recycled [`Scope`]s. Only scopes with no other surviving
/// `Rc` handle are safe to recycle — a frame captured by a closure must keep
/// living even after its call returns, so `release` silently drops anything
/// still shared rather than recycling it.
#[derive(Default)]
pub struct FramePool {
    free: Vec<Rc<Scope>>,
}

impl FramePool {
    pub fn new() -> Self {
        FramePool { free: Vec::new() }
    }

    /// Acquire a child scope under `parent`, reusing a pooled frame when one is
    /// free, else allocating fresh.
    pub fn checkout(&mut self, parent: &Rc<Scope>, this_obj: Option<Value>, this_class: Option<ClassId>) -> Rc<Scope> {
        match self.free.pop() {
            Some(scope) => {
                scope.reset_for_reuse(Some(parent.clone()), this_obj, this_class);
                debug!(frame_id = scope.frame_id(), "frame recycled from pool");
                scope
            }
            None => Scope::child(parent, this_obj, this_class),
        }
    }

    /// Return a frame to the pool. No-op if some other `Rc<Scope>` handle
    /// (e.g. a closure) is still keeping it alive.
    pub fn release(&mut self, scope: Rc<Scope>) {
        if Rc::strong_count(&scope) == 1 {
            self.free.push(scope);
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_frame_is_reused() {
        let mut pool = FramePool::new();
        let root = Scope::new_root(None, None);
        let child = pool.checkout(&root, None, None);
        let id_before = child.frame_id();
        pool.release(child);
        assert_eq!(pool.free_count(), 1);

        let reused = pool.checkout(&root, None, None);
        assert!(reused.frame_id() > id_before);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn frame_kept_alive_elsewhere_is_not_recycled() {
        let mut pool = FramePool::new();
        let root = Scope::new_root(None, None);
        let child = pool.checkout(&root, None, None);
        let _kept_alive = child.clone();
        pool.release(child);
        assert_eq!(pool.free_count(), 0);
    }
}
