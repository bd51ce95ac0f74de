//! Snapshot isolation for readers.
//!
//! A [`ReadContext`] pins one root snapshot of one bosk to the calling
//! thread. Every [`crate::Reference`] of that bosk resolved on this thread
//! while the context is alive sees the pinned snapshot, no matter how many
//! updates commit meanwhile. The context can also be passed explicitly to
//! the `*_in` resolution methods.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bosk_tree::Node;

thread_local! {
    static BOUND: RefCell<HashMap<u64, Arc<Node>>> = RefCell::new(HashMap::new());
}

enum Restore {
    /// A surrounding context was already bound; leave it alone.
    Nothing,
    Unbind,
    Rebind(Arc<Node>),
}

/// A pinned snapshot, bound to the current thread until dropped.
///
/// Must be dropped on the thread that created it, innermost first.
#[must_use = "the snapshot is unbound when the context is dropped"]
pub struct ReadContext {
    bosk_id: u64,
    root: Arc<Node>,
    restore: Restore,
    _not_send: PhantomData<*const ()>,
}

impl ReadContext {
    /// Bind `current()` for `bosk_id`, unless a context for that bosk is
    /// already bound on this thread, in which case reuse its snapshot.
    pub(crate) fn enter(bosk_id: u64, current: impl FnOnce() -> Arc<Node>) -> Self {
        if let Some(root) = Self::bound(bosk_id) {
            return Self {
                bosk_id,
                root,
                restore: Restore::Nothing,
                _not_send: PhantomData,
            };
        }
        let root = current();
        BOUND.with(|b| b.borrow_mut().insert(bosk_id, root.clone()));
        Self {
            bosk_id,
            root,
            restore: Restore::Unbind,
            _not_send: PhantomData,
        }
    }

    /// Bind `root` for `bosk_id` even if another snapshot is bound, and put
    /// that one back on drop. Hooks run under this so they see the state
    /// their update produced.
    pub(crate) fn replace(bosk_id: u64, root: Arc<Node>) -> Self {
        let previous = BOUND.with(|b| b.borrow_mut().insert(bosk_id, root.clone()));
        Self {
            bosk_id,
            root,
            restore: match previous {
                Some(p) => Restore::Rebind(p),
                None => Restore::Unbind,
            },
            _not_send: PhantomData,
        }
    }

    /// The snapshot bound for `bosk_id` on this thread, if any.
    pub(crate) fn bound(bosk_id: u64) -> Option<Arc<Node>> {
        BOUND.with(|b| b.borrow().get(&bosk_id).cloned())
    }

    /// The pinned root.
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub(crate) fn bosk_id(&self) -> u64 {
        self.bosk_id
    }
}

impl Drop for ReadContext {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.restore, Restore::Nothing) {
            Restore::Nothing => {}
            Restore::Unbind => {
                BOUND.with(|b| b.borrow_mut().remove(&self.bosk_id));
            }
            Restore::Rebind(previous) => {
                BOUND.with(|b| b.borrow_mut().insert(self.bosk_id, previous));
            }
        }
    }
}
