//! The hook registry and dispatch order.
//!
//! Hooks are ordered by descending priority; equal priorities run in
//! registration order. The order is fixed when a hook is registered, so
//! dispatch only walks a sorted list.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bosk_tree::{CompiledPath, Node};
use bosk_types::Path;

use crate::driver::DriverHandle;

pub(crate) type HookFn = Box<dyn Fn(&Path, &DriverHandle) + Send + Sync>;

pub(crate) struct Hook {
    pub(crate) name: String,
    pub(crate) priority: i32,
    seq: u64,
    scope: Arc<CompiledPath>,
    callback: HookFn,
}

impl Hook {
    /// Concrete bindings of this hook's scope that overlap `changed`,
    /// drawn from both the old and new trees so deletions are seen.
    pub(crate) fn affected(&self, before: &Node, after: &Node, changed: &Path) -> Vec<Path> {
        let mut found: Vec<Path> = Vec::new();
        for path in self
            .scope
            .enumerate(after)
            .into_iter()
            .chain(self.scope.enumerate(before))
        {
            let overlaps = path.is_prefix_of(changed) || changed.is_prefix_of(&path);
            if overlaps && !found.contains(&path) {
                found.push(path);
            }
        }
        found
    }

    /// Every current binding of this hook's scope.
    pub(crate) fn existing(&self, root: &Node) -> Vec<Path> {
        self.scope.enumerate(root)
    }

    pub(crate) fn fire(&self, path: &Path, driver: &DriverHandle) {
        (self.callback)(path, driver)
    }
}

#[derive(Default)]
pub(crate) struct HookRegistry {
    hooks: RwLock<Vec<Arc<Hook>>>,
    next_seq: AtomicU64,
}

impl HookRegistry {
    pub(crate) fn register(
        &self,
        name: String,
        scope: Arc<CompiledPath>,
        priority: i32,
        callback: HookFn,
    ) -> Arc<Hook> {
        let hook = Arc::new(Hook {
            name,
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            scope,
            callback,
        });
        let key = |priority: i32, seq: u64| (priority, Reverse(seq));
        let mut hooks = self.hooks.write().expect("hook registry lock poisoned");
        let position = hooks
            .iter()
            .position(|h| key(h.priority, h.seq) < key(priority, hook.seq))
            .unwrap_or(hooks.len());
        hooks.insert(position, hook.clone());
        hook
    }

    /// Hooks in dispatch order.
    pub(crate) fn ordered(&self) -> Vec<Arc<Hook>> {
        self.hooks
            .read()
            .expect("hook registry lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn noop() -> HookFn {
        Box::new(|_: &Path, _: &DriverHandle| {})
    }

    fn names(registry: &HookRegistry) -> Vec<String> {
        registry.ordered().iter().map(|h| h.name.clone()).collect()
    }

    #[test]
    fn higher_priority_first_then_registration_order() {
        let compiler = testing::compiler();
        let scope = compiler.compile(&Path::parse("/targets").unwrap()).unwrap();
        let registry = HookRegistry::default();
        for (name, priority) in [("low", 5), ("high", 10), ("low-later", 5), ("mid", 7)] {
            registry.register(name.into(), scope.clone(), priority, noop());
        }
        assert_eq!(names(&registry), vec!["high", "mid", "low", "low-later"]);
    }

    #[test]
    fn affected_sees_deleted_entries() {
        let compiler = testing::compiler();
        let scope = compiler.compile(&Path::parse("/targets/-t-").unwrap()).unwrap();
        let registry = HookRegistry::default();
        let hook = registry.register("h".into(), scope, 0, noop());

        let before = testing::root_with(&["a", "b"]);
        let after = compiler
            .compile(&Path::parse("/targets/a").unwrap())
            .unwrap()
            .without(&before)
            .unwrap();
        let changed = Path::parse("/targets/a").unwrap();
        assert_eq!(hook.affected(&before, &after, &changed), vec![changed.clone()]);

        let everything = hook.affected(&before, &after, &Path::root());
        assert_eq!(everything.len(), 2);
        assert!(hook
            .affected(&before, &after, &Path::parse("/name").unwrap())
            .is_empty());
    }
}
