//! The state container.
//!
//! A [`Bosk`] owns the current root snapshot and a single apply queue. All
//! updates reaching the terminal local driver are applied one at a time, in
//! submission order, by whichever thread finds the queue idle; other
//! submitters only enqueue. Hooks run on that same thread after each
//! commit, so an update a hook submits waits behind the current one instead
//! of recursing.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock, Weak};

use bosk_tree::{Node, PathCompiler, Schema, StateValue, StructNode};
use bosk_types::{diagnostics, Identifier, Path};
use tracing::{debug, error, info, warn};

use crate::driver::{BoskDriver, DriverFactory, DriverHandle, DriverStack, LocalDriver};
use crate::error::{BoskError, Result};
use crate::hooks::{Hook, HookRegistry};
use crate::read_context::ReadContext;
use crate::reference::Reference;
use crate::update::Update;

static NEXT_BOSK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Ids of the bosks whose queues this thread is currently draining.
    static APPLYING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Supplies the initial root when no driver in the chain can.
pub type DefaultRootFn = Arc<dyn Fn(&Schema) -> Node + Send + Sync>;

enum Work {
    Apply(Update),
    /// Run a newly registered hook for everything already in the tree.
    Introduce(Arc<Hook>),
}

#[derive(Default)]
struct WorkQueue {
    pending: VecDeque<Work>,
    started: bool,
    draining: bool,
    enqueued: u64,
    completed: u64,
}

/// Shared internals of a bosk. Drivers reach them through [`BoskInfo`].
pub(crate) struct StateContainer {
    pub(crate) id: u64,
    name: String,
    instance: Identifier,
    compiler: Arc<PathCompiler>,
    current: RwLock<Arc<Node>>,
    hooks: HookRegistry,
    driver: OnceLock<Weak<dyn BoskDriver>>,
    queue: Mutex<WorkQueue>,
    progress: Condvar,
}

impl StateContainer {
    fn new(name: String, schema: Arc<Schema>) -> Self {
        Self {
            id: NEXT_BOSK_ID.fetch_add(1, Ordering::Relaxed),
            name,
            instance: Identifier::unique("bosk"),
            compiler: Arc::new(PathCompiler::new(schema)),
            current: RwLock::new(Arc::new(Node::Struct(StructNode::new()))),
            hooks: HookRegistry::default(),
            driver: OnceLock::new(),
            queue: Mutex::new(WorkQueue::default()),
            progress: Condvar::new(),
        }
    }

    pub(crate) fn schema(&self) -> &Arc<Schema> {
        self.compiler.schema()
    }

    pub(crate) fn current_root(&self) -> Arc<Node> {
        self.current.read().expect("root lock poisoned").clone()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.queue.lock().expect("apply queue lock poisoned").started
    }

    /// Publish the initial root and begin applying queued work.
    fn start(&self, root: Node) {
        *self.current.write().expect("root lock poisoned") = Arc::new(root);
        let mut queue = self.queue.lock().expect("apply queue lock poisoned");
        queue.started = true;
        if queue.pending.is_empty() || queue.draining {
            return;
        }
        queue.draining = true;
        drop(queue);
        self.drain();
    }

    pub(crate) fn submit(&self, update: Update) {
        self.enqueue(Work::Apply(update));
    }

    fn enqueue(&self, work: Work) {
        let mut queue = self.queue.lock().expect("apply queue lock poisoned");
        queue.pending.push_back(work);
        queue.enqueued += 1;
        if queue.draining || !queue.started {
            return;
        }
        queue.draining = true;
        drop(queue);
        self.drain();
    }

    fn drain(&self) {
        APPLYING.with(|a| a.borrow_mut().push(self.id));
        let mut queue = self.queue.lock().expect("apply queue lock poisoned");
        while let Some(work) = queue.pending.pop_front() {
            drop(queue);
            match work {
                Work::Apply(update) => self.apply(update),
                Work::Introduce(hook) => self.introduce(&hook),
            }
            queue = self.queue.lock().expect("apply queue lock poisoned");
            queue.completed += 1;
            self.progress.notify_all();
        }
        queue.draining = false;
        drop(queue);
        APPLYING.with(|a| a.borrow_mut().retain(|id| *id != self.id));
    }

    /// Block until all work enqueued before this call has been applied.
    ///
    /// Returns at once when called from the thread that is applying work
    /// for this bosk, e.g. from inside a hook.
    pub(crate) fn wait_idle(&self) {
        if APPLYING.with(|a| a.borrow().contains(&self.id)) {
            return;
        }
        let queue = self.queue.lock().expect("apply queue lock poisoned");
        let target = queue.enqueued;
        let _queue = self
            .progress
            .wait_while(queue, |q| q.started && q.completed < target)
            .expect("apply queue lock poisoned");
    }

    fn apply(&self, update: Update) {
        let _diagnostics = diagnostics::with_context(update.diagnostics.clone());
        let before = self.current_root();
        match update.op.apply(&self.compiler, &before) {
            Ok(Some(after)) => {
                let after = Arc::new(after);
                *self.current.write().expect("root lock poisoned") = after.clone();
                debug!(bosk = %self.name, op = update.op.name(), target = %update.target(), "update applied");
                self.dispatch(&before, &after, update.target());
            }
            Ok(None) => {
                debug!(bosk = %self.name, op = update.op.name(), target = %update.target(), "update had no effect");
            }
            Err(e) => {
                warn!(bosk = %self.name, op = update.op.name(), target = %update.target(), error = %e, "update failed and was dropped");
            }
        }
    }

    fn driver_handle(&self) -> Option<DriverHandle> {
        self.driver
            .get()
            .and_then(Weak::upgrade)
            .map(DriverHandle::new)
    }

    fn dispatch(&self, before: &Node, after: &Arc<Node>, changed: &Path) {
        let Some(driver) = self.driver_handle() else {
            return;
        };
        for hook in self.hooks.ordered() {
            let affected = hook.affected(before, after, changed);
            if affected.is_empty() {
                continue;
            }
            let _context = ReadContext::replace(self.id, after.clone());
            for path in &affected {
                self.run_hook(&hook, path, &driver);
            }
        }
    }

    fn introduce(&self, hook: &Arc<Hook>) {
        let Some(driver) = self.driver_handle() else {
            return;
        };
        let root = self.current_root();
        let _context = ReadContext::replace(self.id, root.clone());
        for path in hook.existing(&root) {
            self.run_hook(hook, &path, &driver);
        }
    }

    fn run_hook(&self, hook: &Hook, path: &Path, driver: &DriverHandle) {
        debug!(bosk = %self.name, hook = %hook.name, priority = hook.priority, path = %path, "running hook");
        if catch_unwind(AssertUnwindSafe(|| hook.fire(path, driver))).is_err() {
            error!(bosk = %self.name, hook = %hook.name, path = %path, "hook panicked");
        }
    }
}

/// What a driver factory learns about the bosk it is building a driver for.
#[derive(Clone)]
pub struct BoskInfo {
    container: Arc<StateContainer>,
}

impl BoskInfo {
    pub fn name(&self) -> &str {
        &self.container.name
    }

    /// Unique per bosk instance, even across processes.
    pub fn instance_id(&self) -> &Identifier {
        &self.container.instance
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.container.compiler.schema()
    }

    pub fn compiler(&self) -> &Arc<PathCompiler> {
        &self.container.compiler
    }

    /// The latest committed root, outside any read context.
    pub fn current_root(&self) -> Arc<Node> {
        self.container.current_root()
    }

    pub(crate) fn container(&self) -> &Arc<StateContainer> {
        &self.container
    }
}

/// Collects what a [`Bosk`] needs before it can be built.
pub struct BoskBuilder {
    name: String,
    schema: Arc<Schema>,
    default_root: Option<DefaultRootFn>,
    driver: DriverFactory,
}

impl BoskBuilder {
    /// Root to use when no driver in the chain supplies one.
    pub fn default_root(mut self, f: impl Fn(&Schema) -> Node + Send + Sync + 'static) -> Self {
        self.default_root = Some(Arc::new(f));
        self
    }

    /// Factory for the driver chain in front of the local driver.
    pub fn driver(mut self, factory: DriverFactory) -> Self {
        self.driver = factory;
        self
    }

    /// Build the driver chain, obtain and validate the initial root, and
    /// start applying updates.
    pub fn build(self) -> Result<Bosk> {
        let schema = self.schema.clone();
        let container = Arc::new(StateContainer::new(self.name, schema.clone()));
        let info = BoskInfo {
            container: container.clone(),
        };
        let local: Arc<dyn BoskDriver> = Arc::new(LocalDriver::new(container.clone(), self.default_root));
        let driver = (self.driver)(&info, local)?;
        let _ = container.driver.set(Arc::downgrade(&driver));

        let root = schema.polyfill(&driver.initial_root()?);
        schema.validate(&root)?;
        container.start(root);
        info!(bosk = %container.name, instance = %container.instance, "bosk started");
        Ok(Bosk { container, driver })
    }
}

/// A state tree with a single serialized update pipeline.
pub struct Bosk {
    container: Arc<StateContainer>,
    driver: Arc<dyn BoskDriver>,
}

impl Bosk {
    pub fn builder(name: impl Into<String>, schema: Arc<Schema>) -> BoskBuilder {
        BoskBuilder {
            name: name.into(),
            schema,
            default_root: None,
            driver: DriverStack::local(),
        }
    }

    pub fn name(&self) -> &str {
        &self.container.name
    }

    pub fn instance_id(&self) -> &Identifier {
        &self.container.instance
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.container.compiler.schema()
    }

    pub fn info(&self) -> BoskInfo {
        BoskInfo {
            container: self.container.clone(),
        }
    }

    /// A typed reference to `path`.
    pub fn reference<T: StateValue>(&self, path: &Path) -> Result<Reference<T>> {
        Reference::new(self.container.id, self.container.compiler.clone(), path)
    }

    /// Like [`Bosk::reference`], parsing `path` first.
    pub fn reference_to<T: StateValue>(&self, path: &str) -> Result<Reference<T>> {
        self.reference(&Path::parse(path)?)
    }

    pub fn root_reference(&self) -> Result<Reference<Node>> {
        self.reference(&Path::root())
    }

    /// Pin the current snapshot to this thread until the context is dropped.
    /// Reentrant: inside another context of this bosk, reuses its snapshot.
    pub fn read_context(&self) -> ReadContext {
        let container = &self.container;
        ReadContext::enter(container.id, || container.current_root())
    }

    /// Submission handle for this bosk's driver chain.
    pub fn driver(&self) -> DriverHandle {
        DriverHandle::new(self.driver.clone())
    }

    /// Register `hook` to run after every committed update that touches
    /// `scope`, with parameters bound to the affected entries.
    ///
    /// The hook also runs once, shortly after registration, for every
    /// existing match of `scope`. Higher priorities run first; equal
    /// priorities in registration order.
    pub fn register_hook<T: StateValue>(
        &self,
        name: impl Into<String>,
        scope: &Reference<T>,
        priority: i32,
        hook: impl Fn(Reference<T>, &DriverHandle) + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();
        let template = scope.clone();
        let hook_name = name.clone();
        let callback = move |path: &Path, driver: &DriverHandle| match template.bound_by(path) {
            Ok(reference) => hook(reference, driver),
            Err(e) => warn!(hook = %hook_name, path = %path, error = %e, "cannot bind hook scope"),
        };
        let hook = self.container.hooks.register(
            name,
            scope.compiled().clone(),
            priority,
            Box::new(callback),
        );
        self.container.enqueue(Work::Introduce(hook));
        Ok(())
    }

    /// Stop the driver chain's background work.
    pub fn close(&self) {
        self.driver.close();
    }
}

impl Drop for Bosk {
    fn drop(&mut self) {
        self.driver.close();
    }
}

impl std::fmt::Debug for Bosk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bosk")
            .field("name", &self.container.name)
            .field("instance", &self.container.instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Target};
    use bosk_tree::{Catalog, TreeError};
    use std::sync::mpsc;

    fn bosk() -> Bosk {
        testing::bosk(&[])
    }

    #[test]
    fn initialization_then_deletion_scenario() {
        let bosk = bosk();
        let driver = bosk.driver();
        let world = bosk.reference_to::<Target>("/targets/world").unwrap();

        driver
            .submit_initialization(&world, &Target::new("world"))
            .unwrap();
        driver.flush().unwrap();
        {
            let _ctx = bosk.read_context();
            assert!(world.exists().unwrap());
            assert_eq!(world.value().unwrap().label, "world");
        }

        driver.submit_deletion(&world).unwrap();
        driver.flush().unwrap();
        let _ctx = bosk.read_context();
        assert!(!world.exists().unwrap());
        let targets = bosk.reference_to::<Catalog<Target>>("/targets").unwrap();
        assert_eq!(targets.value().unwrap().len(), 0);
    }

    #[test]
    fn initialization_does_not_overwrite() {
        let bosk = testing::bosk(&["a"]);
        let a = bosk.reference_to::<Target>("/targets/a").unwrap();
        let mut replacement = Target::new("a");
        replacement.label = "second".into();
        bosk.driver().submit_initialization(&a, &replacement).unwrap();
        bosk.driver().flush().unwrap();
        let _ctx = bosk.read_context();
        assert_eq!(a.value().unwrap().label, "a");
    }

    #[test]
    fn references_need_a_read_context() {
        let bosk = bosk();
        let name = bosk.reference_to::<String>("/name").unwrap();
        assert!(matches!(
            name.value(),
            Err(BoskError::OutsideReadContext { .. })
        ));
        let ctx = bosk.read_context();
        assert_eq!(name.value().unwrap(), "test");
        assert_eq!(name.value_in(&ctx).unwrap(), "test");
    }

    #[test]
    fn read_context_is_isolated_from_later_commits() {
        let bosk = Arc::new(bosk());
        let name = bosk.reference_to::<String>("/name").unwrap();
        let _ctx = bosk.read_context();
        assert_eq!(name.value().unwrap(), "test");

        let writer = {
            let bosk = bosk.clone();
            let name = name.clone();
            std::thread::spawn(move || {
                bosk.driver()
                    .submit_replacement(&name, &"changed".to_string())
                    .unwrap();
                bosk.driver().flush().unwrap();
            })
        };
        writer.join().unwrap();

        assert_eq!(name.value().unwrap(), "test");
        let fresh = std::thread::scope(|s| {
            s.spawn(|| {
                let _ctx = bosk.read_context();
                name.value().unwrap()
            })
            .join()
            .unwrap()
        });
        assert_eq!(fresh, "changed");
    }

    #[test]
    fn conditional_replacement_checks_precondition() {
        let bosk = testing::bosk(&["a"]);
        let driver = bosk.driver();
        let name = bosk.reference_to::<String>("/name").unwrap();
        let owner = bosk.reference_to::<Identifier>("/targets/a/id").unwrap();

        driver
            .submit_conditional_replacement(&name, &"nope".to_string(), &owner, &"b".into())
            .unwrap();
        driver.flush().unwrap();
        {
            let _ctx = bosk.read_context();
            assert_eq!(name.value().unwrap(), "test");
        }

        driver
            .submit_conditional_replacement(&name, &"yes".to_string(), &owner, &"a".into())
            .unwrap();
        driver.flush().unwrap();
        let _ctx = bosk.read_context();
        assert_eq!(name.value().unwrap(), "yes");
    }

    #[test]
    fn conditional_deletion_checks_precondition() {
        let bosk = testing::bosk(&["a", "b"]);
        let driver = bosk.driver();
        let a = bosk.reference_to::<Target>("/targets/a").unwrap();
        let b_id = bosk.reference_to::<Identifier>("/targets/b/id").unwrap();

        driver.submit_conditional_deletion(&a, &b_id, &"x".into()).unwrap();
        driver.flush().unwrap();
        {
            let _ctx = bosk.read_context();
            assert!(a.exists().unwrap());
        }

        driver.submit_conditional_deletion(&a, &b_id, &"b".into()).unwrap();
        driver.flush().unwrap();
        let _ctx = bosk.read_context();
        assert!(!a.exists().unwrap());
    }

    #[test]
    fn invalid_submissions_fail_synchronously() {
        let bosk = bosk();
        let driver = bosk.driver();
        let name = bosk.reference_to::<String>("/name").unwrap();
        assert!(matches!(
            driver.submit_deletion(&name),
            Err(BoskError::Tree(TreeError::IllegalOperation { .. }))
        ));
        let wrong_key = bosk.reference_to::<Target>("/targets/x").unwrap();
        assert!(driver
            .submit_replacement(&wrong_key, &Target::new("y"))
            .is_err());
        let unbound = bosk.reference_to::<Target>("/targets/-t-").unwrap();
        assert!(matches!(
            driver.submit_replacement(&unbound, &Target::new("t")),
            Err(BoskError::Tree(TreeError::MalformedPath { .. }))
        ));
    }

    #[test]
    fn wrong_type_is_rejected_when_referencing() {
        let bosk = bosk();
        assert!(matches!(
            bosk.reference_to::<i64>("/name"),
            Err(BoskError::Tree(TreeError::TypeMismatch { .. }))
        ));
        assert!(matches!(
            bosk.reference_to::<String>("/nonsense"),
            Err(BoskError::Tree(TreeError::MalformedPath { .. }))
        ));
    }

    #[test]
    fn hooks_run_in_priority_order() {
        let bosk = bosk();
        let (tx, rx) = mpsc::channel();
        let scope = bosk.reference_to::<Target>("/targets/-t-").unwrap();
        for (label, priority) in [("H2", 5), ("H1", 10)] {
            let tx = tx.clone();
            bosk.register_hook(label, &scope, priority, move |r: Reference<Target>, _| {
                tx.send((label, r.path().to_string())).unwrap();
            })
            .unwrap();
        }
        let world = scope.bound_to(&["world".into()]).unwrap();
        for _ in 0..3 {
            bosk.driver().submit_replacement(&world, &Target::new("world")).unwrap();
            bosk.driver().flush().unwrap();
            assert_eq!(rx.recv().unwrap(), ("H1", "/targets/world".to_string()));
            assert_eq!(rx.recv().unwrap(), ("H2", "/targets/world".to_string()));
        }
    }

    #[test]
    fn hooks_fire_on_registration_for_existing_entries() {
        let bosk = testing::bosk(&["a", "b"]);
        let (tx, rx) = mpsc::channel();
        let scope = bosk.reference_to::<Target>("/targets/-t-").unwrap();
        bosk.register_hook("seen", &scope, 0, move |r: Reference<Target>, _| {
            tx.send(r.value().unwrap().id.to_string()).unwrap();
        })
        .unwrap();
        bosk.driver().flush().unwrap();
        let seen: Vec<String> = rx.try_iter().collect();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn hooks_see_deletions() {
        let bosk = testing::bosk(&["a"]);
        let (tx, rx) = mpsc::channel();
        let scope = bosk.reference_to::<Target>("/targets/-t-").unwrap();
        bosk.register_hook("watch", &scope, 0, move |r: Reference<Target>, _| {
            tx.send(r.exists().unwrap()).unwrap();
        })
        .unwrap();
        bosk.driver().flush().unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![true]);

        let a = scope.bound_to(&["a".into()]).unwrap();
        bosk.driver().submit_deletion(&a).unwrap();
        bosk.driver().flush().unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![false]);
    }

    #[test]
    fn hook_submissions_queue_behind_the_current_update() {
        let bosk = testing::bosk(&[]);
        let order = Arc::new(Mutex::new(Vec::new()));
        let targets = bosk.reference_to::<Target>("/targets/-t-").unwrap();
        let name = bosk.reference_to::<String>("/name").unwrap();
        {
            let order = order.clone();
            let name = name.clone();
            bosk.register_hook("rename", &targets, 0, move |r: Reference<Target>, driver| {
                order.lock().unwrap().push(format!("target {}", r.path()));
                driver
                    .submit_replacement(&name, &format!("after {}", r.path()))
                    .unwrap();
            })
            .unwrap();
        }
        {
            let order = order.clone();
            bosk.register_hook("name", &name, 0, move |r: Reference<String>, _| {
                order.lock().unwrap().push(format!("name {}", r.value().unwrap()));
            })
            .unwrap();
        }
        bosk.driver().flush().unwrap();
        order.lock().unwrap().clear();

        let x = targets.bound_to(&["x".into()]).unwrap();
        bosk.driver().submit_replacement(&x, &Target::new("x")).unwrap();
        bosk.driver().flush().unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["target /targets/x", "name after /targets/x"]
        );
    }

    #[test]
    fn panicking_hook_does_not_wedge_the_queue() {
        let bosk = bosk();
        let name = bosk.reference_to::<String>("/name").unwrap();
        bosk.register_hook("boom", &name, 0, |_: Reference<String>, _| panic!("boom"))
            .unwrap();
        bosk.driver().submit_replacement(&name, &"next".to_string()).unwrap();
        bosk.driver().flush().unwrap();
        let _ctx = bosk.read_context();
        assert_eq!(name.value().unwrap(), "next");
    }

    #[test]
    fn diagnostics_follow_the_update_into_hooks() {
        let bosk = bosk();
        let (tx, rx) = mpsc::channel();
        let name = bosk.reference_to::<String>("/name").unwrap();
        bosk.register_hook("diag", &name, 0, move |_: Reference<String>, _| {
            tx.send(diagnostics::current().get("request").map(str::to_owned)).unwrap();
        })
        .unwrap();
        bosk.driver().flush().unwrap();
        assert_eq!(rx.try_recv().unwrap(), None);

        {
            let _scope = diagnostics::with_attribute("request", "r1");
            bosk.driver().submit_replacement(&name, &"x".to_string()).unwrap();
        }
        bosk.driver().flush().unwrap();
        assert_eq!(rx.try_recv().unwrap(), Some("r1".to_string()));
    }

    #[test]
    fn missing_default_root_is_an_error() {
        let result = Bosk::builder("empty", testing::schema()).build();
        assert!(matches!(
            result,
            Err(BoskError::Driver(crate::DriverError::UnsupportedInitialization { .. }))
        ));
    }

    #[test]
    fn polyfills_are_applied_to_the_initial_root() {
        let bosk = Bosk::builder("old", testing::schema())
            .default_root(|_| {
                let old = StructNode::new()
                    .with("id", Identifier::from("a"))
                    .with("label", "a")
                    .into_node();
                testing::root_with(&[])
                    .as_struct()
                    .unwrap()
                    .with("targets", Node::catalog_of([old]).unwrap())
                    .into_node()
            })
            .build()
            .unwrap();
        let weight = bosk.reference_to::<i64>("/targets/a/weight").unwrap();
        let _ctx = bosk.read_context();
        assert_eq!(weight.value().unwrap(), 1);
    }
}
