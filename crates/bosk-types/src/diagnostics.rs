//! Diagnostic attributes that travel with updates.
//!
//! The submitting thread can attach attributes with [`with_attribute`]. They
//! are captured into every update submitted while the returned
//! [`DiagnosticScope`] is alive, written into replicated log records, and
//! re-established on whichever thread applies the update. bosk never
//! interprets the contents; they exist for external logging and tracing.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

thread_local! {
    static CURRENT: RefCell<DiagnosticContext> = RefCell::new(DiagnosticContext::default());
}

/// An opaque string-to-string attribute map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticContext {
    attributes: BTreeMap<String, String>,
}

impl DiagnosticContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this context with one more attribute.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up a single attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All attributes, ordered by key.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Returns `true` if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Restores the calling thread's previous diagnostic context when dropped.
///
/// Scopes must be dropped on the thread that created them.
#[must_use = "the diagnostic context is reverted when the scope is dropped"]
pub struct DiagnosticScope {
    previous: Option<DiagnosticContext>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for DiagnosticScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            CURRENT.with(|c| *c.borrow_mut() = previous);
        }
    }
}

/// The calling thread's current diagnostic context.
pub fn current() -> DiagnosticContext {
    CURRENT.with(|c| c.borrow().clone())
}

/// Add one attribute to the calling thread's context until the scope ends.
pub fn with_attribute(key: impl Into<String>, value: impl Into<String>) -> DiagnosticScope {
    let next = current().with(key, value);
    with_context(next)
}

/// Replace the calling thread's context until the scope ends.
pub fn with_context(context: DiagnosticContext) -> DiagnosticScope {
    let previous = CURRENT.with(|c| std::mem::replace(&mut *c.borrow_mut(), context));
    DiagnosticScope {
        previous: Some(previous),
        _not_send: PhantomData,
    }
}
