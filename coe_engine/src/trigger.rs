// Named notifications with explicit add/remove/fire and one-time teardown.
//
// `Trigger<T>` is the observer list every engine and coe object uses to
// publish events (`on_update`, `on_message`, `on_action_receive`, ...).
// Execution is single-threaded, so handlers are `Rc<dyn Fn(&T)>` and the
// list lives in a `RefCell`.
//
// `fire` snapshots the handler list before calling anything. Handlers can
// therefore re-enter freely: add or remove handlers (including themselves),
// fire other triggers, or destroy the owning object. Handlers added during a
// fire first run on the next fire. `add_once` handlers are dropped from the
// list at snapshot time, so they run exactly once even if the trigger is
// re-fired from inside their own body.
//
// `destroy` clears the list and is irreversible. Firing a destroyed trigger
// is a no-op. Adding to one, or destroying it again, is an error.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{EngineError, EngineResult};

/// Identifies one registration on a trigger, for `remove`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type Handler<T> = Rc<dyn Fn(&T)>;

struct Entry<T> {
    id: HandlerId,
    once: bool,
    handler: Handler<T>,
}

pub struct Trigger<T> {
    entries: RefCell<Vec<Entry<T>>>,
    next_id: Cell<u64>,
    destroyed: Cell<bool>,
}

impl<T> Default for Trigger<T> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            destroyed: Cell::new(false),
        }
    }
}

impl<T> fmt::Debug for Trigger<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("handlers", &self.entries.borrow().len())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

impl<T> Trigger<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that runs on every fire.
    pub fn add(&self, handler: impl Fn(&T) + 'static) -> EngineResult<HandlerId> {
        self.push(false, Rc::new(handler))
    }

    /// Register a handler that runs on the next fire only.
    pub fn add_once(&self, handler: impl Fn(&T) + 'static) -> EngineResult<HandlerId> {
        self.push(true, Rc::new(handler))
    }

    fn push(&self, once: bool, handler: Handler<T>) -> EngineResult<HandlerId> {
        if self.destroyed.get() {
            return Err(EngineError::TriggerDestroyed);
        }
        let id = HandlerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.entries.borrow_mut().push(Entry { id, once, handler });
        Ok(id)
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.entries.borrow().iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Call every registered handler, in registration order.
    pub fn fire(&self, arg: &T) {
        if self.destroyed.get() {
            return;
        }
        let snapshot: Vec<Handler<T>> = {
            let mut entries = self.entries.borrow_mut();
            let handlers = entries.iter().map(|e| e.handler.clone()).collect();
            entries.retain(|e| !e.once);
            handlers
        };
        for handler in snapshot {
            handler(arg);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Drop all handlers and refuse further registrations.
    pub fn destroy(&self) -> EngineResult<()> {
        if self.destroyed.replace(true) {
            return Err(EngineError::AlreadyDestroyed("trigger"));
        }
        self.entries.borrow_mut().clear();
        Ok(())
    }
}
