// The controller: the authoritative side of the action/command protocol.
//
// Views send actions; the active instance's event filter turns them into
// `on_action_receive` notifications on the controller. The controller
// answers by `broadcast`ing commands, which only land in its buffer. The
// filter pass or the manual-tick update pulse drains the buffer (see
// `scene.rs`), so broadcasting never emits anything by itself.
//
// Controllers only do work on the active instance. Passive instances build
// one too (applications are written once for every instance), but the
// engine never runs their filter or update pulse.
//
// Lifecycle is `Live -> Destroyed`, one way. After `destroy`, every method
// that touches the buffer, the timers or the pulses returns
// `CoeError::Destroyed`, and a second `destroy` returns
// `CoeError::AlreadyDestroyed`. Only the read-only queries keep answering.

use std::cell::{Cell, RefCell};

use coe_engine::{TimerId, TimerManager, Trigger};
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::action::Action;
use crate::error::{CoeError, CoeResult};

/// A buffered command awaiting delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastEntry {
    pub data: Value,
    pub priority: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Live,
    Destroyed,
}

/// Anything a COE scene can be driven by.
pub trait Controller {
    fn base(&self) -> &BaseController;
}

pub struct BaseController {
    locked: Cell<bool>,
    buffer: RefCell<Vec<BroadcastEntry>>,
    timers: TimerManager,
    lifecycle: Cell<Lifecycle>,
    pub on_load: Trigger<()>,
    pub on_update: Trigger<()>,
    pub on_action_receive: Trigger<Action>,
}

impl Default for BaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for BaseController {
    fn base(&self) -> &BaseController {
        self
    }
}

impl BaseController {
    pub fn new() -> Self {
        Self {
            locked: Cell::new(false),
            buffer: RefCell::new(Vec::new()),
            timers: TimerManager::new(),
            lifecycle: Cell::new(Lifecycle::Live),
            on_load: Trigger::new(),
            on_update: Trigger::new(),
            on_action_receive: Trigger::new(),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.get() == Lifecycle::Destroyed
    }

    fn ensure_live(&self) -> CoeResult<()> {
        match self.lifecycle.get() {
            Lifecycle::Live => Ok(()),
            Lifecycle::Destroyed => Err(CoeError::Destroyed("controller")),
        }
    }

    /// Queue a command for every view. Delivered with the next drain.
    pub fn broadcast<C: Serialize + ?Sized>(&self, data: &C, priority: i32) -> CoeResult<()> {
        self.ensure_live()?;
        let data = serde_json::to_value(data)?;
        trace!(priority, "command buffered");
        self.buffer
            .borrow_mut()
            .push(BroadcastEntry { data, priority });
        Ok(())
    }

    /// Take every buffered command, or `None` when there are none.
    pub fn take_broadcast_buffer(&self) -> CoeResult<Option<Vec<BroadcastEntry>>> {
        self.ensure_live()?;
        let mut buffer = self.buffer.borrow_mut();
        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut *buffer)))
        }
    }

    pub fn pending_broadcasts(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// While set, the event filter holds incoming message events back
    /// instead of delivering them as actions.
    pub fn is_processing_locked(&self) -> bool {
        self.locked.get()
    }

    pub(crate) fn set_processing_locked(&self, locked: bool) {
        self.locked.set(locked);
    }

    // -----------------------------------------------------------------------
    // Timers, in update pulses of this controller
    // -----------------------------------------------------------------------

    pub fn set_timeout(&self, callback: impl Fn() + 'static, pulses: u64) -> CoeResult<TimerId> {
        self.ensure_live()?;
        Ok(self.timers.set_timeout(callback, pulses)?)
    }

    pub fn set_interval(&self, callback: impl Fn() + 'static, pulses: u64) -> CoeResult<TimerId> {
        self.ensure_live()?;
        Ok(self.timers.set_interval(callback, pulses)?)
    }

    pub fn clear_timeout(&self, id: TimerId) -> CoeResult<bool> {
        self.ensure_live()?;
        Ok(self.timers.clear_timeout(id))
    }

    pub fn clear_interval(&self, id: TimerId) -> CoeResult<bool> {
        self.ensure_live()?;
        Ok(self.timers.clear_interval(id))
    }

    // -----------------------------------------------------------------------
    // Pulses driven by the scene
    // -----------------------------------------------------------------------

    /// One update pulse: timers first, then `on_update`.
    pub fn update(&self) -> CoeResult<()> {
        self.ensure_live()?;
        self.timers.pulse();
        self.on_update.fire(&());
        Ok(())
    }

    pub fn load(&self) -> CoeResult<()> {
        self.ensure_live()?;
        self.on_load.fire(&());
        Ok(())
    }

    /// Release notifications, timers and buffered commands.
    pub fn destroy(&self) -> CoeResult<()> {
        if self.lifecycle.replace(Lifecycle::Destroyed) == Lifecycle::Destroyed {
            return Err(CoeError::AlreadyDestroyed("controller"));
        }
        self.on_update.destroy()?;
        self.on_load.destroy()?;
        self.on_action_receive.destroy()?;
        self.timers.destroy()?;
        self.buffer.borrow_mut().clear();
        self.locked.set(false);
        Ok(())
    }
}
