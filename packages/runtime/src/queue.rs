//! The deferred call queue: breadth-first dispatch across cooperative ticks.
//!
//! Two FIFO queues give the ordering guarantee. A send always lands on the
//! auxiliary queue; [`Runtime::tick`] merges the auxiliary queue onto the
//! front of the main queue whenever the main queue runs dry and keeps
//! popping until both are empty. Messages enqueued while a round drains
//! therefore run only after every message of the current round, which is
//! exactly breadth-first order across nested deferrals.

use std::cell::RefCell;
use std::rc::Rc;

use capsula_core::{Args, Error, Result, Value};

use crate::context::ContextToken;
use crate::dispatch::call_target;
use crate::unit::{Dir, PortId, Runtime};

/// A deferred call waiting in the queue.
pub(crate) struct Message {
    pub port: PortId,
    pub args: Args,
    pub ctx: ContextToken,
    pub slot: Pending,
}

enum PendingState {
    Waiting,
    Resolved(Value),
    Rejected(Error),
}

/// The settleable result handle of a deferred call.
///
/// Cheap to clone; every clone observes the same settlement. A deferred
/// fault rejects the handle instead of going through fault delegation -
/// by the time the queue drains there is no synchronous caller left to
/// delegate on behalf of.
#[derive(Clone)]
pub struct Pending {
    state: Rc<RefCell<PendingState>>,
}

impl Pending {
    fn waiting() -> Pending {
        Pending {
            state: Rc::new(RefCell::new(PendingState::Waiting)),
        }
    }

    /// Whether the call has run.
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), PendingState::Waiting)
    }

    /// The result value, once resolved.
    pub fn value(&self) -> Option<Value> {
        match &*self.state.borrow() {
            PendingState::Resolved(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// The fault, once rejected.
    pub fn error(&self) -> Option<Error> {
        match &*self.state.borrow() {
            PendingState::Rejected(e) => Some(e.clone()),
            _ => None,
        }
    }

    fn resolve(&self, value: Value) {
        *self.state.borrow_mut() = PendingState::Resolved(value);
    }

    fn reject(&self, err: Error) {
        *self.state.borrow_mut() = PendingState::Rejected(err);
    }
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.borrow() {
            PendingState::Waiting => "waiting".to_string(),
            PendingState::Resolved(v) => format!("resolved({})", v),
            PendingState::Rejected(e) => format!("rejected({})", e),
        };
        f.debug_tuple("Pending").field(&state).finish()
    }
}

impl Runtime {
    /// Defer a port call to the next tick. The access check runs now,
    /// against the current context; the dispatch itself runs later with
    /// the check bypassed, since the call already crossed the boundary.
    pub fn send(&mut self, target: &str, args: Args) -> Result<Pending> {
        let ep = call_target(target)?;
        let base = self.current();
        let unit = self.endpoint_unit(base, &ep)?;
        let port = self
            .find_port(unit, &ep.name)
            .ok_or_else(|| Error::ElementNotFound {
                name: ep.to_string(),
            })?;
        match self.port_dir(port) {
            Dir::In => self.check_self_or_child(unit, &ep.name)?,
            Dir::Out => self.check_owner_exact(unit, &ep.name)?,
        }

        let slot = Pending::waiting();
        self.aux.push_back(Message {
            port,
            args,
            ctx: self.capture_context(),
            slot: slot.clone(),
        });
        tracing::trace!(target = %ep, queued = self.aux.len(), "deferred call");
        Ok(slot)
    }

    /// One cooperative tick: drain the queues breadth-first, settling every
    /// pending handle, then run the end-of-tick callbacks once.
    pub fn tick(&mut self) {
        tracing::trace!(waiting = self.aux.len(), "tick");
        loop {
            if self.main.is_empty() {
                if self.aux.is_empty() {
                    break;
                }
                // Merge the freshly enqueued round onto the front of the
                // main queue, preserving relative order.
                std::mem::swap(&mut self.main, &mut self.aux);
            }
            if let Some(msg) = self.main.pop_front() {
                self.deliver(msg);
            }
        }

        let mut callbacks = std::mem::take(&mut self.tick_callbacks);
        for (_, callback) in callbacks.iter_mut() {
            callback(self);
        }
        // Callbacks registered during the run joined the live list; keep
        // registration order.
        callbacks.append(&mut self.tick_callbacks);
        self.tick_callbacks = callbacks;
    }

    fn deliver(&mut self, msg: Message) {
        let Message {
            port,
            args,
            ctx,
            slot,
        } = msg;
        let out = self.run_captured(ctx, |rt| rt.dispatch_port(port, args));
        match out {
            Ok(value) => slot.resolve(value),
            Err(err) => {
                tracing::debug!(code = err.code(), "deferred call rejected");
                slot.reject(err);
            }
        }
    }

    /// Whether another tick would do any work.
    pub fn has_pending_work(&self) -> bool {
        !self.main.is_empty() || !self.aux.is_empty()
    }

    /// Register a callback to run at the end of every tick. Returns a
    /// token for [`Runtime::off_tick_end`].
    pub fn on_tick_end(&mut self, callback: impl FnMut(&mut Runtime) + 'static) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.tick_callbacks.push((token, Box::new(callback)));
        token
    }

    /// Remove a previously registered end-of-tick callback.
    pub fn off_tick_end(&mut self, token: u64) {
        self.tick_callbacks.retain(|(t, _)| *t != token);
    }
}
