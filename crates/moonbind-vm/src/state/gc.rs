//! Finalization and shutdown
//!
//! Memory is reference counted, so a value is reclaimed as soon as its last
//! handle disappears and a userdata deleter runs from `Drop`. The `__gc`
//! metamethod needs the VM, though: userdata whose metatable carries `__gc`
//! are kept on a finalizer list and finalized by [`State::collect_garbage`]
//! once the list holds their only handle.
//!
//! Reference cycles between VM objects are not detected; [`State::close`]
//! finalizes everything still registered and clears the registry and the
//! globals so that cycles through them are broken.

use tracing::{debug, warn};

use super::{State, Status};
use crate::userdata::UserdataRef;
use crate::value::Value;

impl State {
    pub(super) fn register_finalizer(&self, ud: &UserdataRef) {
        if ud.mark_finalizable() {
            self.0.global.finalizers.borrow_mut().push(ud.clone());
        }
    }

    /// Finalize every unreachable userdata with a `__gc` metamethod
    ///
    /// Returns the number of blocks finalized. Errors raised by finalizers
    /// are logged and otherwise ignored.
    pub fn collect_garbage(&self) -> usize {
        let mut finalized = 0;
        loop {
            let ready: Vec<UserdataRef> = {
                let mut list = self.0.global.finalizers.borrow_mut();
                let (ready, keep) = std::mem::take(&mut *list)
                    .into_iter()
                    .partition(|ud| ud.handle_count() == 1);
                *list = keep;
                ready
            };
            if ready.is_empty() {
                break;
            }
            // Newest first, matching reverse creation order.
            for ud in ready.into_iter().rev() {
                self.finalize(ud);
                finalized += 1;
            }
        }
        if finalized > 0 {
            debug!(finalized, "collected userdata");
        }
        finalized
    }

    fn finalize(&self, ud: UserdataRef) {
        let gc = self.metafield(&Value::Userdata(ud.clone()), "__gc");
        if gc.is_nil() {
            return;
        }
        self.push_value(gc);
        self.push_value(Value::Userdata(ud));
        if self.pcall(1, Some(0), 0) != Status::Ok {
            let err = self.pop_value();
            let message = self
                .to_display_string(&err)
                .map(|s| s.to_string_lossy())
                .unwrap_or_default();
            warn!(error = %message, "error in __gc metamethod");
        }
    }

    /// Shut the instance down
    ///
    /// Runs every pending finalizer regardless of reachability, then drops
    /// the contents of the registry, the globals and every thread stack.
    /// Later calls are no-ops.
    pub fn close(&self) {
        let global = &self.0.global;
        if global.closed.get() {
            return;
        }
        loop {
            let pending = std::mem::take(&mut *global.finalizers.borrow_mut());
            if pending.is_empty() {
                break;
            }
            for ud in pending.into_iter().rev() {
                self.finalize(ud);
            }
        }
        global.closed.set(true);

        let threads: Vec<_> = global
            .threads
            .borrow_mut()
            .drain(..)
            .filter_map(|t| t.upgrade())
            .collect();
        for thread in &threads {
            thread.stack.borrow_mut().clear();
            thread.continuation.borrow_mut().take();
        }

        let anchored: Vec<Value> = {
            let registry = global.registry.borrow();
            registry.pairs().map(|(_, v)| v.clone()).collect()
        };
        global.registry.borrow_mut().clear();
        global.globals.borrow_mut().clear();
        // Metatables commonly point at themselves through `__index`.
        for value in anchored {
            if let Value::Table(t) = value {
                if !t.ptr_eq(&global.globals) {
                    t.borrow_mut().clear();
                }
            }
        }
        let data = std::mem::take(&mut *global.app_data.borrow_mut());
        drop(data);
        debug!(threads = threads.len(), "vm closed");
    }
}
