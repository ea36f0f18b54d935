//! # Callback registries
//!
//! Transactions report upward through per-event registries. Events emitted
//! while no handler is registered are buffered into a bounded pending
//! queue and replayed to the first handler that registers, so a late
//! subscriber never loses an event (an ACK arriving before the application
//! installs its handler being the canonical case). Delivery iterates a
//! snapshot of the handler list taken under the lock.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

const PENDING_CAPACITY: usize = 32;

type Handler<E> = Arc<dyn Fn(E) + Send + Sync>;

struct RegistryInner<E> {
    handlers: Vec<Handler<E>>,
    pending: VecDeque<E>,
}

/// A handler list with a pending buffer for one event kind.
pub struct CallbackRegistry<E> {
    inner: Mutex<RegistryInner<E>>,
}

impl<E> Default for CallbackRegistry<E> {
    fn default() -> Self {
        CallbackRegistry {
            inner: Mutex::new(RegistryInner {
                handlers: Vec::new(),
                pending: VecDeque::new(),
            }),
        }
    }
}

impl<E: Clone> CallbackRegistry<E> {
    /// Registers a handler. Any buffered events are drained to it first,
    /// in emission order.
    pub fn on(&self, handler: impl Fn(E) + Send + Sync + 'static) {
        let handler: Handler<E> = Arc::new(handler);
        let backlog: Vec<E> = {
            let mut inner = self.inner.lock();
            let backlog = inner.pending.drain(..).collect();
            inner.handlers.push(Arc::clone(&handler));
            backlog
        };
        for event in backlog {
            handler(event);
        }
    }

    /// Delivers an event to every handler, or buffers it when none is
    /// registered yet. The oldest buffered event is dropped once the
    /// buffer is full.
    pub fn emit(&self, event: E) {
        let handlers: Vec<Handler<E>> = {
            let mut inner = self.inner.lock();
            if inner.handlers.is_empty() {
                if inner.pending.len() >= PENDING_CAPACITY {
                    inner.pending.pop_front();
                }
                inner.pending.push_back(event);
                return;
            }
            inner.handlers.clone()
        };
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// True when at least one handler is registered.
    pub fn has_handlers(&self) -> bool {
        !self.inner.lock().handlers.is_empty()
    }
}
