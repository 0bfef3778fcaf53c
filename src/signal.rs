//! Ordered observer lists.
//!
//! Handlers run in the order they were connected. Emitting works on a
//! snapshot, so a handler may connect or disconnect others (including
//! itself) without invalidating the iteration.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static HANDLER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returned by every `connect_*` method; pass it to the matching
/// `disconnect` to remove the handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub struct Signal<F: ?Sized> {
    handlers: RefCell<Vec<(HandlerId, Rc<F>)>>,
}

impl<F: ?Sized> Default for Signal<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> Signal<F> {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
        }
    }

    pub fn connect(&self, handler: Rc<F>) -> HandlerId {
        let id = HandlerId(HANDLER_ID_COUNTER.fetch_add(1, Ordering::Relaxed));
        self.handlers.borrow_mut().push((id, handler));
        id
    }

    /// Returns false if no handler with this id is connected here.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// The connected handlers, in connection order.
    pub fn snapshot(&self) -> Vec<Rc<F>> {
        self.handlers
            .borrow()
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Handler = dyn Fn(i32);

    #[test]
    fn test_handlers_run_in_connection_order() {
        let signal: Signal<Handler> = Signal::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let l = log.clone();
            signal.connect(Rc::new(move |v: i32| l.borrow_mut().push(format!("{tag}{v}"))));
        }
        for h in signal.snapshot() {
            h(1);
        }
        assert_eq!(*log.borrow(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_disconnect() {
        let signal: Signal<Handler> = Signal::new();
        let first = signal.connect(Rc::new(|_: i32| {}));
        let second = signal.connect(Rc::new(|_: i32| {}));
        assert_ne!(first, second);

        assert!(signal.disconnect(first));
        assert!(!signal.disconnect(first));
        assert_eq!(signal.len(), 1);
        assert!(signal.disconnect(second));
        assert!(signal.is_empty());
    }
}
