//! In-process event source.

use core::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

static NEXT_SOURCE_ID: AtomicUsize = AtomicUsize::new(0);

type Handler<E> = Arc<Mutex<Box<dyn FnMut(&E) + Send>>>;

/// Identity of an event source, used by hooks to notice when the observed
/// source changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(usize);

impl SourceId {
    /// A fresh id, never handed out before in this process.
    #[must_use]
    pub fn unique() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Anything that can deliver events of type `E` to connected handlers.
pub trait EventSource<E> {
    /// Stable identity of this source.
    fn source_id(&self) -> SourceId;

    /// Connect a type-erased handler.
    fn connect_boxed(&self, handler: Box<dyn FnMut(&E) + Send>) -> Connection;
}

/// Handle to a connected handler.
///
/// Dropping a connection leaves the handler connected; call
/// [`disconnect`](Self::disconnect) to remove it.
pub struct Connection {
    disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl Connection {
    pub fn new(disconnect: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disconnect: Some(Box::new(disconnect)),
        }
    }

    /// A connection that is not attached to anything.
    #[must_use]
    pub fn detached() -> Self {
        Self { disconnect: None }
    }

    pub fn disconnect(mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("attached", &self.disconnect.is_some())
            .finish()
    }
}

struct Slots<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// A list of handlers that are all called whenever the signal fires.
///
/// Cloning a signal yields another handle to the same handler list.
///
/// Handlers are invoked without holding the list lock, so a handler may
/// connect or disconnect (including itself). A handler must not fire the
/// signal it is connected to.
pub struct Signal<E> {
    id: SourceId,
    slots: Arc<Mutex<Slots<E>>>,
}

impl<E: 'static> Signal<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SourceId::unique(),
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    pub fn connect<F>(&self, handler: F) -> Connection
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.connect_boxed(Box::new(handler))
    }

    /// Call every connected handler with `event`, in connection order.
    pub fn fire(&self, event: &E) {
        let handlers: SmallVec<[Handler<E>; 4]> = self
            .slots
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            let mut guard = handler.lock();
            let handler = &mut **guard;
            handler(event);
        }
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.slots.lock().handlers.len()
    }
}

impl<E: 'static> EventSource<E> for Signal<E> {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn connect_boxed(&self, handler: Box<dyn FnMut(&E) + Send>) -> Connection {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.handlers.push((id, Arc::new(Mutex::new(handler))));
            id
        };

        let slots: Weak<Mutex<Slots<E>>> = Arc::downgrade(&self.slots);
        Connection::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots.lock().handlers.retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }
}

impl<E: 'static> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Signal<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.slots.lock().handlers.len())
            .finish()
    }
}
