//! Tick sources that drive a loop.

use pulse_hooks::{Connection, Signal};

/// Step function a loop hands to a tick source.
pub type StepFn = Box<dyn FnMut() + Send>;

/// Something that calls a step function once per tick.
pub trait TickSource {
    fn subscribe(&self, step: StepFn) -> Box<dyn TickHandle>;
}

/// Subscription returned by [`TickSource::subscribe`].
pub trait TickHandle: Send {
    fn unsubscribe(self: Box<Self>);
}

/// Any signal can tick a loop; its payload is ignored.
impl<E: 'static> TickSource for Signal<E> {
    fn subscribe(&self, mut step: StepFn) -> Box<dyn TickHandle> {
        Box::new(self.connect(move |_: &E| step()))
    }
}

impl TickHandle for Connection {
    fn unsubscribe(self: Box<Self>) {
        self.disconnect();
    }
}
