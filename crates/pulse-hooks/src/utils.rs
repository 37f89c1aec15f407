//! Hooks built on top of [`HookRuntime`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::key::Discriminator;
use crate::runtime::HookRuntime;
use crate::signal::{Connection, EventSource, SourceId};

/// Time elapsed since the previous frame.
///
/// # Panics
///
/// Panics when called outside of a frame.
#[must_use]
pub fn use_delta_time(hooks: &HookRuntime) -> Duration {
    hooks.use_frame_state().delta_time
}

#[derive(Default)]
struct Throttle {
    expiry: Option<Instant>,
}

impl Throttle {
    fn poll(&mut self, now: Instant, interval: Duration) -> bool {
        match self.expiry {
            Some(expiry) if now < expiry => false,
            _ => {
                self.expiry = Some(now + interval);
                true
            }
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.expiry.is_none_or(|expiry| now >= expiry)
    }
}

/// Returns `true` at most once per `interval` for this call site and
/// discriminator.
///
/// The throttle outlives frames in which it is not called until its interval
/// has expired, so skipping a frame does not reset it early.
///
/// # Panics
///
/// Panics when called outside of a frame.
#[track_caller]
pub fn use_throttle(
    hooks: &mut HookRuntime,
    interval: Duration,
    discriminator: Option<Discriminator>,
) -> bool {
    let throttle = hooks.use_hook_state_with_cleanup(discriminator, Throttle::default, |throttle| {
        !throttle.expired(Instant::now())
    });
    throttle.poll(Instant::now(), interval)
}

struct EventQueue<E> {
    source: Option<SourceId>,
    queue: Arc<Mutex<VecDeque<E>>>,
    connection: Option<Connection>,
}

impl<E> EventQueue<E> {
    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
        self.source = None;
        self.queue.lock().clear();
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            source: None,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            connection: None,
        }
    }
}

/// Drain the events `source` delivered since this call site last ran.
///
/// The first call connects to `source`; events fired before that are not
/// seen. Passing a different source from the same call site disconnects
/// from the old one and starts a fresh queue. The connection is dropped once
/// the call site stops running.
///
/// # Panics
///
/// Panics when called outside of a frame.
#[track_caller]
pub fn use_event<E, S>(
    hooks: &mut HookRuntime,
    source: &S,
    discriminator: Option<Discriminator>,
) -> Vec<E>
where
    E: Clone + Send + 'static,
    S: EventSource<E> + ?Sized,
{
    let state = hooks.use_hook_state_with_cleanup(discriminator, EventQueue::<E>::default, |state| {
        state.disconnect();
        false
    });

    let id = source.source_id();
    if state.source != Some(id) {
        state.disconnect();
        let sink = Arc::clone(&state.queue);
        state.connection = Some(source.connect_boxed(Box::new(move |event: &E| {
            sink.lock().push_back(event.clone());
        })));
        state.source = Some(id);
    }

    state.queue.lock().drain(..).collect()
}
