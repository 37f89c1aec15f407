//! # Pulse Loop
//!
//! Tick-driven system scheduler.
//!
//! A [`Loop`] owns the state its systems run against. Each [`System`] is a
//! callback `FnMut(&mut HookRuntime, &mut S)` with an event, a priority and
//! a list of systems it must run after. [`Loop::begin`] subscribes one step
//! function per event to a [`TickSource`]; every tick runs that event's
//! systems in order, each in its own hook frame so hooks called from a
//! system body keep their state between ticks.
//!
//! A system that returns an error or panics does not stop the others.
//! Failures are logged through `tracing`, each distinct message at most once
//! per [`LoopConfig::error_window`].
//!
//! ## Ordering
//!
//! Within an event systems run by ascending priority, then by name, except
//! that a system never runs before the systems it is declared to run
//! after. A dependency that can never be satisfied (a cycle, or a system of
//! another event) makes scheduling fail with [`LoopError::Unschedulable`].

mod config;
mod error;
mod report;
mod schedule;
mod scheduler;
mod system;
mod tick;

pub use config::{DEFAULT_EVENT, LoopConfig};
pub use error::{LoopError, LoopResult, SystemFailure};
pub use report::ErrorReporter;
pub use scheduler::{Loop, Middleware, TickHandles};
pub use system::{IntoSystemResult, System, SystemDescriptor, SystemId};
pub use tick::{StepFn, TickHandle, TickSource};
