//! # Pulse Hooks
//!
//! Persistent, call-site keyed storage for callbacks that run once per frame.
//!
//! A [`HookRuntime`] keeps a stack of execution frames. Code running inside a
//! frame can ask for a storage cell with [`HookRuntime::use_hook_state`]; the
//! cell is keyed by the source location of the call (captured with
//! `#[track_caller]`) plus an optional [`Discriminator`], so the same line of
//! code gets the same cell back every frame.
//!
//! When a frame finishes, every cell of its [`HookNode`] that was not touched
//! during that frame is cleaned up. A cleanup callback may veto destruction
//! by returning `true`, in which case it is asked again after the next frame.
//!
//! ## Example
//!
//! ```
//! use pulse_hooks::{FrameState, HookNode, HookRuntime};
//!
//! let mut runtime = HookRuntime::new();
//! let mut node = HookNode::new();
//!
//! for expected in 1..=3 {
//!     let count = runtime.start(&mut node, FrameState::default(), |hooks| {
//!         let count = hooks.use_hook_state::<u32>(None);
//!         *count += 1;
//!         *count
//!     });
//!     assert_eq!(count, expected);
//! }
//! ```
//!
//! The [`utils`] module builds on this with throttling, delta time and event
//! draining hooks, and [`Signal`] is a small in-process event source.

mod key;
mod runtime;
mod signal;
pub mod utils;

pub use key::{Discriminator, HookKey};
pub use runtime::{FrameState, HookNode, HookRuntime};
pub use signal::{Connection, EventSource, Signal, SourceId};
pub use utils::{use_delta_time, use_event, use_throttle};
