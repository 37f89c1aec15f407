//! Frame stack and hook cell storage.

use core::any::Any;
use core::fmt;
use core::panic::Location;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use tracing::{trace, warn};

use crate::key::{Discriminator, HookKey};

type Cleanup = Box<dyn FnMut(&mut (dyn Any + Send)) -> bool + Send>;
type CellMap = HashMap<HookKey, Cell, FxBuildHasher>;

/// Context handed to every hook call made inside a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameState {
    /// Time elapsed since the previous frame of the same driver.
    pub delta_time: Duration,
    /// Flips every frame.
    pub generation: bool,
}

struct Cell {
    value: Box<dyn Any + Send>,
    cleanup: Option<Cleanup>,
}

impl Cell {
    fn new<T: Send + 'static>(value: T, cleanup: Option<Cleanup>) -> Self {
        Self {
            value: Box::new(value),
            cleanup,
        }
    }
}

/// The persistent hook storage of one frame-sequence subject (for example a
/// system). Pass the same node to every [`HookRuntime::start`] call for that
/// subject.
#[derive(Default)]
pub struct HookNode {
    cells: CellMap,
}

impl HookNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl fmt::Debug for HookNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookNode")
            .field("cells", &self.cells.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Frame {
    state: FrameState,
    cells: CellMap,
    touched: FxHashSet<HookKey>,
    ordinals: FxHashMap<&'static Location<'static>, u32>,
}

impl Frame {
    fn new(state: FrameState, cells: CellMap) -> Self {
        Self {
            state,
            cells,
            touched: FxHashSet::default(),
            ordinals: FxHashMap::default(),
        }
    }

    /// Run cleanup for every untouched cell and hand the survivors back.
    fn finish(mut self) -> CellMap {
        let touched = &self.touched;
        self.cells.retain(|key, cell| {
            if touched.contains(key) {
                return true;
            }

            let keep = cell
                .cleanup
                .as_mut()
                .is_some_and(|cleanup| cleanup(cell.value.as_mut()));

            if keep {
                trace!(cell = ?key, "hook cell kept by cleanup");
            } else {
                trace!(cell = ?key, "hook cell dropped");
            }
            keep
        });
        self.cells
    }
}

/// Stack of execution frames.
///
/// Owned by whatever drives the frames (usually the scheduler), and passed
/// by `&mut` to the code running inside them.
#[derive(Default)]
pub struct HookRuntime {
    stack: Vec<Frame>,
}

impl HookRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames currently open.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn in_frame(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Open a frame over `node`, run `body`, then clean up every cell of
    /// `node` that `body` did not touch.
    ///
    /// The node's cells are restored even if `body` panics; the panic is
    /// resumed afterwards.
    pub fn start<R>(
        &mut self,
        node: &mut HookNode,
        state: FrameState,
        body: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let cells = core::mem::take(&mut node.cells);
        self.stack.push(Frame::new(state, cells));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self)));

        if let Some(frame) = self.stack.pop() {
            node.cells = frame.finish();
        }

        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Context of the innermost frame.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a frame.
    #[must_use]
    pub fn use_frame_state(&self) -> FrameState {
        self.stack
            .last()
            .map(|frame| frame.state)
            .expect("use_frame_state called outside of a frame")
    }

    /// Persistent cell for the calling site, created with `T::default()`.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a frame.
    #[track_caller]
    pub fn use_hook_state<T>(&mut self, discriminator: Option<Discriminator>) -> &mut T
    where
        T: Default + Send + 'static,
    {
        self.cell(Location::caller(), discriminator, T::default, None)
    }

    /// Persistent cell for the calling site, created with `init` on first
    /// access.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a frame.
    #[track_caller]
    pub fn use_hook_state_with<T>(
        &mut self,
        discriminator: Option<Discriminator>,
        init: impl FnOnce() -> T,
    ) -> &mut T
    where
        T: Send + 'static,
    {
        self.cell(Location::caller(), discriminator, init, None)
    }

    /// Like [`use_hook_state_with`](Self::use_hook_state_with), with a
    /// cleanup callback that runs after any frame in which the cell was not
    /// touched. Returning `true` from `cleanup` keeps the cell alive for
    /// another frame.
    ///
    /// Only the `cleanup` given when the cell is created is recorded.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a frame.
    #[track_caller]
    pub fn use_hook_state_with_cleanup<T, F>(
        &mut self,
        discriminator: Option<Discriminator>,
        init: impl FnOnce() -> T,
        mut cleanup: F,
    ) -> &mut T
    where
        T: Send + 'static,
        F: FnMut(&mut T) -> bool + Send + 'static,
    {
        let erased: Cleanup = Box::new(move |value: &mut (dyn Any + Send)| {
            value.downcast_mut::<T>().is_some_and(&mut cleanup)
        });
        self.cell(Location::caller(), discriminator, init, Some(erased))
    }

    fn cell<T: Send + 'static>(
        &mut self,
        location: &'static Location<'static>,
        discriminator: Option<Discriminator>,
        init: impl FnOnce() -> T,
        cleanup: Option<Cleanup>,
    ) -> &mut T {
        let frame = self
            .stack
            .last_mut()
            .expect("hook state used outside of a frame");

        let discriminator = discriminator.unwrap_or_else(|| {
            let ordinal = frame.ordinals.entry(location).or_insert(0);
            let discriminator = Discriminator::Ordinal(*ordinal);
            *ordinal += 1;
            discriminator
        });

        let key = HookKey::new(location, discriminator);
        frame.touched.insert(key);

        let cell = match frame.cells.entry(key) {
            Entry::Occupied(entry) => {
                let cell = entry.into_mut();
                if !cell.value.is::<T>() {
                    warn!(cell = ?key, "hook state type changed between frames, reinitialising");
                    *cell = Cell::new(init(), cleanup);
                }
                cell
            }
            Entry::Vacant(entry) => entry.insert(Cell::new(init(), cleanup)),
        };

        cell.value
            .downcast_mut::<T>()
            .expect("hook cell holds the requested type")
    }
}

impl fmt::Debug for HookRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRuntime")
            .field("depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}
