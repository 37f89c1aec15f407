//! The [`Loop`]: owns the state systems run against and steps them on ticks.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use pulse_hooks::{FrameState, HookNode, HookRuntime};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, trace_span};

use crate::config::LoopConfig;
use crate::error::{LoopError, LoopResult};
use crate::report::ErrorReporter;
use crate::schedule::order_systems;
use crate::system::{System, SystemId};
use crate::tick::{StepFn, TickHandle, TickSource};

/// Wraps the step function of one event. Receives the event name.
pub type Middleware = Box<dyn Fn(StepFn, &str) -> StepFn + Send + Sync>;

/// Handles returned by [`Loop::begin`], keyed by event.
pub type TickHandles = FxHashMap<String, Box<dyn TickHandle>>;

struct LoopCore<S> {
    state: S,
    config: LoopConfig,
    /// Registration order.
    systems: Vec<System<S>>,
    order: FxHashMap<String, Vec<System<S>>>,
    nodes: FxHashMap<SystemId, HookNode>,
    /// Replaced system -> replacement, for resolving `after` lists.
    redirects: FxHashMap<SystemId, SystemId>,
    runtime: HookRuntime,
    reporter: ErrorReporter,
}

impl<S> LoopCore<S> {
    fn event_of<'a>(&'a self, system: &'a System<S>) -> &'a str {
        system.event().unwrap_or(&self.config.default_event)
    }

    /// Follow redirects from `id`. Gives up after one hop per redirect, so a
    /// stale cycle cannot hang ordering.
    fn resolve(&self, mut id: SystemId) -> SystemId {
        for _ in 0..self.redirects.len() {
            match self.redirects.get(&id) {
                Some(&next) if next != id => id = next,
                _ => break,
            }
        }
        id
    }

    fn reorder(&mut self) -> LoopResult<()> {
        let mut grouped: FxHashMap<String, Vec<System<S>>> = FxHashMap::default();
        for system in &self.systems {
            grouped
                .entry(self.event_of(system).to_owned())
                .or_default()
                .push(system.clone());
        }

        let mut order = FxHashMap::default();
        for (event, systems) in grouped {
            let ordered = order_systems(&event, &systems, |id| self.resolve(id))?;
            debug!(
                event = %event,
                systems = ?ordered.iter().map(System::name).collect::<Vec<_>>(),
                "ordered systems"
            );
            order.insert(event, ordered);
        }

        self.order = order;
        Ok(())
    }

    fn run_event(&mut self, event: &str, frame: FrameState) {
        let Self {
            state,
            order,
            nodes,
            runtime,
            reporter,
            ..
        } = self;

        let Some(systems) = order.get(event) else {
            return;
        };

        for system in systems {
            let _span = trace_span!("system", system = system.name(), event).entered();
            let node = nodes.entry(system.id()).or_default();

            let result = runtime.start(node, frame, |hooks| system.run(hooks, state));
            if let Err(failure) = result {
                reporter.report(system.id(), system.name(), &failure);
            }
        }
    }
}

/// Scheduler that runs systems against shared state `S` whenever the tick
/// source of their event fires.
///
/// ```
/// use pulse_hooks::Signal;
/// use pulse_loop::{Loop, System, SystemDescriptor};
///
/// let game = Loop::new(Vec::<String>::new());
/// let input = System::new(|_, log: &mut Vec<String>| log.push("input".into()));
/// let physics = SystemDescriptor::new(|_, log: &mut Vec<String>| log.push("physics".into()))
///     .after(&input)
///     .build();
/// game.schedule_systems([physics, input]).unwrap();
///
/// let heartbeat = Signal::<()>::new();
/// let handles = game.begin([("Default", &heartbeat)]);
/// heartbeat.fire(&());
/// game.end(handles);
///
/// assert_eq!(*game.state(), ["input", "physics"]);
/// ```
pub struct Loop<S> {
    core: Arc<Mutex<LoopCore<S>>>,
    middlewares: Vec<Middleware>,
}

impl<S: Send + 'static> Loop<S> {
    pub fn new(state: S) -> Self {
        Self::with_config(state, LoopConfig::default())
    }

    pub fn with_config(state: S, config: LoopConfig) -> Self {
        let reporter = ErrorReporter::new(config.error_window);
        Self {
            core: Arc::new(Mutex::new(LoopCore {
                state,
                config,
                systems: Vec::new(),
                order: FxHashMap::default(),
                nodes: FxHashMap::default(),
                redirects: FxHashMap::default(),
                runtime: HookRuntime::new(),
                reporter,
            })),
            middlewares: Vec::new(),
        }
    }

    /// Register systems and recompute the run order of every event.
    ///
    /// Systems already registered are skipped. On error nothing is
    /// registered.
    pub fn schedule_systems<I>(&self, systems: I) -> LoopResult<()>
    where
        I: IntoIterator,
        I::Item: Into<System<S>>,
    {
        let mut core = self.core.lock();
        let registered = core.systems.len();

        for system in systems {
            let system = system.into();
            if core.systems.contains(&system) {
                continue;
            }
            core.systems.push(system);
        }

        if let Err(error) = core.reorder() {
            core.systems.truncate(registered);
            return Err(error);
        }
        Ok(())
    }

    pub fn schedule_system(&self, system: impl Into<System<S>>) -> LoopResult<()> {
        self.schedule_systems([system.into()])
    }

    /// Remove a system and clean up its hook storage.
    pub fn evict_system(&self, system: &System<S>) -> LoopResult<()> {
        let mut core = self.core.lock();
        let Some(index) = core.systems.iter().position(|s| s == system) else {
            return Err(LoopError::NotScheduled {
                name: system.name().to_owned(),
            });
        };

        let removed = core.systems.remove(index);
        if let Err(error) = core.reorder() {
            core.systems.insert(index, removed);
            return Err(error);
        }

        let core = &mut *core;
        if let Some(mut node) = core.nodes.remove(&system.id()) {
            core.runtime.start(&mut node, FrameState::default(), |_| ());
        }
        core.reporter.forget(system.id());
        core.redirects.retain(|_, to| *to != system.id());
        debug!(system = system.name(), "evicted system");
        Ok(())
    }

    /// Swap `old` for `new` in place.
    ///
    /// `new` keeps `old`'s hook storage and registration slot, and `after`
    /// dependencies on `old` now wait for `new`. Replacing a system with
    /// itself does nothing; `new` must not already be scheduled otherwise.
    pub fn replace_system(&self, old: &System<S>, new: impl Into<System<S>>) -> LoopResult<()> {
        let new = new.into();
        let mut core = self.core.lock();
        let Some(index) = core.systems.iter().position(|s| s == old) else {
            return Err(LoopError::NotScheduled {
                name: old.name().to_owned(),
            });
        };
        if new == *old {
            return Ok(());
        }
        if core.systems.contains(&new) {
            return Err(LoopError::AlreadyScheduled {
                name: new.name().to_owned(),
            });
        }

        let previous = std::mem::replace(&mut core.systems[index], new.clone());
        let previous_redirect = core.redirects.remove(&new.id());
        core.redirects.insert(old.id(), new.id());

        if let Err(error) = core.reorder() {
            core.systems[index] = previous;
            core.redirects.remove(&old.id());
            if let Some(to) = previous_redirect {
                core.redirects.insert(new.id(), to);
            }
            return Err(error);
        }

        if let Some(node) = core.nodes.remove(&old.id()) {
            core.nodes.insert(new.id(), node);
        }
        core.reporter.forget(old.id());
        debug!(old = old.name(), new = new.name(), "replaced system");
        Ok(())
    }

    /// Add a middleware for steps created by later calls to
    /// [`begin`](Self::begin). The most recently added one is outermost.
    pub fn add_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(StepFn, &str) -> StepFn + Send + Sync + 'static,
    {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// Subscribe a step function to the tick source of each event.
    ///
    /// Events without scheduled systems are skipped.
    pub fn begin<'a, K, T, I>(&self, sources: I) -> TickHandles
    where
        I: IntoIterator<Item = (K, &'a T)>,
        K: Into<String>,
        T: TickSource + ?Sized + 'a,
    {
        let mut handles = TickHandles::default();

        for (event, source) in sources {
            let event = event.into();
            if !self.core.lock().order.contains_key(&event) {
                trace!(event = %event, "no systems for event, not subscribing");
                continue;
            }

            let step = self
                .middlewares
                .iter()
                .fold(self.step(event.clone()), |step, middleware| middleware(step, &event));

            debug!(event = %event, "subscribed to tick source");
            handles.insert(event, source.subscribe(step));
        }

        handles
    }

    /// Unsubscribe handles returned by [`begin`](Self::begin).
    pub fn end(&self, handles: TickHandles) {
        for (event, handle) in handles {
            debug!(event = %event, "unsubscribed from tick source");
            handle.unsubscribe();
        }
    }

    fn step(&self, event: String) -> StepFn {
        let core = Arc::clone(&self.core);
        let mut last: Option<Instant> = None;
        let mut generation = false;

        Box::new(move || {
            let now = Instant::now();
            let delta_time = last.map_or(Duration::ZERO, |last| now - last);
            last = Some(now);
            generation = !generation;

            core.lock().run_event(&event, FrameState {
                delta_time,
                generation,
            });
        })
    }

    /// Lock the state systems run against.
    ///
    /// Holding the guard blocks ticks.
    pub fn state(&self) -> MappedMutexGuard<'_, S> {
        MutexGuard::map(self.core.lock(), |core| &mut core.state)
    }

    /// Names of the systems of `event` in run order.
    #[must_use]
    pub fn order(&self, event: &str) -> Vec<String> {
        self.core
            .lock()
            .order
            .get(event)
            .map(|systems| systems.iter().map(|s| s.name().to_owned()).collect())
            .unwrap_or_default()
    }

    /// Every registered system, in registration order.
    #[must_use]
    pub fn systems(&self) -> Vec<System<S>> {
        self.core.lock().systems.clone()
    }
}

impl<S> fmt::Debug for Loop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Loop")
            .field("config", &core.config)
            .field("systems", &core.systems.len())
            .field("events", &core.order.keys().collect::<Vec<_>>())
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pulse_hooks::{Signal, use_delta_time};

    use super::*;
    use crate::system::SystemDescriptor;

    type Log = Vec<String>;

    fn logger(name: &'static str) -> SystemDescriptor<Log> {
        SystemDescriptor::new(move |_, log: &mut Log| log.push(name.to_owned())).name(name)
    }

    fn tick<S: Send + 'static>(game: &Loop<S>, signal: &Signal<()>, times: usize) {
        let handles = game.begin([("Default", signal)]);
        for _ in 0..times {
            signal.fire(&());
        }
        game.end(handles);
    }

    fn drain(game: &Loop<Log>) -> Log {
        std::mem::take(&mut *game.state())
    }

    #[test]
    fn test_runs_in_dependency_order() {
        let game = Loop::new(Log::new());
        let a = logger("a").build();
        let b = logger("b").after(&a).build();
        let c = logger("c").after(&a).after(&b).build();
        game.schedule_systems([c, a, b]).unwrap();

        let signal = Signal::new();
        tick(&game, &signal, 1);
        assert_eq!(drain(&game), ["a", "b", "c"]);
    }

    #[test]
    fn test_scheduling_is_idempotent() {
        let game = Loop::new(Log::new());
        let a = logger("a").build();
        game.schedule_system(a.clone()).unwrap();
        game.schedule_system(a).unwrap();

        assert_eq!(game.order("Default"), ["a"]);
    }

    #[test]
    fn test_unschedulable_registration_rolls_back() {
        let game = Loop::new(Log::new());
        let elsewhere = logger("elsewhere").event("Render").build();
        let waiting = logger("waiting").after(&elsewhere).build();

        let error = game.schedule_systems([elsewhere, waiting]).unwrap_err();
        assert!(matches!(error, LoopError::Unschedulable { ref event, .. } if event == "Default"));
        assert!(game.systems().is_empty());
    }

    #[test]
    fn test_events_are_independent() {
        let game = Loop::new(Log::new());
        game.schedule_systems([logger("update"), logger("draw").event("Render")])
            .unwrap();

        let default = Signal::<()>::new();
        let render = Signal::<f32>::new();
        let handles = game.begin([("Default", &default)]);
        let render_handles = game.begin([("Render", &render), ("Unused", &render)]);
        assert_eq!(render_handles.len(), 1);

        render.fire(&0.5);
        default.fire(&());
        render.fire(&0.5);
        game.end(handles);
        game.end(render_handles);

        assert_eq!(drain(&game), ["draw", "update", "draw"]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let game = Loop::new(Log::new());
        game.schedule_systems([
            logger("a"),
            SystemDescriptor::new(|_, _: &mut Log| -> Result<(), String> { Err("nope".into()) })
                .name("b"),
            SystemDescriptor::new(|_, _: &mut Log| -> Result<(), String> { panic!("exploded") })
                .name("c"),
            logger("d"),
        ])
        .unwrap();

        let signal = Signal::new();
        tick(&game, &signal, 2);
        assert_eq!(drain(&game), ["a", "d", "a", "d"]);
    }

    #[test]
    fn test_frame_state() {
        let game = Loop::new(Vec::<FrameState>::new());
        game.schedule_system(System::new(|hooks: &mut HookRuntime, frames: &mut Vec<FrameState>| {
            frames.push(hooks.use_frame_state());
        }))
        .unwrap();

        let signal = Signal::new();
        let handles = game.begin([("Default", &signal)]);
        signal.fire(&());
        std::thread::sleep(Duration::from_millis(5));
        signal.fire(&());
        game.end(handles);

        let frames = game.state();
        assert_eq!(frames[0].delta_time, Duration::ZERO);
        assert!(frames[1].delta_time >= Duration::from_millis(5));
        assert_ne!(frames[0].generation, frames[1].generation);
    }

    #[test]
    fn test_hook_state_persists_per_system() {
        let game = Loop::new(Vec::<u32>::new());
        let counter = |hooks: &mut HookRuntime, seen: &mut Vec<u32>| {
            let count = hooks.use_hook_state::<u32>(None);
            *count += 1;
            seen.push(*count);
        };
        game.schedule_systems([
            SystemDescriptor::new(counter).name("first"),
            SystemDescriptor::new(counter).name("second"),
        ])
        .unwrap();

        let signal = Signal::new();
        let handles = game.begin([("Default", &signal)]);
        signal.fire(&());
        signal.fire(&());
        game.end(handles);

        assert_eq!(*game.state(), [1, 1, 2, 2]);
    }

    #[test]
    fn test_evict_cleans_up_hooks() {
        let game = Loop::new(Log::new());
        let cleaned = Arc::new(Mutex::new(false));

        let flag = Arc::clone(&cleaned);
        let system = System::new(move |hooks: &mut HookRuntime, _: &mut Log| {
            let flag = Arc::clone(&flag);
            hooks.use_hook_state_with_cleanup(None, || (), move |_| {
                *flag.lock() = true;
                false
            });
        });
        game.schedule_system(system.clone()).unwrap();

        let signal = Signal::new();
        tick(&game, &signal, 1);
        assert!(!*cleaned.lock());

        game.evict_system(&system).unwrap();
        assert!(*cleaned.lock());
        assert!(game.order("Default").is_empty());
        assert_eq!(
            game.evict_system(&system),
            Err(LoopError::NotScheduled {
                name: system.name().to_owned()
            })
        );
    }

    #[test]
    fn test_replace_keeps_hook_state_and_dependents() {
        let game = Loop::new(Vec::<(&'static str, u32)>::new());
        let counting = |label: &'static str| {
            move |hooks: &mut HookRuntime, log: &mut Vec<(&'static str, u32)>| {
                let count = hooks.use_hook_state::<u32>(None);
                *count += 1;
                log.push((label, *count));
            }
        };

        let old = SystemDescriptor::new(counting("old")).name("zz-old").build();
        let dependent = SystemDescriptor::new(|_, log: &mut Vec<(&'static str, u32)>| {
            log.push(("dependent", 0));
        })
        .name("aa-dependent")
        .after(&old)
        .build();
        game.schedule_systems([old.clone(), dependent]).unwrap();

        let signal = Signal::new();
        let handles = game.begin([("Default", &signal)]);
        signal.fire(&());

        let new = SystemDescriptor::new(counting("new")).name("zz-new").build();
        game.replace_system(&old, new).unwrap();
        signal.fire(&());
        game.end(handles);

        assert_eq!(
            *game.state(),
            [("old", 1), ("dependent", 0), ("new", 2), ("dependent", 0)]
        );
        assert!(game.replace_system(&old, logger_unit()).is_err());
    }

    fn logger_unit() -> System<Vec<(&'static str, u32)>> {
        System::new(|_, _: &mut Vec<(&'static str, u32)>| {})
    }

    #[test]
    fn test_replace_with_itself_is_noop() {
        let game = Loop::new(Log::new());
        let a = logger("a").build();
        let b = logger("b").after(&a).build();
        game.schedule_systems([a.clone(), b]).unwrap();

        game.replace_system(&a, a.clone()).unwrap();
        game.replace_system(&a, a.clone()).unwrap();
        assert_eq!(game.order("Default"), ["a", "b"]);

        let signal = Signal::new();
        tick(&game, &signal, 1);
        assert_eq!(drain(&game), ["a", "b"]);
    }

    #[test]
    fn test_replace_round_trip_keeps_dependents() {
        let game = Loop::new(Log::new());
        let a = logger("a").build();
        let a2 = logger("a2").build();
        let b = logger("b").after(&a).build();
        game.schedule_systems([a.clone(), b]).unwrap();

        game.replace_system(&a, a2.clone()).unwrap();
        game.replace_system(&a2, a.clone()).unwrap();
        assert_eq!(game.order("Default"), ["a", "b"]);
    }

    #[test]
    fn test_replace_with_scheduled_system_is_rejected() {
        let game = Loop::new(Log::new());
        let a = logger("a").build();
        let b = logger("b").build();
        game.schedule_systems([a.clone(), b.clone()]).unwrap();

        assert_eq!(
            game.replace_system(&a, b),
            Err(LoopError::AlreadyScheduled { name: "b".into() })
        );
        assert_eq!(game.systems().len(), 2);
        assert_eq!(game.order("Default"), ["a", "b"]);
    }

    #[test]
    fn test_replace_into_cycle_rolls_back() {
        let game = Loop::new(Log::new());
        let a = logger("a").build();
        let b = logger("b").after(&a).build();
        game.schedule_systems([a.clone(), b.clone()]).unwrap();

        let error = game.replace_system(&a, logger("a2").after(&b)).unwrap_err();
        assert_eq!(
            error,
            LoopError::Unschedulable {
                event: "Default".into(),
                systems: vec!["a2".into(), "b".into()],
            }
        );
        assert_eq!(game.systems(), [a.clone(), b]);
        assert_eq!(game.order("Default"), ["a", "b"]);

        let signal = Signal::new();
        tick(&game, &signal, 1);
        assert_eq!(drain(&game), ["a", "b"]);

        game.replace_system(&a, logger("a3")).unwrap();
        assert_eq!(game.order("Default"), ["a3", "b"]);
    }

    fn tagging(
        trace: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(StepFn, &str) -> StepFn + Send + Sync + 'static {
        let trace = Arc::clone(trace);
        move |mut step: StepFn, event: &str| -> StepFn {
            let trace = Arc::clone(&trace);
            let tag = format!("{label}:{event}");
            Box::new(move || {
                trace.lock().push(tag.clone());
                step();
            })
        }
    }

    #[test]
    fn test_middleware_order() {
        let mut game = Loop::new(Log::new());
        game.schedule_system(logger("system")).unwrap();

        let trace = Arc::new(Mutex::new(Vec::new()));
        game.add_middleware(tagging(&trace, "inner"))
            .add_middleware(tagging(&trace, "outer"));

        let signal = Signal::new();
        tick(&game, &signal, 1);
        assert_eq!(*trace.lock(), ["outer:Default", "inner:Default"]);
        assert_eq!(drain(&game), ["system"]);
    }

    #[test]
    fn test_use_delta_time_inside_loop() {
        let game = Loop::new(Vec::<Duration>::new());
        game.schedule_system(System::new(|hooks: &mut HookRuntime, deltas: &mut Vec<Duration>| {
            deltas.push(use_delta_time(hooks));
        }))
        .unwrap();

        let signal = Signal::new();
        tick(&game, &signal, 1);
        assert_eq!(*game.state(), [Duration::ZERO]);
    }
}
