//! Systems: named callbacks with scheduling metadata.

use std::any::type_name;
use std::fmt::{self, Display};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use pulse_hooks::HookRuntime;

use crate::error::SystemFailure;

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a [`System`], unique per process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(u64);

impl SystemId {
    fn next() -> Self {
        Self(NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "System({})", self.0)
    }
}

/// Values a system body may return.
pub trait IntoSystemResult {
    fn into_system_result(self) -> Result<(), SystemFailure>;
}

impl IntoSystemResult for () {
    fn into_system_result(self) -> Result<(), SystemFailure> {
        Ok(())
    }
}

impl<E: Display> IntoSystemResult for Result<(), E> {
    fn into_system_result(self) -> Result<(), SystemFailure> {
        self.map_err(|error| SystemFailure::new(error.to_string()))
    }
}

type SystemFn<S> = dyn FnMut(&mut HookRuntime, &mut S) -> Result<(), SystemFailure> + Send;

struct SystemInner<S> {
    id: SystemId,
    name: String,
    event: Option<String>,
    priority: i32,
    after: Vec<SystemId>,
    callback: Mutex<Box<SystemFn<S>>>,
}

/// Shared handle to a system.
///
/// Cloning is cheap and clones compare equal; two systems built from the
/// same closure are still distinct.
pub struct System<S> {
    inner: Arc<SystemInner<S>>,
}

impl<S> System<S> {
    /// A system on the default event with priority 0 and no dependencies.
    #[track_caller]
    pub fn new<F, R>(callback: F) -> Self
    where
        F: FnMut(&mut HookRuntime, &mut S) -> R + Send + 'static,
        R: IntoSystemResult,
    {
        SystemDescriptor::new(callback).build()
    }

    #[must_use]
    pub fn id(&self) -> SystemId {
        self.inner.id
    }

    /// Deterministic name used to break priority ties.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Event this system runs on; `None` means the loop's default event.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.inner.event.as_deref()
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.inner.priority
    }

    /// Systems that must run before this one.
    #[must_use]
    pub fn after(&self) -> &[SystemId] {
        &self.inner.after
    }

    /// Run the body once, turning a panic into a [`SystemFailure`].
    pub(crate) fn run(&self, hooks: &mut HookRuntime, state: &mut S) -> Result<(), SystemFailure> {
        let mut guard = self.inner.callback.lock();
        let callback = &mut **guard;
        panic::catch_unwind(AssertUnwindSafe(|| callback(hooks, state)))
            .unwrap_or_else(|payload| Err(SystemFailure::from_panic(payload.as_ref())))
    }
}

impl<S> Clone for System<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> PartialEq for System<S> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S> Eq for System<S> {}

impl<S> fmt::Debug for System<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("event", &self.inner.event)
            .field("priority", &self.inner.priority)
            .field("after", &self.inner.after)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`System`].
///
/// ```
/// use pulse_loop::{System, SystemDescriptor};
///
/// let physics: System<u64> = System::new(|_, ticks: &mut u64| *ticks += 1);
/// let render = SystemDescriptor::new(|_, ticks: &mut u64| println!("frame {ticks}"))
///     .name("render")
///     .event("Render")
///     .priority(10)
///     .after(&physics)
///     .build();
///
/// assert_eq!(render.after(), &[physics.id()]);
/// ```
pub struct SystemDescriptor<S> {
    name: String,
    event: Option<String>,
    priority: i32,
    after: Vec<SystemId>,
    callback: Box<SystemFn<S>>,
}

impl<S> SystemDescriptor<S> {
    #[track_caller]
    pub fn new<F, R>(mut callback: F) -> Self
    where
        F: FnMut(&mut HookRuntime, &mut S) -> R + Send + 'static,
        R: IntoSystemResult,
    {
        Self {
            name: default_name::<F>(Location::caller()),
            event: None,
            priority: 0,
            after: Vec::new(),
            callback: Box::new(move |hooks: &mut HookRuntime, state: &mut S| {
                callback(hooks, state).into_system_result()
            }),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Lower priorities run first.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn after(mut self, system: &System<S>) -> Self {
        self.after.push(system.id());
        self
    }

    #[must_use]
    pub fn after_all<'a>(mut self, systems: impl IntoIterator<Item = &'a System<S>>) -> Self
    where
        S: 'a,
    {
        self.after.extend(systems.into_iter().map(System::id));
        self
    }

    #[must_use]
    pub fn build(self) -> System<S> {
        System {
            inner: Arc::new(SystemInner {
                id: SystemId::next(),
                name: self.name,
                event: self.event,
                priority: self.priority,
                after: self.after,
                callback: Mutex::new(self.callback),
            }),
        }
    }
}

impl<S> From<SystemDescriptor<S>> for System<S> {
    fn from(descriptor: SystemDescriptor<S>) -> Self {
        descriptor.build()
    }
}

impl<S> fmt::Debug for SystemDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDescriptor")
            .field("name", &self.name)
            .field("event", &self.event)
            .field("priority", &self.priority)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

/// Function items are named by path; closures also get the line that built
/// them, so two closures in one function sort apart.
fn default_name<F>(location: &Location<'_>) -> String {
    let name = type_name::<F>();
    if name.contains("{{closure}}") {
        format!("{name}@{}:{}", location.file(), location.line())
    } else {
        name.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_hooks::{FrameState, HookNode};

    fn tick(_: &mut HookRuntime, count: &mut u32) {
        *count += 1;
    }

    fn run_once(system: &System<u32>, state: &mut u32) -> Result<(), SystemFailure> {
        let mut runtime = HookRuntime::new();
        let mut node = HookNode::new();
        runtime.start(&mut node, FrameState::default(), |hooks| system.run(hooks, state))
    }

    #[test]
    fn test_function_names_are_paths() {
        let system = System::new(tick);
        assert!(system.name().ends_with("tests::tick"));
        assert_eq!(system.event(), None);
        assert_eq!(system.priority(), 0);
    }

    #[test]
    fn test_closure_names_include_line() {
        let first = System::new(|_, _: &mut u32| {});
        let second = System::new(|_, _: &mut u32| {});
        assert!(first.name().contains("{{closure}}@"));
        assert_ne!(first.name(), second.name());
    }

    #[test]
    fn test_identity() {
        let system = System::new(tick);
        let clone = system.clone();
        assert_eq!(system, clone);
        assert_ne!(system, System::new(tick));
        assert_ne!(system.id(), System::new(tick).id());
    }

    #[test]
    fn test_run_returns_and_errors() {
        let mut count = 0;
        assert!(run_once(&System::new(tick), &mut count).is_ok());
        assert_eq!(count, 1);

        let failing = System::new(|_, _: &mut u32| Err::<(), _>("out of mana"));
        let failure = run_once(&failing, &mut count).unwrap_err();
        assert_eq!(failure.message(), "out of mana");
        assert!(!failure.panicked());
    }

    #[test]
    fn test_run_catches_panics() {
        let panicking = System::new(|_, count: &mut u32| {
            if *count > 0 {
                panic!("count was {count}");
            }
        });

        let mut count = 2;
        let failure = run_once(&panicking, &mut count).unwrap_err();
        assert!(failure.panicked());
        assert_eq!(failure.message(), "count was 2");

        count = 0;
        assert!(run_once(&panicking, &mut count).is_ok());
    }

    #[test]
    fn test_descriptor_builder() {
        let first = System::new(tick);
        let second = System::new(tick);
        let system: System<u32> = SystemDescriptor::new(tick)
            .name("custom")
            .event("Render")
            .priority(-5)
            .after(&first)
            .after_all([&second])
            .into();

        assert_eq!(system.name(), "custom");
        assert_eq!(system.event(), Some("Render"));
        assert_eq!(system.priority(), -5);
        assert_eq!(system.after(), &[first.id(), second.id()]);
    }
}
