//! Per-event run ordering.

use rustc_hash::FxHashSet;

use crate::error::{LoopError, LoopResult};
use crate::system::{System, SystemId};

/// Order the systems of one event.
///
/// Systems are sorted by priority, then name. Each pass works on the lowest
/// priority band still pending and places, in sorted order, every system of
/// that band whose dependencies are already placed. A pass that places
/// nothing fails: a system can never wait on one of a higher band, a cycle
/// or a system that is not in `systems`. `resolve` maps a dependency id to
/// the system that currently stands for it.
pub(crate) fn order_systems<S>(
    event: &str,
    systems: &[System<S>],
    resolve: impl Fn(SystemId) -> SystemId,
) -> LoopResult<Vec<System<S>>> {
    let mut pending: Vec<&System<S>> = systems.iter().collect();
    pending.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then_with(|| a.name().cmp(b.name()))
    });

    let mut placed = FxHashSet::default();
    let mut ordered = Vec::with_capacity(pending.len());

    while let Some(band) = pending.first().map(|system| system.priority()) {
        let before = ordered.len();

        pending.retain(|system| {
            if system.priority() != band {
                return true;
            }
            let ready = system
                .after()
                .iter()
                .all(|&dependency| placed.contains(&resolve(dependency)));
            if !ready {
                return true;
            }

            placed.insert(system.id());
            ordered.push((*system).clone());
            false
        });

        if ordered.len() == before {
            return Err(LoopError::Unschedulable {
                event: event.to_owned(),
                systems: pending
                    .iter()
                    .filter(|system| system.priority() == band)
                    .map(|system| system.name().to_owned())
                    .collect(),
            });
        }
    }

    Ok(ordered)
}
