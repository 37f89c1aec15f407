//! Integration tests driving a `World` from scheduled systems.

use std::time::Duration;

use pulse_ecs::{Component, EntityId, World};
use pulse_hooks::{HookRuntime, Signal, use_event, use_throttle};
use pulse_loop::{Loop, LoopConfig, System, SystemDescriptor};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Component, Debug, PartialEq)]
struct Health(u32);

#[derive(Component)]
struct Poison(u32);

#[derive(Component)]
struct Player;

#[derive(Clone, Debug)]
struct Damage {
    target: EntityId,
    amount: u32,
}

#[derive(Default)]
struct Game {
    world: World,
    damage: Signal<Damage>,
    log: Vec<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

fn run_ticks(game: &Loop<Game>, ticks: usize) {
    let heartbeat = Signal::<()>::new();
    let handles = game.begin([("Default", &heartbeat)]);
    for _ in 0..ticks {
        heartbeat.fire(&());
    }
    game.end(handles);
}

fn poison(_: &mut HookRuntime, game: &mut Game) {
    let mut query = game.world.query::<(Health, Poison)>();
    while let Some((entity, (health, poison))) = query.next(&game.world) {
        let left = health.0.saturating_sub(poison.0);
        game.world.insert(entity, Health(left)).ok();
    }
}

fn reap(hooks: &mut HookRuntime, game: &mut Game) {
    let dead: Vec<EntityId> = game
        .world
        .query_changed::<Health>(hooks)
        .filter(|(_, change)| change.new.as_ref().is_some_and(|h| h.0 == 0))
        .map(|(entity, _)| entity)
        .collect();

    for entity in dead {
        game.world.despawn(entity).ok();
        game.log.push(format!("{entity} died"));
    }
}

// ============================================================================
// World scenarios
// ============================================================================

#[test]
fn test_spawn_and_despawn_counts() {
    let mut world = World::new();
    let ids: Vec<_> = (0..3).map(|n| world.spawn(Health(n)).unwrap()).collect();
    world.despawn(ids[1]).unwrap();

    assert_eq!(world.len(), 2);
    assert!(world.contains(ids[0]));
    assert!(!world.contains(ids[1]));
}

#[test]
fn test_player_poison_health_scenario() {
    let mut world = World::new();
    let entity = world.spawn((Player, Poison(5))).unwrap();
    world.insert(entity, Health(20)).unwrap();

    let players: Vec<_> = world.query::<(Player, Health)>().collect_all(&world);
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].0, entity);

    world.remove::<Player>(entity).unwrap();
    assert!(world.query::<Player>().collect_all(&world).is_empty());

    let healthy: Vec<_> = world.query::<Health>().iter(&world).map(|(e, _)| e).collect();
    assert_eq!(healthy, vec![entity]);
}

// ============================================================================
// Systems over a world
// ============================================================================

#[test]
fn test_poison_kills_over_ticks() {
    init_tracing();

    let mut state = Game::default();
    let victim = state.world.spawn((Health(10), Poison(4))).unwrap();
    let bystander = state.world.spawn(Health(10)).unwrap();

    let game = Loop::new(state);
    let poison = System::new(poison);
    let reap = SystemDescriptor::new(reap).after(&poison).build();
    game.schedule_systems([reap, poison]).unwrap();

    run_ticks(&game, 2);
    assert_eq!(game.state().world.get::<Health>(victim).unwrap().map(|h| h.0), Some(2));

    run_ticks(&game, 1);
    let state = game.state();
    assert!(!state.world.contains(victim));
    assert!(state.world.contains(bystander));
    assert_eq!(state.log, [format!("{victim} died")]);
}

#[test]
fn test_events_reach_systems_between_ticks() {
    let mut state = Game::default();
    let target = state.world.spawn(Health(50)).unwrap();
    let damage = state.damage.clone();

    let game = Loop::new(state);
    game.schedule_system(System::new(|hooks: &mut HookRuntime, game: &mut Game| {
        for hit in use_event(hooks, &game.damage, None) {
            let current = game.world.get::<Health>(hit.target).ok().flatten();
            if let Some(health) = current {
                game.world
                    .insert(hit.target, Health(health.0.saturating_sub(hit.amount)))
                    .ok();
            }
        }
    }))
    .unwrap();

    let heartbeat = Signal::<()>::new();
    let handles = game.begin([("Default", &heartbeat)]);

    // Events fired before the first frame are not seen: the subscription is
    // created by it.
    damage.fire(&Damage { target, amount: 100 });
    heartbeat.fire(&());

    damage.fire(&Damage { target, amount: 5 });
    damage.fire(&Damage { target, amount: 7 });
    heartbeat.fire(&());
    game.end(handles);

    let health = game.state().world.get::<Health>(target).unwrap();
    assert_eq!(health.as_deref(), Some(&Health(38)));
}

#[test]
fn test_throttled_system_body() {
    let game = Loop::new(Game::default());
    game.schedule_system(System::new(|hooks: &mut HookRuntime, game: &mut Game| {
        if use_throttle(hooks, Duration::from_secs(60), None) {
            game.log.push("autosave".to_owned());
        }
    }))
    .unwrap();

    run_ticks(&game, 5);
    assert_eq!(game.state().log, ["autosave"]);
}

#[test]
fn test_hot_swapped_system_keeps_change_subscription() {
    let game = Loop::with_config(Game::default(), LoopConfig::new().with_default_event("Tick"));

    let watch = |label: &'static str| {
        move |hooks: &mut HookRuntime, game: &mut Game| {
            let changed = game.world.query_changed::<Health>(hooks).count();
            game.log.push(format!("{label}:{changed}"));
        }
    };

    let old = SystemDescriptor::new(watch("old")).name("watch").build();
    game.schedule_system(old.clone()).unwrap();

    let heartbeat = Signal::<()>::new();
    let handles = game.begin([("Tick", &heartbeat)]);

    game.state().world.spawn(Health(1)).unwrap();
    heartbeat.fire(&());

    game.replace_system(&old, SystemDescriptor::new(watch("new")).name("watch"))
        .unwrap();
    let entity = game.state().world.spawn(Health(2)).unwrap();
    game.state().world.insert(entity, Health(3)).unwrap();
    heartbeat.fire(&());
    heartbeat.fire(&());
    game.end(handles);

    assert_eq!(game.state().log, ["old:1", "new:1", "new:0"]);
}

#[test]
fn test_failing_system_does_not_stop_others() {
    init_tracing();

    let game = Loop::with_config(
        Game::default(),
        LoopConfig::new().with_error_window(Duration::from_millis(1)),
    );
    game.schedule_systems([
        SystemDescriptor::new(|_, game: &mut Game| -> Result<(), String> {
            game.world.despawn(EntityId::from_raw(999)).map_err(|e| e.to_string())
        })
        .priority(-1),
        SystemDescriptor::new(|_, game: &mut Game| game.log.push("still running".to_owned())),
    ])
    .unwrap();

    run_ticks(&game, 2);
    assert_eq!(game.state().log, ["still running", "still running"]);
}
