//! Tick bookkeeping: lag debounce and phase gating.

use std::time::Duration;

use lowcraft_engine::tick::{LAG_DEBOUNCE, Phase, TickSchedule, TickTimer};

fn default_schedule() -> TickSchedule {
    TickSchedule::new()
        .with(Phase::MobAi, 3)
        .with(Phase::Redstone, 2)
        .with(Phase::Fluids, 5)
        .with(Phase::EntityBroadcast, 2)
        .with(Phase::KeepAlive, 600)
        .with(Phase::Save, 240)
        .with(Phase::IdleSweep, 20)
}

#[test]
fn under_budget_ticks_never_lag() {
    let mut timer = TickTimer::new(20);
    for _ in 0..2 {
        timer.begin_tick();
        assert!(timer.finish_tick(Duration::from_millis(10)).is_some());
    }
    assert_eq!(timer.lag_ticks(), 0);
    assert_eq!(timer.total_ticks(), 2);
}

#[test]
fn five_slow_ticks_count_once() {
    let mut timer = TickTimer::new(20);
    for _ in 0..LAG_DEBOUNCE {
        timer.begin_tick();
        assert_eq!(timer.finish_tick(Duration::from_millis(75)), None);
    }
    assert_eq!(timer.lag_ticks(), 1);
}

#[test]
fn fast_tick_resets_the_run() {
    let mut timer = TickTimer::new(20);
    for _ in 0..LAG_DEBOUNCE - 1 {
        timer.begin_tick();
        timer.finish_tick(Duration::from_millis(75));
    }
    timer.begin_tick();
    timer.finish_tick(Duration::from_millis(1));
    for _ in 0..LAG_DEBOUNCE - 1 {
        timer.begin_tick();
        timer.finish_tick(Duration::from_millis(75));
    }
    assert_eq!(timer.lag_ticks(), 0);
}

#[test]
fn sustained_overload_keeps_counting() {
    let mut timer = TickTimer::new(20);
    for _ in 0..LAG_DEBOUNCE + 3 {
        timer.begin_tick();
        timer.finish_tick(Duration::from_millis(75));
    }
    assert_eq!(timer.lag_ticks(), 4);
}

#[test]
fn phases_run_in_fixed_order() {
    let schedule = default_schedule();
    // 600 is a multiple of every divisor except the save interval.
    let due: Vec<Phase> = schedule.due(600).collect();
    assert_eq!(
        due,
        vec![
            Phase::MobAi,
            Phase::Redstone,
            Phase::Fluids,
            Phase::EntityBroadcast,
            Phase::KeepAlive,
            Phase::IdleSweep,
        ]
    );
    let all: Vec<Phase> = TickSchedule::new()
        .with(Phase::IdleSweep, 1)
        .with(Phase::Save, 1)
        .with(Phase::KeepAlive, 1)
        .with(Phase::EntityBroadcast, 1)
        .with(Phase::Fluids, 1)
        .with(Phase::Redstone, 1)
        .with(Phase::MobAi, 1)
        .due(7)
        .collect();
    assert_eq!(all, Phase::ALL.to_vec());
}

#[test]
fn divisors_gate_phases() {
    let schedule = default_schedule();
    let broadcasts = (1..=20).filter(|&t| schedule.is_due(Phase::EntityBroadcast, t)).count();
    let fluids = (1..=20).filter(|&t| schedule.is_due(Phase::Fluids, t)).count();
    assert_eq!(broadcasts, 10);
    assert_eq!(fluids, 4);
    assert!(schedule.is_due(Phase::Save, 480));
    assert!(!schedule.is_due(Phase::Save, 481));
}
