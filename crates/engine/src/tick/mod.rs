//! Fixed-rate tick scheduling.
//!
//! The engine does not own a loop; it provides the bookkeeping one needs.
//! [`TickSchedule`] says which [`Phase`]s are due on a given tick and in what
//! order, and [`TickTimer`] keeps the tick counter, computes how long to sleep
//! to hold the period, and debounces lag detection.

use std::time::Duration;

/// Consecutive over-budget ticks needed before a tick counts as lag.
pub const LAG_DEBOUNCE: u32 = 5;

/// A periodic unit of work inside one tick.
///
/// Variants are declared in execution order. World-mutating phases come
/// before the entity broadcast, which comes before keep-alive, so later
/// phases always observe the mutations of earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    MobAi,
    Redstone,
    Fluids,
    EntityBroadcast,
    KeepAlive,
    Save,
    IdleSweep,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::MobAi,
        Phase::Redstone,
        Phase::Fluids,
        Phase::EntityBroadcast,
        Phase::KeepAlive,
        Phase::Save,
        Phase::IdleSweep,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::MobAi => "mob-ai",
            Phase::Redstone => "redstone",
            Phase::Fluids => "fluids",
            Phase::EntityBroadcast => "entity-broadcast",
            Phase::KeepAlive => "keep-alive",
            Phase::Save => "save",
            Phase::IdleSweep => "idle-sweep",
        }
    }
}

/// Per-phase tick divisors. A phase runs on every tick where
/// `tick % divisor == 0`; a divisor of zero disables it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSchedule {
    divisors: [u32; Phase::ALL.len()],
}

impl TickSchedule {
    /// A schedule with every phase disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: run `phase` every `ticks` ticks (0 disables).
    pub fn with(mut self, phase: Phase, ticks: u32) -> Self {
        self.set(phase, ticks);
        self
    }

    pub fn set(&mut self, phase: Phase, ticks: u32) {
        self.divisors[phase as usize] = ticks;
    }

    pub fn divisor(&self, phase: Phase) -> u32 {
        self.divisors[phase as usize]
    }

    pub fn is_due(&self, phase: Phase, tick: u32) -> bool {
        match self.divisor(phase) {
            0 => false,
            d => tick % d == 0,
        }
    }

    /// Phases due on `tick`, in execution order.
    pub fn due(&self, tick: u32) -> impl Iterator<Item = Phase> + '_ {
        Phase::ALL.into_iter().filter(move |&p| self.is_due(p, tick))
    }
}

/// Tick counter, period budget and lag accounting for a fixed-rate loop.
#[derive(Debug, Clone)]
pub struct TickTimer {
    period: Duration,
    tick: u32,
    total_ticks: u64,
    over_budget_run: u32,
    lag_ticks: u64,
}

impl TickTimer {
    /// Timer for `tick_rate` ticks per second. A rate of zero is treated as 1.
    pub fn new(tick_rate: u32) -> Self {
        let rate = u64::from(tick_rate.max(1));
        Self::with_period(Duration::from_millis(1000 / rate))
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            tick: 0,
            total_ticks: 0,
            over_budget_run: 0,
            lag_ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start a new tick and return its number. The counter wraps.
    pub fn begin_tick(&mut self) -> u32 {
        self.tick = self.tick.wrapping_add(1);
        self.total_ticks += 1;
        self.tick
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn lag_ticks(&self) -> u64 {
        self.lag_ticks
    }

    /// Close the current tick after `elapsed` of work.
    ///
    /// Returns how long to sleep to hold the period, or `None` when the tick
    /// ran over budget. Lag is only counted once [`LAG_DEBOUNCE`]
    /// consecutive ticks have run over; a single under-budget tick resets
    /// the run.
    pub fn finish_tick(&mut self, elapsed: Duration) -> Option<Duration> {
        if elapsed <= self.period {
            self.over_budget_run = 0;
            return Some(self.period - elapsed);
        }

        self.over_budget_run = self.over_budget_run.saturating_add(1);
        if self.over_budget_run >= LAG_DEBOUNCE {
            self.lag_ticks += 1;
            tracing::warn!(
                "Tick {} took {:.2?} (budget {:.2?}), {} consecutive ticks over budget",
                self.tick,
                elapsed,
                self.period,
                self.over_budget_run,
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_from_rate() {
        assert_eq!(TickTimer::new(20).period(), Duration::from_millis(50));
        assert_eq!(TickTimer::new(0).period(), Duration::from_millis(1000));
    }

    #[test]
    fn under_budget_returns_remaining_time() {
        let mut timer = TickTimer::new(20);
        timer.begin_tick();
        assert_eq!(
            timer.finish_tick(Duration::from_millis(20)),
            Some(Duration::from_millis(30))
        );
        assert_eq!(timer.lag_ticks(), 0);
    }

    #[test]
    fn one_slow_tick_is_jitter() {
        let mut timer = TickTimer::new(20);
        timer.begin_tick();
        assert_eq!(timer.finish_tick(Duration::from_millis(80)), None);
        assert_eq!(timer.lag_ticks(), 0);
    }

    #[test]
    fn counter_wraps() {
        let mut timer = TickTimer::new(20);
        timer.tick = u32::MAX;
        assert_eq!(timer.begin_tick(), 0);
    }

    #[test]
    fn zero_divisor_disables() {
        let schedule = TickSchedule::new().with(Phase::Fluids, 0);
        assert!((0..100).all(|t| !schedule.is_due(Phase::Fluids, t)));
    }
}
