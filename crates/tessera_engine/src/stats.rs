//! # Tick Statistics
//!
//! [`TickStats`] describes one tick and is returned by `Engine::update`.
//! [`TimingStats`] accumulates durations across ticks.

use std::time::Duration;

use crate::system::Trigger;

/// What happened during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Number of the tick (0 for the first tick).
    pub tick: u64,
    /// Wall time from admission to commit.
    pub duration: Duration,
    /// Callback invocations per trigger, indexed by [`Trigger::index`].
    pub invocations: [u64; 8],
    /// Entities admitted into the active set.
    pub admitted: u32,
    /// Entities that left the active set.
    pub evicted: u32,
    /// Inputs routed this tick.
    pub inputs: u32,
    /// Times a system had to wait for an entity another system was writing.
    /// Only counted when contention detection is enabled.
    pub write_contention: u64,
    /// The tick exceeded the configured budget.
    pub late: bool,
}

impl TickStats {
    /// Callback invocations of one trigger.
    #[must_use]
    pub fn invocations_of(&self, trigger: Trigger) -> u64 {
        self.invocations[trigger.index()]
    }

    /// Callback invocations of all triggers.
    #[must_use]
    pub fn total_invocations(&self) -> u64 {
        self.invocations.iter().sum()
    }
}

/// Duration statistics over many ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Number of late ticks (took longer than budget).
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TimingStats {
    /// Records one committed tick.
    pub fn record(&mut self, stats: &TickStats) {
        let duration_us = u64::try_from(stats.duration.as_micros()).unwrap_or(u64::MAX);

        self.min_tick_us = self.min_tick_us.min(duration_us);
        self.max_tick_us = self.max_tick_us.max(duration_us);
        self.avg_tick_us = if self.total_ticks == 0 {
            duration_us
        } else {
            // Rolling average
            (self.avg_tick_us.saturating_mul(15).saturating_add(duration_us)) / 16
        };
        self.total_ticks += 1;

        if stats.late {
            self.late_ticks += 1;
        }
    }
}

impl Default for TimingStats {
    fn default() -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: 0,
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}
