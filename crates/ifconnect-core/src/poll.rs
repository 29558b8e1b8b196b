//! Fixed-interval polling of data categories.
//!
//! Every category with a positive interval gets one timer task while the
//! session is connected. A timer does not send anything itself: it posts a
//! [`PollTick`] to the session, which asks [`PollScheduler::accept`] whether
//! the tick still belongs to the live timer. Replacing or cancelling a timer
//! aborts its task and retires its generation, so ticks already queued from
//! the old timer are discarded instead of producing a second send.

use ifconnect_types::{Category, Command};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// A timer firing for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTick {
    pub category: Category,
    pub generation: u64,
}

/// Interval configuration for one category; 0 disables polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRule {
    pub category: Category,
    pub interval_ms: u32,
}

#[derive(Debug)]
struct ActiveTimer {
    generation: u64,
    interval_ms: u32,
    handle: JoinHandle<()>,
}

impl Drop for ActiveTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
pub struct PollScheduler {
    rules: BTreeMap<Category, u32>,
    timers: HashMap<Category, ActiveTimer>,
    tick_tx: mpsc::UnboundedSender<PollTick>,
    next_generation: u64,
    armed: bool,
}

impl PollScheduler {
    /// Create a scheduler whose timers post ticks to `tick_tx`.
    #[must_use]
    pub fn new(tick_tx: mpsc::UnboundedSender<PollTick>) -> Self {
        Self {
            rules: BTreeMap::new(),
            timers: HashMap::new(),
            tick_tx,
            next_generation: 0,
            armed: false,
        }
    }

    #[must_use]
    pub fn rules(&self) -> Vec<PollRule> {
        self.rules
            .iter()
            .map(|(&category, &interval_ms)| PollRule {
                category,
                interval_ms,
            })
            .collect()
    }

    #[must_use]
    pub fn interval(&self, category: Category) -> u32 {
        self.rules.get(&category).copied().unwrap_or(0)
    }

    /// True between [`arm_all`](Self::arm_all) and [`cancel_all`](Self::cancel_all).
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Categories with a running timer, in category order.
    #[must_use]
    pub fn active_categories(&self) -> Vec<Category> {
        let mut active: Vec<Category> = self.timers.keys().copied().collect();
        active.sort();
        active
    }

    /// Update one rule. While armed the timer is replaced or cancelled immediately.
    pub fn set_interval(&mut self, category: Category, interval_ms: u32) {
        debug!("Setting interval for {}: {}ms", category, interval_ms);
        self.rules.insert(category, interval_ms);

        if self.armed {
            self.apply(category, interval_ms);
        }
    }

    pub fn set_intervals<I>(&mut self, intervals: I)
    where
        I: IntoIterator<Item = (Category, u32)>,
    {
        for (category, interval_ms) in intervals {
            self.set_interval(category, interval_ms);
        }
    }

    /// Update rules, then restart every timer from now if armed.
    pub fn reset_intervals<I>(&mut self, intervals: I)
    where
        I: IntoIterator<Item = (Category, u32)>,
    {
        for (category, interval_ms) in intervals {
            self.rules.insert(category, interval_ms);
        }
        if self.armed {
            self.arm_all();
        }
    }

    /// Start a fresh timer for every positive rule, replacing any running ones.
    pub fn arm_all(&mut self) {
        self.armed = true;
        self.timers.clear();

        let rules: Vec<(Category, u32)> = self.rules.iter().map(|(c, ms)| (*c, *ms)).collect();
        for (category, interval_ms) in rules {
            if interval_ms > 0 {
                self.start_timer(category, interval_ms);
            }
        }
    }

    /// Stop every timer. Rules are kept for the next [`arm_all`](Self::arm_all).
    pub fn cancel_all(&mut self) {
        if !self.timers.is_empty() {
            debug!("Cancelling {} poll timers", self.timers.len());
        }
        self.armed = false;
        self.timers.clear();
    }

    /// Command to send for a tick, or `None` when the tick comes from a retired timer.
    #[must_use]
    pub fn accept(&self, tick: PollTick) -> Option<Command> {
        match self.timers.get(&tick.category) {
            Some(timer) if timer.generation == tick.generation => {
                Some(tick.category.poll_command())
            }
            _ => {
                debug!("Discarding stale poll tick for {}", tick.category);
                None
            }
        }
    }

    fn apply(&mut self, category: Category, interval_ms: u32) {
        if interval_ms == 0 {
            if self.timers.remove(&category).is_some() {
                info!("Stopped polling {}", category);
            }
            return;
        }

        if self
            .timers
            .get(&category)
            .is_some_and(|timer| timer.interval_ms == interval_ms)
        {
            return;
        }

        self.start_timer(category, interval_ms);
    }

    fn start_timer(&mut self, category: Category, interval_ms: u32) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tick_tx.clone();
        let period = Duration::from_millis(u64::from(interval_ms));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx
                    .send(PollTick {
                        category,
                        generation,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        info!("Polling {} every {}ms", category, interval_ms);
        // dropping the previous timer aborts its task
        self.timers.insert(
            category,
            ActiveTimer {
                generation,
                interval_ms,
                handle,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (PollScheduler, mpsc::UnboundedReceiver<PollTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PollScheduler::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PollTick>) -> Vec<PollTick> {
        let mut ticks = Vec::new();
        while let Ok(tick) = rx.try_recv() {
            ticks.push(tick);
        }
        ticks
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timers_until_armed() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.set_interval(Category::AircraftState, 100);

        advance(500).await;
        assert!(scheduler.active_categories().is_empty());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(scheduler.interval(Category::AircraftState), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_timer_ticks_at_interval() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.arm_all();
        scheduler.set_interval(Category::AircraftState, 100);

        assert_eq!(scheduler.active_categories(), vec![Category::AircraftState]);

        advance(350).await;
        let ticks = drain(&mut rx);
        assert_eq!(ticks.len(), 3);
        for tick in ticks {
            assert_eq!(
                scheduler.accept(tick),
                Some(Command::new("airplane.getstate"))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_interval_retires_old_timer() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.arm_all();
        scheduler.set_interval(Category::AutopilotState, 100);

        advance(150).await;
        let stale = drain(&mut rx);
        assert_eq!(stale.len(), 1);

        scheduler.set_interval(Category::AutopilotState, 200);
        assert_eq!(scheduler.active_categories(), vec![Category::AutopilotState]);
        assert_eq!(scheduler.accept(stale[0]), None);

        advance(250).await;
        let fresh = drain(&mut rx);
        assert_eq!(fresh.len(), 1);
        assert_ne!(fresh[0].generation, stale[0].generation);
        assert!(scheduler.accept(fresh[0]).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_interval_keeps_timer() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.arm_all();
        scheduler.set_interval(Category::Status, 100);
        advance(150).await;
        let before = drain(&mut rx);

        scheduler.set_interval(Category::Status, 100);
        assert!(scheduler.accept(before[0]).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_cancels() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.arm_all();
        scheduler.set_interval(Category::FlightPlan, 100);
        scheduler.set_interval(Category::FlightPlan, 0);

        assert!(scheduler.active_categories().is_empty());
        advance(500).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_then_rearm() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.set_intervals([
            (Category::AircraftState, 100),
            (Category::EngineStates, 250),
            (Category::LightsState, 0),
        ]);
        scheduler.arm_all();
        assert_eq!(
            scheduler.active_categories(),
            vec![Category::AircraftState, Category::EngineStates]
        );

        scheduler.cancel_all();
        assert!(!scheduler.is_armed());
        assert!(scheduler.active_categories().is_empty());
        advance(1000).await;
        assert!(drain(&mut rx).is_empty());

        scheduler.arm_all();
        assert_eq!(
            scheduler.active_categories(),
            vec![Category::AircraftState, Category::EngineStates]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_all_timers() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.set_interval(Category::AircraftState, 100);
        scheduler.arm_all();
        advance(150).await;
        let old = drain(&mut rx);

        scheduler.reset_intervals([(Category::FuelTankStates, 300)]);
        assert_eq!(
            scheduler.active_categories(),
            vec![Category::AircraftState, Category::FuelTankStates]
        );
        assert_eq!(scheduler.accept(old[0]), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rules_listed_in_order() {
        let (mut scheduler, _rx) = scheduler();
        scheduler.set_intervals([(Category::Status, 1000), (Category::AircraftState, 0)]);
        assert_eq!(
            scheduler.rules(),
            vec![
                PollRule {
                    category: Category::AircraftState,
                    interval_ms: 0
                },
                PollRule {
                    category: Category::Status,
                    interval_ms: 1000
                },
            ]
        );
    }
}
