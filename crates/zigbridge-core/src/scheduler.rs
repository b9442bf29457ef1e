//! Bounded round-robin dispatcher for periodic pollers.
//!
//! Pollers are run-to-completion units. A pass runs every registered poller
//! once, in registration order, on one task, so only one poller body
//! executes at a time. A poller that overruns its budget is logged; it is
//! never preempted.

use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::limits;

/// A periodic unit of work.
pub trait Poller: Send {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Run one iteration. Must return within the scheduler's budget.
    fn poll(&mut self);
}

struct FnPoller<F> {
    name: String,
    f: F,
}

impl<F: FnMut() + Send> Poller for FnPoller<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self) {
        (self.f)()
    }
}

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Pollers run in this pass.
    pub ran: usize,
    /// Names of pollers that exceeded the budget.
    pub overruns: Vec<String>,
}

/// Round-robin poller dispatcher.
pub struct Scheduler {
    pollers: Vec<Box<dyn Poller>>,
    budget: Duration,
    passes: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_budget(Duration::from_millis(limits::POLLER_BUDGET_MS))
    }

    pub fn with_budget(budget: Duration) -> Self {
        Self {
            pollers: Vec::new(),
            budget,
            passes: 0,
        }
    }

    /// Append a poller to the rotation.
    pub fn register(&mut self, poller: Box<dyn Poller>) {
        tracing::debug!(poller = poller.name(), "Poller registered");
        self.pollers.push(poller);
    }

    /// Append a closure as a named poller.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.register(Box::new(FnPoller {
            name: name.into(),
            f,
        }));
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }

    /// Completed passes so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Run every poller once, in registration order.
    pub fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        for poller in self.pollers.iter_mut() {
            let started = Instant::now();
            poller.poll();
            let elapsed = started.elapsed();
            report.ran += 1;
            if elapsed > self.budget {
                tracing::warn!(
                    poller = poller.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = self.budget.as_millis() as u64,
                    "Poller exceeded its budget"
                );
                report.overruns.push(poller.name().to_string());
            }
        }
        self.passes += 1;
        report
    }

    /// Drive passes from a tokio interval until the task is aborted.
    pub fn spawn(mut self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_pass();
            }
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
