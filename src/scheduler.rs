//! Cron scheduling and the per-task single-flight run gate.
//!
//! One registration loop per enabled task computes the next fire from the
//! task's cron expression and sleeps until then. A fire with the task
//! already running is skipped, not queued; manual runs go through the same
//! gate. Cancelling a run fires its token; the scanner observes it and
//! frees its own run-state slot.

use crate::models::Task;
use crate::scanner::{run_scan_task, ScanDeps};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============ Run-state table ============

/// The per-task map of run cancel handles. Presence means "running".
#[derive(Default)]
pub struct RunStates {
    inner: Mutex<HashMap<i64, CancellationToken>>,
}

impl RunStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the task's run slot. `None` when a run is already in flight.
    pub fn try_claim(&self, task_id: i64) -> Option<CancellationToken> {
        let mut inner = self.inner.lock();
        if inner.contains_key(&task_id) {
            return None;
        }
        let token = CancellationToken::new();
        inner.insert(task_id, token.clone());
        Some(token)
    }

    /// Fire the cancel handle of a running task, if any. The slot stays
    /// occupied until the scanner releases it.
    pub fn cancel(&self, task_id: i64) -> bool {
        match self.inner.lock().get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running task and clear the table (scheduler refresh).
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for (_, token) in inner.drain() {
            token.cancel();
        }
    }

    /// Fire every cancel handle but keep the slots occupied, so callers
    /// can watch the runs wind down (process shutdown).
    pub fn signal_all(&self) {
        for token in self.inner.lock().values() {
            token.cancel();
        }
    }

    /// Free a task's slot once its run has wound down.
    pub fn release(&self, task_id: i64) {
        self.inner.lock().remove(&task_id);
    }

    pub fn is_running(&self, task_id: i64) -> bool {
        self.inner.lock().contains_key(&task_id)
    }

    /// Number of runs still holding a slot.
    pub fn active_count(&self) -> usize {
        self.inner.lock().len()
    }
}

// ============ Cron parsing ============

/// Parse a cron expression, accepting the 6-field (seconds) dialect first
/// and falling back to the 5-field standard form by prefixing a seconds
/// column of `0`. An expression valid under both dialects keeps its
/// 6-field meaning.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    match cron::Schedule::from_str(expr) {
        Ok(schedule) => Ok(schedule),
        Err(err) => {
            if expr.split_whitespace().count() == 5 {
                return cron::Schedule::from_str(&format!("0 {}", expr));
            }
            Err(err)
        }
    }
}

/// Whether an expression parses under either accepted dialect. Used at
/// task create/update time.
pub fn validate_cron(expr: &str) -> bool {
    parse_cron(expr).is_ok()
}

// ============ Scheduler ============

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    deps: ScanDeps,
    registrations: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(deps: ScanDeps) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                deps,
                registrations: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn run_states(&self) -> &Arc<RunStates> {
        &self.inner.deps.run_states
    }

    /// Create the engine: load registrations and start firing.
    pub fn init(&self) {
        log::info!("Task scheduler initialized");
        self.refresh();
        log::info!("Scheduler started");
    }

    /// Cancel every running task, drop all registrations and reload the
    /// enabled tasks from the store. Called after any task mutation.
    pub fn refresh(&self) {
        self.inner.deps.run_states.cancel_all();

        let mut registrations = self.inner.registrations.lock();
        for handle in registrations.drain(..) {
            handle.abort();
        }

        let tasks = match self.inner.deps.store.enabled_tasks() {
            Ok(tasks) => tasks,
            Err(err) => {
                log::error!("Failed to load tasks from the store: {}", err);
                return;
            }
        };

        log::info!("Found {} enabled tasks, registering schedules...", tasks.len());
        for task in tasks {
            let schedule = match parse_cron(&task.cron) {
                Ok(schedule) => schedule,
                Err(err) => {
                    log::error!(
                        "task '{}': cron expression '{}' rejected: {}",
                        task.name,
                        task.cron,
                        err
                    );
                    continue;
                }
            };
            registrations.push(tokio::spawn(schedule_loop(self.clone(), task, schedule)));
        }
    }

    /// Launch a run outside the schedule. `false` when the task is already
    /// running.
    pub fn run_manual(&self, task: Task) -> bool {
        let cancel = match self.inner.deps.run_states.try_claim(task.id) {
            Some(cancel) => cancel,
            None => return false,
        };
        log::info!("task '{}': manual run accepted", task.name);
        tokio::spawn(run_scan_task(self.inner.deps.clone(), task, cancel));
        true
    }

    /// Signal a running task to stop.
    pub fn stop(&self, task_id: i64) {
        if self.inner.deps.run_states.cancel(task_id) {
            log::info!("task #{}: stop signal sent", task_id);
        }
    }

    pub fn is_running(&self, task_id: i64) -> bool {
        self.inner.deps.run_states.is_running(task_id)
    }

    /// Cancel all runs and registrations (process shutdown). Run slots stay
    /// occupied until each scanner frees its own, so `active_count` tracks
    /// the wind-down.
    pub fn shutdown(&self) {
        let mut registrations = self.inner.registrations.lock();
        for handle in registrations.drain(..) {
            handle.abort();
        }
        self.inner.deps.run_states.signal_all();
    }
}

/// One registration: sleep until the next cron occurrence, then fire the
/// task through the single-flight gate.
async fn schedule_loop(scheduler: Scheduler, task: Task, schedule: cron::Schedule) {
    loop {
        let next = match schedule.upcoming(Utc).next() {
            Some(next) => next,
            None => {
                log::warn!("task '{}': schedule has no future occurrence", task.name);
                return;
            }
        };
        let wait = match (next - Utc::now()).to_std() {
            Ok(wait) => wait,
            Err(_) => continue,
        };
        tokio::time::sleep(wait).await;

        match scheduler.inner.deps.run_states.try_claim(task.id) {
            Some(cancel) => {
                log::info!("task '{}': scheduled run firing", task.name);
                tokio::spawn(run_scan_task(
                    scheduler.inner.deps.clone(),
                    task.clone(),
                    cancel,
                ));
            }
            None => {
                log::warn!(
                    "task '{}': still running, skipping this scheduled fire",
                    task.name
                );
            }
        }
    }
}
