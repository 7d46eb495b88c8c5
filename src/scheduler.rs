//! Cron-driven job scheduler.
//!
//! Each registered job gets its own dispatch loop that sleeps until the next
//! fire time and spawns an execution. Executions of one job may overlap when a
//! run outlives its schedule interval. A job's error is logged and counted,
//! never propagated.

use crate::error::SchedulerError;
use crate::health::HealthFlag;
use crate::internal_metrics::{JobOutcome, Metrics};
use crate::task_manager::TaskManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use itertools::Itertools;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// A unit of work run on a schedule.
#[async_trait]
pub trait Job: Send + Sync {
    /// Runs the job once.
    ///
    /// `cancel` flips to `true` when the scheduler is stopping; long-running
    /// jobs should watch it and return early.
    async fn run(&self, cancel: watch::Receiver<bool>) -> anyhow::Result<()>;
}

/// Resolves once `rx` carries `true`.
///
/// If the sender is gone the signal can never fire and this never resolves.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Parses a cron expression.
///
/// Standard 5-field expressions get a `0` seconds field prepended and their
/// day-of-week field (`0`-`7`, Sunday is `0` or `7`) translated to the `cron`
/// crate's numbering (`1`-`7`, Sunday is `1`). 6 and 7-field expressions are
/// passed through.
pub fn parse_cron(expression: &str) -> Result<Schedule, cron::error::Error> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day_of_month, month, day_of_week] => {
            let day_of_week = translate_day_of_week(day_of_week);
            Schedule::from_str(&format!(
                "0 {minute} {hour} {day_of_month} {month} {day_of_week}"
            ))
        }
        _ => Schedule::from_str(expression.trim()),
    }
}

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrites a standard day-of-week field as an explicit list of `cron` crate
/// day numbers.
///
/// A field that cannot be read is returned unchanged so the `cron` parser
/// reports the error.
fn translate_day_of_week(field: &str) -> String {
    if field == "*" || field == "?" {
        return field.to_string();
    }
    let mut days = std::collections::BTreeSet::new();
    for item in field.split(',') {
        match standard_days(item) {
            Some(item_days) => days.extend(item_days),
            None => return field.to_string(),
        }
    }
    days.into_iter().map(|day| day + 1).join(",")
}

/// Expands one list item (`3`, `MON-FRI`, `*/2`, `1-5/2`, `5-7`) into Sunday=0
/// day numbers.
fn standard_days(item: &str) -> Option<Vec<u32>> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };
    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((start, end)) = range.split_once('-') {
        (day_value(start)?, day_value(end)?)
    } else {
        let day = day_value(range)?;
        if item.contains('/') {
            (day, day.max(6))
        } else {
            (day, day)
        }
    };
    if start > end {
        return None;
    }
    Some((start..=end).step_by(step).map(|day| day % 7).collect())
}

/// A single day as `0`-`7`, accepting three-letter names.
fn day_value(token: &str) -> Option<u32> {
    match token.parse::<u32>() {
        Ok(day) => (day <= 7).then_some(day),
        Err(_) => WEEKDAYS
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .map(|index| index as u32),
    }
}

struct ScheduledJob {
    name: String,
    schedule: Schedule,
    job: Arc<dyn Job>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopped,
}

/// Runs named jobs on cron schedules.
///
/// Lifecycle: `new` → `add_job`* → `start` → `stop`. Jobs can only be added
/// while idle, and a stopped scheduler cannot be restarted.
pub struct JobScheduler {
    timezone: Tz,
    stop_grace: Duration,
    metrics: Metrics,
    jobs: Vec<ScheduledJob>,
    state: State,
    cancel_tx: watch::Sender<bool>,
    task_manager: TaskManager,
    health: HealthFlag,
}

impl JobScheduler {
    /// Creates an idle scheduler evaluating schedules in `timezone`.
    ///
    /// `stop_grace` bounds how long `stop` waits for in-flight runs before
    /// aborting them.
    pub fn new(timezone: Tz, stop_grace: Duration, metrics: Metrics) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            timezone,
            stop_grace,
            metrics,
            jobs: Vec::new(),
            state: State::Idle,
            cancel_tx,
            task_manager: TaskManager::new(cancel_rx),
            health: HealthFlag::new("scheduler"),
        }
    }

    /// Registers a job under a unique name.
    pub fn add_job(
        &mut self,
        name: impl Into<String>,
        expression: &str,
        job: Arc<dyn Job>,
    ) -> Result<(), SchedulerError> {
        match self.state {
            State::Idle => {}
            State::Running => return Err(SchedulerError::AlreadyStarted),
            State::Stopped => return Err(SchedulerError::Stopped),
        }
        let name = name.into();
        if self.jobs.iter().any(|j| j.name == name) {
            return Err(SchedulerError::DuplicateJob(name));
        }
        let schedule = parse_cron(expression).map_err(|source| SchedulerError::InvalidCron {
            name: name.clone(),
            expression: expression.to_string(),
            source,
        })?;
        info!(job = %name, schedule = %expression, "Registered job");
        self.jobs.push(ScheduledJob {
            name,
            schedule,
            job,
        });
        Ok(())
    }

    /// Starts one dispatch loop per registered job.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        match self.state {
            State::Idle => {}
            State::Running => return Err(SchedulerError::AlreadyStarted),
            State::Stopped => return Err(SchedulerError::Stopped),
        }
        self.state = State::Running;
        for job in self.jobs.drain(..) {
            let loop_name = format!("scheduler:{}", job.name);
            let cancel_rx = self.task_manager.get_shutdown_rx();
            self.task_manager.spawn(
                loop_name,
                dispatch_loop(
                    job,
                    self.timezone,
                    self.stop_grace,
                    self.metrics.clone(),
                    cancel_rx,
                ),
            );
        }
        info!(jobs = self.task_manager.len(), timezone = %self.timezone, "Scheduler started");
        Ok(())
    }

    /// Stops firing and waits until every dispatch loop has exited.
    ///
    /// In-flight runs see their cancellation signal fire. Runs still going
    /// after the grace period are aborted and recorded as failed.
    pub async fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.state = State::Stopped;
        self.health.set_healthy(false);
        let _ = self.cancel_tx.send(true);
        self.task_manager.clone().shutdown().await;
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// A health flag that turns unhealthy once the scheduler stops.
    pub fn health(&self) -> HealthFlag {
        self.health.clone()
    }

    /// Lists the next `count` fire times of every registered job.
    ///
    /// Only meaningful before `start`, which hands the jobs to their loops.
    pub fn upcoming(&self, count: usize) -> Vec<(String, Vec<DateTime<Tz>>)> {
        self.jobs
            .iter()
            .map(|j| {
                let times = j.schedule.upcoming(self.timezone).take(count).collect();
                (j.name.clone(), times)
            })
            .collect()
    }
}

async fn dispatch_loop(
    job: ScheduledJob,
    timezone: Tz,
    stop_grace: Duration,
    metrics: Metrics,
    mut cancel: watch::Receiver<bool>,
) {
    let mut running: JoinSet<()> = JoinSet::new();
    let mut last_fire = Utc::now().with_timezone(&timezone);

    loop {
        let now = Utc::now().with_timezone(&timezone);
        // Fire times missed while asleep are skipped, not replayed.
        let from = std::cmp::max(last_fire, now);
        let Some(next) = job.schedule.after(&from).next() else {
            info!(job = %job.name, "Schedule has no further fire times");
            while let Some(result) = running.join_next().await {
                log_join_result(&job.name, result);
            }
            return;
        };
        let wait = (next.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        debug!(job = %job.name, next = %next, "Waiting for next fire time");

        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    drain(&job.name, &mut running, stop_grace).await;
                    return;
                }
                Some(result) = running.join_next(), if !running.is_empty() => {
                    log_join_result(&job.name, result);
                }
                _ = &mut sleep => break,
            }
        }

        last_fire = next;
        running.spawn(execute(
            job.name.clone(),
            job.job.clone(),
            cancel.clone(),
            metrics.clone(),
        ));
    }
}

/// Records the outcome of one run when dropped.
///
/// A run that is aborted or panics never sets an outcome and is recorded as
/// failed.
struct RunRecord<'a> {
    name: &'a str,
    metrics: &'a Metrics,
    started: Instant,
    outcome: Option<JobOutcome>,
}

impl Drop for RunRecord<'_> {
    fn drop(&mut self) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None => {
                warn!(job = %self.name, "Job run was interrupted before completing");
                JobOutcome::Fail
            }
        };
        self.metrics
            .record_job_finished(self.name, outcome, self.started.elapsed());
    }
}

async fn execute(
    name: String,
    job: Arc<dyn Job>,
    cancel: watch::Receiver<bool>,
    metrics: Metrics,
) {
    metrics.increment_job_started(&name);
    let mut record = RunRecord {
        name: &name,
        metrics: &metrics,
        started: Instant::now(),
        outcome: None,
    };
    debug!(job = %name, "Job started");

    match job.run(cancel).await {
        Ok(()) => {
            info!(job = %name, elapsed = ?record.started.elapsed(), "Job finished");
            record.outcome = Some(JobOutcome::Success);
        }
        Err(e) => {
            error!(job = %name, elapsed = ?record.started.elapsed(), error = ?e, "Job failed");
            record.outcome = Some(JobOutcome::Fail);
        }
    }
}

async fn drain(name: &str, running: &mut JoinSet<()>, stop_grace: Duration) {
    if running.is_empty() {
        return;
    }
    info!(job = %name, in_flight = running.len(), "Waiting for in-flight runs");
    let drained = tokio::time::timeout(stop_grace, async {
        while let Some(result) = running.join_next().await {
            log_join_result(name, result);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            job = %name,
            in_flight = running.len(),
            grace = ?stop_grace,
            "Aborting runs still in flight after grace period"
        );
        running.abort_all();
        while let Some(result) = running.join_next().await {
            log_join_result(name, result);
        }
    }
}

fn log_join_result(name: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(job = %name, error = %e, "Job run panicked");
        }
    }
}
